//! HTTP transport layer for writing point batches to InfluxDB

use crate::config::SinkConfig;
use crate::errors::{Result, SinkError};
use crate::point::Batch;
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn, error};

/// Asynchronous destination for point batches.
///
/// The flush loop only knows this boundary; [`HttpTransport`] is the real
/// backend, tests substitute a recording implementation.
#[async_trait]
pub trait PointWriter: Send + Sync {
    /// Write one batch in a single backend call.
    async fn write_batch(&self, batch: &Batch) -> Result<()>;
}

/// InfluxDB 1.x HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl HttpTransport {
    /// Create a transport from the sink configuration
    pub fn from_config(config: &SinkConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(format!("influx_log_sink/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SinkError::Http)?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    /// Single attempt to write a batch
    async fn write_attempt(&self, url: &str, body: String) -> Result<()> {
        let mut query: Vec<(&str, &str)> = vec![("db", &self.database), ("precision", "ns")];
        if let Some(username) = &self.username {
            query.push(("u", username));
        }
        if let Some(password) = &self.password {
            query.push(("p", password));
        }

        let response = self
            .client
            .post(url)
            .query(&query)
            .body(body)
            .send()
            .await
            .map_err(SinkError::Http)?;

        self.handle_response(response).await
    }

    /// Map the HTTP response onto the error taxonomy
    async fn handle_response(&self, response: Response) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());

        let message = match status.as_u16() {
            400 => format!("malformed line protocol: {}", error_body),
            401 | 403 => format!("authentication failed: {}", error_body),
            404 => format!("database `{}` not found: {}", self.database, error_body),
            413 => format!("batch too large: {}", error_body),
            429 => format!("rate limited: {}", error_body),
            500..=599 => format!("server error: {}", error_body),
            _ => format!("unexpected response {}: {}", status, error_body),
        };

        Err(SinkError::Backend(message))
    }

    /// Check whether the backend is reachable via its `/ping` endpoint
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/ping", self.url);
        debug!("pinging backend at {}", url);

        let response = self.client.get(&url).send().await.map_err(SinkError::Http)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SinkError::Backend(format!(
                "ping failed with status {}",
                response.status()
            )))
        }
    }

    /// Test connectivity to the backend, logging the outcome
    pub async fn test_connectivity(&self) -> bool {
        match self.ping().await {
            Ok(()) => {
                info!("backend connectivity test successful");
                true
            }
            Err(e) => {
                warn!("backend connectivity test failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl PointWriter for HttpTransport {
    async fn write_batch(&self, batch: &Batch) -> Result<()> {
        let url = format!("{}/write", self.url);
        let body = batch.to_line_protocol();

        debug!(
            "writing batch {} with {} points to {}",
            batch.batch_id,
            batch.len(),
            url
        );

        let mut attempt = 0;
        let mut last_error = None;

        while attempt <= self.max_retries {
            match self.write_attempt(&url, body.clone()).await {
                Ok(()) => {
                    debug!("batch {} accepted (attempt {})", batch.batch_id, attempt + 1);
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                    attempt += 1;

                    if attempt <= self.max_retries {
                        let backoff_ms = self.retry_backoff_ms * 2_u64.pow(attempt - 1);
                        warn!(
                            "failed to write batch {} (attempt {}), retrying in {}ms: {}",
                            batch.batch_id,
                            attempt,
                            backoff_ms,
                            last_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                        );
                        sleep(Duration::from_millis(backoff_ms)).await;
                    }
                }
            }
        }

        let final_error = last_error
            .unwrap_or_else(|| SinkError::Backend("all retry attempts failed".to_string()));

        error!(
            "failed to write batch {} after {} attempts: {}",
            batch.batch_id,
            self.max_retries + 1,
            final_error
        );

        Err(final_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{FieldValue, Point};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(url: &str) -> SinkConfig {
        SinkConfig {
            url: url.to_string(),
            database: "logs".to_string(),
            max_retries: 2,
            retry_backoff_ms: 10,
            ..SinkConfig::default()
        }
    }

    fn test_batch() -> Batch {
        let mut fields = BTreeMap::new();
        fields.insert("message".to_string(), FieldValue::from("hello"));

        let point = Point::new(
            "app_logs",
            BTreeMap::new(),
            fields,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        )
        .unwrap();

        Batch::new(vec![point])
    }

    #[tokio::test]
    async fn test_write_batch_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/write"))
            .and(query_param("db", "logs"))
            .and(query_param("precision", "ns"))
            .and(body_string_contains("app_logs"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::from_config(&test_config(&server.uri())).unwrap();
        transport.write_batch(&test_batch()).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_batch_sends_credentials() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/write"))
            .and(query_param("u", "admin"))
            .and(query_param("p", "secret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let config = SinkConfig {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..test_config(&server.uri())
        };

        let transport = HttpTransport::from_config(&config).unwrap();
        transport.write_batch(&test_batch()).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_batch_retries_until_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/write"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/write"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::from_config(&test_config(&server.uri())).unwrap();
        transport.write_batch(&test_batch()).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_batch_exhausts_retries() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/write"))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
            .expect(3) // initial attempt + 2 retries
            .mount(&server)
            .await;

        let transport = HttpTransport::from_config(&test_config(&server.uri())).unwrap();
        let result = transport.write_batch(&test_batch()).await;

        assert!(matches!(result, Err(SinkError::Backend(msg)) if msg.contains("disk full")));
    }

    #[tokio::test]
    async fn test_ping() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let transport = HttpTransport::from_config(&test_config(&server.uri())).unwrap();
        assert!(transport.ping().await.is_ok());
        assert!(transport.test_connectivity().await);
    }
}
