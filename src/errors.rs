//! Error types for the log sink

use std::fmt;

pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Debug)]
pub enum SinkError {
    /// Log line had fewer columns than the field mapping requires
    TooFewColumns { expected: usize, actual: usize },

    /// Timestamp column did not match the expected layout
    TimestampParse(chrono::ParseError),

    /// Field-mapping classification was not `ts`, `tag:<name>` or `field:<name>`
    InvalidClassification(String),

    /// Point could not be constructed (empty measurement, no fields, ...)
    PointConstruction(String),

    /// HTTP request failed
    Http(reqwest::Error),

    /// Backend rejected the write
    Backend(String),

    /// Configuration error
    Config(String),

    /// Background collector is gone; the sink is shut down
    ChannelClosed,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::TooFewColumns { expected, actual } => write!(
                f,
                "log line has too few columns: expected at least {}, got {}",
                expected, actual
            ),
            SinkError::TimestampParse(err) => write!(f, "timestamp parse error: {}", err),
            SinkError::InvalidClassification(c) => write!(
                f,
                "classification must be `ts`, `tag:<name>` or `field:<name>`, got `{}`",
                c
            ),
            SinkError::PointConstruction(msg) => write!(f, "point construction error: {}", msg),
            SinkError::Http(err) => write!(f, "HTTP error: {}", err),
            SinkError::Backend(msg) => write!(f, "backend write error: {}", msg),
            SinkError::Config(msg) => write!(f, "configuration error: {}", msg),
            SinkError::ChannelClosed => write!(f, "collector channel closed"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::TimestampParse(err) => Some(err),
            SinkError::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<chrono::ParseError> for SinkError {
    fn from(err: chrono::ParseError) -> Self {
        SinkError::TimestampParse(err)
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Http(err)
    }
}
