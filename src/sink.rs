//! The writer facade applications hold

use crate::config::SinkConfig;
use crate::errors::{Result, SinkError};
use crate::flusher::{run_collector, Flusher};
use crate::parser::{parse_line, ParseOptions};
use crate::point::{FieldValue, Point};
use crate::queue::PointQueue;
use crate::transport::{HttpTransport, PointWriter};
use arc_swap::ArcSwap;
use chrono::FixedOffset;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Log-shipping sink: parses delimited log lines into points and ships them
/// to InfluxDB in asynchronous batches.
///
/// `write` does the parsing inline and hands the point to a background
/// collector through a capacity-one channel; that hand-off is the only place
/// a caller can block. A second background task drains the hand-off queue on
/// a fixed cadence, repairs timestamp collisions and writes one batch per
/// cycle. Must be constructed inside a tokio runtime.
pub struct InfluxLogSink {
    options: Arc<ArcSwap<ParseOptions>>,
    sender: mpsc::Sender<Point>,
    shutdown: watch::Sender<bool>,
    collector_handle: JoinHandle<()>,
    flusher_handle: JoinHandle<()>,
    queue: Arc<PointQueue>,
}

impl InfluxLogSink {
    /// Create a sink writing to the InfluxDB instance named in `config`.
    pub fn new(config: SinkConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::from_config(&config)?);
        Self::with_writer(config, transport)
    }

    /// Create a sink with a caller-supplied backend writer.
    pub fn with_writer(config: SinkConfig, writer: Arc<dyn PointWriter>) -> Result<Self> {
        config.validate().map_err(SinkError::Config)?;

        let options = Arc::new(ArcSwap::from_pointee(ParseOptions::from_config(&config)?));
        let queue = Arc::new(PointQueue::new());

        // Capacity one: the producer side suspends until the collector takes
        // the point, which is the pipeline's sole backpressure point.
        let (sender, receiver) = mpsc::channel(1);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let collector_handle = tokio::spawn(run_collector(receiver, Arc::clone(&queue)));

        let flusher = Flusher::new(
            Arc::clone(&queue),
            writer,
            config.flush_interval,
            config.write_cooldown,
            shutdown_rx,
        );
        let flusher_handle = tokio::spawn(flusher.run());

        info!(
            "log sink started for measurement `{}` on database `{}`",
            config.measurement, config.database
        );

        Ok(Self {
            options,
            sender,
            shutdown,
            collector_handle,
            flusher_handle,
            queue,
        })
    }

    /// Parse one log line and enqueue it for the next flush cycle.
    ///
    /// Returns the number of bytes accepted. Any parse failure rejects the
    /// line without touching the pipeline; the caller decides whether to
    /// retry or drop it.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        let options = self.options.load();
        let point = parse_line(buf, &options)?;

        self.sender
            .send(point)
            .await
            .map_err(|_| SinkError::ChannelClosed)?;

        Ok(buf.len())
    }

    /// Replace the static tags merged into every subsequent point.
    pub fn set_additional_tags(&self, tags: BTreeMap<String, String>) {
        self.options.rcu(|options| {
            let mut next = ParseOptions::clone(options);
            next.additional_tags = tags.clone();
            next
        });
    }

    /// Replace the static fields merged into every subsequent point.
    pub fn set_additional_fields(&self, fields: BTreeMap<String, FieldValue>) {
        self.options.rcu(|options| {
            let mut next = ParseOptions::clone(options);
            next.additional_fields = fields.clone();
            next
        });
    }

    /// Change the offset line timestamps are interpreted in.
    pub fn set_timezone(&self, timezone: FixedOffset) {
        self.options.rcu(|options| {
            let mut next = ParseOptions::clone(options);
            next.timezone = timezone;
            next
        });
    }

    /// Points currently waiting for the next flush cycle.
    pub async fn queued_len(&self) -> usize {
        self.queue.len().await
    }

    /// Stop the pipeline: close the producer channel, let the collector
    /// drain it, force one final flush, and wait for both tasks to exit.
    pub async fn shutdown(self) -> Result<()> {
        let InfluxLogSink {
            sender,
            shutdown,
            collector_handle,
            flusher_handle,
            ..
        } = self;

        drop(sender);
        if collector_handle.await.is_err() {
            warn!("collector task ended abnormally");
        }

        let _ = shutdown.send(true);
        if flusher_handle.await.is_err() {
            warn!("flush task ended abnormally");
        }

        info!("log sink shutdown complete");
        Ok(())
    }
}
