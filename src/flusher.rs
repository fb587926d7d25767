//! Background tasks: channel collector and periodic batch flusher

use crate::point::{Batch, Point};
use crate::queue::PointQueue;
use crate::transport::PointWriter;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error};

/// Move points from the producer rendezvous channel into the hand-off queue.
///
/// Runs until every sender is dropped, which is the shutdown signal for the
/// producer side.
pub(crate) async fn run_collector(mut rx: mpsc::Receiver<Point>, queue: Arc<PointQueue>) {
    while let Some(point) = rx.recv().await {
        queue.push(point).await;
    }
    debug!("producer channel closed, collector task exiting");
}

/// The periodic drain-repair-write cycle.
pub(crate) struct Flusher {
    queue: Arc<PointQueue>,
    writer: Arc<dyn PointWriter>,
    flush_interval: Duration,
    write_cooldown: Duration,
    shutdown: watch::Receiver<bool>,
    previous_timestamp: Option<DateTime<Utc>>,
}

impl Flusher {
    pub(crate) fn new(
        queue: Arc<PointQueue>,
        writer: Arc<dyn PointWriter>,
        flush_interval: Duration,
        write_cooldown: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            writer,
            flush_interval,
            write_cooldown,
            shutdown,
            previous_timestamp: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let points = self.queue.drain_all().await;

            if points.is_empty() {
                tokio::select! {
                    _ = self.shutdown.changed() => break,
                    _ = sleep(self.flush_interval) => continue,
                }
            }

            self.flush(points).await;

            // Unconditional pause after a write; caps the backend write rate
            // even when the queue never runs dry.
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = sleep(self.write_cooldown) => {}
            }
        }

        // One forced flush of whatever arrived before the collector stopped.
        let remaining = self.queue.drain_all().await;
        if !remaining.is_empty() {
            self.flush(remaining).await;
        }

        debug!("flush loop exiting");
    }

    async fn flush(&mut self, points: Vec<Point>) {
        let repaired = repair_timestamps(points, &mut self.previous_timestamp);
        let batch = Batch::new(repaired);

        debug!("flushing batch {} with {} points", batch.batch_id, batch.len());

        if let Err(e) = self.writer.write_batch(&batch).await {
            // At-most-once: the batch is discarded, the loop continues.
            error!("dropping batch {} of {} points: {}", batch.batch_id, batch.len(), e);
        }
    }
}

/// Rewrite timestamps so no two consecutive points land on an instant the
/// backend would treat as the same point.
///
/// The backend identifies a point by (measurement, tag set, timestamp); a
/// point at, before, or less than one millisecond after its predecessor is
/// moved to the predecessor's timestamp plus one nanosecond. `previous`
/// carries over between flush cycles so the rule also holds across batch
/// boundaries.
pub(crate) fn repair_timestamps(
    points: Vec<Point>,
    previous: &mut Option<DateTime<Utc>>,
) -> Vec<Point> {
    let mut repaired = Vec::with_capacity(points.len());

    for mut point in points {
        if let Some(prev) = *previous {
            if point.timestamp < prev + TimeDelta::milliseconds(1) {
                point.timestamp = prev + TimeDelta::nanoseconds(1);
            }
        }
        *previous = Some(point.timestamp);
        repaired.push(point);
    }

    repaired
}
