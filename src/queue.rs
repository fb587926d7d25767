//! In-memory hand-off queue between the collector and the flush loop

use crate::point::Point;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::debug;

/// Unbounded FIFO queue of points awaiting the next flush cycle.
///
/// Any number of tasks may `push`; exactly one consumer (the flush loop)
/// calls `drain_all`. Points pushed by the same producer come back out in
/// push order.
#[derive(Debug, Default)]
pub struct PointQueue {
    points: RwLock<VecDeque<Point>>,
}

impl PointQueue {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(VecDeque::new()),
        }
    }

    /// Append a point; only cost is the lock acquisition.
    pub async fn push(&self, point: Point) {
        let mut points = self.points.write().await;
        points.push_back(point);
        debug!("queued point, current queue size: {}", points.len());
    }

    /// Atomically remove and return everything currently queued.
    pub async fn drain_all(&self) -> Vec<Point> {
        let mut points = self.points.write().await;
        points.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{FieldValue, Point};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn point(message: &str) -> Point {
        let mut fields = BTreeMap::new();
        fields.insert("message".to_string(), FieldValue::from(message));
        Point::new(
            "app_logs",
            BTreeMap::new(),
            fields,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_push_and_drain_preserve_order() {
        let queue = PointQueue::new();

        queue.push(point("first")).await;
        queue.push(point("second")).await;
        queue.push(point("third")).await;
        assert_eq!(queue.len().await, 3);

        let drained = queue.drain_all().await;
        let messages: Vec<_> = drained
            .iter()
            .map(|p| p.fields.get("message").cloned().unwrap())
            .collect();

        assert_eq!(
            messages,
            vec![
                FieldValue::from("first"),
                FieldValue::from("second"),
                FieldValue::from("third"),
            ]
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_empty_queue() {
        let queue = PointQueue::new();
        assert!(queue.drain_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_pushers() {
        let queue = Arc::new(PointQueue::new());
        let mut handles = Vec::new();

        for producer in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    queue.push(point(&format!("p{}-{}", producer, i))).await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let drained = queue.drain_all().await;
        assert_eq!(drained.len(), 100);

        // Per-producer FIFO order survives whatever interleaving happened.
        for producer in 0..4 {
            let prefix = format!("p{}-", producer);
            let ordered: Vec<_> = drained
                .iter()
                .filter_map(|p| match p.fields.get("message") {
                    Some(FieldValue::String(s)) if s.starts_with(&prefix) => {
                        s[prefix.len()..].parse::<usize>().ok()
                    }
                    _ => None,
                })
                .collect();
            assert_eq!(ordered, (0..25).collect::<Vec<_>>());
        }
    }
}
