// src/queue/mod.rs
// Bounded min-priority queue with aging-based starvation prevention.
//
// Lower `effective_priority` is dequeued first; ties break on earlier
// `entry_time`. Aging runs once per dequeue so enqueue stays O(log n).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::config::QueueConfig;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub depth: usize,
    pub min_effective_priority: Option<i64>,
    pub max_effective_priority: Option<i64>,
    pub oldest_wait_seconds: f64,
}

struct QueueItem<T> {
    effective_priority: i64,
    original_priority: i64,
    entry_time: Instant,
    request_id: String,
    payload: T,
}

impl<T> PartialEq for QueueItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.effective_priority == other.effective_priority && self.entry_time == other.entry_time
    }
}
impl<T> Eq for QueueItem<T> {}

impl<T> PartialOrd for QueueItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueueItem<T> {
    // BinaryHeap is a max-heap; reverse so the smallest (priority, entry_time)
    // pair compares greatest and surfaces first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.effective_priority, other.entry_time).cmp(&(self.effective_priority, self.entry_time))
    }
}

struct Inner<T> {
    heap: BinaryHeap<QueueItem<T>>,
}

pub struct PriorityQueue<T> {
    config: QueueConfig,
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

impl<T> PriorityQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue `payload` under `request_id`. `priority` defaults to the
    /// configured default when omitted.
    pub async fn enqueue(
        &self,
        request_id: impl Into<String>,
        payload: T,
        priority: Option<i64>,
    ) -> Result<(), GatewayError> {
        let priority = priority.unwrap_or(self.config.default_priority);
        let mut inner = self.inner.lock().await;

        if inner.heap.len() >= self.config.max_size {
            crate::metrics::record_queue_full();
            return Err(GatewayError::QueueFull);
        }

        inner.heap.push(QueueItem {
            effective_priority: priority,
            original_priority: priority,
            entry_time: Instant::now(),
            request_id: request_id.into(),
            payload,
        });

        crate::metrics::record_enqueue(priority);
        crate::metrics::set_queue_depth(inner.heap.len());
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Block until an item is available, apply aging, and pop the head.
    pub async fn dequeue(&self) -> (String, T) {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if !inner.heap.is_empty() {
                    if self.config.starvation_prevention {
                        self.age(&mut inner.heap);
                    }
                    if let Some(item) = inner.heap.pop() {
                        crate::metrics::set_queue_depth(inner.heap.len());
                        return (item.request_id, item.payload);
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    fn age(&self, heap: &mut BinaryHeap<QueueItem<T>>) {
        let now = Instant::now();
        let interval = self.config.aging_interval_sec.max(1);
        let mut changed = false;

        let items: Vec<QueueItem<T>> = std::mem::take(heap).into_vec();
        let mut items: Vec<QueueItem<T>> = items
            .into_iter()
            .map(|mut item| {
                let waited = now.duration_since(item.entry_time).as_secs();
                let boost = (waited / interval) as i64;
                if boost > 0 {
                    let new_priority = (item.original_priority - boost).max(0);
                    if new_priority != item.effective_priority {
                        changed = true;
                    }
                    item.effective_priority = new_priority;
                }
                item
            })
            .collect();

        if changed {
            debug!("re-heapifying after aging pass");
        }
        heap.extend(items.drain(..));
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let oldest_wait_seconds = inner
            .heap
            .iter()
            .map(|i| i.entry_time.elapsed().as_secs_f64())
            .fold(0.0_f64, f64::max);

        QueueStats {
            depth: inner.heap.len(),
            min_effective_priority: inner.heap.iter().map(|i| i.effective_priority).min(),
            max_effective_priority: inner.heap.iter().map(|i| i.effective_priority).max(),
            oldest_wait_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg(max_size: usize, starvation: bool, aging_interval_sec: u64) -> QueueConfig {
        QueueConfig {
            max_size,
            starvation_prevention: starvation,
            aging_interval_sec,
            default_priority: 5,
        }
    }

    #[tokio::test]
    async fn higher_priority_overtakes_fifo() {
        let q = PriorityQueue::new(cfg(10, false, 30));
        q.enqueue("a", "A", Some(10)).await.unwrap();
        q.enqueue("b", "B", Some(1)).await.unwrap();

        let (id, _) = q.dequeue().await;
        assert_eq!(id, "b");
        let (id, _) = q.dequeue().await;
        assert_eq!(id, "a");
    }

    #[tokio::test]
    async fn full_queue_rejects_enqueue() {
        let q = PriorityQueue::new(cfg(1, false, 30));
        q.enqueue("x", "X", Some(5)).await.unwrap();
        let err = q.enqueue("y", "Y", Some(1)).await.unwrap_err();
        assert!(matches!(err, GatewayError::QueueFull));

        let stats = q.stats().await;
        assert_eq!(stats.depth, 1);
    }

    #[tokio::test]
    async fn aging_lets_old_low_priority_item_win() {
        let q = PriorityQueue::new(cfg(10, true, 1));
        q.enqueue("old", "OLD", Some(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        q.enqueue("new", "NEW", Some(9)).await.unwrap();

        let (id, _) = q.dequeue().await;
        assert_eq!(id, "old");
    }

    #[tokio::test]
    async fn dequeue_blocks_until_enqueue() {
        let q = std::sync::Arc::new(PriorityQueue::new(cfg(10, false, 30)));
        let q2 = q.clone();

        let handle = tokio::spawn(async move { q2.dequeue().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        q.enqueue("late", "LATE", Some(3)).await.unwrap();

        let (id, _) = handle.await.unwrap();
        assert_eq!(id, "late");
    }
}
