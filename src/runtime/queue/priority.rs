use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::sync::Mutex;

use crate::model::user::UserTier;
use crate::runtime::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl From<UserTier> for Priority {
    fn from(tier: UserTier) -> Self {
        match tier {
            UserTier::Premium => Priority::High,
            UserTier::Lite => Priority::Normal,
            UserTier::Default => Priority::Low,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct PrioritizedItem<T> {
    priority: Priority,
    timestamp: DateTime<Utc>,
    item: T,
}

impl<T: Eq> PartialOrd for PrioritizedItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Eq> Ord for PrioritizedItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // FIFO within a priority: older entries win.
            Ordering::Equal => self.timestamp.cmp(&other.timestamp).reverse(),
            other => other,
        }
    }
}

pub struct PriorityQueue<T> {
    inner: Mutex<BinaryHeap<PrioritizedItem<T>>>,
    capacity: usize,
}

impl<T: Ord> PriorityQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BinaryHeap::with_capacity(capacity)),
            capacity,
        }
    }

    pub async fn push(&self, item: T, priority: Priority) -> Result<(), RuntimeError> {
        let mut queue = self.inner.lock().await;
        if queue.len() >= self.capacity {
            return Err(RuntimeError::QueueFull);
        }
        queue.push(PrioritizedItem {
            priority,
            timestamp: Utc::now(),
            item,
        });
        Ok(())
    }

    pub async fn pop(&self) -> Option<T> {
        let mut queue = self.inner.lock().await;
        queue.pop().map(|entry| entry.item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn pops_by_priority_then_fifo() {
        let queue = PriorityQueue::new(8);
        queue.push("low", Priority::Low).await.unwrap();
        sleep(Duration::from_micros(10)).await;
        queue.push("high-1", Priority::High).await.unwrap();
        sleep(Duration::from_micros(10)).await;
        queue.push("high-2", Priority::High).await.unwrap();

        assert_eq!(queue.pop().await, Some("high-1"));
        assert_eq!(queue.pop().await, Some("high-2"));
        assert_eq!(queue.pop().await, Some("low"));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn rejects_past_capacity() {
        let queue = PriorityQueue::new(1);
        queue.push(1, Priority::Low).await.unwrap();
        assert!(matches!(
            queue.push(2, Priority::Low).await,
            Err(RuntimeError::QueueFull)
        ));
    }
}
