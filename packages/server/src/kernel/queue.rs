//! Bounded FIFO admission queue (spec §4.6).
//!
//! Capacity 5. Enqueue is idempotent on `(year, service, include_custom_values)`
//! — a duplicate request returns the existing item's position rather than
//! admitting a second copy. Items drain strictly in arrival order.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::kernel::errors::CoreError;

const CAPACITY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub year: Option<i32>,
    pub service: String,
    pub include_custom_values: bool,
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: Uuid,
    pub key: QueueKey,
}

/// A bounded, idempotent FIFO. Not internally locked — callers that share
/// a `Queue` across tasks wrap it in a `Mutex` (the Orchestrator does this,
/// since admission and draining must be serialized with run state anyway).
#[derive(Debug, Default)]
pub struct Queue {
    items: VecDeque<QueueItem>,
}

impl Queue {
    pub fn new() -> Self {
        Self { items: VecDeque::new() }
    }

    /// Admits `key` unless an equal key is already queued, in which case
    /// the existing item's id is returned instead of a new one (spec
    /// §4.6: "idempotent by (year, service, includeCustomValues)"). The
    /// returned bool is true when a new item was actually admitted, false
    /// when an existing duplicate's id was returned instead.
    pub fn enqueue(&mut self, key: QueueKey) -> Result<(Uuid, bool), CoreError> {
        if let Some(existing) = self.items.iter().find(|i| i.key == key) {
            return Ok((existing.id, false));
        }
        if self.items.len() >= CAPACITY {
            return Err(CoreError::QueueFull);
        }
        let id = Uuid::new_v4();
        self.items.push_back(QueueItem { id, key });
        Ok((id, true))
    }

    pub fn dequeue(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    pub fn cancel(&mut self, id: Uuid) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id != id);
        self.items.len() != before
    }

    /// 1-based position of `id` in the queue, or `None` if absent.
    pub fn position_by_id(&self, id: Uuid) -> Option<usize> {
        self.items.iter().position(|i| i.id == id).map(|p| p + 1)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= CAPACITY
    }

    /// A point-in-time, arrival-ordered copy for status reporting.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(service: &str) -> QueueKey {
        QueueKey {
            year: Some(2024),
            service: service.to_string(),
            include_custom_values: false,
        }
    }

    #[test]
    fn enqueue_dequeue_preserves_fifo_order() {
        let mut q = Queue::new();
        let (a, _) = q.enqueue(key("a")).unwrap();
        let (b, _) = q.enqueue(key("b")).unwrap();

        assert_eq!(q.dequeue().unwrap().id, a);
        assert_eq!(q.dequeue().unwrap().id, b);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn duplicate_key_returns_existing_id_without_growing_queue() {
        let mut q = Queue::new();
        let (a, a_is_new) = q.enqueue(key("a")).unwrap();
        let (a2, a2_is_new) = q.enqueue(key("a")).unwrap();

        assert_eq!(a, a2);
        assert!(a_is_new);
        assert!(!a2_is_new);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn queue_rejects_admission_past_capacity() {
        let mut q = Queue::new();
        for i in 0..CAPACITY {
            q.enqueue(key(&format!("job-{i}"))).unwrap();
        }
        let result = q.enqueue(key("overflow"));
        assert!(matches!(result, Err(CoreError::QueueFull)));
    }

    #[test]
    fn cancel_removes_item_and_reports_success() {
        let mut q = Queue::new();
        let (a, _) = q.enqueue(key("a")).unwrap();
        let (b, _) = q.enqueue(key("b")).unwrap();

        assert!(q.cancel(a));
        assert!(!q.cancel(a));
        assert_eq!(q.snapshot().iter().map(|i| i.id).collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn position_by_id_is_one_indexed_and_updates_after_dequeue() {
        let mut q = Queue::new();
        let (a, _) = q.enqueue(key("a")).unwrap();
        let (b, _) = q.enqueue(key("b")).unwrap();

        assert_eq!(q.position_by_id(a), Some(1));
        assert_eq!(q.position_by_id(b), Some(2));

        q.dequeue();
        assert_eq!(q.position_by_id(b), Some(1));
    }

    #[test]
    fn different_years_are_distinct_admission_keys() {
        let mut q = Queue::new();
        let (a, _) = q.enqueue(QueueKey { year: Some(2023), service: "s".into(), include_custom_values: false }).unwrap();
        let (b, _) = q.enqueue(QueueKey { year: Some(2024), service: "s".into(), include_custom_values: false }).unwrap();
        assert_ne!(a, b);
        assert_eq!(q.len(), 2);
    }
}
