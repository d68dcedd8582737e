//! Fixed-capacity event buffers and the approval workflow store.

use std::collections::{VecDeque, vec_deque};

use serde::{Serialize, Serializer, ser::SerializeSeq};

use crate::events::{ApprovalProcessed, ApprovalRequest, EventRecord};

/// Newest-first sequence holding at most `capacity` items.
///
/// Pushing beyond capacity evicts the oldest item.
#[derive(Clone, Debug)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert `item` as the newest entry. Returns the evicted oldest entry,
    /// if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_front(item);
        if self.items.len() > self.capacity {
            self.items.pop_back()
        } else {
            None
        }
    }

    /// Items, newest first.
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> vec_deque::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.front()
    }

    /// Keep only the items for which `f` returns `true`. Returns how many
    /// were removed.
    pub fn retain<F>(&mut self, f: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.items.len();
        self.items.retain(f);
        before - self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> BoundedBuffer<T> {
    /// Copy of the contents, newest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<'a, T> IntoIterator for &'a BoundedBuffer<T> {
    type Item = &'a T;
    type IntoIter = vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: Serialize> Serialize for BoundedBuffer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for item in &self.items {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

/// Approval workflow: each item id is either pending or processed.
///
/// Pending requests are unbounded and kept in arrival order, as are
/// processed items.
#[derive(Clone, Debug, Default)]
pub struct ApprovalStore {
    pending: Vec<EventRecord<ApprovalRequest>>,
    processed: Vec<EventRecord<ApprovalProcessed>>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new request. A processed entry with the same id is moved
    /// back to pending.
    pub fn request(&mut self, record: EventRecord<ApprovalRequest>) {
        let id = &record.payload.item_id;
        self.processed.retain(|p| p.payload.item_id != *id);
        self.pending.push(record);
    }

    /// Record a decision. Matching pending entries are removed; the
    /// processed entry is appended whether or not one existed, replacing an
    /// earlier decision for the same id.
    pub fn process(&mut self, record: EventRecord<ApprovalProcessed>) {
        let id = &record.payload.item_id;
        self.pending.retain(|p| p.payload.item_id != *id);
        self.processed.retain(|p| p.payload.item_id != *id);
        self.processed.push(record);
    }

    pub fn pending(&self) -> &[EventRecord<ApprovalRequest>] {
        &self.pending
    }

    pub fn processed(&self) -> &[EventRecord<ApprovalProcessed>] {
        &self.processed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|p| p.payload.item_id == id)
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.iter().any(|p| p.payload.item_id == id)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.processed.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::events::Channel;

    fn request(id: &str) -> EventRecord<ApprovalRequest> {
        EventRecord::new(
            Channel::NewApprovalRequest,
            ApprovalRequest {
                item_id: id.to_string(),
                ..Default::default()
            },
            None,
            Utc::now(),
        )
    }

    fn processed(id: &str) -> EventRecord<ApprovalProcessed> {
        EventRecord::new(
            Channel::ApprovalProcessed,
            ApprovalProcessed {
                item_id: id.to_string(),
                ..Default::default()
            },
            None,
            Utc::now(),
        )
    }

    fn ids(store: &ApprovalStore) -> (Vec<String>, Vec<String>) {
        (
            store
                .pending()
                .iter()
                .map(|p| p.payload.item_id.clone())
                .collect(),
            store
                .processed()
                .iter()
                .map(|p| p.payload.item_id.clone())
                .collect(),
        )
    }

    #[test]
    fn test_capacity_three_keeps_newest() {
        let mut buffer = BoundedBuffer::new(3);
        for id in 1..=4 {
            buffer.push(id);
        }
        assert_eq!(buffer.to_vec(), vec![4, 3, 2]);
    }

    #[test]
    fn test_overflow_retains_most_recent() {
        for capacity in 1..6 {
            for extra in 0..8 {
                let mut buffer = BoundedBuffer::new(capacity);
                let total = capacity + extra;
                let mut evicted = Vec::new();
                for i in 0..total {
                    evicted.extend(buffer.push(i));
                }
                assert_eq!(buffer.len(), capacity);
                let expected: Vec<usize> = (extra..total).rev().collect();
                assert_eq!(buffer.to_vec(), expected);
                assert_eq!(evicted, (0..extra).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_retain_reports_removed() {
        let mut buffer = BoundedBuffer::new(5);
        for i in 0..5 {
            buffer.push(i);
        }
        assert_eq!(buffer.retain(|i| i % 2 == 0), 2);
        assert_eq!(buffer.to_vec(), vec![4, 2, 0]);
    }

    #[test]
    fn test_request_then_processed() {
        let mut store = ApprovalStore::new();
        store.request(request("A1"));
        store.process(processed("A1"));
        assert_eq!(ids(&store), (vec![], vec!["A1".to_string()]));
    }

    #[test]
    fn test_processed_without_pending() {
        let mut store = ApprovalStore::new();
        store.request(request("A1"));
        store.process(processed("B2"));
        assert_eq!(
            ids(&store),
            (vec!["A1".to_string()], vec!["B2".to_string()])
        );
    }

    #[test]
    fn test_id_never_in_both_collections() {
        let mut store = ApprovalStore::new();
        let ops: [(&str, bool); 8] = [
            ("A", true),
            ("B", true),
            ("A", false),
            ("A", true),
            ("C", false),
            ("C", true),
            ("B", false),
            ("B", false),
        ];
        for (id, is_request) in ops {
            if is_request {
                store.request(request(id));
            } else {
                store.process(processed(id));
            }
            for id in ["A", "B", "C"] {
                assert!(!(store.is_pending(id) && store.is_processed(id)), "{id}");
            }
        }
        assert_eq!(
            ids(&store),
            (
                vec!["A".to_string(), "C".to_string()],
                vec!["B".to_string()]
            )
        );
    }
}
