//! Ordering reconstruction for out-of-order worker results

use std::collections::BTreeMap;

/// Buffers results tagged with correlation ids and releases them in id order.
///
/// Ids are expected to be contiguous from `first_id`; a result is released
/// once every lower id has been released.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next_id: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(first_id: u64) -> Self {
        Self {
            next_id: first_id,
            pending: BTreeMap::new(),
        }
    }

    /// Add a result and return everything that is now in order
    pub fn push(&mut self, id: u64, item: T) -> Vec<T> {
        self.pending.insert(id, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next_id) {
            ready.push(item);
            self.next_id += 1;
        }
        ready
    }

    /// Id of the next result to release
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Results waiting for a lower id
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_in_id_order() {
        let mut buffer = ReorderBuffer::new(10);
        assert!(buffer.push(12, "c").is_empty());
        assert!(buffer.push(11, "b").is_empty());
        assert_eq!(buffer.pending(), 2);
        assert_eq!(buffer.push(10, "a"), vec!["a", "b", "c"]);
        assert_eq!(buffer.push(13, "d"), vec!["d"]);
        assert_eq!(buffer.next_id(), 14);
        assert_eq!(buffer.pending(), 0);
    }
}
