//! Prefix buckets: the rules sharing one match-prefix length.
//!
//! The ordered set is keyed by the category's normalized tie-break; the
//! doubly-linked chain through the entries mirrors that order. Chain
//! surgery is done by the owning routing table (the arena holds the
//! links), so the bucket only reports where a new member belongs.

use std::collections::BTreeSet;

use crate::types::EntryId;

/// All installed rules of one prefix length, in comparator order.
#[derive(Debug, Clone)]
pub struct PrefixBucket {
    /// The prefix length this bucket groups.
    pub prefix_len: u8,
    /// Members ordered by (normalized tie-break, handle).
    ordered: BTreeSet<(u32, EntryId)>,
    /// Chain head (first in comparator order).
    pub head: Option<EntryId>,
    /// Chain tail (last in comparator order).
    pub tail: Option<EntryId>,
}

impl PrefixBucket {
    pub fn new(prefix_len: u8) -> Self {
        Self {
            prefix_len,
            ordered: BTreeSet::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Adds a member and returns its predecessor in comparator order,
    /// so the caller can splice the chain right after it.
    pub fn insert(&mut self, order_key: u32, id: EntryId) -> Option<EntryId> {
        let pred = self
            .ordered
            .range(..(order_key, id))
            .next_back()
            .map(|&(_, e)| e);
        self.ordered.insert((order_key, id));
        pred
    }

    /// Drops a member from the ordered set (chain surgery is the caller's).
    pub fn remove(&mut self, order_key: u32, id: EntryId) -> bool {
        self.ordered.remove(&(order_key, id))
    }

    /// Iterates member handles in comparator order.
    pub fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.ordered.iter().map(|&(_, e)| e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_reports_predecessor() {
        let mut bucket = PrefixBucket::new(24);
        let a = EntryId::new(0);
        let b = EntryId::new(1);
        let c = EntryId::new(2);

        assert_eq!(bucket.insert(10, a), None);
        assert_eq!(bucket.insert(30, c), Some(a));
        assert_eq!(bucket.insert(20, b), Some(a));

        let order: Vec<EntryId> = bucket.iter().collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn test_duplicate_keys_ordered_by_handle() {
        let mut bucket = PrefixBucket::new(16);
        let a = EntryId::new(5);
        let b = EntryId::new(3);
        bucket.insert(7, a);
        assert_eq!(bucket.insert(7, b), None); // b sorts before a on handle
        let order: Vec<EntryId> = bucket.iter().collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn test_remove() {
        let mut bucket = PrefixBucket::new(24);
        let a = EntryId::new(0);
        bucket.insert(1, a);
        assert!(bucket.remove(1, a));
        assert!(!bucket.remove(1, a));
        assert!(bucket.is_empty());
    }
}
