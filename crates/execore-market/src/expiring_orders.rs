//! Timestamp-ordered index of orders carrying an expiry.
//!
//! The index never holds the orders themselves, only their IDs keyed by
//! expiry timestamp. The matching engine stays the authoritative record;
//! this index exists so `OnTick` can extract everything due without
//! scanning the book.

use std::collections::BTreeMap;

use execore_types::OrderId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpiringOrders {
    /// expiry nanos → order IDs sharing that expiry, in insertion order.
    index: BTreeMap<i64, Vec<OrderId>>,
}

impl ExpiringOrders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: OrderId, expires_at: i64) {
        self.index.entry(expires_at).or_default().push(id);
    }

    /// Removes one order from the index. Missing entries are fine: the
    /// order may have expired or filled already.
    pub fn remove(&mut self, id: OrderId, expires_at: i64) {
        if let Some(ids) = self.index.get_mut(&expires_at) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.index.remove(&expires_at);
            }
        }
    }

    /// Extracts every order with expiry ≤ `cutoff`, in timestamp order.
    pub fn expire(&mut self, cutoff: i64) -> Vec<OrderId> {
        let mut expired = Vec::new();
        let keys: Vec<i64> = self
            .index
            .range(..=cutoff)
            .map(|(expiry, _)| *expiry)
            .collect();
        for key in keys {
            if let Some(ids) = self.index.remove(&key) {
                expired.extend(ids);
            }
        }
        expired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> OrderId {
        OrderId::from_bytes([n; 16])
    }

    #[test]
    fn expire_extracts_in_timestamp_order() {
        let mut index = ExpiringOrders::new();
        index.insert(oid(3), 300);
        index.insert(oid(1), 100);
        index.insert(oid(2), 200);
        let expired = index.expire(250);
        assert_eq!(expired, vec![oid(1), oid(2)]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn expire_includes_exact_cutoff() {
        let mut index = ExpiringOrders::new();
        index.insert(oid(1), 100);
        assert_eq!(index.expire(100), vec![oid(1)]);
        assert!(index.is_empty());
    }

    #[test]
    fn remove_only_targets_matching_entry() {
        let mut index = ExpiringOrders::new();
        index.insert(oid(1), 100);
        index.insert(oid(2), 100);
        index.remove(oid(1), 100);
        assert_eq!(index.expire(100), vec![oid(2)]);
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut index = ExpiringOrders::new();
        index.insert(oid(1), 100);
        index.remove(oid(2), 500);
        assert_eq!(index.len(), 1);
    }
}
