//! Registry of parked pegged orders.
//!
//! A pegged order is parked when its reference price cannot be resolved or
//! when the market enters an auction. While parked it lives here and only
//! here; the matching engine has no record of it. Iteration order is
//! insertion order, which keeps unparking deterministic across nodes.

use execore_types::{Order, OrderId, OrderStatus, PartyId, TimeInForce};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeggedOrders {
    parked: Vec<Order>,
}

impl PeggedOrders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks an order: status Parked, price zeroed, timestamp recorded.
    pub fn park(&mut self, mut order: Order, now: i64) -> Order {
        order.status = OrderStatus::Parked;
        order.price = 0;
        order.updated_at = now;
        self.parked.push(order.clone());
        order
    }

    /// Removes a parked order from the registry, returning it for
    /// resubmission or final resolution.
    pub fn unpark(&mut self, id: OrderId) -> Option<Order> {
        let pos = self.parked.iter().position(|o| o.id == id)?;
        Some(self.parked.remove(pos))
    }

    #[must_use]
    pub fn get_parked(&self, id: OrderId) -> Option<&Order> {
        self.parked.iter().find(|o| o.id == id)
    }

    #[must_use]
    pub fn is_parked(&self, id: OrderId) -> bool {
        self.get_parked(id).is_some()
    }

    /// Replaces a parked order in place after an amendment.
    pub fn amend_parked(&mut self, order: Order) {
        if let Some(existing) = self.parked.iter_mut().find(|o| o.id == order.id) {
            *existing = order;
        }
    }

    /// Removes every parked order of `party`, stamping each with `status`.
    /// Used on close-out (Stopped) and full cancellation (Cancelled).
    pub fn remove_all_for_party(
        &mut self,
        party: &PartyId,
        status: OrderStatus,
        now: i64,
    ) -> Vec<Order> {
        let mut removed = Vec::new();
        self.parked.retain_mut(|order| {
            if order.party == *party {
                order.status = status;
                order.updated_at = now;
                removed.push(order.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Entering-auction cleanup: GFN orders cannot survive an auction, so
    /// parked GFN orders are cancelled outright and returned for event
    /// emission. All other parked orders stay parked.
    pub fn entering_auction(&mut self, now: i64) -> Vec<Order> {
        let mut cancelled = Vec::new();
        self.parked.retain_mut(|order| {
            if order.time_in_force == TimeInForce::Gfn {
                order.status = OrderStatus::Cancelled;
                order.updated_at = now;
                cancelled.push(order.clone());
                false
            } else {
                true
            }
        });
        cancelled
    }

    /// Snapshot of all parked orders, in insertion order.
    #[must_use]
    pub fn parked(&self) -> &[Order] {
        &self.parked
    }

    /// Drains the parked set in insertion order, for auction exit where
    /// every parked order is re-evaluated against the fresh book.
    pub fn drain(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.parked)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parked.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use execore_types::{MarketId, Side};

    use super::*;

    fn pegged(n: u8, party: &str, tif: TimeInForce) -> Order {
        let mut order = Order::dummy_limit(
            MarketId::from_bytes([1u8; 16]),
            party,
            Side::Buy,
            100,
            10,
        );
        order.id = OrderId::from_bytes([n; 16]);
        order.time_in_force = tif;
        order.pegged = Some(execore_types::PeggedOrder {
            reference: execore_types::PeggedReference::Mid,
            offset: 1,
        });
        order
    }

    #[test]
    fn park_zeroes_price_and_marks_status() {
        let mut registry = PeggedOrders::new();
        let parked = registry.park(pegged(1, "alice", TimeInForce::Gtc), 42);
        assert_eq!(parked.status, OrderStatus::Parked);
        assert_eq!(parked.price, 0);
        assert_eq!(parked.updated_at, 42);
        assert!(registry.is_parked(parked.id));
    }

    #[test]
    fn unpark_removes_from_registry() {
        let mut registry = PeggedOrders::new();
        let parked = registry.park(pegged(1, "alice", TimeInForce::Gtc), 0);
        let unparked = registry.unpark(parked.id);
        assert!(unparked.is_some());
        assert!(registry.is_empty());
        assert!(registry.unpark(parked.id).is_none());
    }

    #[test]
    fn party_removal_stamps_status() {
        let mut registry = PeggedOrders::new();
        registry.park(pegged(1, "alice", TimeInForce::Gtc), 0);
        registry.park(pegged(2, "bob", TimeInForce::Gtc), 0);
        registry.park(pegged(3, "alice", TimeInForce::Gtc), 0);
        let removed = registry.remove_all_for_party(&PartyId::new("alice"), OrderStatus::Stopped, 9);
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|o| o.status == OrderStatus::Stopped));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn entering_auction_cancels_gfn_only() {
        let mut registry = PeggedOrders::new();
        registry.park(pegged(1, "alice", TimeInForce::Gfn), 0);
        registry.park(pegged(2, "bob", TimeInForce::Gtc), 0);
        let cancelled = registry.entering_auction(5);
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].status, OrderStatus::Cancelled);
        assert_eq!(registry.len(), 1);
    }
}
