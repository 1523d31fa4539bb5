use std::collections::HashMap;

use crate::reconcile::order_sm::{apply_event, Event, Order, OrderState};

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub orders: HashMap<String, Order>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self { orders: HashMap::new() }
    }

    pub fn insert(&mut self, order: Order) {
        self.orders.entry(order.local_id.clone()).or_insert(order);
    }

    pub fn get(&self, local_id: &str) -> Option<&Order> {
        self.orders.get(local_id)
    }

    /// Returns (previous, current) state.
    pub fn apply(&mut self, local_id: &str, event: Event) -> Result<(OrderState, OrderState), String> {
        let order = self
            .orders
            .get_mut(local_id)
            .ok_or_else(|| "unknown order".to_string())?;
        let prev = order.state;
        apply_event(order, event).map_err(|e| e.msg)?;
        Ok((prev, order.state))
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(|o| !o.state.is_terminal())
    }

    /// Removes terminal orders dispatched before `cutoff_ms`.
    pub fn prune_terminal(&mut self, cutoff_ms: u64) -> Vec<Order> {
        let stale: Vec<String> = self
            .orders
            .values()
            .filter(|o| o.state.is_terminal() && o.dispatch_ms < cutoff_ms)
            .map(|o| o.local_id.clone())
            .collect();
        stale.iter().filter_map(|id| self.orders.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Direction;

    #[test]
    fn test_apply_reports_transition() {
        let mut book = OrderBook::new();
        book.insert(Order::new("a".into(), "R_100".into(), Direction::Put, 1.0, 0));
        let t = book.apply("a", Event::Bind { external_id: "9".into() }).unwrap();
        assert_eq!(t, (OrderState::Dispatched, OrderState::AwaitingSettlement));
        assert!(book.apply("missing", Event::Timeout).is_err());
        assert_eq!(book.open_orders().count(), 1);
    }

    #[test]
    fn test_prune_terminal_keeps_open_and_recent() {
        let mut book = OrderBook::new();
        book.insert(Order::new("old".into(), "R_100".into(), Direction::Call, 1.0, 1_000));
        book.insert(Order::new("open".into(), "R_100".into(), Direction::Call, 1.0, 1_000));
        book.insert(Order::new("new".into(), "R_100".into(), Direction::Call, 1.0, 9_000));
        book.apply("old", Event::Timeout).unwrap();
        book.apply("new", Event::Timeout).unwrap();

        let removed = book.prune_terminal(5_000);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].local_id, "old");
        assert!(book.get("open").is_some());
        assert!(book.get("new").is_some());
        assert_eq!(book.len(), 2);
    }
}
