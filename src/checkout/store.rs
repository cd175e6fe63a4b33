//! The Checkout Engine's in-memory `OrderStatus` map (§3, §4.4, §5).
//!
//! Each entry is independently lockable so one checkout's workflow never
//! blocks another's `GetStatus` replay. The map itself uses a
//! `parking_lot::RwLock` (teacher's idiom for concurrent-read/locked-write
//! shared state, e.g. `main.rs`'s `AppState.risk_manager`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tonic::Status;

use crate::domain::{CheckoutRequest, NodeStatus, OrderStatus};

pub struct CheckoutStore {
    orders: RwLock<HashMap<String, Arc<Mutex<OrderStatus>>>>,
    seq: AtomicU64,
}

impl Default for CheckoutStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckoutStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// `checkout_id = "checkout-" + wall_ms + "-" + monotonic_seq` (§4.4 Start).
    pub fn create(&self, request: CheckoutRequest) -> Arc<Mutex<OrderStatus>> {
        let wall_ms = Utc::now().timestamp_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let checkout_id = format!("checkout-{wall_ms}-{seq}");

        let order = Arc::new(Mutex::new(OrderStatus::new(checkout_id.clone(), request)));
        self.orders.write().insert(checkout_id, order.clone());
        order
    }

    pub fn get(&self, checkout_id: &str) -> Option<Arc<Mutex<OrderStatus>>> {
        self.orders.read().get(checkout_id).cloned()
    }

    /// Replay history then subscribe to the live tail, atomically under the
    /// per-order lock so no NodeStatus can land between the two (§4.4
    /// GetStatus, §8 invariant 4). `rx` is `None` exactly when `terminated`
    /// is true — the order's subscribers have already been closed.
    pub fn replay_and_subscribe(
        &self,
        checkout_id: &str,
    ) -> Result<(Vec<NodeStatus>, Option<broadcast::Receiver<NodeStatus>>, bool), Status> {
        let order = self
            .get(checkout_id)
            .ok_or_else(|| Status::not_found(format!("unknown checkout_id '{checkout_id}'")))?;
        let guard = order.lock();
        let history: Vec<NodeStatus> = guard.history.iter().cloned().collect();
        let rx = guard.subscribe();
        let terminated = guard.terminated;
        Ok((history, rx, terminated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CheckoutItem, NodeId, NodeState};
    use crate::money::Money;

    fn sample_request() -> CheckoutRequest {
        CheckoutRequest {
            customer_id: "c1".into(),
            items: vec![CheckoutItem {
                product_id: "sku-1".into(),
                quantity: 1,
                unit_price: Money::new("USD", 1000),
                vendor_id: "amz".into(),
            }],
            shipping_address: "addr".into(),
            payment_method_id: "pm-1".into(),
            idempotency_key: None,
        }
    }

    #[test]
    fn create_ids_are_unique_and_prefixed() {
        let store = CheckoutStore::new();
        let a = store.create(sample_request()).lock().checkout_id.clone();
        let b = store.create(sample_request()).lock().checkout_id.clone();
        assert!(a.starts_with("checkout-"));
        assert_ne!(a, b);
    }

    #[test]
    fn get_unknown_checkout_errors_not_found() {
        let store = CheckoutStore::new();
        assert!(store.replay_and_subscribe("nope").is_err());
    }

    #[test]
    fn replay_includes_history_before_subscribe_starts() {
        let store = CheckoutStore::new();
        let order = store.create(sample_request());
        let id = order.lock().checkout_id.clone();
        order.lock().push(NodeStatus::new(NodeId::Reserve, NodeState::Completed, "ok", 0));

        let (history, _rx, terminated) = store.replay_and_subscribe(&id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(!terminated);
    }
}
