//! The fixed checkout DAG (§4.4, §9 "Graph of compensations"):
//! `reserve -> {price, tax} -> pay -> confirm`, with `void`/`release`
//! compensations on any post-reserve failure.
//!
//! The spec's design notes reject a general promise-graph framework in
//! favor of a linear sequence of steps with a declarative compensation set,
//! so this is a plain async function per node rather than a trait object
//! dispatch table.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use rand::Rng;
use tracing::{info, warn};

use crate::config::deadlines;
use crate::domain::{CheckoutRequest, InventoryLedger, NodeId, NodeState, NodeStatus, OrderStatus, OverallState};
use crate::money::{floor_percent_bps, Money};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn emit(order: &Arc<SyncMutex<OrderStatus>>, status: NodeStatus) {
    order.lock().push(status);
}

/// Drives one checkout's workflow to completion. Spawned fire-and-forget by
/// `Start` (§4.4 step 3); the caller already has `checkout_id` back.
pub async fn run(order: Arc<SyncMutex<OrderStatus>>, inventory: Arc<InventoryLedger>) {
    order.lock().overall_state = OverallState::Running;
    let request = order.lock().request.clone();

    let reserved_items: Vec<(String, u32)> =
        request.items.iter().map(|i| (i.product_id.clone(), i.quantity)).collect();

    if let Err(failing_product) = run_reserve(&order, &inventory, &reserved_items).await {
        finish(&order, OverallState::Failed);
        warn!(checkout_id = %order.lock().checkout_id, product_id = %failing_product, "reserve failed, no compensation needed");
        return;
    }

    let (subtotal_cents, tax_cents) = match run_price_and_tax(&order, &request).await {
        Ok(v) => v,
        Err(()) => {
            compensate_release(&order, &inventory, &reserved_items).await;
            finish(&order, OverallState::Failed);
            return;
        }
    };

    let payment_result = run_pay(&order).await;
    let transaction_id = match payment_result {
        Some(id) => id,
        None => {
            compensate_void_and_release(&order, &inventory, &reserved_items, false).await;
            finish(&order, OverallState::Failed);
            return;
        }
    };
    order.lock().payment_transaction_id = Some(transaction_id);

    if !run_confirm(&order).await {
        compensate_void_and_release(&order, &inventory, &reserved_items, true).await;
        finish(&order, OverallState::Failed);
        return;
    }

    let total = Money::new("USD", subtotal_cents + tax_cents);
    order.lock().total_amount = Some(total);
    finish(&order, OverallState::Completed);
}

async fn run_reserve(
    order: &Arc<SyncMutex<OrderStatus>>,
    inventory: &Arc<InventoryLedger>,
    items: &[(String, u32)],
) -> Result<(), String> {
    emit(order, NodeStatus::new(NodeId::Reserve, NodeState::Pending, "reserving inventory", now_ms()));
    emit(order, NodeStatus::new(NodeId::Reserve, NodeState::Running, "reserving inventory", now_ms()));

    match inventory.reserve_batch(items) {
        Ok(()) => {
            emit(order, NodeStatus::new(NodeId::Reserve, NodeState::Completed, "reserved", now_ms()));
            Ok(())
        }
        Err(product_id) => {
            emit(
                order,
                NodeStatus::failed(
                    NodeId::Reserve,
                    format!("insufficient inventory for {product_id}"),
                    now_ms(),
                    "INSUFFICIENT_INVENTORY",
                    format!("product {product_id} does not have enough units on hand"),
                ),
            );
            Err(product_id)
        }
    }
}

fn subtotal_cents(request: &CheckoutRequest) -> Option<i64> {
    request
        .items
        .iter()
        .try_fold(0i64, |acc, item| item.unit_price.checked_mul_qty(item.quantity).map(|m| acc + m.amount_cents))
}

/// `price` and `tax` run concurrently under one shared join deadline (§4.4
/// table, "price and tax run concurrently"). `tax` recomputes the subtotal
/// from the request directly rather than depending on `price`'s output, so
/// either step can fail independently of the other.
async fn run_price_and_tax(order: &Arc<SyncMutex<OrderStatus>>, request: &CheckoutRequest) -> Result<(i64, i64), ()> {
    emit(order, NodeStatus::new(NodeId::Price, NodeState::Pending, "computing subtotal", now_ms()));
    emit(order, NodeStatus::new(NodeId::Price, NodeState::Running, "computing subtotal", now_ms()));
    emit(order, NodeStatus::new(NodeId::Tax, NodeState::Pending, "computing tax", now_ms()));
    emit(order, NodeStatus::new(NodeId::Tax, NodeState::Running, "computing tax", now_ms()));

    let price_fut = async {
        tokio::time::sleep(random_duration(50, 150)).await;
        subtotal_cents(request)
    };
    let tax_fut = async {
        tokio::time::sleep(random_duration(30, 100)).await;
        subtotal_cents(request).map(|subtotal| floor_percent_bps(subtotal, 800))
    };

    let (price_result, tax_result) = match tokio::time::timeout(deadlines::PRICE_TAX_JOIN, async { tokio::join!(price_fut, tax_fut) }).await {
        Ok(results) => results,
        Err(_elapsed) => (None, None),
    };

    let subtotal = match price_result {
        Some(subtotal) => {
            emit(order, NodeStatus::new(NodeId::Price, NodeState::Completed, "priced", now_ms()));
            Some(subtotal)
        }
        None => {
            emit(
                order,
                NodeStatus::failed(NodeId::Price, "pricing failed", now_ms(), "PRICE_FAILED", "subtotal computation overflowed or timed out"),
            );
            None
        }
    };

    let tax = match tax_result {
        Some(tax) => {
            emit(order, NodeStatus::new(NodeId::Tax, NodeState::Completed, "taxed", now_ms()));
            Some(tax)
        }
        None => {
            emit(
                order,
                NodeStatus::failed(NodeId::Tax, "tax computation failed", now_ms(), "TAX_FAILED", "tax computation overflowed or timed out"),
            );
            None
        }
    };

    match (subtotal, tax) {
        (Some(subtotal), Some(tax)) => Ok((subtotal, tax)),
        _ => Err(()),
    }
}

/// Up to 3 attempts; ~20% synthetic failure on non-final attempts only (§4.4
/// table; §9 Open Questions preserves this asymmetry as observed).
async fn run_pay(order: &Arc<SyncMutex<OrderStatus>>) -> Option<String> {
    emit(order, NodeStatus::new(NodeId::Pay, NodeState::Pending, "charging payment method", now_ms()));
    emit(order, NodeStatus::new(NodeId::Pay, NodeState::Running, "charging payment method", now_ms()));

    const MAX_ATTEMPTS: u32 = 3;
    for attempt in 1..=MAX_ATTEMPTS {
        let is_final = attempt == MAX_ATTEMPTS;
        let attempt_fut = async {
            tokio::time::sleep(random_duration(100, 300)).await;
            is_final || rand::thread_rng().gen_bool(0.8)
        };

        let succeeded = tokio::time::timeout(deadlines::PAYMENT_ATTEMPT, attempt_fut).await.unwrap_or(false);
        if succeeded {
            let transaction_id = format!("txn-{}", uuid::Uuid::new_v4());
            emit(order, NodeStatus::new(NodeId::Pay, NodeState::Completed, "payment captured", now_ms()));
            return Some(transaction_id);
        }

        if !is_final {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    emit(
        order,
        NodeStatus::failed(NodeId::Pay, "payment exhausted retries", now_ms(), "PAYMENT_FAILED", "all 3 payment attempts failed"),
    );
    None
}

async fn run_confirm(order: &Arc<SyncMutex<OrderStatus>>) -> bool {
    emit(order, NodeStatus::new(NodeId::Confirm, NodeState::Pending, "confirming order", now_ms()));
    emit(order, NodeStatus::new(NodeId::Confirm, NodeState::Running, "confirming order", now_ms()));
    tokio::time::sleep(random_duration(50, 150)).await;

    if rand::thread_rng().gen_bool(0.05) {
        emit(
            order,
            NodeStatus::failed(NodeId::Confirm, "confirmation failed", now_ms(), "CONFIRMATION_FAILED", "order confirmation was rejected"),
        );
        return false;
    }

    emit(order, NodeStatus::new(NodeId::Confirm, NodeState::Completed, "confirmed", now_ms()));
    true
}

async fn compensate_release(order: &Arc<SyncMutex<OrderStatus>>, inventory: &Arc<InventoryLedger>, items: &[(String, u32)]) {
    emit(order, NodeStatus::new(NodeId::Release, NodeState::Pending, "releasing reserved inventory", now_ms()));
    emit(order, NodeStatus::new(NodeId::Release, NodeState::Running, "releasing reserved inventory", now_ms()));
    inventory.release_batch(items);
    emit(order, NodeStatus::new(NodeId::Release, NodeState::Completed, "released", now_ms()));
}

async fn compensate_void_and_release(
    order: &Arc<SyncMutex<OrderStatus>>,
    inventory: &Arc<InventoryLedger>,
    items: &[(String, u32)],
    payment_was_set: bool,
) {
    if payment_was_set {
        emit(order, NodeStatus::new(NodeId::Void, NodeState::Pending, "voiding payment", now_ms()));
        emit(order, NodeStatus::new(NodeId::Void, NodeState::Running, "voiding payment", now_ms()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        emit(order, NodeStatus::new(NodeId::Void, NodeState::Completed, "voided", now_ms()));
    }
    compensate_release(order, inventory, items).await;
}

fn finish(order: &Arc<SyncMutex<OrderStatus>>, state: OverallState) {
    let mut guard = order.lock();
    guard.overall_state = state;
    guard.terminated = true;
    guard.close_subscribers();
    info!(checkout_id = %guard.checkout_id, overall_state = ?state, "checkout workflow finished");
}

fn random_duration(min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CheckoutItem;
    use crate::money::Money;

    fn sample_order() -> Arc<SyncMutex<OrderStatus>> {
        let request = CheckoutRequest {
            customer_id: "c1".into(),
            items: vec![CheckoutItem {
                product_id: "sku-1".into(),
                quantity: 2,
                unit_price: Money::new("USD", 500),
                vendor_id: "amz".into(),
            }],
            shipping_address: "addr".into(),
            payment_method_id: "pm-1".into(),
            idempotency_key: None,
        };
        Arc::new(SyncMutex::new(OrderStatus::new("checkout-test".into(), request)))
    }

    #[tokio::test]
    async fn release_compensation_restores_ledger_and_emits_completed() {
        let order = sample_order();
        let inventory = Arc::new(InventoryLedger::seeded([("sku-1".to_string(), 10)]));
        let items = vec![("sku-1".to_string(), 2)];
        inventory.reserve_batch(&items).unwrap();
        assert_eq!(inventory.on_hand("sku-1"), 8);

        compensate_release(&order, &inventory, &items).await;

        assert_eq!(inventory.on_hand("sku-1"), 10);
        let guard = order.lock();
        let release_events: Vec<_> = guard.history.iter().filter(|s| s.node_id == NodeId::Release).collect();
        assert_eq!(release_events.len(), 3); // PENDING, RUNNING, COMPLETED
        assert_eq!(release_events.last().unwrap().state, NodeState::Completed);
        assert!(guard.history.iter().all(|s| s.node_id != NodeId::Void));
    }

    #[tokio::test]
    async fn void_only_runs_when_payment_was_set() {
        let order = sample_order();
        let inventory = Arc::new(InventoryLedger::seeded([("sku-1".to_string(), 10)]));
        let items = vec![("sku-1".to_string(), 2)];
        inventory.reserve_batch(&items).unwrap();

        compensate_void_and_release(&order, &inventory, &items, false).await;
        assert!(order.lock().history.iter().all(|s| s.node_id != NodeId::Void));

        let order2 = sample_order();
        inventory.reserve_batch(&items).unwrap();
        compensate_void_and_release(&order2, &inventory, &items, true).await;
        let guard2 = order2.lock();
        assert!(guard2.history.iter().any(|s| s.node_id == NodeId::Void && s.state == NodeState::Completed));
        assert!(guard2.history.iter().any(|s| s.node_id == NodeId::Release && s.state == NodeState::Completed));
    }

    #[tokio::test]
    async fn final_payment_attempt_never_carries_synthetic_failure() {
        // §9 Open Questions: the spec preserves the source's asymmetry where
        // only non-final attempts can synthetically fail, so `pay` always
        // succeeds within 3 attempts. Run enough trials that a flake would
        // show up if this regressed.
        for _ in 0..25 {
            let order = sample_order();
            let result = run_pay(&order).await;
            assert!(result.is_some(), "pay must always eventually succeed on the final attempt");
        }
    }
}
