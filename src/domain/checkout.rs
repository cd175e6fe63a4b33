//! Checkout domain types (§3): items, requests, the node lifecycle, and the
//! per-checkout `OrderStatus` record the engine keeps in memory.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

use crate::money::Money;
use crate::pb;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub vendor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub customer_id: String,
    pub items: Vec<CheckoutItem>,
    pub shipping_address: String,
    pub payment_method_id: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl CheckoutRequest {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.items.is_empty() {
            anyhow::bail!("CheckoutRequest must have at least one item");
        }
        for item in &self.items {
            if item.quantity == 0 {
                anyhow::bail!("item {} has non-positive quantity", item.product_id);
            }
        }
        Ok(())
    }
}

/// Forward nodes run in fixed order; `Release`/`Void` are compensations that
/// only run on a post-reserve / post-pay failure (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    Reserve,
    Price,
    Tax,
    Pay,
    Confirm,
    Release,
    Void,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::Reserve => "reserve",
            NodeId::Price => "price",
            NodeId::Tax => "tax",
            NodeId::Pay => "pay",
            NodeId::Confirm => "confirm",
            NodeId::Release => "release",
            NodeId::Void => "void",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Pending => "PENDING",
            NodeState::Running => "RUNNING",
            NodeState::Completed => "COMPLETED",
            NodeState::Failed => "FAILED",
            NodeState::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub state: NodeState,
    pub message: String,
    pub timestamp_ms: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl NodeStatus {
    pub fn new(node_id: NodeId, state: NodeState, message: impl Into<String>, now_ms: i64) -> Self {
        Self {
            node_id,
            state,
            message: message.into(),
            timestamp_ms: now_ms,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(
        node_id: NodeId,
        message: impl Into<String>,
        now_ms: i64,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            node_id,
            state: NodeState::Failed,
            message: message.into(),
            timestamp_ms: now_ms,
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// The per-checkout record the engine keeps in its in-memory map (§3).
///
/// `history` is append-only; `subscribers` is a broadcast sender so new
/// `GetStatus` callers can subscribe to the live tail after a replay of
/// `history`, per the "no gaps, no duplicates" invariant in §4.4/§8.
pub struct OrderStatus {
    pub checkout_id: String,
    pub request: CheckoutRequest,
    pub history: VecDeque<NodeStatus>,
    pub overall_state: OverallState,
    pub total_amount: Option<Money>,
    pub payment_transaction_id: Option<String>,
    pub terminated: bool,
    tail: Option<broadcast::Sender<NodeStatus>>,
}

impl OrderStatus {
    pub fn new(checkout_id: String, request: CheckoutRequest) -> Self {
        let (tail, _rx) = broadcast::channel(256);
        Self {
            checkout_id,
            request,
            history: VecDeque::new(),
            overall_state: OverallState::Pending,
            total_amount: None,
            payment_transaction_id: None,
            terminated: false,
            tail: Some(tail),
        }
    }

    /// Append a status to history and broadcast it to live subscribers.
    /// Caller holds the per-OrderStatus lock across this call (§4.4, §5).
    pub fn push(&mut self, status: NodeStatus) {
        self.history.push_back(status.clone());
        // Subscribers may have all dropped, or the order may already be
        // terminated; either way there's nothing to notify.
        if let Some(tail) = &self.tail {
            let _ = tail.send(status);
        }
    }

    /// `None` once the order has terminated and its subscribers have been
    /// closed (§4.4 GetStatus: a terminal checkout's live tail must end, not
    /// idle forever).
    pub fn subscribe(&self) -> Option<broadcast::Receiver<NodeStatus>> {
        self.tail.as_ref().map(|tail| tail.subscribe())
    }

    /// Drop the broadcast sender so every subscriber currently holding a
    /// `Receiver` observes the channel close and their tail stream ends.
    pub fn close_subscribers(&mut self) {
        self.tail = None;
    }
}

impl From<NodeId> for pb::NodeId {
    fn from(n: NodeId) -> Self {
        match n {
            NodeId::Reserve => pb::NodeId::Reserve,
            NodeId::Price => pb::NodeId::Price,
            NodeId::Tax => pb::NodeId::Tax,
            NodeId::Pay => pb::NodeId::Pay,
            NodeId::Confirm => pb::NodeId::Confirm,
            NodeId::Release => pb::NodeId::Release,
            NodeId::Void => pb::NodeId::Void,
        }
    }
}

impl From<NodeState> for pb::NodeState {
    fn from(s: NodeState) -> Self {
        match s {
            NodeState::Pending => pb::NodeState::Pending,
            NodeState::Running => pb::NodeState::Running,
            NodeState::Completed => pb::NodeState::Completed,
            NodeState::Failed => pb::NodeState::Failed,
            NodeState::Skipped => pb::NodeState::Skipped,
        }
    }
}

impl From<OverallState> for pb::OverallState {
    fn from(s: OverallState) -> Self {
        match s {
            OverallState::Pending => pb::OverallState::OverallPending,
            OverallState::Running => pb::OverallState::OverallRunning,
            OverallState::Completed => pb::OverallState::OverallCompleted,
            OverallState::Failed => pb::OverallState::OverallFailed,
        }
    }
}

impl From<NodeStatus> for pb::NodeStatus {
    fn from(s: NodeStatus) -> Self {
        pb::NodeStatus {
            node_id: pb::NodeId::from(s.node_id) as i32,
            state: pb::NodeState::from(s.state) as i32,
            message: s.message,
            timestamp_ms: s.timestamp_ms,
            error_code: s.error_code.unwrap_or_default(),
            error_message: s.error_message.unwrap_or_default(),
        }
    }
}

impl From<pb::CheckoutItem> for CheckoutItem {
    fn from(i: pb::CheckoutItem) -> Self {
        CheckoutItem {
            product_id: i.product_id,
            quantity: i.quantity,
            unit_price: i.unit_price.map(Into::into).unwrap_or(Money::new("USD", 0)),
            vendor_id: i.vendor_id,
        }
    }
}

impl From<CheckoutItem> for pb::CheckoutItem {
    fn from(i: CheckoutItem) -> Self {
        pb::CheckoutItem {
            product_id: i.product_id,
            quantity: i.quantity,
            unit_price: Some(i.unit_price.into()),
            vendor_id: i.vendor_id,
        }
    }
}

impl From<pb::CheckoutRequest> for CheckoutRequest {
    fn from(r: pb::CheckoutRequest) -> Self {
        CheckoutRequest {
            customer_id: r.customer_id,
            items: r.items.into_iter().map(Into::into).collect(),
            shipping_address: r.shipping_address,
            payment_method_id: r.payment_method_id,
            idempotency_key: (!r.idempotency_key.is_empty()).then_some(r.idempotency_key),
        }
    }
}

impl From<CheckoutRequest> for pb::CheckoutRequest {
    fn from(r: CheckoutRequest) -> Self {
        pb::CheckoutRequest {
            customer_id: r.customer_id,
            items: r.items.into_iter().map(Into::into).collect(),
            shipping_address: r.shipping_address,
            payment_method_id: r.payment_method_id,
            idempotency_key: r.idempotency_key.unwrap_or_default(),
        }
    }
}
