//! Checkout Engine (§4.4): `Start` allocates an id and spawns the workflow;
//! `GetStatus` streams its node lifecycle.

pub mod store;
pub mod workflow;

use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};
use tracing::info;

use crate::domain::{CheckoutRequest, InventoryLedger};
use crate::pb;
use crate::pb::checkout_server::Checkout;

use store::CheckoutStore;

pub type StatusStream = Pin<Box<dyn Stream<Item = Result<pb::NodeStatus, Status>> + Send>>;

pub struct CheckoutService {
    store: Arc<CheckoutStore>,
    inventory: Arc<InventoryLedger>,
}

impl CheckoutService {
    pub fn new(inventory: Arc<InventoryLedger>) -> Self {
        Self {
            store: Arc::new(CheckoutStore::new()),
            inventory,
        }
    }
}

#[tonic::async_trait]
impl Checkout for CheckoutService {
    async fn start(&self, request: Request<pb::CheckoutRequest>) -> Result<Response<pb::CheckoutResponse>, Status> {
        let req: CheckoutRequest = request.into_inner().into();
        req.validate().map_err(|e| Status::invalid_argument(e.to_string()))?;

        let order = self.store.create(req);
        let checkout_id = order.lock().checkout_id.clone();

        info!(%checkout_id, "checkout started");

        let inventory = self.inventory.clone();
        tokio::spawn(workflow::run(order, inventory));

        Ok(Response::new(pb::CheckoutResponse {
            checkout_id,
            overall_state: pb::OverallState::OverallPending as i32,
            message: "checkout accepted".to_string(),
            total_amount: None,
        }))
    }

    type GetStatusStream = StatusStream;

    async fn get_status(
        &self,
        request: Request<pb::GetStatusRequest>,
    ) -> Result<Response<Self::GetStatusStream>, Status> {
        let checkout_id = request.into_inner().checkout_id;
        let (history, rx, _terminated) = self.store.replay_and_subscribe(&checkout_id)?;

        let replay = tokio_stream::iter(history.into_iter().map(|s| Ok(pb::NodeStatus::from(s))));
        // `rx` is `None` exactly for an already-terminated order, whose
        // subscribers were closed when the workflow finished — replay alone
        // is then the complete, already-closed stream (§4.4 GetStatus).
        let stream: StatusStream = match rx {
            Some(rx) => {
                let tail = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|item| match item {
                    Ok(status) => Some(Ok(pb::NodeStatus::from(status))),
                    Err(_lagged) => None,
                });
                Box::pin(replay.chain(tail))
            }
            None => Box::pin(replay),
        };

        Ok(Response::new(stream))
    }
}
