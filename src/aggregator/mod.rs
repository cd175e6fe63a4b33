//! Pricing Aggregator (§4.2): fans one `QuoteRequest` out to every configured
//! vendor through the adaptive worker pool and streams quotes back as they
//! complete.

pub mod metrics;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::config::{deadlines, AggregatorConfig};
use crate::domain::VendorEndpoint;
use crate::pb;
use crate::pb::vendor_backend_client::VendorBackendClient;
use crate::pb::vendor_pricing_server::VendorPricing;
use crate::pool::AdaptiveWorkerPool;

use metrics::RequestWindow;

pub type QuoteStream = std::pin::Pin<Box<dyn tokio_stream::Stream<Item = Result<pb::PriceQuote, Status>> + Send>>;

pub struct AggregatorService {
    vendors: Vec<VendorEndpoint>,
    pool: AdaptiveWorkerPool,
    requests: Arc<RequestWindow>,
}

impl AggregatorService {
    pub fn new(cfg: &AggregatorConfig, pool: AdaptiveWorkerPool) -> Self {
        Self {
            vendors: cfg.vendors.clone(),
            pool,
            requests: Arc::new(RequestWindow::new(cfg.request_window, cfg.request_window_cap)),
        }
    }

    pub fn requests(&self) -> Arc<RequestWindow> {
        self.requests.clone()
    }
}

#[tonic::async_trait]
impl VendorPricing for AggregatorService {
    type StreamQuotesStream = QuoteStream;

    /// §4.2 algorithm: snapshot endpoints, submit one pool task per vendor,
    /// funnel completions through a single channel (single-writer
    /// discipline, §4.2 step 3 / §9 "shared mutable stream sink"), and
    /// enforce the 10s aggregate deadline independent of per-vendor outcome.
    async fn stream_quotes(
        &self,
        request: Request<pb::QuoteRequest>,
    ) -> Result<Response<Self::StreamQuotesStream>, Status> {
        let req = request.into_inner();
        let endpoints = self.vendors.clone();
        let pool = self.pool.clone();
        let requests = self.requests.clone();

        let (tx, rx) = mpsc::channel::<Result<pb::PriceQuote, Status>>(endpoints.len().max(1));

        tokio::spawn(async move {
            let mut handles = Vec::with_capacity(endpoints.len());
            for endpoint in endpoints {
                let req = req.clone();
                let tx = tx.clone();
                let requests = requests.clone();
                let pool = pool.clone();
                let pool_for_job = pool.clone();
                let submitted = pool.submit(async move { fetch_one(endpoint, req, tx, requests, pool_for_job).await });
                if let Ok(handle) = submitted {
                    handles.push(handle);
                } else {
                    warn!("vendor fan-out task rejected by worker pool backlog");
                }
            }

            // Race the normal join against the outgoing channel closing
            // (the client dropped the SSE/stream connection): there's no
            // point letting in-flight vendor calls run to their own
            // deadline once nobody can observe the result.
            tokio::select! {
                result = tokio::time::timeout(deadlines::AGGREGATE_STREAM, futures_util::future::join_all(&mut handles)) => {
                    if result.is_err() {
                        warn!("aggregate streaming deadline exceeded; aborting in-flight vendor fetches");
                        for handle in &handles {
                            handle.abort();
                        }
                    }
                }
                _ = tx.closed() => {
                    warn!("client dropped the quote stream; aborting in-flight vendor fetches");
                    for handle in &handles {
                        handle.abort();
                    }
                }
            }
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }
}

async fn fetch_one(
    endpoint: VendorEndpoint,
    req: pb::QuoteRequest,
    tx: mpsc::Sender<Result<pb::PriceQuote, Status>>,
    requests: Arc<RequestWindow>,
    pool: AdaptiveWorkerPool,
) {
    let start = Instant::now();
    let outcome = call_vendor(&endpoint, req).await;
    let elapsed = start.elapsed();
    let elapsed_ms = elapsed.as_millis() as u64;

    // One LatencySample (feeds the pool controller) and one RequestSample
    // (feeds /metrics) per completed task, success or failure (§4.2 step 5).
    pool.record_latency(elapsed);

    match outcome {
        Ok(quote) => {
            requests.record(elapsed_ms, true);
            let _ = tx.send(Ok(quote)).await;
        }
        Err(err) => {
            // Per-vendor failure is absorbed (§4.2 "Failure semantics", §9
            // Open Questions: this spec's chosen "always absorb" reading).
            requests.record(elapsed_ms, false);
            warn!(vendor = %endpoint.vendor_id(), error = %err, "vendor quote absorbed as failure");
        }
    }
}

async fn call_vendor(endpoint: &VendorEndpoint, req: pb::QuoteRequest) -> anyhow::Result<pb::PriceQuote> {
    let mut client = VendorBackendClient::connect(endpoint.addr()).await?;
    let mut request = Request::new(req);
    request.set_timeout(deadlines::PER_VENDOR);
    let response = client.get_quote(request).await?;
    Ok(response.into_inner())
}

pub fn log_snapshot(pool: &AdaptiveWorkerPool) {
    let snap = pool.snapshot();
    info!(
        p95_ms = snap.p95_ms,
        pool_size = snap.pool_size,
        active = snap.active,
        queue_depth = snap.queue_depth,
        backlog_capacity = snap.backlog_capacity,
        "aggregator pool snapshot"
    );
}
