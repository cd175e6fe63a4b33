//! Pricing Aggregator process entry point (§4.2): the gRPC `StreamQuotes`
//! service plus the `/metrics` and `/health` HTTP surface (§6 "Metrics
//! HTTP"), bound on `service_port + 1000` by convention.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use pricehub_backend::aggregator::metrics::MetricsSnapshot;
use pricehub_backend::aggregator::{log_snapshot, AggregatorService};
use pricehub_backend::config::{init_tracing, load_env, AggregatorConfig};
use pricehub_backend::pb::vendor_pricing_server::VendorPricingServer;
use pricehub_backend::pool::AdaptiveWorkerPool;
use serde::Serialize;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing("pricing_aggregator=info,pricehub_backend=info,tower_http=info");

    let cfg = AggregatorConfig::from_env().context("loading aggregator config")?;
    info!(vendors = cfg.vendors.len(), port = cfg.port, "pricing aggregator starting");

    let pool = AdaptiveWorkerPool::new(&cfg.pool);
    let _controller = pool.spawn_controller(cfg.pool.controller_tick);
    spawn_snapshot_log(pool.clone());

    let service = AggregatorService::new(&cfg, pool);
    let requests = service.requests();

    let rpc_addr: SocketAddr = format!("0.0.0.0:{}", cfg.port).parse().context("invalid RPC bind address")?;
    let metrics_addr: SocketAddr = format!("0.0.0.0:{}", cfg.metrics_port()).parse().context("invalid metrics bind address")?;

    let rpc_server = Server::builder()
        .add_service(VendorPricingServer::new(service))
        .serve(rpc_addr);

    let metrics_app = metrics_router(requests);
    let metrics_listener = TcpListener::bind(metrics_addr).await.context("binding metrics listener")?;
    let metrics_server = axum::serve(metrics_listener, metrics_app);

    info!(%rpc_addr, %metrics_addr, "pricing aggregator listening");

    tokio::try_join!(
        async { rpc_server.await.context("aggregator RPC server error") },
        async { metrics_server.await.context("aggregator metrics server error") },
    )?;

    Ok(())
}

/// Controller ticks already log a snapshot (§4.5); this is an independent
/// slower heartbeat so the pool's shape shows up even at default 5s ticks
/// without flooding logs at debug-only levels.
fn spawn_snapshot_log(pool: AdaptiveWorkerPool) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            log_snapshot(&pool);
        }
    });
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsResponse {
    rps: f64,
    error_rate: f64,
    p50_latency: f64,
    p95_latency: f64,
    p99_latency: f64,
    cpu_usage: f64,
    memory_usage: f64,
    load_average: f64,
    timestamp: i64,
}

impl From<MetricsSnapshot> for MetricsResponse {
    fn from(s: MetricsSnapshot) -> Self {
        MetricsResponse {
            rps: s.rps,
            error_rate: s.error_rate,
            p50_latency: s.p50_latency,
            p95_latency: s.p95_latency,
            p99_latency: s.p99_latency,
            cpu_usage: s.cpu_usage,
            memory_usage: s.memory_usage,
            load_average: s.load_average,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

async fn metrics_handler(State(requests): State<std::sync::Arc<pricehub_backend::aggregator::metrics::RequestWindow>>) -> Json<MetricsResponse> {
    Json(requests.snapshot().into())
}

async fn health() -> &'static str {
    "OK"
}

fn metrics_router(requests: std::sync::Arc<pricehub_backend::aggregator::metrics::RequestWindow>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .with_state(requests)
}
