//! Edge Bridge process entry point (§4.3): the only HTTP surface of the
//! system, fronting the Pricing Aggregator and Checkout Engine RPC backends.

use anyhow::{Context, Result};
use pricehub_backend::config::{init_tracing, load_env, EdgeConfig};
use pricehub_backend::edge::middleware::RateLimiter;
use pricehub_backend::edge::{router, Clients, EdgeState};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing("edge_bridge=info,pricehub_backend=info,tower_http=info");

    let cfg = EdgeConfig::from_env();

    info!(
        aggregator = %cfg.aggregator_addr,
        checkout = %cfg.checkout_addr,
        "edge bridge connecting to upstreams"
    );
    let clients = Clients::connect(&cfg.aggregator_addr, &cfg.checkout_addr)
        .await
        .context("connecting to upstream RPC services")?;

    let state = EdgeState { clients };
    let rate_limiter = RateLimiter::new(cfg.rate_limit_enabled, cfg.rate_limit_qps);

    let app = router(state, rate_limiter);
    let addr = format!("0.0.0.0:{}", cfg.port).parse().context("invalid bind address")?;
    let listener = TcpListener::bind(addr).await.context("binding HTTP listener")?;

    info!(%addr, "edge bridge listening");
    axum::serve(listener, app).await.context("edge bridge server error")?;

    Ok(())
}
