//! Checkout Engine process entry point (§4.4).

use anyhow::{Context, Result};
use pricehub_backend::checkout::CheckoutService;
use pricehub_backend::config::{init_tracing, load_env, CheckoutConfig};
use pricehub_backend::domain::InventoryLedger;
use pricehub_backend::pb::checkout_server::CheckoutServer;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing("checkout_engine=info,pricehub_backend=info,tower_http=info");

    let cfg = CheckoutConfig::from_env();
    let addr = format!("0.0.0.0:{}", cfg.port).parse().context("invalid bind address")?;

    // Process-local inventory, reinitialized from seed data on every restart
    // (§3 "InventoryLedger" lifecycle). A handful of demo SKUs ship seeded so
    // the happy-path and shortage scenarios in §8 are reproducible out of the box.
    let inventory = Arc::new(InventoryLedger::seeded([
        ("sku-laptop".to_string(), 50),
        ("sku-phone".to_string(), 100),
        ("sku-book".to_string(), 500),
    ]));

    info!(%addr, "checkout engine starting");

    let service = CheckoutService::new(inventory);

    Server::builder()
        .add_service(CheckoutServer::new(service))
        .serve(addr)
        .await
        .context("checkout engine server error")?;

    Ok(())
}
