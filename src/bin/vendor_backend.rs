//! Vendor Backend process entry point (§4.1).

use anyhow::{Context, Result};
use pricehub_backend::config::{init_tracing, load_env, VendorConfig};
use pricehub_backend::domain::vendor::slugify;
use pricehub_backend::pb::vendor_backend_server::VendorBackendServer;
use pricehub_backend::vendor::VendorService;
use tonic::transport::Server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing("vendor_backend=info,pricehub_backend=info,tower_http=info");

    let cfg = VendorConfig::from_env();
    let vendor_id = slugify(&cfg.display_name);
    let addr = format!("0.0.0.0:{}", cfg.port).parse().context("invalid bind address")?;

    info!(%vendor_id, display_name = %cfg.display_name, %addr, "vendor backend starting");

    let service = VendorService::new(vendor_id, cfg.display_name.clone());

    Server::builder()
        .add_service(VendorBackendServer::new(service))
        .serve(addr)
        .await
        .context("vendor backend server error")?;

    Ok(())
}
