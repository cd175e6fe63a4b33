//! Shared library crate backing the four `pricehub-backend` binaries
//! (vendor simulator, pricing aggregator, checkout engine, edge bridge).

pub mod pb {
    tonic::include_proto!("pricehub");
}

pub mod aggregator;
pub mod checkout;
pub mod config;
pub mod domain;
pub mod edge;
pub mod money;
pub mod pool;
pub mod vendor;
