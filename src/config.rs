//! Environment-driven configuration (§6 "Configuration (environment)"),
//! following `performance/config.rs`'s pattern of a serde-friendly struct
//! with a `from_env()` constructor that falls back to sane defaults, and
//! `main.rs::load_env`'s dotenv search across the working directory and the
//! crate manifest directory.

use std::env;
use std::path::Path;
use std::time::Duration;

use crate::domain::VendorEndpoint;

/// Fixed deadlines the spec pins as part of the system's contract (§5),
/// not an operational tuning knob.
pub mod deadlines {
    use std::time::Duration;

    pub const PER_VENDOR: Duration = Duration::from_millis(1500);
    pub const AGGREGATE_STREAM: Duration = Duration::from_secs(10);
    pub const EDGE_SEARCH_STREAM: Duration = Duration::from_secs(60);
    pub const EDGE_SEARCH_UPSTREAM: Duration = Duration::from_millis(1500);
    pub const EDGE_BEST_QUOTE_BUDGET: Duration = Duration::from_secs(3);
    pub const EDGE_CHECKOUT_STATUS_STREAM: Duration = Duration::from_secs(120);
    pub const CHECKOUT_START: Duration = Duration::from_secs(2);
    pub const PRICE_TAX_JOIN: Duration = Duration::from_secs(3);
    pub const PAYMENT_ATTEMPT: Duration = Duration::from_millis(1500);
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
}

/// Loads `.env` from the current directory and, failing that, from the
/// crate's manifest directory (so `cargo run -p ... --bin ...` from any cwd
/// still picks up a repo-root `.env`).
pub fn load_env() {
    let _ = dotenv::dotenv();
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    for candidate in [manifest_dir.join(".env"), manifest_dir.join("../.env")] {
        if candidate.exists() {
            let _ = dotenv::from_path(&candidate);
        }
    }
}

pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer())
        .init();
}

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

/// Adaptive worker pool sizing knobs (§4.2, §4.5).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    pub step: usize,
    pub queue_capacity: usize,
    pub target_up_ms: u64,
    pub target_down_ms: u64,
    pub cooldown: Duration,
    pub idle_timeout: Duration,
    pub controller_tick: Duration,
    pub latency_window: usize,
}

impl PoolConfig {
    pub fn from_env() -> Self {
        Self {
            min_threads: env_u32("ADAPTIVE_MIN", 8) as usize,
            max_threads: env_u32("ADAPTIVE_MAX", 64) as usize,
            step: env_u32("ADAPTIVE_STEP", 8) as usize,
            queue_capacity: env_u32("ADAPTIVE_QUEUE_CAPACITY", 2048) as usize,
            target_up_ms: env_u64("TARGET_P95_MS", 250),
            target_down_ms: env_u64("LOWER_P95_MS", 200),
            cooldown: Duration::from_secs(env_u64("ADAPTIVE_COOLDOWN_SECS", 20)),
            idle_timeout: Duration::from_secs(60),
            controller_tick: Duration::from_secs(5),
            latency_window: env_u32("LAT_WINDOW", 2000) as usize,
        }
    }
}

/// Pricing Aggregator process configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub port: u16,
    pub vendors: Vec<VendorEndpoint>,
    pub pool: PoolConfig,
    pub request_window: Duration,
    pub request_window_cap: usize,
}

impl AggregatorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let vendors_raw = env::var("VENDORS")
            .map_err(|_| anyhow::anyhow!("VENDORS env var is required (comma-separated host:port:display_name)"))?;
        let vendors = VendorEndpoint::parse_list(&vendors_raw)?;
        if vendors.is_empty() {
            anyhow::bail!("no vendors configured; refusing to start with zero fan-out targets");
        }
        Ok(Self {
            port: env_u32("PORT", 7001) as u16,
            vendors,
            pool: PoolConfig::from_env(),
            request_window: Duration::from_secs(env_u64("METRICS_WINDOW_SECS", 60)),
            request_window_cap: env_u32("METRICS_WINDOW_CAP", 1000) as usize,
        })
    }

    pub fn metrics_port(&self) -> u16 {
        self.port + 1000
    }
}

/// Edge Bridge process configuration.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub port: u16,
    pub aggregator_addr: String,
    pub checkout_addr: String,
    pub rate_limit_enabled: bool,
    pub rate_limit_qps: u32,
}

impl EdgeConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_u32("PORT", 8080) as u16,
            aggregator_addr: env::var("AGGREGATOR_ADDR").unwrap_or_else(|_| "http://127.0.0.1:7001".to_string()),
            checkout_addr: env::var("CHECKOUT_ADDR").unwrap_or_else(|_| "http://127.0.0.1:7002".to_string()),
            rate_limit_enabled: env_bool("RATE_LIMIT_ENABLED", true),
            rate_limit_qps: env_u32("RATE_LIMIT_QPS", 50),
        }
    }
}

/// Checkout Engine process configuration.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub port: u16,
}

impl CheckoutConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_u32("PORT", 7002) as u16,
        }
    }
}

/// Vendor Backend (simulator) process configuration.
#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub port: u16,
    pub display_name: String,
}

impl VendorConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_u32("PORT", 9001) as u16,
            display_name: env::var("VENDOR_DISPLAY_NAME").unwrap_or_else(|_| "Vendor".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults_match_spec() {
        let cfg = PoolConfig::from_env();
        assert_eq!(cfg.min_threads, 8);
        assert_eq!(cfg.max_threads, 64);
        assert_eq!(cfg.step, 8);
        assert_eq!(cfg.queue_capacity, 2048);
    }

    #[test]
    fn aggregator_metrics_port_is_service_port_plus_1000() {
        let cfg = AggregatorConfig {
            port: 7001,
            vendors: vec![],
            pool: PoolConfig::from_env(),
            request_window: Duration::from_secs(60),
            request_window_cap: 1000,
        };
        assert_eq!(cfg.metrics_port(), 8001);
    }
}
