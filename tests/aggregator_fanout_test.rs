//! Exercises the Pricing Aggregator's `StreamQuotes` fan-out against real
//! `VendorBackend` services bound to ephemeral localhost ports, covering the
//! §8 scenarios: happy multi-vendor fan-out, zero-vendor boundary, and the
//! per-vendor deadline cutting off a slow vendor.

use std::time::Duration;

use pricehub_backend::config::AggregatorConfig;
use pricehub_backend::config::PoolConfig;
use pricehub_backend::domain::VendorEndpoint;
use pricehub_backend::pb::vendor_backend_server::{VendorBackend, VendorBackendServer};
use pricehub_backend::pb::vendor_pricing_server::VendorPricing;
use pricehub_backend::pb::{PriceQuote, QuoteRequest};
use pricehub_backend::pool::AdaptiveWorkerPool;
use pricehub_backend::aggregator::AggregatorService;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};

/// A vendor double that replies instantly with a fixed price, or sleeps past
/// the per-vendor deadline when configured to simulate a hung backend.
struct FixedPriceVendor {
    vendor_id: String,
    cents: i64,
    delay: Duration,
}

#[tonic::async_trait]
impl VendorBackend for FixedPriceVendor {
    async fn get_quote(&self, request: Request<QuoteRequest>) -> Result<Response<PriceQuote>, Status> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let req = request.into_inner();
        Ok(Response::new(PriceQuote {
            vendor_id: self.vendor_id.clone(),
            vendor_name: self.vendor_id.clone(),
            product_id: req.product_id,
            price: Some(pricehub_backend::pb::Money {
                currency_code: "USD".to_string(),
                amount_cents: self.cents,
            }),
            estimated_days: 3,
            timestamp_ms: 0,
        }))
    }
}

async fn spawn_vendor(vendor_id: &str, cents: i64, delay: Duration) -> VendorEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    let service = FixedPriceVendor {
        vendor_id: vendor_id.to_string(),
        cents,
        delay,
    };
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(VendorBackendServer::new(service))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .ok();
    });
    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(20)).await;
    VendorEndpoint {
        host: addr.ip().to_string(),
        port: addr.port(),
        display_name: vendor_id.to_string(),
    }
}

fn test_pool_config() -> PoolConfig {
    PoolConfig {
        min_threads: 4,
        max_threads: 8,
        step: 4,
        queue_capacity: 64,
        target_up_ms: 250,
        target_down_ms: 200,
        cooldown: Duration::from_secs(20),
        idle_timeout: Duration::from_secs(60),
        controller_tick: Duration::from_secs(5),
        latency_window: 200,
    }
}

async fn collect_quotes(vendors: Vec<VendorEndpoint>) -> Vec<PriceQuote> {
    let cfg = AggregatorConfig {
        port: 0,
        vendors,
        pool: test_pool_config(),
        request_window: Duration::from_secs(60),
        request_window_cap: 1000,
    };
    let pool = AdaptiveWorkerPool::new(&cfg.pool);
    let service = AggregatorService::new(&cfg, pool);

    let request = Request::new(QuoteRequest {
        product_id: "sku-laptop".to_string(),
        quantity: 1,
        currency_code: "USD".to_string(),
    });
    let response = service.stream_quotes(request).await.expect("stream_quotes should not itself error");
    let mut stream = response.into_inner();
    let mut quotes = Vec::new();
    while let Some(item) = stream.next().await {
        if let Ok(quote) = item {
            quotes.push(quote);
        }
    }
    quotes
}

#[tokio::test]
async fn two_vendors_both_reply() {
    let v1 = spawn_vendor("amazon", 10_000, Duration::ZERO).await;
    let v2 = spawn_vendor("bestbuy", 12_000, Duration::ZERO).await;

    let quotes = collect_quotes(vec![v1, v2]).await;
    assert_eq!(quotes.len(), 2);

    // §8 invariant 1: each emitted frame's vendor_id is distinct and maps to
    // a configured endpoint.
    let mut vendor_ids: Vec<_> = quotes.iter().map(|q| q.vendor_id.clone()).collect();
    vendor_ids.sort();
    assert_eq!(vendor_ids, vec!["amazon".to_string(), "bestbuy".to_string()]);
}

#[tokio::test]
async fn cheapest_of_two_vendors_is_identifiable() {
    let cheap = spawn_vendor("v1", 5_000, Duration::ZERO).await;
    let pricey = spawn_vendor("v2", 9_000, Duration::ZERO).await;

    let quotes = collect_quotes(vec![cheap, pricey]).await;
    let best = quotes.iter().min_by_key(|q| q.price.as_ref().unwrap().amount_cents).unwrap();
    assert_eq!(best.vendor_id, "v1");
}

#[tokio::test]
async fn empty_vendor_set_closes_cleanly_with_zero_frames() {
    let quotes = collect_quotes(vec![]).await;
    assert!(quotes.is_empty());
}

#[tokio::test]
async fn slow_vendor_is_absorbed_and_excluded_by_per_vendor_deadline() {
    // The per-vendor deadline (1500ms) is a compiled-in constant; 3s sleep
    // guarantees this vendor's quote never makes it onto the stream, while a
    // fast sibling vendor's quote still does (§4.2 "Failure semantics").
    let slow = spawn_vendor("slow", 10_000, Duration::from_secs(3)).await;
    let fast = spawn_vendor("fast", 8_000, Duration::ZERO).await;

    let start = std::time::Instant::now();
    let quotes = collect_quotes(vec![slow, fast]).await;
    let elapsed = start.elapsed();

    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].vendor_id, "fast");
    assert!(elapsed < Duration::from_secs(2), "slow vendor must be cut off by its 1500ms deadline, not the 10s aggregate one");
}
