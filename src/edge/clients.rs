//! Thin RPC clients to the Pricing Aggregator and Checkout Engine processes.

use tonic::transport::Channel;
use tonic::Request;

use crate::pb;
use crate::pb::checkout_client::CheckoutClient;
use crate::pb::vendor_pricing_client::VendorPricingClient;

#[derive(Clone)]
pub struct Clients {
    pub aggregator: VendorPricingClient<Channel>,
    pub checkout: CheckoutClient<Channel>,
}

impl Clients {
    pub async fn connect(aggregator_addr: &str, checkout_addr: &str) -> anyhow::Result<Self> {
        let aggregator = VendorPricingClient::connect(aggregator_addr.to_string()).await?;
        let checkout = CheckoutClient::connect(checkout_addr.to_string()).await?;
        Ok(Self { aggregator, checkout })
    }
}

/// Propagate the edge request id as RPC metadata (§4.3 step 1).
pub fn with_request_id<T>(mut request: Request<T>, request_id: &str) -> Request<T> {
    if let Ok(value) = request_id.parse() {
        request.metadata_mut().insert("x-request-id", value);
    }
    request
}

pub fn quote_request(product_id: impl Into<String>) -> pb::QuoteRequest {
    pb::QuoteRequest {
        product_id: product_id.into(),
        quantity: 1,
        currency_code: "USD".to_string(),
    }
}
