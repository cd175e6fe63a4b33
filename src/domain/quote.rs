//! Quote request/response types (§3).

use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::pb;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub product_id: String,
    pub quantity: u32,
    pub currency_code: String,
}

impl QuoteRequest {
    pub fn new(product_id: impl Into<String>, quantity: u32, currency_code: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            quantity: quantity.max(1),
            currency_code: currency_code.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub vendor_id: String,
    pub vendor_name: String,
    pub product_id: String,
    pub price: Money,
    pub estimated_days: u32,
    pub timestamp_ms: i64,
}

impl From<QuoteRequest> for pb::QuoteRequest {
    fn from(r: QuoteRequest) -> Self {
        pb::QuoteRequest {
            product_id: r.product_id,
            quantity: r.quantity,
            currency_code: r.currency_code,
        }
    }
}

impl From<pb::QuoteRequest> for QuoteRequest {
    fn from(r: pb::QuoteRequest) -> Self {
        QuoteRequest {
            product_id: r.product_id,
            quantity: r.quantity.max(1),
            currency_code: r.currency_code,
        }
    }
}

impl From<PriceQuote> for pb::PriceQuote {
    fn from(q: PriceQuote) -> Self {
        pb::PriceQuote {
            vendor_id: q.vendor_id,
            vendor_name: q.vendor_name,
            product_id: q.product_id,
            price: Some(q.price.into()),
            estimated_days: q.estimated_days,
            timestamp_ms: q.timestamp_ms,
        }
    }
}

impl TryFrom<pb::PriceQuote> for PriceQuote {
    type Error = anyhow::Error;

    fn try_from(q: pb::PriceQuote) -> Result<Self, Self::Error> {
        Ok(PriceQuote {
            vendor_id: q.vendor_id,
            vendor_name: q.vendor_name,
            product_id: q.product_id,
            price: q
                .price
                .ok_or_else(|| anyhow::anyhow!("PriceQuote missing price"))?
                .into(),
            estimated_days: q.estimated_days,
            timestamp_ms: q.timestamp_ms,
        })
    }
}
