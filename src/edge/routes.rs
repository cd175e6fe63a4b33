//! Edge Bridge HTTP handlers (§4.3, §6).

use std::collections::hash_map::DefaultHasher;
use std::convert::Infallible;
use std::hash::{Hash, Hasher};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::deadlines;
use crate::domain::CheckoutRequest;
use crate::edge::clients::{quote_request, with_request_id, Clients};
use crate::edge::middleware::RequestId;
use crate::money::Money;
use crate::pb;

/// `Clients` is cheap to clone (its gRPC client types just clone their
/// `Channel` handle), so each request clones its own pair rather than
/// serializing every Edge Bridge request behind one shared lock.
#[derive(Clone)]
pub struct EdgeState {
    pub clients: Clients,
}

fn request_id_of(headers: &HeaderMap, ext: Option<&RequestId>) -> String {
    ext.map(|r| r.0.clone())
        .or_else(|| headers.get("x-request-id").and_then(|v| v.to_str().ok()).map(str::to_string))
        .unwrap_or_default()
}

/// `"sku-" + (|stable_hash(lowercase(trim(q)))| mod 1000)` (§4.3 search handler).
fn product_id_for_query(q: &str) -> String {
    let normalized = q.trim().to_lowercase();
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    format!("sku-{}", hasher.finish() % 1000)
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchEvent {
    vendor: String,
    vendor_id: String,
    price: f64,
    currency: String,
    estimated_days: u32,
    timestamp: i64,
}

impl From<pb::PriceQuote> for SearchEvent {
    fn from(q: pb::PriceQuote) -> Self {
        let price = q.price.unwrap_or_default();
        SearchEvent {
            vendor: q.vendor_name,
            vendor_id: q.vendor_id,
            price: price.amount_cents as f64 / 100.0,
            currency: price.currency_code,
            estimated_days: q.estimated_days,
            timestamp: q.timestamp_ms,
        }
    }
}

/// `GET /api/search?q=...` — relays `StreamQuotes` as SSE `quote` events with
/// a 15s heartbeat and a 60s stream timeout (§4.3).
pub async fn search(
    State(state): State<EdgeState>,
    Query(params): Query<SearchQuery>,
    headers: HeaderMap,
    ext: axum::extract::Extension<RequestId>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let request_id = request_id_of(&headers, Some(&ext.0));
    let product_id = product_id_for_query(&params.q);

    let mut clients = state.clients.clone();
    let request = with_request_id(tonic::Request::new(quote_request(product_id)), &request_id);
    let upstream = clients.aggregator.stream_quotes(request).await;

    let quotes: futures_util::stream::BoxStream<'static, Result<Event, Infallible>> = match upstream {
        Ok(response) => {
            let inner = tokio_stream::StreamExt::timeout(response.into_inner(), deadlines::EDGE_SEARCH_UPSTREAM);
            Box::pin(inner.filter_map(|item| match item {
                Ok(Ok(quote)) => {
                    let event = SearchEvent::from(quote);
                    serde_json::to_string(&event).ok().map(|json| Ok(Event::default().event("quote").data(json)))
                }
                Ok(Err(status)) => {
                    warn!(%status, "upstream quote stream error");
                    None
                }
                Err(_elapsed) => None,
            }))
        }
        Err(status) => {
            warn!(%status, "failed to open upstream StreamQuotes");
            Box::pin(futures_util::stream::empty())
        }
    };
    // Overall stream timeout independent of the per-quote upstream timeout
    // above, so a slow-but-not-dead upstream can't hold the SSE connection
    // open past the Bridge's own budget (§4.3 "edge HTTP streaming timeout").
    let quotes = Box::pin(quotes.take_until(tokio::time::sleep(deadlines::EDGE_SEARCH_STREAM)));

    Sse::new(quotes).keep_alive(KeepAlive::new().interval(deadlines::HEARTBEAT_INTERVAL).text("heartbeat"))
}

#[derive(Debug, Deserialize)]
pub struct BestQuoteQuery {
    #[serde(rename = "productId")]
    pub product_id: String,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BestQuoteResponse {
    vendor: String,
    vendor_id: String,
    price: f64,
    currency: String,
    estimated_days: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AllQuotesResponse {
    product_id: String,
    quote_count: usize,
    quotes: Vec<BestQuoteResponse>,
}

enum QuoteResponse {
    Best(BestQuoteResponse),
    All(AllQuotesResponse),
}

impl IntoResponse for QuoteResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            QuoteResponse::Best(r) => Json(r).into_response(),
            QuoteResponse::All(r) => Json(r).into_response(),
        }
    }
}

impl From<pb::PriceQuote> for BestQuoteResponse {
    fn from(q: pb::PriceQuote) -> Self {
        let price = q.price.unwrap_or_default();
        BestQuoteResponse {
            vendor: q.vendor_name,
            vendor_id: q.vendor_id,
            price: price.amount_cents as f64 / 100.0,
            currency: price.currency_code,
            estimated_days: q.estimated_days,
        }
    }
}

/// `GET /api/quote?productId=...&mode=best|all` (§4.3).
pub async fn best_quote(
    State(state): State<EdgeState>,
    Query(params): Query<BestQuoteQuery>,
    headers: HeaderMap,
    ext: axum::extract::Extension<RequestId>,
) -> Result<QuoteResponse, StatusCode> {
    let request_id = request_id_of(&headers, Some(&ext.0));
    let mode = params.mode.as_deref().unwrap_or("best");

    let collect = async {
        let mut clients = state.clients.clone();
        let request = with_request_id(tonic::Request::new(quote_request(params.product_id.clone())), &request_id);
        let response = clients.aggregator.stream_quotes(request).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let mut stream = response.into_inner();
        let mut quotes = Vec::new();
        while let Some(item) = stream.next().await {
            if let Ok(quote) = item {
                quotes.push(quote);
            }
        }
        Ok::<_, StatusCode>(quotes)
    };

    let quotes = tokio::time::timeout(deadlines::EDGE_BEST_QUOTE_BUDGET, collect)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if mode == "all" {
        let quote_count = quotes.len();
        return Ok(QuoteResponse::All(AllQuotesResponse {
            product_id: params.product_id,
            quote_count,
            quotes: quotes.into_iter().map(BestQuoteResponse::from).collect(),
        }));
    }

    let best = quotes
        .into_iter()
        .min_by(|a, b| {
            let pa = a.price.as_ref().map(|m| m.amount_cents).unwrap_or(i64::MAX);
            let pb = b.price.as_ref().map(|m| m.amount_cents).unwrap_or(i64::MAX);
            pa.cmp(&pb)
        })
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(QuoteResponse::Best(BestQuoteResponse::from(best)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutStartResponse {
    checkout_id: String,
    status: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    currency: Option<String>,
}

/// `overall_state` shares `NodeState`'s bare vocabulary in the data model
/// (§3, §4.4 step 4: `overall_state = PENDING`); the wire enum's `OVERALL_`
/// prefix exists only to keep `NodeState`/`OverallState` proto value names
/// unique within the package, so it's stripped before it reaches JSON.
fn overall_state_name(state: i32) -> String {
    match pb::OverallState::try_from(state) {
        Ok(pb::OverallState::OverallPending) => "PENDING".to_string(),
        Ok(pb::OverallState::OverallRunning) => "RUNNING".to_string(),
        Ok(pb::OverallState::OverallCompleted) => "COMPLETED".to_string(),
        Ok(pb::OverallState::OverallFailed) => "FAILED".to_string(),
        Ok(pb::OverallState::OverallStateUnspecified) | Err(_) => String::new(),
    }
}

/// `POST /api/checkout` (§4.3).
pub async fn start_checkout(
    State(state): State<EdgeState>,
    headers: HeaderMap,
    ext: axum::extract::Extension<RequestId>,
    Json(mut body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutStartResponse>, StatusCode> {
    let request_id = request_id_of(&headers, Some(&ext.0));

    // The Bridge forwards Idempotency-Key opaquely; it does not dedupe itself (§4.3, §9).
    if body.idempotency_key.is_none() {
        body.idempotency_key = headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    }

    body.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    let mut clients = state.clients.clone();
    let mut request = with_request_id(tonic::Request::new(pb::CheckoutRequest::from(body)), &request_id);
    request.set_timeout(deadlines::CHECKOUT_START);

    let response = clients
        .checkout
        .start(request)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_inner();

    Ok(Json(CheckoutStartResponse {
        checkout_id: response.checkout_id,
        status: overall_state_name(response.overall_state),
        message: response.message,
        total_amount: response.total_amount.as_ref().map(|m| m.amount_cents as f64 / 100.0),
        currency: response.total_amount.map(|m| m.currency_code),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeStatusEvent {
    node_id: String,
    state: String,
    message: String,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl From<pb::NodeStatus> for NodeStatusEvent {
    fn from(s: pb::NodeStatus) -> Self {
        NodeStatusEvent {
            node_id: pb::NodeId::try_from(s.node_id).map(|n| n.as_str_name().to_lowercase()).unwrap_or_default(),
            state: pb::NodeState::try_from(s.state).map(|n| n.as_str_name().to_string()).unwrap_or_default(),
            message: s.message,
            timestamp: s.timestamp_ms,
            error_code: (!s.error_code.is_empty()).then_some(s.error_code),
            error_message: (!s.error_message.is_empty()).then_some(s.error_message),
        }
    }
}

/// `GET /api/checkout/{id}/stream` (§4.3).
pub async fn checkout_stream(
    State(state): State<EdgeState>,
    Path(checkout_id): Path<String>,
    headers: HeaderMap,
    ext: axum::extract::Extension<RequestId>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let request_id = request_id_of(&headers, Some(&ext.0));

    let mut clients = state.clients.clone();
    let mut request = with_request_id(tonic::Request::new(pb::GetStatusRequest { checkout_id }), &request_id);
    request.set_timeout(deadlines::EDGE_CHECKOUT_STATUS_STREAM);
    let upstream = clients.checkout.get_status(request).await;

    let events: futures_util::stream::BoxStream<'static, Result<Event, Infallible>> = match upstream {
        Ok(response) => {
            let inner = response.into_inner();
            Box::pin(inner.filter_map(|item| match item {
                Ok(status) => {
                    let event = NodeStatusEvent::from(status);
                    serde_json::to_string(&event).ok().map(|json| Ok(Event::default().event("status").data(json)))
                }
                Err(status) => {
                    warn!(%status, "checkout status stream error");
                    None
                }
            }))
        }
        Err(status) => {
            warn!(%status, "failed to open checkout status stream");
            Box::pin(futures_util::stream::empty())
        }
    };

    Sse::new(events).keep_alive(KeepAlive::new().interval(deadlines::HEARTBEAT_INTERVAL).text(""))
}
