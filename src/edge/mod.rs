//! Edge Bridge (§4.3): the only HTTP surface of the system, translating
//! browser-friendly JSON/SSE into the gRPC calls the backend processes
//! speak. Router assembly follows `main.rs`'s layered-`Router` shape:
//! build the route table, apply the cross-cutting `layer()`s, serve.

pub mod clients;
pub mod middleware;
pub mod routes;

use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use clients::Clients;
pub use routes::EdgeState;

use self::middleware::RateLimiter;

/// Mount the four HTTP endpoints and apply the request-id and rate-limit
/// layers, in that order (§4.3 step order: request id is adopted/minted
/// first, the rate limiter decides second).
pub fn router(state: EdgeState, rate_limiter: RateLimiter) -> Router {
    let rate_limited = Router::new()
        .route("/api/search", get(routes::search))
        .route("/api/quote", get(routes::best_quote))
        .route("/api/checkout", post(routes::start_checkout))
        .route("/api/checkout/:id/stream", get(routes::checkout_stream))
        .route_layer(axum_mw::from_fn_with_state(rate_limiter, middleware::rate_limit))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(rate_limited)
        .layer(axum_mw::from_fn(middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "OK"
}
