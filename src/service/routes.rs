//! HTTP surface of the probed service
//!
//! - `/healthz` - liveness text
//! - `/content` - static payload the request workers fetch

use super::shutdown::PhaseWatch;
use axum::{
    extract::{Request, State},
    http::{header::CONNECTION, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};

pub const HEALTHZ_BODY: &str = "I am alive!\n";
pub const CONTENT_BODY: &str = "Lorem ipsum dolor...\n";

async fn healthz() -> &'static str {
    HEALTHZ_BODY
}

async fn content() -> &'static str {
    CONTENT_BODY
}

/// Ask hyper to close the connection after this response once keep-alive
/// has been switched off
async fn keep_alive_policy(
    State(phases): State<PhaseWatch>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if !phases.current().keep_alive_enabled() {
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

/// Build the router for the probed service
pub fn build_router(phases: PhaseWatch) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/content", get(content))
        .layer(middleware::from_fn_with_state(phases, keep_alive_policy))
}
