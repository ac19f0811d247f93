//! Request dispatch for the gated endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::ratelimit::{Admission, Decision};

/// Header carrying the configured bucket capacity.
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
/// Header carrying the tokens left when the request was judged.
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Header carrying the Unix timestamp one second after the last refill.
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

pub const ACCEPTED_BODY: &str = "Request accepted";
pub const REJECTED_BODY: &str = "Rate limit exceeded";

/// Shared state handed to every request.
pub struct GateState<A> {
    admission: Arc<A>,
    /// Simulated work done for each admitted request
    processing_delay: Duration,
}

impl<A> Clone for GateState<A> {
    fn clone(&self) -> Self {
        Self {
            admission: Arc::clone(&self.admission),
            processing_delay: self.processing_delay,
        }
    }
}

/// Build the router serving the single gated route.
///
/// Every method on `/` goes through the admission controller.
pub fn router<A: Admission + 'static>(admission: Arc<A>, processing_delay: Duration) -> Router {
    Router::new()
        .route("/", any(handle_request::<A>))
        .with_state(GateState {
            admission,
            processing_delay,
        })
        .layer(TraceLayer::new_for_http())
}

async fn handle_request<A: Admission + 'static>(State(state): State<GateState<A>>) -> Response {
    // The permit is taken here; the simulated work runs outside the bucket lock.
    let decision = state.admission.try_admit();

    if decision.admitted {
        tokio::time::sleep(state.processing_delay).await;
        return (StatusCode::OK, ACCEPTED_BODY).into_response();
    }

    debug!(
        limit = decision.limit,
        remaining = decision.remaining,
        reset = decision.reset_at,
        "Rate limit exceeded"
    );
    rejection(&decision)
}

fn rejection(decision: &Decision) -> Response {
    let headers = [
        (
            HeaderName::from_static(X_RATELIMIT_LIMIT),
            HeaderValue::from(decision.limit),
        ),
        (
            HeaderName::from_static(X_RATELIMIT_REMAINING),
            HeaderValue::from(decision.remaining),
        ),
        (
            HeaderName::from_static(X_RATELIMIT_RESET),
            HeaderValue::from(decision.reset_at),
        ),
    ];

    (StatusCode::TOO_MANY_REQUESTS, headers, REJECTED_BODY).into_response()
}
