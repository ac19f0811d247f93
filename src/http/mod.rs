//! HTTP surface: the gated route and the server lifecycle around it.

mod server;
mod service;

pub use server::{LifecycleState, ServerLifecycle, ShutdownOutcome, PROCESSING_DELAY, SHUTDOWN_GRACE};
pub use service::{
    router, ACCEPTED_BODY, REJECTED_BODY, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
