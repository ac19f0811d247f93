//! Admission trait for abstracting the limiter behind the HTTP layer.

/// Outcome of a single admission check.
///
/// All fields are captured inside the same critical section as the
/// decision itself, so `remaining` is the token count the caller was
/// actually judged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Configured bucket capacity
    pub limit: u64,
    /// Tokens left after this decision
    pub remaining: u64,
    /// Unix timestamp (seconds) one second after the last refill
    pub reset_at: i64,
}

/// Trait for admission controllers.
///
/// The HTTP service is generic over this trait so it can be driven by the
/// token bucket in production and by fixed stubs in tests.
pub trait Admission: Send + Sync {
    /// Decide whether one request may proceed, consuming a permit if so.
    fn try_admit(&self) -> Decision;

    /// Decide whether one request may proceed.
    fn admit(&self) -> bool {
        self.try_admit().admitted
    }
}
