//! Rate limiting logic and state management.

mod admission;
mod bucket;

pub use admission::{Admission, Decision};
pub use bucket::{BucketSnapshot, TokenBucket};
