pub mod error;
pub mod rate_limiter;
pub mod retry;
pub mod tracker;
pub mod types;

pub use error::{MexcError, MexcResult};
pub use rate_limiter::{RateLimit, RateLimiter};
pub use retry::{execute_with_retry, RetryConfig};
pub use tracker::{Applied, OrderTracker, TrackerConfig};
pub use types::*;
