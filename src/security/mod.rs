//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming API request:
//!     → csrf.rs (double-submit check, token issuance)
//!         → token.rs (HMAC-signed timestamped tokens)
//!     → route handler
//!         → rate_limit.rs (per-route fixed window over store.rs)
//!         → redirect.rs (sanitize post-auth `redirectTo`)
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any CSRF check failure
//! - No trust in client input
//! - Everything here is synchronous and CPU-bound

pub mod csrf;
pub mod rate_limit;
pub mod redirect;
pub mod store;
pub mod token;

use std::time::{SystemTime, UNIX_EPOCH};

pub use csrf::{CsrfGuard, CsrfRejection, RouteClass};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use redirect::RedirectSanitizer;
pub use store::{MemoryStore, RateLimitEntry, RateLimitStore};
pub use token::{TokenCodec, TokenError};

/// Wall-clock milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
