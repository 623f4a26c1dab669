//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Collaborator call that must eventually land (webhook crediting):
//!     → retries.rs (re-run on error, up to max_attempts)
//!         → backoff.rs (exponential delay with jitter between attempts)
//! ```

pub mod backoff;
pub mod retries;

pub use retries::with_retry;
