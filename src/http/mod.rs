//! HTTP plumbing around the API handlers.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, trace, timeout, body limit)
//!     → pipeline.rs (session refresh, page protection, CSRF, token issuance)
//!     → api handlers
//!     → response.rs (envelopes, error taxonomy, rate-limit headers)
//!     → Send to client
//! ```

pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use pipeline::CurrentUser;
pub use request::X_REQUEST_ID;
pub use response::{success, success_with_message, with_rate_limit, ApiError, ApiResult, ErrorCode};
pub use server::{AppState, HttpServer, ServerError};
