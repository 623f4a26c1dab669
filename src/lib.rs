//! Cultural Innovation Lab request edge.
//!
//! CSRF double-submit protection, per-route rate limiting, redirect
//! sanitization and session-aware page protection in front of the site's
//! API handlers.

pub mod api;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod services;

pub use config::EdgeConfig;
pub use http::{AppState, HttpServer};
pub use lifecycle::Shutdown;
pub use services::Services;
