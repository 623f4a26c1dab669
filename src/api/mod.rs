//! API route handlers.
//!
//! Handlers are thin: rate limit, validate, delegate to a collaborator in
//! [`crate::services`], shape the envelope. CSRF and session handling
//! already happened in the request pipeline.
//!
//! # Routes
//! ```text
//! GET  /api/health                  health.rs     (no limit)
//! POST /api/contact                 contact.rs    contact
//! POST /api/newsletter              subscribe.rs  newsletter
//! POST /api/waitlist                subscribe.rs  newsletter (own message)
//! POST /api/auth/login              auth.rs       auth
//! POST /api/auth/signup             auth.rs       auth
//! POST /api/auth/forgot-password    auth.rs       auth (own message)
//! GET  /auth/callback               auth.rs       (no limit)
//! POST /api/razorpay/create-order   payments.rs   payment
//! POST /api/razorpay/verify         payments.rs   payment
//! POST /api/razorpay/refund         payments.rs   payment
//! POST /api/razorpay/webhook        payments.rs   webhook
//! POST /api/ai/generate-post        ai.rs         ai (keyed by user)
//! GET  /api/user/profile            profile.rs    api (keyed by user)
//! PATCH /api/user/profile           profile.rs    api (keyed by user)
//! GET  /api/assessments/draft       drafts.rs     api (keyed by user)
//! POST /api/assessments/draft       drafts.rs     api (keyed by user)
//! DELETE /api/assessments/draft     drafts.rs     api (keyed by user)
//! ```
//!
//! Limiter buckets are keyed `identity:route`, where `route` is the logical
//! name each handler passes to [`enforce_limit`] (`contact`,
//! `razorpay/verify`, ...) rather than the raw request path, so `/api/contact`
//! and `/api/contact/` share one budget.
//!
//! Unknown paths answer 404 and known paths with an unsupported method
//! answer 405, both in the JSON error envelope.

pub mod ai;
pub mod auth;
pub mod contact;
pub mod drafts;
pub mod health;
pub mod input;
pub mod payments;
pub mod profile;
pub mod subscribe;

use axum::{
    body::Bytes,
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use serde_json::{Map, Value};

use crate::config::{RateLimitConfig, RateLimitPolicy};
use crate::http::response::{ApiError, ErrorCode};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::rate_limit::{resolve_identity, RateLimitDecision, DEFAULT_MESSAGE};
use crate::services::User;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/contact", post(contact::submit))
        .route("/api/newsletter", post(subscribe::newsletter))
        .route("/api/waitlist", post(subscribe::waitlist))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/callback", get(auth::callback))
        .route("/api/razorpay/create-order", post(payments::create_order))
        .route("/api/razorpay/verify", post(payments::verify))
        .route("/api/razorpay/refund", post(payments::refund))
        .route("/api/razorpay/webhook", post(payments::webhook))
        .route("/api/ai/generate-post", post(ai::generate_post))
        .route("/api/user/profile", get(profile::show).patch(profile::update))
        .route(
            "/api/assessments/draft",
            get(drafts::show).post(drafts::save).delete(drafts::discard),
        )
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
}

async fn not_found() -> ApiError {
    ApiError::not_found("Resource")
}

async fn method_not_allowed() -> ApiError {
    ApiError::new(ErrorCode::MethodNotAllowed, "Method not allowed")
}

/// Named rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Api,
    Auth,
    Contact,
    Newsletter,
    Ai,
    Payment,
    Webhook,
}

impl Policy {
    pub fn name(self) -> &'static str {
        match self {
            Policy::Api => "api",
            Policy::Auth => "auth",
            Policy::Contact => "contact",
            Policy::Newsletter => "newsletter",
            Policy::Ai => "ai",
            Policy::Payment => "payment",
            Policy::Webhook => "webhook",
        }
    }

    pub fn select(self, limits: &RateLimitConfig) -> &RateLimitPolicy {
        match self {
            Policy::Api => &limits.api,
            Policy::Auth => &limits.auth,
            Policy::Contact => &limits.contact,
            Policy::Newsletter => &limits.newsletter,
            Policy::Ai => &limits.ai,
            Policy::Payment => &limits.payment,
            Policy::Webhook => &limits.webhook,
        }
    }
}

/// Consult the limiter for `route`. A denial becomes the 429 error.
///
/// `message` overrides the policy's own message.
pub(crate) fn enforce_limit(
    state: &AppState,
    headers: &HeaderMap,
    explicit_identity: Option<&str>,
    route: &str,
    policy: Policy,
    message: Option<&str>,
) -> Result<RateLimitDecision, ApiError> {
    let identity = resolve_identity(explicit_identity, headers);
    let rules = policy.select(&state.config.rate_limit);
    let decision = state.limiter.check(&identity, route, rules);

    if decision.allowed {
        return Ok(decision);
    }

    tracing::warn!(
        policy = policy.name(),
        route,
        identity = %identity,
        "Rate limit exceeded"
    );
    metrics::record_rate_limited(policy.name());

    let message = message
        .or(rules.message.as_deref())
        .unwrap_or(DEFAULT_MESSAGE);
    Err(ApiError::rate_limited(message, &decision))
}

/// Parse a JSON object body. Field-level checks happen in [`input::Fields`].
pub(crate) fn parse_object(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::bad_request("Request body must be a JSON object")),
        Err(err) => Err(ApiError::bad_request("Invalid JSON in request body").with_internal(err)),
    }
}

/// The signed-in user or a 401 with `message`.
pub(crate) fn require_user<'a>(user: &'a Option<User>, message: &str) -> Result<&'a User, ApiError> {
    user.as_ref().ok_or_else(|| ApiError::unauthorized(message))
}

/// Admin check that distinguishes anonymous (401) from non-admin (403).
pub(crate) fn require_admin<'a>(user: &'a Option<User>) -> Result<&'a User, ApiError> {
    let user = require_user(user, "Authentication required")?;
    if !user.is_admin() {
        return Err(ApiError::forbidden("Admin access required"));
    }
    Ok(user)
}
