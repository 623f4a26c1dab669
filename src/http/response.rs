//! API response envelopes and the error taxonomy.
//!
//! # Shapes
//! ```text
//! success: { "success": true, "data"?: ..., "message"?: ... }
//! error:   { "success": false, "error": { "code", "message", "details"? } }
//! 429:     { "error": message, "retryAfter": seconds }
//!          + Retry-After, X-RateLimit-Reset
//! ```
//!
//! Handlers that consulted the rate limiter attach the decision to the
//! response extensions; the request pipeline turns it into
//! `X-RateLimit-Remaining` / `X-RateLimit-Reset` on the way out.

use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::security::rate_limit::RateLimitDecision;
use crate::security::unix_millis;
use crate::services::ServiceError;

pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

pub type ApiResult = Result<Response, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    ValidationError,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    RateLimited,
    Conflict,
    InternalError,
    ServiceUnavailable,
    DatabaseError,
    PaymentFailed,
    PaymentVerificationFailed,
    InvalidPack,
    AiGenerationFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::PaymentFailed => "PAYMENT_FAILED",
            ErrorCode::PaymentVerificationFailed => "PAYMENT_VERIFICATION_FAILED",
            ErrorCode::InvalidPack => "INVALID_PACK",
            ErrorCode::AiGenerationFailed => "AI_GENERATION_FAILED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest
            | ErrorCode::ValidationError
            | ErrorCode::PaymentFailed
            | ErrorCode::PaymentVerificationFailed
            | ErrorCode::InvalidPack => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError
            | ErrorCode::DatabaseError
            | ErrorCode::AiGenerationFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RetryHint {
    after_secs: u64,
    reset_at: String,
}

/// Error returned by API handlers.
///
/// `internal` is logged for 5xx responses and never rendered.
#[derive(Debug, Clone, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
    internal: Option<String>,
    retry: Option<RetryHint>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            internal: None,
            retry: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a cause for the logs.
    pub fn with_internal(mut self, cause: impl std::fmt::Display) -> Self {
        self.internal = Some(cause.to_string());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// `message` is the first failure; `errors` lists all of them.
    pub fn validation(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message).with_details(json!({ "errors": errors }))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{resource} not found"))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(service: &str) -> Self {
        Self::new(
            ErrorCode::ServiceUnavailable,
            format!("{service} is temporarily unavailable"),
        )
    }

    pub fn payment_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PaymentFailed, message)
    }

    pub fn payment_verification_failed() -> Self {
        Self::new(ErrorCode::PaymentVerificationFailed, "Payment verification failed")
    }

    pub fn invalid_pack() -> Self {
        Self::new(ErrorCode::InvalidPack, "Invalid credit pack")
    }

    pub fn ai_generation_failed() -> Self {
        Self::new(ErrorCode::AiGenerationFailed, "AI generation failed")
    }

    /// 429 for a denied limiter decision.
    pub fn rate_limited(message: impl Into<String>, decision: &RateLimitDecision) -> Self {
        Self::rate_limited_at(message, decision, unix_millis())
    }

    pub fn rate_limited_at(
        message: impl Into<String>,
        decision: &RateLimitDecision,
        now_ms: u64,
    ) -> Self {
        let mut err = Self::new(ErrorCode::RateLimited, message);
        err.retry = Some(RetryHint {
            after_secs: decision.retry_after_secs(now_ms),
            reset_at: decision.reset_at_iso(),
        });
        err
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let api = match &err {
            ServiceError::Unavailable(_) => ApiError::service_unavailable("Service"),
            ServiceError::Rejected(_) => ApiError::bad_request("Request was rejected"),
            ServiceError::Conflict(_) => ApiError::conflict("Resource already exists"),
            ServiceError::Backend(_) => ApiError::database("Database error"),
        };
        api.with_internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(
                code = self.code.as_str(),
                message = %self.message,
                cause = self.internal.as_deref().unwrap_or(""),
                "API error"
            );
        }

        if let Some(retry) = self.retry {
            let mut response = (
                status,
                Json(json!({ "error": self.message, "retryAfter": retry.after_secs })),
            )
                .into_response();
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry.after_secs));
            if let Ok(reset) = HeaderValue::from_str(&retry.reset_at) {
                headers.insert(X_RATELIMIT_RESET, reset);
            }
            return response;
        }

        let mut error = Map::new();
        error.insert("code".to_string(), Value::from(self.code.as_str()));
        error.insert("message".to_string(), Value::from(self.message));
        if let Some(details) = self.details {
            error.insert("details".to_string(), details);
        }

        (status, Json(json!({ "success": false, "error": error }))).into_response()
    }
}

/// `{ "success": true, "data": data }`
pub fn success<T: Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

/// `{ "success": true, "data"?: data, "message": message }`
pub fn success_with_message<T: Serialize>(data: Option<T>, message: &str) -> Response {
    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    if let Some(data) = data {
        body.insert("data".to_string(), json!(data));
    }
    body.insert("message".to_string(), Value::from(message));
    Json(Value::Object(body)).into_response()
}

/// Record a limiter decision for the pipeline to turn into headers.
pub fn with_rate_limit(response: impl IntoResponse, decision: RateLimitDecision) -> Response {
    let mut response = response.into_response();
    response.extensions_mut().insert(decision);
    response
}

/// Copy a recorded decision onto `X-RateLimit-*` headers.
pub fn apply_rate_limit_headers(response: &mut Response) {
    let Some(decision) = response.extensions().get::<RateLimitDecision>().copied() else {
        return;
    };
    if !decision.allowed {
        return;
    }
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Ok(reset) = HeaderValue::from_str(&decision.reset_at_iso()) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
}
