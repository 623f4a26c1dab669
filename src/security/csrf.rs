//! CSRF double-submit guard.
//!
//! # Flow (per API request)
//! ```text
//! classify(method, path)
//!     NotApi    → no CSRF logic at all
//!     Exempt    → skip validation, still issue a token if needed
//!     Safe      → GET/HEAD/OPTIONS, still issue a token if needed
//!     Protected → validate(header, cookie) → 403 on any failure
//! ```
//!
//! Fail closed: anything that cannot be compared is a rejection, never a pass.

use axum::{
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::json;
use thiserror::Error;

use crate::config::CsrfConfig;
use crate::security::token::{constant_time_eq, TokenCodec, TokenError};

/// Structured 403 reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrfRejection {
    #[error("CSRF token missing")]
    Missing,

    #[error("Invalid CSRF token")]
    Invalid,

    #[error("CSRF token validation failed")]
    ValidationError,
}

impl CsrfRejection {
    pub fn code(&self) -> &'static str {
        match self {
            CsrfRejection::Missing => "CSRF_MISSING",
            CsrfRejection::Invalid => "CSRF_INVALID",
            CsrfRejection::ValidationError => "CSRF_VALIDATION_ERROR",
        }
    }
}

impl IntoResponse for CsrfRejection {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            },
        });
        (StatusCode::FORBIDDEN, Json(body)).into_response()
    }
}

/// How the guard treats a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    NotApi,
    Exempt,
    Safe,
    Protected,
}

impl RouteClass {
    /// Whether the token-issuance fallback runs for this class.
    pub fn issues_token(&self) -> bool {
        !matches!(self, RouteClass::NotApi)
    }
}

/// Stateless apart from the signing key held by its codec.
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    codec: TokenCodec,
    cookie_name: String,
    header_name: String,
    api_prefix: String,
    exempt_routes: Vec<String>,
    protected_methods: Vec<Method>,
    secure_cookie: bool,
}

impl CsrfGuard {
    /// `secure_cookie` is true in production.
    pub fn new(config: &CsrfConfig, codec: TokenCodec, secure_cookie: bool) -> Self {
        let protected_methods = config
            .protected_methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).ok())
            .collect();

        Self {
            codec,
            cookie_name: config.cookie_name.clone(),
            header_name: config.header_name.to_ascii_lowercase(),
            api_prefix: config.api_prefix.clone(),
            exempt_routes: config.exempt_routes.clone(),
            protected_methods,
            secure_cookie,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn is_api_path(&self, path: &str) -> bool {
        path.starts_with(&self.api_prefix)
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_routes.iter().any(|route| path.starts_with(route.as_str()))
    }

    pub fn requires_token(&self, method: &Method) -> bool {
        self.protected_methods.contains(method)
    }

    pub fn classify(&self, method: &Method, path: &str) -> RouteClass {
        if !self.is_api_path(path) {
            RouteClass::NotApi
        } else if self.is_exempt(path) {
            RouteClass::Exempt
        } else if self.requires_token(method) {
            RouteClass::Protected
        } else {
            RouteClass::Safe
        }
    }

    /// Token carried by the request cookie, if any.
    pub fn cookie_token<'a>(&self, jar: &'a CookieJar) -> Option<&'a str> {
        jar.get(&self.cookie_name).map(|c| c.value())
    }

    /// Run the check appropriate for `class`.
    pub fn enforce(
        &self,
        class: RouteClass,
        headers: &HeaderMap,
        cookie_token: Option<&str>,
    ) -> Result<(), CsrfRejection> {
        match class {
            RouteClass::Protected => self.validate(headers.get(&self.header_name), cookie_token),
            _ => Ok(()),
        }
    }

    /// Double-submit check: header present, cookie present, equal, and the
    /// cookie token verifies.
    pub fn validate(
        &self,
        header: Option<&HeaderValue>,
        cookie: Option<&str>,
    ) -> Result<(), CsrfRejection> {
        let header = header.filter(|h| !h.is_empty());
        let cookie = cookie.filter(|c| !c.is_empty());

        let (header, cookie) = match (header, cookie) {
            (Some(h), Some(c)) => (h, c),
            _ => return Err(CsrfRejection::Missing),
        };

        let header = header
            .to_str()
            .map_err(|_| CsrfRejection::ValidationError)?;

        if !constant_time_eq(header.as_bytes(), cookie.as_bytes()) {
            return Err(CsrfRejection::Invalid);
        }

        match self.codec.check(cookie) {
            Ok(()) => Ok(()),
            Err(TokenError::Key) => Err(CsrfRejection::ValidationError),
            Err(_) => Err(CsrfRejection::Invalid),
        }
    }

    /// True when the request lacks a cookie token that still verifies.
    pub fn needs_fresh_token(&self, existing: Option<&str>) -> bool {
        !existing.is_some_and(|token| self.codec.verify(token))
    }

    /// Readable by client script so it can be echoed in the header.
    pub fn build_cookie(&self, token: String) -> Cookie<'static> {
        let max_age_secs = i64::try_from(self.codec.ttl_ms() / 1000).unwrap_or(i64::MAX);
        Cookie::build((self.cookie_name.clone(), token))
            .path("/")
            .http_only(false)
            .secure(self.secure_cookie)
            .same_site(SameSite::Strict)
            .max_age(time::Duration::seconds(max_age_secs))
            .build()
    }

    /// Generate a token and wrap it in its cookie.
    pub fn issue_cookie(&self) -> Result<Cookie<'static>, TokenError> {
        self.codec.generate().map(|token| self.build_cookie(token))
    }
}
