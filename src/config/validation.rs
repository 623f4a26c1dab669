//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Refuse to start production without a dedicated CSRF secret
//! - Validate value ranges (windows > 0, limits > 0)
//! - Check the redirect allow-list is made of relative paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EdgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{EdgeConfig, PLACEHOLDER_CSRF_SECRET};

/// Minimum accepted length of the CSRF signing key in production.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("csrf.secret must be set in production")]
    MissingCsrfSecret,

    #[error("csrf.secret is the published placeholder value")]
    PlaceholderCsrfSecret,

    #[error("csrf.secret must be at least {MIN_SECRET_LEN} bytes in production")]
    WeakCsrfSecret,

    #[error("csrf.token_ttl_ms must be greater than zero")]
    ZeroTokenTtl,

    #[error("csrf.{field} must not be empty")]
    EmptyCsrfName { field: &'static str },

    #[error("rate_limit.{policy}.{field} must be greater than zero")]
    ZeroPolicyField {
        policy: &'static str,
        field: &'static str,
    },

    #[error("redirect prefix '{0}' must start with a single '/'")]
    InvalidRedirectPrefix(String),

    #[error("redirect.default_path '{0}' must be a relative path")]
    InvalidDefaultRedirect(String),

    #[error("listener.bind_address '{0}' is not a socket address")]
    InvalidBindAddress(String),
}

/// Validate a fully merged configuration.
pub fn validate_config(config: &EdgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.csrf.secret.as_deref() {
        None | Some("") if config.is_production() => errors.push(ValidationError::MissingCsrfSecret),
        Some(PLACEHOLDER_CSRF_SECRET) if config.is_production() => {
            errors.push(ValidationError::PlaceholderCsrfSecret)
        }
        Some(s) if config.is_production() && s.len() < MIN_SECRET_LEN => {
            errors.push(ValidationError::WeakCsrfSecret)
        }
        _ => {}
    }

    if config.csrf.token_ttl_ms == 0 {
        errors.push(ValidationError::ZeroTokenTtl);
    }
    if config.csrf.cookie_name.trim().is_empty() {
        errors.push(ValidationError::EmptyCsrfName { field: "cookie_name" });
    }
    if config.csrf.header_name.trim().is_empty() {
        errors.push(ValidationError::EmptyCsrfName { field: "header_name" });
    }

    for (name, policy) in config.rate_limit.named() {
        if policy.window_ms == 0 {
            errors.push(ValidationError::ZeroPolicyField {
                policy: name,
                field: "window_ms",
            });
        }
        if policy.max_requests == 0 {
            errors.push(ValidationError::ZeroPolicyField {
                policy: name,
                field: "max_requests",
            });
        }
    }

    for prefix in &config.redirect.allowed_prefixes {
        if !is_relative_path(prefix) {
            errors.push(ValidationError::InvalidRedirectPrefix(prefix.clone()));
        }
    }
    if !is_relative_path(&config.redirect.default_path) {
        errors.push(ValidationError::InvalidDefaultRedirect(
            config.redirect.default_path.clone(),
        ));
    }

    if config
        .listener
        .bind_address
        .parse::<std::net::SocketAddr>()
        .is_err()
    {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_relative_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains("://")
}
