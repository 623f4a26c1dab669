//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use rand::RngCore;
use thiserror::Error;

use crate::config::schema::{EdgeConfig, Environment};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<EdgeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: EdgeConfig = toml::from_str(&content)?;
    finish(config, |var| std::env::var(var).ok())
}

/// Build configuration from defaults plus environment overrides.
pub fn load_from_env() -> Result<EdgeConfig, ConfigError> {
    finish(EdgeConfig::default(), |var| std::env::var(var).ok())
}

/// Apply overrides from `lookup`, provision a development secret if needed, and validate.
pub fn finish<F>(mut config: EdgeConfig, lookup: F) -> Result<EdgeConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, &lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    ensure_csrf_secret(&mut config);
    Ok(config)
}

/// Recognized environment variables. Only `CSRF_SECRET` feeds the CSRF key.
pub fn apply_env_overrides<F>(config: &mut EdgeConfig, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env) = lookup("APP_ENV") {
        config.environment = env
            .parse::<Environment>()
            .map_err(|reason| ConfigError::Env { var: "APP_ENV", reason })?;
    }
    if let Some(secret) = non_empty(lookup("CSRF_SECRET")) {
        config.csrf.secret = Some(secret);
    }
    if let Some(secret) = non_empty(lookup("RAZORPAY_KEY_SECRET")) {
        config.payments.key_secret = Some(secret);
    }
    if let Some(secret) = non_empty(lookup("RAZORPAY_WEBHOOK_SECRET")) {
        config.payments.webhook_secret = Some(secret);
    }
    if let Some(key_id) = non_empty(lookup("RAZORPAY_KEY_ID")) {
        config.payments.key_id = Some(key_id);
    }
    if let Some(level) = non_empty(lookup("LOG_LEVEL")) {
        config.observability.log_level = level.to_lowercase();
    }
    if let Some(email) = non_empty(lookup("ADMIN_EMAIL")) {
        config.mail.admin_email = email;
    }
    if let Some(addr) = non_empty(lookup("BIND_ADDRESS")) {
        config.listener.bind_address = addr;
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Development runs without a configured secret get a random per-process key.
/// Tokens then do not survive a restart.
///
/// Loading happens before the subscriber is installed, so the caller reports
/// `csrf.ephemeral_secret` once logging is up.
fn ensure_csrf_secret(config: &mut EdgeConfig) {
    if config.csrf.secret.as_deref().is_some_and(|s| !s.is_empty()) {
        return;
    }
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    config.csrf.secret = Some(hex::encode(bytes));
    config.csrf.ephemeral_secret = true;
}
