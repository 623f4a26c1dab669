//! Health check.
//!
//! ```text
//! database fail                → unhealthy (503)
//! environment fail             → degraded  (503)
//! everything passes            → healthy   (200)
//! ```

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::config::EdgeConfig;
use crate::http::server::AppState;
use crate::security::rate_limit::iso_millis;
use crate::security::unix_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct Features {
    pub ai: bool,
    pub payments: bool,
    pub email: bool,
}

#[derive(Debug, Serialize)]
pub struct Checks {
    pub database: Check,
    pub environment: Check,
    pub features: Features,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: String,
    pub version: &'static str,
    pub checks: Checks,
}

impl HealthReport {
    fn http_status(&self) -> StatusCode {
        match self.status {
            HealthStatus::Healthy => StatusCode::OK,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let database = match state.services.store.ping().await {
        Ok(()) => Check {
            status: CheckStatus::Pass,
            message: "Connected".to_string(),
            latency_ms: Some(started.elapsed().as_millis() as u64),
        },
        Err(err) => {
            tracing::warn!(error = %err, "Health check: data store unreachable");
            Check {
                status: CheckStatus::Fail,
                message: "Data store unreachable".to_string(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            }
        }
    };

    let environment = environment_check(&state.config);
    let payments = &state.config.payments;
    let features = Features {
        ai: state.services.generator.is_enabled(),
        payments: payments.key_id.is_some() && payments.key_secret.is_some(),
        email: true,
    };

    let report = HealthReport {
        status: overall(&database, &environment),
        timestamp: iso_millis(unix_millis()),
        version: env!("CARGO_PKG_VERSION"),
        checks: Checks {
            database,
            environment,
            features,
        },
    };

    (report.http_status(), Json(report))
}

fn overall(database: &Check, environment: &Check) -> HealthStatus {
    match (database.status, environment.status) {
        (CheckStatus::Fail, _) => HealthStatus::Unhealthy,
        (_, CheckStatus::Fail) => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    }
}

/// Production must have the payment secrets; development always passes.
pub fn environment_check(config: &EdgeConfig) -> Check {
    if !config.is_production() {
        return Check {
            status: CheckStatus::Pass,
            message: "Development environment".to_string(),
            latency_ms: None,
        };
    }

    let payments = &config.payments;
    let missing: Vec<&str> = [
        ("RAZORPAY_KEY_ID", payments.key_id.is_some()),
        ("RAZORPAY_KEY_SECRET", payments.key_secret.is_some()),
        ("RAZORPAY_WEBHOOK_SECRET", payments.webhook_secret.is_some()),
    ]
    .into_iter()
    .filter(|(_, present)| !present)
    .map(|(name, _)| name)
    .collect();

    if missing.is_empty() {
        Check {
            status: CheckStatus::Pass,
            message: "All required variables set".to_string(),
            latency_ms: None,
        }
    } else {
        Check {
            status: CheckStatus::Fail,
            message: format!("Missing: {}", missing.join(", ")),
            latency_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    fn check(status: CheckStatus) -> Check {
        Check {
            status,
            message: String::new(),
            latency_ms: None,
        }
    }

    #[test]
    fn test_overall_status() {
        use CheckStatus::*;
        assert_eq!(overall(&check(Pass), &check(Pass)), HealthStatus::Healthy);
        assert_eq!(overall(&check(Pass), &check(Fail)), HealthStatus::Degraded);
        assert_eq!(overall(&check(Fail), &check(Pass)), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_environment_check() {
        let mut config = EdgeConfig::default();
        assert_eq!(environment_check(&config).status, CheckStatus::Pass);

        config.environment = Environment::Production;
        config.payments.key_secret = Some("ks".to_string());
        let result = environment_check(&config);
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.message, "Missing: RAZORPAY_KEY_ID, RAZORPAY_WEBHOOK_SECRET");

        config.payments.key_id = Some("rzp_live".to_string());
        config.payments.webhook_secret = Some("wh".to_string());
        assert_eq!(environment_check(&config).status, CheckStatus::Pass);
    }
}
