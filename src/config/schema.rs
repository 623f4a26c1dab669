//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the edge
//! service. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Placeholder secret shipped in example configs. Never accepted in production.
pub const PLACEHOLDER_CSRF_SECRET: &str = "fallback-secret-change-in-production";

/// Root configuration for the edge service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EdgeConfig {
    /// Deployment environment.
    pub environment: Environment,

    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// CSRF token protocol settings.
    pub csrf: CsrfConfig,

    /// Per-route rate limiting policies.
    pub rate_limit: RateLimitConfig,

    /// Post-authentication redirect allow-list.
    pub redirect: RedirectConfig,

    /// Page protection rules applied after session refresh.
    pub session: SessionConfig,

    /// Payment gateway secrets and credit packs.
    pub payments: PaymentConfig,

    /// Outbound notification addresses.
    pub mail: MailConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl EdgeConfig {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// CSRF double-submit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// HMAC signing key. Required in production.
    pub secret: Option<String>,

    /// Name of the cookie carrying the token.
    pub cookie_name: String,

    /// Name of the header the client echoes the token in.
    pub header_name: String,

    /// Token lifetime in milliseconds; also the cookie max-age.
    pub token_ttl_ms: u64,

    /// Only paths under this prefix are subject to CSRF logic.
    pub api_prefix: String,

    /// Path prefixes that skip validation (but still get a token).
    pub exempt_routes: Vec<String>,

    /// Methods that require a valid token.
    pub protected_methods: Vec<String>,

    /// Set when the loader generated `secret` for this process only.
    #[serde(skip)]
    pub ephemeral_secret: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secret: None,
            cookie_name: "csrf_token".to_string(),
            header_name: "x-csrf-token".to_string(),
            token_ttl_ms: 24 * 60 * 60 * 1000,
            api_prefix: "/api".to_string(),
            exempt_routes: vec![
                "/api/razorpay/webhook".to_string(),
                "/auth/callback".to_string(),
                "/api/health".to_string(),
            ],
            protected_methods: ["POST", "PUT", "PATCH", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            ephemeral_secret: false,
        }
    }
}

/// A single fixed-window policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitPolicy {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Maximum requests admitted per window.
    pub max_requests: u32,

    /// Rejection message surfaced to the caller.
    #[serde(default)]
    pub message: Option<String>,
}

impl RateLimitPolicy {
    pub fn new(window_ms: u64, max_requests: u32, message: &str) -> Self {
        Self {
            window_ms,
            max_requests,
            message: Some(message.to_string()),
        }
    }
}

/// Named rate limiting policies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum interval between sweeps of expired entries.
    pub sweep_interval_ms: u64,

    pub api: RateLimitPolicy,
    pub auth: RateLimitPolicy,
    pub contact: RateLimitPolicy,
    pub newsletter: RateLimitPolicy,
    pub ai: RateLimitPolicy,
    pub payment: RateLimitPolicy,
    pub webhook: RateLimitPolicy,
}

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: MINUTE_MS,
            api: RateLimitPolicy::new(MINUTE_MS, 60, "Too many API requests. Please slow down."),
            auth: RateLimitPolicy::new(
                15 * MINUTE_MS,
                5,
                "Too many login attempts. Please try again in 15 minutes.",
            ),
            contact: RateLimitPolicy::new(
                HOUR_MS,
                5,
                "Too many contact submissions. Please try again later.",
            ),
            newsletter: RateLimitPolicy::new(
                HOUR_MS,
                3,
                "Too many subscription attempts. Please try again later.",
            ),
            ai: RateLimitPolicy::new(
                MINUTE_MS,
                3,
                "AI generation rate limit reached. Please wait a moment.",
            ),
            payment: RateLimitPolicy::new(
                HOUR_MS,
                10,
                "Too many payment attempts. Please try again later.",
            ),
            webhook: RateLimitPolicy {
                window_ms: MINUTE_MS,
                max_requests: 100,
                message: None,
            },
        }
    }
}

impl RateLimitConfig {
    /// All policies with their names, for validation and logging.
    pub fn named(&self) -> [(&'static str, &RateLimitPolicy); 7] {
        [
            ("api", &self.api),
            ("auth", &self.auth),
            ("contact", &self.contact),
            ("newsletter", &self.newsletter),
            ("ai", &self.ai),
            ("payment", &self.payment),
            ("webhook", &self.webhook),
        ]
    }
}

/// Redirect sanitizer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Where invalid targets collapse to.
    pub default_path: String,

    /// Accepted path prefixes.
    pub allowed_prefixes: Vec<String>,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            default_path: "/dashboard".to_string(),
            allowed_prefixes: [
                "/dashboard",
                "/tools",
                "/assessments",
                "/pricing",
                "/resources",
                "/blog",
                "/profile",
                "/framework",
                "/case-studies",
                "/about",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

/// Page protection applied after the session refresh.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prefixes that require a signed-in user.
    pub protected_prefixes: Vec<String>,

    /// Prefixes that require the admin role.
    pub admin_prefixes: Vec<String>,

    /// Where anonymous visitors of protected pages are sent.
    pub login_path: String,

    /// Where signed-in non-admins hitting admin pages are sent.
    pub fallback_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protected_prefixes: vec!["/dashboard".to_string(), "/admin".to_string()],
            admin_prefixes: vec!["/admin".to_string()],
            login_path: "/auth/login".to_string(),
            fallback_path: "/dashboard".to_string(),
        }
    }
}

/// A purchasable bundle of assessment credits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CreditPack {
    pub id: String,
    pub name: String,
    pub credits: u32,
    /// Price in paise.
    pub price_inr: u64,
    /// Price in cents.
    pub price_usd: u64,
}

impl CreditPack {
    /// Price in the smallest unit of `currency` ("INR" or "USD").
    pub fn price_in(&self, currency: &str) -> Option<u64> {
        match currency {
            "INR" => Some(self.price_inr),
            "USD" => Some(self.price_usd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Public checkout key handed to the browser with each order.
    pub key_id: Option<String>,

    /// Secret used to sign checkout callbacks.
    pub key_secret: Option<String>,

    /// Secret used to sign gateway webhooks.
    pub webhook_secret: Option<String>,

    /// Packs offered for sale.
    pub packs: Vec<CreditPack>,

    /// Retry schedule for crediting a captured payment.
    pub credit_retry: RetryConfig,
}

/// Retry schedule for collaborator calls that are safe to repeat.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 4000,
        }
    }
}

impl PaymentConfig {
    pub fn pack(&self, id: &str) -> Option<&CreditPack> {
        self.packs.iter().find(|p| p.id == id)
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        let pack = |credits: u32, price_inr: u64, price_usd: u64| CreditPack {
            id: format!("pack_{credits}"),
            name: format!("{credits} Credits"),
            credits,
            price_inr,
            price_usd,
        };
        Self {
            key_id: None,
            key_secret: None,
            webhook_secret: None,
            packs: vec![
                pack(5, 149_900, 1_900),
                pack(15, 399_900, 4_900),
                pack(50, 999_900, 12_900),
            ],
            credit_retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MailConfig {
    /// Receives contact form notifications.
    pub admin_email: String,

    /// Sender address on every outbound message.
    pub from_address: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            admin_email: "admin@culturalinnovationlab.org".to_string(),
            from_address: "Cultural Innovation Lab <noreply@culturalinnovationlab.org>".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
