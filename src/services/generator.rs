//! AI drafting seam.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::services::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPost {
    pub title: String,
    pub excerpt: String,
    pub content: String,
}

pub trait ContentGenerator: Send + Sync {
    /// Reported by the health check's feature list.
    fn is_enabled(&self) -> bool {
        true
    }

    fn generate_post<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<GeneratedPost, ServiceError>>;
}

/// Used when no model provider is configured; every call is `Unavailable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGenerator;

impl ContentGenerator for DisabledGenerator {
    fn is_enabled(&self) -> bool {
        false
    }

    fn generate_post<'a>(&'a self, _topic: &'a str) -> BoxFuture<'a, Result<GeneratedPost, ServiceError>> {
        Box::pin(async { Err(ServiceError::Unavailable("AI service".to_string())) })
    }
}
