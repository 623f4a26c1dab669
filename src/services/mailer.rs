//! Outbound email seam.

use std::sync::Mutex;

use dashmap::DashSet;
use futures_util::future::BoxFuture;

use crate::services::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub reply_to: Option<String>,
}

pub trait Mailer: Send + Sync {
    fn send<'a>(&'a self, email: &'a Email) -> BoxFuture<'a, Result<(), ServiceError>>;
}

/// Keeps sent mail in an outbox. Recipients marked failing bounce.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<Email>>,
    failing: DashSet<String>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, recipient: &str) {
        self.failing.insert(recipient.to_lowercase());
    }

    pub fn sent(&self) -> Vec<Email> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }
}

impl Mailer for MemoryMailer {
    fn send<'a>(&'a self, email: &'a Email) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            if self.failing.contains(&email.to.to_lowercase()) {
                return Err(ServiceError::Unavailable(format!(
                    "delivery to {} refused",
                    email.to
                )));
            }
            let mut outbox = self
                .outbox
                .lock()
                .map_err(|_| ServiceError::Backend("outbox lock poisoned".to_string()))?;
            outbox.push(email.clone());
            tracing::debug!(to = %email.to, subject = %email.subject, "Email queued");
            Ok(())
        })
    }
}
