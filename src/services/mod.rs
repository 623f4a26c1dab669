//! External collaborators.
//!
//! The edge never talks to a concrete backend directly. Each collaborator is
//! a trait returning boxed futures so implementations can be swapped behind
//! an `Arc<dyn _>`:
//!
//! ```text
//! IdentityProvider  → session refresh, sign in/up, password reset, OAuth code exchange
//! DataStore         → named collections of JSON records, credit ledger
//! PaymentGateway    → orders and refunds
//! Mailer            → outbound email
//! ContentGenerator  → AI-assisted drafting
//! ```
//!
//! In-memory implementations back the development binary and the tests.

pub mod generator;
pub mod identity;
pub mod mailer;
pub mod payments;
pub mod store;

use std::sync::Arc;

use thiserror::Error;

pub use generator::{ContentGenerator, DisabledGenerator, GeneratedPost};
pub use identity::{IdentityProvider, MemoryIdentity, Registration, Role, Session, User};
pub use mailer::{Email, Mailer, MemoryMailer};
pub use payments::{MemoryGateway, Order, OrderRequest, PaymentGateway, Refund};
pub use store::{CreditOutcome, DataStore, MemoryDataStore};

/// Failure reported by a collaborator.
///
/// The message is for logs; handlers decide what the caller sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Collaborator is not configured or cannot be reached.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Collaborator refused the request (bad credentials, unknown code).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Record already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Anything else the backend reported.
    #[error("backend error: {0}")]
    Backend(String),
}

impl ServiceError {
    /// The collaborator's own message, without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            ServiceError::Unavailable(msg)
            | ServiceError::Rejected(msg)
            | ServiceError::Conflict(msg)
            | ServiceError::Backend(msg) => msg,
        }
    }
}

/// The collaborator set handed to the router.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn DataStore>,
    pub payments: Arc<dyn PaymentGateway>,
    pub mailer: Arc<dyn Mailer>,
    pub generator: Arc<dyn ContentGenerator>,
}

impl Services {
    /// Process-local collaborators with AI generation disabled.
    pub fn in_memory() -> Self {
        Self {
            identity: Arc::new(MemoryIdentity::new()),
            store: Arc::new(MemoryDataStore::new()),
            payments: Arc::new(MemoryGateway::new()),
            mailer: Arc::new(MemoryMailer::new()),
            generator: Arc::new(DisabledGenerator),
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
