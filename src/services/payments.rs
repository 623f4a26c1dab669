//! Payment gateway seam and checkout signature checks.
//!
//! Two HMAC-SHA256 signatures are involved:
//! - checkout callback: `hex(hmac(key_secret, "{order_id}|{payment_id}"))`
//! - webhook delivery:  `hex(hmac(webhook_secret, raw_body))`
//!
//! Both are compared in constant time.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;

use crate::security::token::constant_time_eq;
use crate::services::ServiceError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// Smallest currency unit.
    pub amount: u64,
    pub currency: String,
    pub receipt: String,
    pub notes: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    pub receipt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Refund {
    pub id: String,
    pub payment_id: String,
    pub amount: Option<u64>,
    pub status: String,
}

pub trait PaymentGateway: Send + Sync {
    fn create_order<'a>(&'a self, request: &'a OrderRequest)
        -> BoxFuture<'a, Result<Order, ServiceError>>;

    /// Full refund when `amount` is `None`.
    fn refund<'a>(
        &'a self,
        payment_id: &'a str,
        amount: Option<u64>,
    ) -> BoxFuture<'a, Result<Refund, ServiceError>>;
}

/// Lowercase hex HMAC-SHA256 of `message`.
pub fn sign_hex(secret: &[u8], message: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ServiceError::Backend(format!("invalid hmac key: {e}")))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn signature_matches(secret: &str, message: &[u8], supplied: &str) -> bool {
    match sign_hex(secret.as_bytes(), message) {
        Ok(expected) => constant_time_eq(expected.as_bytes(), supplied.as_bytes()),
        Err(_) => false,
    }
}

/// Checkout callback check.
pub fn verify_payment_signature(
    key_secret: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    let message = format!("{order_id}|{payment_id}");
    signature_matches(key_secret, message.as_bytes(), signature)
}

/// Webhook check over the raw, unparsed body.
pub fn verify_webhook_signature(webhook_secret: &str, body: &[u8], signature: &str) -> bool {
    signature_matches(webhook_secret, body, signature)
}

/// Records orders and refunds in memory; ids mimic the gateway's prefixes.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    orders: DashMap<String, (Order, Value)>,
    refunds: DashMap<String, Refund>,
    sequence: AtomicU64,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(&self, id: &str) -> Option<Order> {
        self.orders.get(id).map(|o| o.0.clone())
    }

    pub fn order_notes(&self, id: &str) -> Option<Value> {
        self.orders.get(id).map(|o| o.1.clone())
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.len()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}_{n:014}")
    }
}

impl PaymentGateway for MemoryGateway {
    fn create_order<'a>(
        &'a self,
        request: &'a OrderRequest,
    ) -> BoxFuture<'a, Result<Order, ServiceError>> {
        Box::pin(async move {
            if request.amount == 0 {
                return Err(ServiceError::Rejected("amount must be positive".to_string()));
            }
            let order = Order {
                id: self.next_id("order"),
                amount: request.amount,
                currency: request.currency.clone(),
                receipt: request.receipt.clone(),
            };
            self.orders
                .insert(order.id.clone(), (order.clone(), request.notes.clone()));
            Ok(order)
        })
    }

    fn refund<'a>(
        &'a self,
        payment_id: &'a str,
        amount: Option<u64>,
    ) -> BoxFuture<'a, Result<Refund, ServiceError>> {
        Box::pin(async move {
            if self.refunds.iter().any(|r| r.payment_id == payment_id) {
                return Err(ServiceError::Conflict(format!(
                    "payment {payment_id} already refunded"
                )));
            }
            let refund = Refund {
                id: self.next_id("rfnd"),
                payment_id: payment_id.to_string(),
                amount,
                status: "processed".to_string(),
            };
            self.refunds.insert(refund.id.clone(), refund.clone());
            Ok(refund)
        })
    }
}
