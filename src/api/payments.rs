//! Credit purchases through the payment gateway.
//!
//! # Flow
//! ```text
//! create-order → browser checkout → verify   → credits added
//!                                 ↘ webhook  → credits added (same ledger key)
//! ```
//!
//! Both paths credit through [`DataStore::add_credits`] keyed by payment id,
//! so whichever arrives second is a no-op.
//!
//! [`DataStore::add_credits`]: crate::services::DataStore::add_credits

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::api::input::{Fields, TextRule};
use crate::api::{enforce_limit, parse_object, require_admin, require_user, Policy};
use crate::http::pipeline::CurrentUser;
use crate::http::response::{success, success_with_message, with_rate_limit, ApiError, ApiResult};
use crate::http::server::AppState;
use crate::resilience::with_retry;
use crate::security::unix_millis;
use crate::services::payments::{verify_payment_signature, verify_webhook_signature};
use crate::services::{CreditOutcome, OrderRequest, ServiceError, User};

const ORDERS: &str = "payment_orders";
const SIGNATURE_HEADER: &str = "x-razorpay-signature";
const CURRENCIES: [&str; 2] = ["INR", "USD"];
const REFUND_REASON: TextRule = TextRule::max(500, "Reason is too long");

pub async fn create_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let decision = enforce_limit(&state, &headers, None, "razorpay/create-order", Policy::Payment, None)?;
    Ok(with_rate_limit(process_create_order(&state, &user, &body).await, decision))
}

async fn process_create_order(
    state: &AppState,
    user: &Option<User>,
    body: &Bytes,
) -> ApiResult {
    let user = require_user(user, "You must be logged in to purchase credits")?;

    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let pack_id = fields.required("packId", 100, "Pack ID is required", "Pack ID is too long");
    let currency = fields
        .one_of("currency", &CURRENCIES, "Invalid currency")
        .unwrap_or_else(|| "INR".to_string());
    fields.finish()?;

    let payments = &state.config.payments;
    let Some(key_id) = payments.key_id.as_deref() else {
        return Err(ApiError::service_unavailable("Payment service"));
    };
    let pack = payments.pack(&pack_id).ok_or_else(ApiError::invalid_pack)?;
    let amount = pack.price_in(&currency).ok_or_else(ApiError::invalid_pack)?;

    let request = OrderRequest {
        amount,
        currency: currency.clone(),
        receipt: format!("receipt_{}_{}", user.id, unix_millis()),
        notes: json!({
            "userId": user.id.to_string(),
            "packId": pack.id,
            "credits": pack.credits.to_string(),
            "userEmail": user.email,
        }),
    };

    let order = state
        .services
        .payments
        .create_order(&request)
        .await
        .map_err(|err| ApiError::payment_failed("Failed to create order").with_internal(err))?;

    tracing::info!(
        order_id = %order.id,
        user_id = %user.id,
        pack_id = %pack.id,
        amount = order.amount,
        "Payment order created"
    );

    Ok(success(json!({
        "orderId": order.id,
        "amount": order.amount,
        "currency": order.currency,
        "keyId": key_id,
        "pack": { "id": pack.id, "name": pack.name, "credits": pack.credits },
    })))
}

pub async fn verify(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let decision = enforce_limit(&state, &headers, None, "razorpay/verify", Policy::Payment, None)?;
    Ok(with_rate_limit(process_verify(&state, &user, &body).await, decision))
}

async fn process_verify(
    state: &AppState,
    user: &Option<User>,
    body: &Bytes,
) -> ApiResult {
    let user = require_user(user, "You must be logged in to verify payment")?;

    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let order_id = fields.required("razorpay_order_id", 100, "Order ID is required", "Order ID is too long");
    let payment_id =
        fields.required("razorpay_payment_id", 100, "Payment ID is required", "Payment ID is too long");
    let signature =
        fields.required("razorpay_signature", 256, "Signature is required", "Signature is too long");
    let pack_id = fields.required("packId", 100, "Pack ID is required", "Pack ID is too long");
    let credits = fields.integer("credits", 1, 1000, "Invalid credit amount");
    fields.finish()?;

    let Some(key_secret) = state.config.payments.key_secret.as_deref() else {
        return Err(ApiError::service_unavailable("Payment service"));
    };

    if !verify_payment_signature(key_secret, &order_id, &payment_id, &signature) {
        tracing::warn!(
            order_id = %order_id,
            payment_id = %payment_id,
            user_id = %user.id,
            "Payment signature mismatch"
        );
        return Err(ApiError::payment_verification_failed());
    }

    // The client names the pack; the amount it claims must match it.
    let pack = state
        .config
        .payments
        .pack(&pack_id)
        .ok_or_else(ApiError::invalid_pack)?;
    if u64::from(pack.credits) != credits {
        return Err(ApiError::validation(
            "Invalid credit amount",
            vec!["Invalid credit amount".to_string()],
        ));
    }

    let credit = CreditRequest {
        user_id: user.id,
        credits: pack.credits,
        payment_id: &payment_id,
        order_id: &order_id,
        pack_id: &pack.id,
    };
    match credit_payment(state, &credit).await {
        Ok(CreditOutcome::Applied { .. }) => {
            tracing::info!(payment_id = %payment_id, user_id = %user.id, credits, "Payment verified");
            Ok(success_with_message(
                Some(json!({ "credits": pack.credits })),
                &format!("Successfully added {} credits to your account", pack.credits),
            ))
        }
        Ok(CreditOutcome::Duplicate { .. }) => Ok(success_with_message(
            Some(json!({ "credits": pack.credits, "alreadyProcessed": true })),
            "Payment was already processed",
        )),
        Err(err) => Err(ApiError::database("Failed to add credits").with_internal(err)),
    }
}

struct CreditRequest<'a> {
    user_id: Uuid,
    credits: u32,
    payment_id: &'a str,
    order_id: &'a str,
    pack_id: &'a str,
}

/// Credit once per payment id and record the paid order for refunds.
async fn credit_payment(state: &AppState, req: &CreditRequest<'_>) -> Result<CreditOutcome, ServiceError> {
    let store = &state.services.store;
    let outcome = store
        .add_credits(req.user_id, req.credits, req.payment_id)
        .await?;

    if let CreditOutcome::Applied { .. } = outcome {
        let record = json!({
            "order_id": req.order_id,
            "payment_id": req.payment_id,
            "user_id": req.user_id,
            "pack_id": req.pack_id,
            "credits": req.credits,
            "status": "paid",
        });
        if let Err(err) = store.insert(ORDERS, record).await {
            tracing::error!(payment_id = %req.payment_id, error = %err, "Failed to record payment order");
        }
    }
    Ok(outcome)
}

pub async fn refund(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let decision = enforce_limit(&state, &headers, None, "razorpay/refund", Policy::Payment, None)?;
    Ok(with_rate_limit(process_refund(&state, &user, &body).await, decision))
}

async fn process_refund(
    state: &AppState,
    user: &Option<User>,
    body: &Bytes,
) -> ApiResult {
    let admin = require_admin(user)?;

    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let payment_id =
        fields.required("paymentId", 100, "Payment ID is required", "Payment ID is too long");
    let amount = fields.optional_integer("amount", "Invalid refund amount");
    let reason = fields.optional_text("reason", &REFUND_REASON);
    fields.finish()?;

    let store = &state.services.store;
    let order = store
        .find_one(ORDERS, "payment_id", &Value::from(payment_id.as_str()))
        .await
        .map_err(|err| ApiError::database("Failed to load payment order").with_internal(err))?
        .ok_or_else(|| ApiError::not_found("Payment order"))?;

    match order["status"].as_str() {
        Some("refunded") => return Err(ApiError::bad_request("Payment has already been refunded")),
        Some("paid") => {}
        _ => return Err(ApiError::bad_request("Payment is not in a refundable state")),
    }

    let refund = state
        .services
        .payments
        .refund(&payment_id, amount)
        .await
        .map_err(|err| ApiError::payment_failed("Failed to process refund").with_internal(err))?;

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::from("refunded"));
    patch.insert("refund_id".to_string(), Value::from(refund.id.as_str()));
    patch.insert("refund_reason".to_string(), json!(reason));
    let order_id = order["id"].as_str().unwrap_or_default();
    if let Err(err) = store.update(ORDERS, order_id, patch).await {
        tracing::error!(payment_id = %payment_id, error = %err, "Failed to mark order refunded");
    }

    tracing::info!(
        payment_id = %payment_id,
        refund_id = %refund.id,
        admin_id = %admin.id,
        "Refund processed"
    );

    Ok(success_with_message(
        Some(json!({
            "refundId": refund.id,
            "paymentId": refund.payment_id,
            "amount": refund.amount,
            "status": refund.status,
        })),
        "Refund processed successfully",
    ))
}

/// Webhook replies use a bare `{ "error": ... }` body; the gateway only
/// looks at the status.
fn webhook_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let decision = enforce_limit(&state, &headers, None, "razorpay/webhook", Policy::Webhook, None)?;
    Ok(with_rate_limit(process_webhook(&state, &headers, &body).await, decision))
}

async fn process_webhook(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Response {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        tracing::warn!("Webhook without signature header");
        return webhook_error(StatusCode::BAD_REQUEST, "Missing signature header");
    };

    let Some(secret) = state.config.payments.webhook_secret.as_deref() else {
        tracing::error!("Webhook secret not configured");
        return webhook_error(StatusCode::INTERNAL_SERVER_ERROR, "Webhook not configured");
    };

    if !verify_webhook_signature(secret, body, signature) {
        tracing::warn!("Webhook signature verification failed");
        return webhook_error(StatusCode::BAD_REQUEST, "Webhook signature verification failed");
    }

    let event: Value = match serde_json::from_slice(body) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "Webhook body is not JSON");
            return webhook_error(StatusCode::BAD_REQUEST, "Invalid JSON body");
        }
    };

    let kind = event["event"].as_str().unwrap_or_default();
    match kind {
        "payment.captured" => {
            if let Err(response) = payment_captured(state, &event["payload"]["payment"]["entity"]).await {
                return response;
            }
        }
        "payment.failed" => {
            let entity = &event["payload"]["payment"]["entity"];
            tracing::warn!(
                payment_id = entity["id"].as_str().unwrap_or_default(),
                reason = entity["error_description"].as_str().unwrap_or_default(),
                "Payment failed"
            );
        }
        "order.paid" => {
            tracing::info!(
                order_id = event["payload"]["order"]["entity"]["id"].as_str().unwrap_or_default(),
                "Order paid"
            );
        }
        "refund.created" | "refund.processed" => {
            let entity = &event["payload"]["refund"]["entity"];
            tracing::info!(
                event = kind,
                refund_id = entity["id"].as_str().unwrap_or_default(),
                payment_id = entity["payment_id"].as_str().unwrap_or_default(),
                "Refund event"
            );
        }
        other => tracing::debug!(event = other, "Unhandled webhook event"),
    }

    Json(json!({ "received": true })).into_response()
}

async fn payment_captured(state: &AppState, entity: &Value) -> Result<(), Response> {
    let notes = &entity["notes"];
    let (Some(payment_id), Some(user_id), Some(credits)) = (
        entity["id"].as_str(),
        notes["userId"].as_str(),
        note_credits(&notes["credits"]),
    ) else {
        tracing::warn!("Captured payment without credit metadata");
        return Err(webhook_error(StatusCode::BAD_REQUEST, "Missing metadata"));
    };

    let Ok(user_id) = Uuid::parse_str(user_id) else {
        tracing::warn!(payment_id, "Captured payment with malformed user id");
        return Err(webhook_error(StatusCode::BAD_REQUEST, "Invalid user ID format"));
    };

    let credit = CreditRequest {
        user_id,
        credits,
        payment_id,
        order_id: entity["order_id"].as_str().unwrap_or_default(),
        pack_id: notes["packId"].as_str().unwrap_or_default(),
    };

    let outcome = with_retry(&state.config.payments.credit_retry, "credit_payment", || {
        credit_payment(state, &credit)
    })
    .await;

    match outcome {
        Ok(CreditOutcome::Applied { balance }) => {
            tracing::info!(payment_id, user_id = %user_id, credits, balance, "Credits added from webhook");
            Ok(())
        }
        Ok(CreditOutcome::Duplicate { .. }) => {
            tracing::info!(payment_id, "Payment already credited");
            Ok(())
        }
        Err(err) => {
            tracing::error!(payment_id, error = %err, "Failed to credit captured payment");
            Err(webhook_error(StatusCode::INTERNAL_SERVER_ERROR, "Error processing webhook"))
        }
    }
}

/// Notes carry credits as a string; numbers are accepted too. Zero is missing.
fn note_credits(value: &Value) -> Option<u32> {
    let credits = match value {
        Value::String(s) => s.trim().parse::<u32>().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    };
    credits.filter(|c| *c > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_credits() {
        assert_eq!(note_credits(&json!("15")), Some(15));
        assert_eq!(note_credits(&json!(50)), Some(50));
        assert_eq!(note_credits(&json!("0")), None);
        assert_eq!(note_credits(&json!("-3")), None);
        assert_eq!(note_credits(&json!(null)), None);
    }

    #[tokio::test]
    async fn test_webhook_error_shape() {
        let response = webhook_error(StatusCode::BAD_REQUEST, "Missing metadata");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "error": "Missing metadata" }));
    }
}
