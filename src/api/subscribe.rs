//! Newsletter and platform waitlist sign-ups.

use axum::{body::Bytes, extract::State, http::HeaderMap};
use serde_json::{json, Map, Value};

use crate::api::input::{Fields, INTEREST, NAME, NEWSLETTER_NAME, ORGANIZATION};
use crate::api::{enforce_limit, parse_object, Policy};
use crate::http::response::{success_with_message, with_rate_limit, ApiError, ApiResult};
use crate::http::server::AppState;
use crate::services::Email;

const SUBSCRIBERS: &str = "newsletter_subscribers";
const WAITLIST: &str = "waitlist";

const INVALID_EMAIL: &str = "Please provide a valid email address";

pub async fn newsletter(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let decision = enforce_limit(&state, &headers, None, "newsletter", Policy::Newsletter, None)?;
    Ok(with_rate_limit(subscribe(&state, &body).await, decision))
}

pub async fn waitlist(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let decision = enforce_limit(
        &state,
        &headers,
        None,
        "waitlist",
        Policy::Newsletter,
        Some("Too many signup attempts. Please try again later."),
    )?;
    Ok(with_rate_limit(join_waitlist(&state, &body).await, decision))
}

async fn subscribe(state: &AppState, body: &Bytes) -> ApiResult {
    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let email = fields.email("email", INVALID_EMAIL);
    let name = fields.optional_text("name", &NEWSLETTER_NAME);
    fields.finish()?;

    let store = &state.services.store;
    let existing = store
        .find_one(SUBSCRIBERS, "email", &Value::from(email.as_str()))
        .await
        .map_err(|err| ApiError::database("Failed to subscribe").with_internal(err))?;

    match existing {
        Some(record) if record["subscribed"] == Value::Bool(true) => Ok(success_with_message(
            Some(json!({ "alreadySubscribed": true })),
            "You're already subscribed to our newsletter!",
        )),
        Some(record) => {
            let id = record["id"].as_str().unwrap_or_default();
            let mut patch = Map::new();
            patch.insert("subscribed".to_string(), Value::Bool(true));
            patch.insert("unsubscribed_at".to_string(), Value::Null);
            store
                .update(SUBSCRIBERS, id, patch)
                .await
                .map_err(|err| ApiError::database("Failed to resubscribe").with_internal(err))?;

            if let Err(err) = send_welcome(state, &email, name.as_deref()).await {
                tracing::warn!(error = %err, "Failed to send welcome-back email");
            }
            tracing::info!("Newsletter subscriber resubscribed");
            Ok(success_with_message(
                None::<()>,
                "Welcome back! You've been resubscribed to our newsletter.",
            ))
        }
        None => {
            let record = json!({ "email": email, "name": name, "subscribed": true });
            store
                .insert(SUBSCRIBERS, record)
                .await
                .map_err(|err| ApiError::database("Failed to subscribe").with_internal(err))?;

            send_welcome(state, &email, name.as_deref()).await.map_err(|err| {
                ApiError::internal(
                    "Subscription saved but failed to send confirmation email. Please contact support.",
                )
                .with_internal(err)
            })?;
            tracing::info!("Newsletter subscriber added");
            Ok(success_with_message(
                None::<()>,
                "Thank you for subscribing! Check your inbox for a welcome email.",
            ))
        }
    }
}

async fn send_welcome(
    state: &AppState,
    email: &str,
    name: Option<&str>,
) -> Result<(), crate::services::ServiceError> {
    let greeting = name.map(|n| format!("Hi {n},")).unwrap_or_else(|| "Hi,".to_string());
    let welcome = Email {
        from: state.config.mail.from_address.clone(),
        to: email.to_string(),
        subject: "Welcome to the Cultural Innovation Lab newsletter".to_string(),
        body: format!(
            "{greeting}\n\nThanks for subscribing. You'll hear from us about new research, \
             tools and case studies."
        ),
        reply_to: None,
    };
    state.services.mailer.send(&welcome).await
}

async fn join_waitlist(state: &AppState, body: &Bytes) -> ApiResult {
    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let email = fields.email("email", INVALID_EMAIL);
    let name = fields.optional_text("name", &NAME);
    let organization = fields.optional_text("organization", &ORGANIZATION);
    let interest = fields.optional_text("interest", &INTEREST);
    fields.finish()?;

    let store = &state.services.store;
    let existing = store
        .find_one(WAITLIST, "email", &Value::from(email.as_str()))
        .await
        .map_err(|err| ApiError::database("Failed to join waitlist").with_internal(err))?;

    if existing.is_some() {
        return Ok(success_with_message(
            Some(json!({ "alreadyOnList": true })),
            "You're already on our waitlist! We'll be in touch soon.",
        ));
    }

    let record = json!({
        "email": email,
        "name": name,
        "organization": organization,
        "interest": interest,
        "status": "pending",
    });
    store
        .insert(WAITLIST, record)
        .await
        .map_err(|err| ApiError::database("Failed to join waitlist").with_internal(err))?;

    tracing::info!("Waitlist signup recorded");
    Ok(success_with_message(
        None::<()>,
        "You're on the list! We'll notify you when the platform launches.",
    ))
}
