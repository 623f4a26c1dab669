//! Contact form.

use axum::{body::Bytes, extract::State, http::HeaderMap};
use serde_json::json;

use crate::api::input::{sanitize_string, Fields, MESSAGE, NAME, SUBJECT};
use crate::api::{enforce_limit, parse_object, Policy};
use crate::http::response::{success_with_message, with_rate_limit, ApiError, ApiResult};
use crate::http::server::AppState;
use crate::services::Email;

const COLLECTION: &str = "contact_submissions";

pub async fn submit(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let decision = enforce_limit(&state, &headers, None, "contact", Policy::Contact, None)?;
    Ok(with_rate_limit(process(&state, &body).await, decision))
}

async fn process(state: &AppState, body: &Bytes) -> ApiResult {
    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let name = fields.text("name", &NAME);
    let email = fields.email("email", "Please provide a valid email address");
    let subject = fields.optional_text("subject", &SUBJECT);
    let message = fields.text("message", &MESSAGE);
    fields.finish()?;

    let name = sanitize_string(&name);
    let subject = subject.map(|s| sanitize_string(&s));
    let message = sanitize_string(&message);

    let record = json!({
        "name": name,
        "email": email,
        "subject": subject,
        "message": message,
        "status": "new",
    });
    // The admin notification below still carries the message.
    if let Err(err) = state.services.store.insert(COLLECTION, record).await {
        tracing::error!(error = %err, "Failed to store contact submission");
    }

    let mail = &state.config.mail;
    let notification = Email {
        from: mail.from_address.clone(),
        to: mail.admin_email.clone(),
        subject: format!(
            "New contact form submission: {}",
            subject.as_deref().unwrap_or("No subject")
        ),
        body: format!("Name: {name}\nEmail: {email}\n\n{message}"),
        reply_to: Some(email.clone()),
    };
    if let Err(err) = state.services.mailer.send(&notification).await {
        return Err(ApiError::internal(
            "Your message was saved but we encountered an issue. Please try again or email us directly.",
        )
        .with_internal(err));
    }

    let confirmation = Email {
        from: mail.from_address.clone(),
        to: email.clone(),
        subject: "We received your message".to_string(),
        body: format!(
            "Hi {name},\n\nThank you for reaching out to the Cultural Innovation Lab. \
             We have received your message and will get back to you soon."
        ),
        reply_to: None,
    };
    if let Err(err) = state.services.mailer.send(&confirmation).await {
        tracing::warn!(error = %err, "Failed to send contact confirmation");
    }

    tracing::info!("Contact submission processed");
    Ok(success_with_message(
        None::<()>,
        "Thank you for your message! We'll get back to you soon.",
    ))
}
