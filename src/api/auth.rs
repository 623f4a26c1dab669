//! Sign-in, sign-up, password reset and the OAuth/magic-link callback.
//!
//! Provider error text never reaches the browser. The callback maps the
//! provider's `error` / `error_description` onto a fixed table of messages.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;

use crate::api::input::{Fields, TextRule};
use crate::api::{enforce_limit, parse_object, Policy};
use crate::http::response::{success_with_message, with_rate_limit, ApiError, ApiResult};
use crate::http::server::AppState;
use crate::services::{ServiceError, Session};

const INVALID_EMAIL: &str = "Invalid email address";
const PASSWORD_MIN: usize = 6;
const PASSWORD_TOO_SHORT: &str = "Password must be at least 6 characters";

const SIGNUP_ORGANIZATION: TextRule = TextRule::max(200, "Organization name too long");

const SIGNUP_ROLES: [&str; 5] = [
    "researcher",
    "practitioner",
    "community_leader",
    "policymaker",
    "other",
];

/// Provider error keys and description fragments, with what the user sees.
const AUTH_MESSAGES: [(&str, &str); 10] = [
    ("access_denied", "You cancelled the sign-in process or access was denied."),
    ("invalid_request", "There was a problem with the sign-in request. Please try again."),
    ("unauthorized_client", "This application is not authorized. Please contact support."),
    ("server_error", "The authentication service encountered an error. Please try again later."),
    (
        "temporarily_unavailable",
        "The authentication service is temporarily unavailable. Please try again later.",
    ),
    ("invalid_scope", "There was a configuration issue. Please contact support."),
    (
        "Email link is invalid or has expired",
        "Your sign-in link has expired. Please request a new one.",
    ),
    (
        "User already registered",
        "An account with this email already exists. Please sign in instead.",
    ),
    ("Invalid login credentials", "Invalid email or password. Please try again."),
    ("User not found", "No account found with this email address."),
];

pub const DEFAULT_AUTH_MESSAGE: &str = "Authentication failed. Please try again.";

/// Safe message for a provider error: exact key first, then a
/// case-insensitive match inside the description.
pub fn safe_auth_message(error: Option<&str>, description: Option<&str>) -> &'static str {
    if let Some(error) = error {
        if let Some((_, message)) = AUTH_MESSAGES.iter().find(|(key, _)| *key == error) {
            return message;
        }
    }
    if let Some(description) = description {
        let description = description.to_lowercase();
        if let Some((_, message)) = AUTH_MESSAGES
            .iter()
            .find(|(key, _)| description.contains(&key.to_lowercase()))
        {
            return message;
        }
    }
    DEFAULT_AUTH_MESSAGE
}

fn session_jar(session: Session) -> CookieJar {
    session
        .set_cookies
        .into_iter()
        .fold(CookieJar::new(), |jar, cookie| jar.add(cookie))
}

pub async fn login(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let decision = enforce_limit(&state, &headers, None, "auth/login", Policy::Auth, None)?;
    Ok(with_rate_limit(process_login(&state, &body).await, decision))
}

async fn process_login(state: &AppState, body: &Bytes) -> ApiResult {
    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let email = fields.email("email", INVALID_EMAIL);
    let password = fields.password("password", PASSWORD_MIN, PASSWORD_TOO_SHORT);
    let redirect_to = fields.passthrough("redirectTo");
    fields.finish()?;

    let session = match state.services.identity.sign_in(&email, &password).await {
        Ok(session) => session,
        Err(err @ ServiceError::Rejected(_)) => {
            tracing::info!(error = %err, "Sign-in rejected");
            return Err(ApiError::unauthorized("Invalid email or password"));
        }
        Err(err) => return Err(err.into()),
    };

    let Some(user) = session.user.clone() else {
        return Err(ApiError::unauthorized("Invalid email or password"));
    };
    let target = state.redirects.validate(redirect_to.as_deref());

    let response = success_with_message(
        Some(json!({
            "user": { "id": user.id, "email": user.email },
            "redirectTo": target,
        })),
        "Login successful",
    );
    Ok((session_jar(session), response).into_response())
}

pub async fn signup(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let decision = enforce_limit(&state, &headers, None, "auth/signup", Policy::Auth, None)?;
    Ok(with_rate_limit(process_signup(&state, &body).await, decision))
}

async fn process_signup(state: &AppState, body: &Bytes) -> ApiResult {
    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let email = fields.email("email", INVALID_EMAIL);
    let password = fields.password("password", PASSWORD_MIN, PASSWORD_TOO_SHORT);
    let full_name = fields.required("fullName", 100, "Full name is required", "Full name too long");
    let organization = fields.optional_text("organization", &SIGNUP_ORGANIZATION);
    let role = fields.one_of("role", &SIGNUP_ROLES, "Invalid role");
    let redirect_to = fields.passthrough("redirectTo");
    fields.finish()?;

    let profile = json!({
        "full_name": full_name,
        "organization": organization,
        "role": role,
    });

    let registration = match state.services.identity.sign_up(&email, &password, &profile).await {
        Ok(registration) => registration,
        Err(err @ ServiceError::Conflict(_)) => {
            return Err(ApiError::conflict("An account with this email already exists")
                .with_internal(err));
        }
        Err(err) => return Err(err.into()),
    };

    let message = if registration.requires_confirmation {
        "Account created. Please check your email to verify your account."
    } else {
        "Account created successfully"
    };
    tracing::info!(user_id = %registration.user.id, "Account created");

    Ok(success_with_message(
        Some(json!({
            "user": { "id": registration.user.id, "email": registration.user.email },
            "requiresEmailConfirmation": registration.requires_confirmation,
            "redirectTo": state.redirects.validate(redirect_to.as_deref()),
        })),
        message,
    ))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let decision = enforce_limit(
        &state,
        &headers,
        None,
        "auth/forgot-password",
        Policy::Auth,
        Some("Too many password reset attempts. Please try again in 15 minutes."),
    )?;
    Ok(with_rate_limit(process_reset(&state, &body).await, decision))
}

async fn process_reset(state: &AppState, body: &Bytes) -> ApiResult {
    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let email = fields.email("email", INVALID_EMAIL);
    fields.finish()?;

    // Same answer whether or not the address is registered.
    if let Err(err) = state.services.identity.send_password_reset(&email).await {
        tracing::warn!(error = %err, "Password reset request failed");
    }

    Ok(success_with_message(
        Some(json!({ "email": email })),
        "If an account exists with this email, a password reset link has been sent.",
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    #[serde(rename = "redirectTo")]
    pub redirect_to: Option<String>,
}

pub async fn callback(State(state): State<AppState>, Query(params): Query<CallbackParams>) -> Response {
    let target = state.redirects.validate(params.redirect_to.as_deref());

    if let Some(error) = params.error.as_deref() {
        tracing::warn!(
            error,
            description = params.error_description.as_deref().unwrap_or(""),
            "Identity provider returned an error"
        );
        let message = safe_auth_message(Some(error), params.error_description.as_deref());
        return login_redirect(&state, message, &target);
    }

    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        return login_redirect(&state, DEFAULT_AUTH_MESSAGE, &target);
    };

    match state.services.identity.exchange_code_for_session(code).await {
        Ok(session) => (session_jar(session), Redirect::to(&target)).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "Code exchange failed");
            let message = safe_auth_message(None, Some(err.detail()));
            login_redirect(&state, message, &target)
        }
    }
}

fn login_redirect(state: &AppState, message: &str, target: &str) -> Response {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("error", message)
        .append_pair("redirectTo", target)
        .finish();
    Redirect::to(&format!("{}?{}", state.config.session.login_path, query)).into_response()
}
