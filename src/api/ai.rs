//! Admin-only AI drafting.

use axum::{body::Bytes, extract::State, http::HeaderMap};

use crate::api::input::{Fields, TOPIC};
use crate::api::{enforce_limit, parse_object, require_admin, Policy};
use crate::http::pipeline::CurrentUser;
use crate::http::response::{success, with_rate_limit, ApiError, ApiResult};
use crate::http::server::AppState;
use crate::services::ServiceError;

pub async fn generate_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let admin = require_admin(&user)?;
    let user_id = admin.id.to_string();
    let decision = enforce_limit(&state, &headers, Some(&user_id), "ai/generate-post", Policy::Ai, None)?;
    Ok(with_rate_limit(process(&state, &user_id, &body).await, decision))
}

async fn process(state: &AppState, user_id: &str, body: &Bytes) -> ApiResult {
    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let topic = fields.text("topic", &TOPIC);
    fields.finish()?;

    let generator = &state.services.generator;
    if !generator.is_enabled() {
        return Err(ApiError::service_unavailable("AI service"));
    }

    match generator.generate_post(&topic).await {
        Ok(post) => {
            tracing::info!(user_id, title = %post.title, "Post drafted");
            Ok(success(post))
        }
        Err(err @ ServiceError::Unavailable(_)) => {
            Err(ApiError::service_unavailable("AI service").with_internal(err))
        }
        Err(err) => Err(ApiError::ai_generation_failed().with_internal(err)),
    }
}
