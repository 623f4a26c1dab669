//! The signed-in user's profile.
//!
//! Profiles live in the `profiles` collection keyed by `user_id`. A PATCH
//! only touches the fields it names; `null` clears a nullable field.

use axum::{body::Bytes, extract::State, http::HeaderMap};
use serde_json::{Map, Value};

use crate::api::input::{Fields, PatchField, PatchKind};
use crate::api::{enforce_limit, parse_object, require_user, Policy};
use crate::http::pipeline::CurrentUser;
use crate::http::response::{success, success_with_message, with_rate_limit, ApiError, ApiResult};
use crate::http::server::AppState;
use crate::security::rate_limit::iso_millis;
use crate::security::unix_millis;
use crate::services::User;

const PROFILES: &str = "profiles";
const ROUTE: &str = "user/profile";

const PROFILE_FIELDS: [PatchField; 18] = [
    PatchField {
        key: "full_name",
        label: "Full name",
        kind: PatchKind::Text { min: 1, max: 255 },
        nullable: false,
    },
    PatchField::text("organization", "Organization", 255),
    PatchField::url("avatar_url", "Avatar URL", 500),
    PatchField::text("phone", "Phone", 50),
    PatchField::url("website", "Website", 255),
    PatchField::url("linkedin_url", "LinkedIn URL", 255),
    PatchField::text("twitter_handle", "Twitter handle", 50),
    PatchField::text("country", "Country", 100),
    PatchField::text("city", "City", 100),
    PatchField::text("timezone", "Timezone", 100),
    PatchField::text("industry", "Industry", 100),
    PatchField::text("business_stage", "Business stage", 50),
    PatchField {
        key: "years_operating",
        label: "Years operating",
        kind: PatchKind::Integer { min: 0, max: 100 },
        nullable: true,
    },
    PatchField::text("team_size", "Team size", 50),
    PatchField::text("revenue_range", "Revenue range", 50),
    PatchField::text("cultural_tradition", "Cultural tradition", 255),
    PatchField::text("community_affiliation", "Community affiliation", 255),
    PatchField {
        key: "profile_completed",
        label: "Profile completed",
        kind: PatchKind::Flag,
        nullable: false,
    },
];

pub async fn show(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
) -> ApiResult {
    let user = require_user(&user, "Authentication required")?;
    let user_id = user.id.to_string();
    let decision = enforce_limit(&state, &headers, Some(&user_id), ROUTE, Policy::Api, None)?;
    Ok(with_rate_limit(load(&state, &user_id).await, decision))
}

async fn load(state: &AppState, user_id: &str) -> ApiResult {
    let profile = state
        .services
        .store
        .find_one(PROFILES, "user_id", &Value::from(user_id))
        .await
        .map_err(|err| ApiError::database("Failed to fetch profile").with_internal(err))?
        .ok_or_else(|| ApiError::not_found("Profile"))?;
    Ok(success(profile))
}

pub async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let user = require_user(&user, "Authentication required")?;
    let user_id = user.id.to_string();
    let decision = enforce_limit(&state, &headers, Some(&user_id), ROUTE, Policy::Api, None)?;
    Ok(with_rate_limit(apply(&state, user, &body).await, decision))
}

async fn apply(state: &AppState, user: &User, body: &Bytes) -> ApiResult {
    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let mut changes = Map::new();
    for field in &PROFILE_FIELDS {
        if let Some(value) = fields.patch(field) {
            changes.insert(field.key.to_string(), value);
        }
    }
    fields.finish()?;

    let changed = changes.len();
    changes.insert("email".to_string(), Value::from(user.email.as_str()));
    changes.insert("updated_at".to_string(), Value::from(iso_millis(unix_millis())));

    let profile = state
        .services
        .store
        .upsert(PROFILES, "user_id", &Value::from(user.id.to_string()), changes)
        .await
        .map_err(|err| ApiError::internal("Failed to update profile").with_internal(err))?;

    tracing::info!(user_id = %user.id, fields = changed, "Profile updated");
    Ok(success_with_message(Some(profile), "Profile updated successfully"))
}
