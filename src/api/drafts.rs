//! In-progress assessment answers, one draft per user and assessment type.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::input::{Fields, TextRule};
use crate::api::{enforce_limit, parse_object, require_user, Policy};
use crate::http::pipeline::CurrentUser;
use crate::http::response::{success_with_message, with_rate_limit, ApiError, ApiResult};
use crate::http::server::AppState;
use crate::security::rate_limit::iso_millis;
use crate::security::unix_millis;
use crate::services::User;

const DRAFTS: &str = "assessment_drafts";
const ROUTE: &str = "assessments/draft";
const ASSESSMENT_TYPES: [&str; 6] = ["cirf", "cimm", "cira", "tbl", "ciss", "pricing"];
const CURRENT_SECTION: TextRule = TextRule::max(100, "Current section is too long");

#[derive(Debug, Deserialize)]
pub struct DraftQuery {
    #[serde(rename = "type")]
    pub assessment_type: Option<String>,
}

fn draft_key(user: &User, assessment_type: &str) -> Value {
    Value::from(format!("{}:{assessment_type}", user.id))
}

fn required_type(query: &DraftQuery) -> Result<&str, ApiError> {
    query
        .assessment_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Assessment type is required"))
}

pub async fn show(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Query(query): Query<DraftQuery>,
) -> ApiResult {
    let user = require_user(&user, "You must be logged in to access drafts")?;
    let user_id = user.id.to_string();
    let decision = enforce_limit(&state, &headers, Some(&user_id), ROUTE, Policy::Api, None)?;
    Ok(with_rate_limit(load(&state, user, &query).await, decision))
}

async fn load(state: &AppState, user: &User, query: &DraftQuery) -> ApiResult {
    let assessment_type = required_type(query)?;
    let draft = state
        .services
        .store
        .find_one(DRAFTS, "draft_key", &draft_key(user, assessment_type))
        .await
        .map_err(|err| ApiError::database("Failed to retrieve draft").with_internal(err))?;

    let Some(draft) = draft else {
        return Ok(success_with_message(
            Some(json!({ "hasDraft": false, "draft": null })),
            "No draft found",
        ));
    };

    Ok(success_with_message(
        Some(json!({
            "hasDraft": true,
            "draft": {
                "id": draft["id"],
                "answers": draft["answers"],
                "currentSection": draft["current_section"],
                "updatedAt": draft["updated_at"],
            },
        })),
        "Draft retrieved successfully",
    ))
}

pub async fn save(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let user = require_user(&user, "You must be logged in to save drafts")?;
    let user_id = user.id.to_string();
    let decision = enforce_limit(&state, &headers, Some(&user_id), ROUTE, Policy::Api, None)?;
    Ok(with_rate_limit(store_draft(&state, user, &body).await, decision))
}

async fn store_draft(state: &AppState, user: &User, body: &Bytes) -> ApiResult {
    let body = parse_object(body)?;
    let mut fields = Fields::new(&body);
    let assessment_type = fields.choice(
        "assessmentType",
        &ASSESSMENT_TYPES,
        "Assessment type is required",
        "Invalid assessment type",
    );
    let answers = answers(&mut fields);
    let current_section = fields.optional_text("currentSection", &CURRENT_SECTION);
    fields.finish()?;

    let answer_count = answers.len();
    let saved_at = iso_millis(unix_millis());
    let mut changes = Map::new();
    changes.insert("user_id".to_string(), Value::from(user.id.to_string()));
    changes.insert("assessment_type".to_string(), Value::from(assessment_type.as_str()));
    changes.insert("answers".to_string(), Value::Object(answers));
    changes.insert("current_section".to_string(), json!(current_section));
    changes.insert("updated_at".to_string(), Value::from(saved_at.as_str()));

    let draft = state
        .services
        .store
        .upsert(DRAFTS, "draft_key", &draft_key(user, &assessment_type), changes)
        .await
        .map_err(|err| ApiError::database("Failed to save draft").with_internal(err))?;

    tracing::info!(
        user_id = %user.id,
        assessment_type = %assessment_type,
        answer_count,
        "Assessment draft saved"
    );

    Ok(success_with_message(
        Some(json!({ "draftId": draft["id"], "savedAt": saved_at })),
        "Draft saved successfully",
    ))
}

/// Answers map question ids to a number, a string, or a list of strings.
fn answers(fields: &mut Fields<'_>) -> Map<String, Value> {
    let Some(Value::Object(answers)) = fields.value("answers") else {
        fields.fail("Answers are required");
        return Map::new();
    };
    let well_formed = answers.values().all(|answer| match answer {
        Value::Number(_) | Value::String(_) => true,
        Value::Array(items) => items.iter().all(Value::is_string),
        _ => false,
    });
    if !well_formed {
        fields.fail("Invalid answers");
    }
    answers.clone()
}

pub async fn discard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Query(query): Query<DraftQuery>,
) -> ApiResult {
    let user = require_user(&user, "You must be logged in to delete drafts")?;
    let user_id = user.id.to_string();
    let decision = enforce_limit(&state, &headers, Some(&user_id), ROUTE, Policy::Api, None)?;
    Ok(with_rate_limit(remove(&state, user, &query).await, decision))
}

async fn remove(state: &AppState, user: &User, query: &DraftQuery) -> ApiResult {
    let assessment_type = required_type(query)?;
    let store = &state.services.store;
    let draft = store
        .find_one(DRAFTS, "draft_key", &draft_key(user, assessment_type))
        .await
        .map_err(|err| ApiError::database("Failed to delete draft").with_internal(err))?;

    // Deleting a draft that is already gone still succeeds.
    if let Some(draft) = draft {
        let id = draft["id"].as_str().unwrap_or_default();
        store
            .delete(DRAFTS, id)
            .await
            .map_err(|err| ApiError::database("Failed to delete draft").with_internal(err))?;
    }

    tracing::info!(user_id = %user.id, assessment_type, "Assessment draft deleted");
    Ok(success_with_message(Some(json!({ "deleted": true })), "Draft deleted successfully"))
}
