// src/web/types.rs
//! Request bodies and the standard response envelopes of the HTTP API.

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::sync::{MatchOutcome, MatchResult};
use crate::types::{Broadcast, Location};

#[derive(Serialize)]
#[serde(crate = "rocket::serde", rename_all = "lowercase")]
pub enum ResponseType {
    Text,
    Data,
    Action,
    Error,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct TextResponse {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct DataResponse<T> {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub success: bool,
    pub message: String,
    pub data: T,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct ActionResponse<T> {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub success: bool,
    pub message: String,
    pub action: String,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_actions: Option<Vec<String>>,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct StandardErrorResponse {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub suggestions: Vec<String>,
}

impl TextResponse {
    pub fn success(message: String) -> Self {
        Self {
            response_type: ResponseType::Text,
            success: true,
            message,
        }
    }
}

impl<T> DataResponse<T> {
    pub fn success(message: String, data: T) -> Self {
        Self {
            response_type: ResponseType::Data,
            success: true,
            message,
            data,
        }
    }
}

impl<T> ActionResponse<T> {
    pub fn success(message: String, action: String, data: T) -> Self {
        Self {
            response_type: ResponseType::Action,
            success: true,
            message,
            action,
            data,
            next_actions: None,
        }
    }

    pub fn with_next_actions(mut self, next_actions: Vec<String>) -> Self {
        self.next_actions = Some(next_actions);
        self
    }
}

impl StandardErrorResponse {
    pub fn new(error: String, error_code: String, suggestions: Vec<String>) -> Self {
        Self {
            response_type: ResponseType::Error,
            success: false,
            error,
            error_code,
            suggestions,
        }
    }
}

pub type ApiError = (Status, Json<StandardErrorResponse>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn error_status(error: &SyncError) -> Status {
    match error {
        SyncError::Conflict { .. }
        | SyncError::BroadcastClosed { .. }
        | SyncError::AlreadyExists { .. } => Status::Conflict,
        SyncError::InvalidTransition { .. } => Status::UnprocessableEntity,
        SyncError::NotFound { .. } => Status::NotFound,
        SyncError::StoreUnavailable(_) => Status::ServiceUnavailable,
        SyncError::Extraction(_) | SyncError::Notification(_) => Status::BadGateway,
        SyncError::Auth(_) => Status::Unauthorized,
        SyncError::ImmutableField { .. } | SyncError::Validation(_) => Status::BadRequest,
        SyncError::Decode { .. } => Status::InternalServerError,
    }
}

fn suggestions_for(error: &SyncError) -> Vec<String> {
    let hints: &[&str] = match error {
        SyncError::Conflict { .. } => &[
            "Someone else changed this record first",
            "Reload it and decide again with the current version",
        ],
        SyncError::InvalidTransition { .. } => &["Reload the candidate to see their current status"],
        SyncError::BroadcastClosed { .. } => &["Create a new broadcast"],
        SyncError::NotFound { .. } => &["Check the id and try again"],
        SyncError::AlreadyExists { .. } => &["Fetch the existing record instead"],
        SyncError::StoreUnavailable(_) => &["Try again in a few moments"],
        SyncError::Extraction(_) => &[
            "Try speaking again",
            "Say your job title and a few skills",
        ],
        SyncError::Auth(_) => &["Start a new session with POST /api/session"],
        SyncError::ImmutableField { .. } => &["This field can only be set once"],
        SyncError::Validation(_) => &["Check your request fields"],
        SyncError::Decode { .. } | SyncError::Notification(_) => {
            &["Contact support if the problem persists"]
        }
    };
    hints.iter().map(|s| s.to_string()).collect()
}

pub fn api_error(error: &SyncError) -> ApiError {
    (
        error_status(error),
        Json(StandardErrorResponse::new(
            error.to_string(),
            error.code().to_string(),
            suggestions_for(error),
        )),
    )
}

// ---- request bodies ----

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct VersionedRequest {
    pub expected_version: u64,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct CreatePersonaRequest {
    /// Free speech, run through extraction when `role` is absent.
    #[serde(default)]
    pub spoken_text: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    pub location: Location,
    #[serde(default)]
    pub video_intro_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct AttachVideoRequest {
    pub url: String,
    pub expected_version: u64,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct CreateBroadcastRequest {
    pub role: String,
    pub wage: String,
    pub target_count: u32,
    pub location: Location,
    #[serde(default)]
    pub radius_km: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct ExtractRequest {
    pub text: String,
}

// ---- response payloads ----

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct MatchSummary {
    pub persona_id: String,
    pub distance_m: f64,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl From<&MatchResult> for MatchSummary {
    fn from(result: &MatchResult) -> Self {
        let (outcome, version) = match &result.outcome {
            MatchOutcome::Offered(persona) => ("offered".to_string(), Some(persona.version)),
            MatchOutcome::Skipped(reason) => (format!("skipped:{reason:?}").to_lowercase(), None),
            MatchOutcome::Failed(e) => (format!("failed:{}", e.code().to_lowercase()), None),
        };
        Self {
            persona_id: result.persona_id.clone(),
            distance_m: (result.distance_m * 10.0).round() / 10.0,
            outcome,
            version,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct DispatchReport {
    pub broadcast: Broadcast,
    pub matches: Vec<MatchSummary>,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct HealthData {
    pub environment: String,
    pub available_candidates: usize,
    pub open_broadcasts: usize,
}
