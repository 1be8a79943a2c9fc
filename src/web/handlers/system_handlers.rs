// src/web/handlers/system_handlers.rs
use rocket::serde::json::Json;
use rocket::State;
use tracing::{error, info};

use crate::auth::{IdentityProvider, Session, SessionUser};
use crate::extraction::ExtractedProfile;
use crate::web::services::AppState;
use crate::web::types::*;

pub async fn create_session_handler(identity: &State<IdentityProvider>) -> ApiResult<DataResponse<Session>> {
    match identity.sign_in_anonymous() {
        Ok(session) => Ok(Json(DataResponse::success(
            "Signed in anonymously".to_string(),
            session,
        ))),
        Err(e) => {
            error!("Anonymous sign-in failed: {}", e);
            Err(api_error(&e))
        }
    }
}

pub async fn health_handler(state: &State<AppState>) -> ApiResult<DataResponse<HealthData>> {
    let candidates = state
        .engine
        .available_candidates(None)
        .map_err(|e| api_error(&e))?;
    let broadcasts = state.engine.open_broadcasts().map_err(|e| api_error(&e))?;

    Ok(Json(DataResponse::success(
        "QuickHire API is running".to_string(),
        HealthData {
            environment: state.config.environment.name.clone(),
            available_candidates: candidates.len(),
            open_broadcasts: broadcasts.len(),
        },
    )))
}

pub async fn extract_handler(
    request: Json<ExtractRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<DataResponse<ExtractedProfile>> {
    info!("User {} extracting profile from speech", user.user_id);

    match state.onboarding.parse(&request.text).await {
        Ok(profile) => Ok(Json(DataResponse::success(
            format!("Understood you as {}", profile.role),
            profile,
        ))),
        Err(e) => {
            error!("Extraction for {} failed: {}", user.user_id, e);
            Err(api_error(&e))
        }
    }
}
