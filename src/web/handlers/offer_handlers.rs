// src/web/handlers/offer_handlers.rs
use rocket::serde::json::Json;
use rocket::State;
use tracing::{info, warn};

use crate::auth::SessionUser;
use crate::types::{Persona, PersonaStatus};
use crate::web::services::AppState;
use crate::web::types::*;

/// Employer hire action. With auto-confirm enabled the candidate comes back
/// HIRED, otherwise OFFERED and awaiting their accept.
pub async fn offer_handler(
    id: &str,
    request: Json<VersionedRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    info!("Employer {} hiring {} at v{}", user.user_id, id, request.expected_version);

    let persona = state
        .engine
        .offer(id, request.expected_version, &user.user_id)
        .await
        .map_err(|e| {
            warn!("Hire of {} by {} failed: {}", id, user.user_id, e);
            api_error(&e)
        })?;

    let (message, action) = match persona.status {
        PersonaStatus::Hired => ("Candidate hired", "hired"),
        _ => ("Offer sent; waiting for the candidate", "offered"),
    };

    Ok(Json(ActionResponse::success(
        message.to_string(),
        action.to_string(),
        persona,
    )))
}

pub async fn accept_handler(
    id: &str,
    request: Json<VersionedRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    info!("User {} accepting offer on {}", user.user_id, id);

    let persona = state
        .engine
        .accept(id, request.expected_version)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(ActionResponse::success(
        format!(
            "Hired by {}",
            persona.hired_by.as_deref().unwrap_or("A Shop Owner")
        ),
        "accepted".to_string(),
        persona,
    )))
}

pub async fn decline_handler(
    id: &str,
    request: Json<VersionedRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    info!("User {} declining offer on {}", user.user_id, id);

    let persona = state
        .engine
        .decline(id, request.expected_version)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(ActionResponse::success(
        "Offer declined".to_string(),
        "declined".to_string(),
        persona,
    )))
}
