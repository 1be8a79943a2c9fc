// src/web/handlers/candidate_handlers.rs
use rocket::serde::json::Json;
use rocket::State;
use tracing::{error, info, warn};

use crate::auth::SessionUser;
use crate::error::SyncError;
use crate::onboarding::{ProfileDraft, SessionContext};
use crate::types::Persona;
use crate::web::services::AppState;
use crate::web::types::*;

pub async fn list_candidates_handler(
    q: Option<String>,
    state: &State<AppState>,
) -> ApiResult<DataResponse<Vec<Persona>>> {
    let candidates = state
        .engine
        .available_candidates(q.as_deref())
        .map_err(|e| api_error(&e))?;

    Ok(Json(DataResponse::success(
        format!("{} candidates available", candidates.len()),
        candidates,
    )))
}

pub async fn get_candidate_handler(
    id: &str,
    state: &State<AppState>,
) -> ApiResult<DataResponse<Persona>> {
    let persona = state.engine.persona(id).map_err(|e| api_error(&e))?;
    Ok(Json(DataResponse::success(
        format!("{} ({})", persona.role, persona.status),
        persona,
    )))
}

pub async fn create_persona_handler(
    request: Json<CreatePersonaRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    let request = request.into_inner();
    info!("User {} publishing a persona", user.user_id);

    let (role, skills) = match (request.role, request.spoken_text) {
        (Some(role), _) if !role.trim().is_empty() => (role, request.skills.unwrap_or_default()),
        (_, Some(text)) => match state.onboarding.parse(&text).await {
            Ok(profile) => (profile.role, profile.skills),
            Err(e) => {
                warn!("Extraction for {} failed: {}", user.user_id, e);
                return Err(api_error(&e));
            }
        },
        _ => {
            return Err(api_error(&SyncError::Validation(
                "provide a role or spokenText".to_string(),
            )))
        }
    };

    let draft = ProfileDraft {
        role,
        skills,
        location: request.location,
        video_intro_url: request.video_intro_url,
    };

    let mut ctx = SessionContext::for_user(&user.user_id);
    let persona = match state.onboarding.publish(&mut ctx, &draft).await {
        Ok(persona) => persona,
        Err(e) => {
            error!("Publishing persona for {} failed: {}", user.user_id, e);
            return Err(api_error(&e));
        }
    };

    state.engine.adopt_persona(&persona).await;
    if let Err(e) = state.engine.watch_persona(&persona.persona_id) {
        warn!("Hire alerts unavailable for {}: {}", persona.persona_id, e);
    }

    Ok(Json(
        ActionResponse::success(
            format!("You are live as {}", persona.role),
            "persona_published".to_string(),
            persona,
        )
        .with_next_actions(vec!["Wait for job alerts nearby".to_string()]),
    ))
}

pub async fn attach_video_handler(
    id: &str,
    request: Json<AttachVideoRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    info!("User {} attaching video to {}", user.user_id, id);

    let persona = state
        .onboarding
        .attach_video(id, &request.url, request.expected_version)
        .await
        .map_err(|e| api_error(&e))?;
    state.engine.adopt_persona(&persona).await;

    Ok(Json(ActionResponse::success(
        "Intro video attached".to_string(),
        "video_attached".to_string(),
        persona,
    )))
}

pub async fn reactivate_handler(
    id: &str,
    request: Json<VersionedRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    info!("User {} re-activating {}", user.user_id, id);

    let persona = state
        .engine
        .reactivate(id, request.expected_version)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(ActionResponse::success(
        "You are available again".to_string(),
        "persona_reactivated".to_string(),
        persona,
    )))
}
