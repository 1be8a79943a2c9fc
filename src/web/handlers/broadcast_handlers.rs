// src/web/handlers/broadcast_handlers.rs
use rocket::serde::json::Json;
use rocket::State;
use tracing::{error, info};

use crate::auth::SessionUser;
use crate::types::{Broadcast, NewBroadcast};
use crate::web::services::AppState;
use crate::web::types::*;

pub async fn create_broadcast_handler(
    request: Json<CreateBroadcastRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<DispatchReport>> {
    let request = request.into_inner();
    let new_broadcast = NewBroadcast {
        employer_id: user.user_id.clone(),
        role: request.role,
        wage: request.wage,
        target_count: request.target_count,
        location: request.location,
        radius_km: request.radius_km.or(state.config.sync.broadcast_radius_km),
    };

    info!(
        "Employer {} broadcasting {} x{}",
        user.user_id, new_broadcast.role, new_broadcast.target_count
    );

    let (broadcast, results) = match state.engine.create_broadcast_and_dispatch(&new_broadcast).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Broadcast by {} failed: {}", user.user_id, e);
            return Err(api_error(&e));
        }
    };

    let matches: Vec<MatchSummary> = results.iter().map(MatchSummary::from).collect();
    let offered = results.iter().filter(|r| r.is_offered()).count();

    Ok(Json(ActionResponse::success(
        format!(
            "Broadcast sent; {} of {} places offered",
            offered, broadcast.target_count
        ),
        "broadcast_created".to_string(),
        DispatchReport { broadcast, matches },
    )))
}

pub async fn cancel_broadcast_handler(
    id: &str,
    request: Json<VersionedRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Broadcast>> {
    info!("Employer {} cancelling broadcast {}", user.user_id, id);

    let broadcast = state
        .engine
        .cancel_broadcast(id, request.expected_version)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(ActionResponse::success(
        "Broadcast cancelled".to_string(),
        "broadcast_cancelled".to_string(),
        broadcast,
    )))
}

pub async fn list_broadcasts_handler(state: &State<AppState>) -> ApiResult<DataResponse<Vec<Broadcast>>> {
    let open = state.engine.open_broadcasts().map_err(|e| api_error(&e))?;
    Ok(Json(DataResponse::success(
        format!("{} open broadcasts", open.len()),
        open,
    )))
}
