// src/web/mod.rs
//! HTTP surface for the candidate app and the employer dashboard.

pub mod handlers;
pub mod services;
pub mod types;

pub use services::AppState;
pub use types::*;

use anyhow::Result;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, Status};
use rocket::serde::json::Json;
use rocket::{catchers, get, options, post, routes, Build, Request, Response, Rocket, State};
use tracing::info;

use crate::auth::{IdentityProvider, Session, SessionUser};
use crate::core::ConfigManager;
use crate::extraction::ExtractedProfile;
use crate::types::{Broadcast, Persona};

// CORS Fairing
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "Add CORS headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "POST, GET, OPTIONS",
        ));
        response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

#[post("/session")]
pub async fn create_session(identity: &State<IdentityProvider>) -> ApiResult<DataResponse<Session>> {
    handlers::create_session_handler(identity).await
}

#[get("/health")]
pub async fn health(state: &State<AppState>) -> ApiResult<DataResponse<HealthData>> {
    handlers::health_handler(state).await
}

#[post("/extract", data = "<request>")]
pub async fn extract(
    request: Json<ExtractRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<DataResponse<ExtractedProfile>> {
    handlers::extract_handler(request, user, state).await
}

#[get("/candidates?<q>")]
pub async fn list_candidates(
    q: Option<String>,
    _user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<DataResponse<Vec<Persona>>> {
    handlers::list_candidates_handler(q, state).await
}

#[get("/candidates/<id>")]
pub async fn get_candidate(
    id: &str,
    _user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<DataResponse<Persona>> {
    handlers::get_candidate_handler(id, state).await
}

#[post("/personas", data = "<request>")]
pub async fn create_persona(
    request: Json<CreatePersonaRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    handlers::create_persona_handler(request, user, state).await
}

#[post("/personas/<id>/video", data = "<request>")]
pub async fn attach_video(
    id: &str,
    request: Json<AttachVideoRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    handlers::attach_video_handler(id, request, user, state).await
}

#[post("/personas/<id>/reactivate", data = "<request>")]
pub async fn reactivate(
    id: &str,
    request: Json<VersionedRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    handlers::reactivate_handler(id, request, user, state).await
}

#[post("/offers/<id>", data = "<request>")]
pub async fn offer(
    id: &str,
    request: Json<VersionedRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    handlers::offer_handler(id, request, user, state).await
}

#[post("/offers/<id>/accept", data = "<request>")]
pub async fn accept_offer(
    id: &str,
    request: Json<VersionedRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    handlers::accept_handler(id, request, user, state).await
}

#[post("/offers/<id>/decline", data = "<request>")]
pub async fn decline_offer(
    id: &str,
    request: Json<VersionedRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Persona>> {
    handlers::decline_handler(id, request, user, state).await
}

#[post("/broadcasts", data = "<request>")]
pub async fn create_broadcast(
    request: Json<CreateBroadcastRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<DispatchReport>> {
    handlers::create_broadcast_handler(request, user, state).await
}

#[post("/broadcasts/<id>/cancel", data = "<request>")]
pub async fn cancel_broadcast(
    id: &str,
    request: Json<VersionedRequest>,
    user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<ActionResponse<Broadcast>> {
    handlers::cancel_broadcast_handler(id, request, user, state).await
}

#[get("/broadcasts")]
pub async fn list_broadcasts(
    _user: SessionUser,
    state: &State<AppState>,
) -> ApiResult<DataResponse<Vec<Broadcast>>> {
    handlers::list_broadcasts_handler(state).await
}

#[options("/<_..>")]
pub async fn options() -> Status {
    Status::Ok
}

// Error catchers
#[rocket::catch(400)]
pub fn bad_request() -> Json<StandardErrorResponse> {
    Json(StandardErrorResponse::new(
        "Invalid request format".to_string(),
        "BAD_REQUEST".to_string(),
        vec![
            "Check your request JSON format".to_string(),
            "Verify all required fields are present".to_string(),
        ],
    ))
}

#[rocket::catch(401)]
pub fn unauthorized() -> Json<StandardErrorResponse> {
    Json(StandardErrorResponse::new(
        "Session required".to_string(),
        "AUTH_ERROR".to_string(),
        vec!["Start a new session with POST /api/session".to_string()],
    ))
}

#[rocket::catch(404)]
pub fn not_found() -> Json<StandardErrorResponse> {
    Json(StandardErrorResponse::new(
        "No such endpoint".to_string(),
        "NOT_FOUND".to_string(),
        vec!["Check the URL".to_string()],
    ))
}

#[rocket::catch(422)]
pub fn unprocessable() -> Json<StandardErrorResponse> {
    Json(StandardErrorResponse::new(
        "Request body does not match the expected shape".to_string(),
        "VALIDATION_ERROR".to_string(),
        vec!["Verify field names are camelCase".to_string()],
    ))
}

#[rocket::catch(500)]
pub fn internal_error() -> Json<StandardErrorResponse> {
    Json(StandardErrorResponse::new(
        "Internal server error".to_string(),
        "INTERNAL_ERROR".to_string(),
        vec![
            "Try again in a few moments".to_string(),
            "Contact support if the problem persists".to_string(),
        ],
    ))
}

/// Assembles the rocket instance around already-built services.
pub fn build_rocket(port: u16, state: AppState, identity: IdentityProvider) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("port", port))
        .merge(("address", "0.0.0.0"));

    rocket::custom(figment)
        .attach(Cors)
        .manage(state)
        .manage(identity)
        .register(
            "/api",
            catchers![bad_request, unauthorized, not_found, unprocessable, internal_error],
        )
        .mount(
            "/api",
            routes![
                create_session,
                health,
                extract,
                list_candidates,
                get_candidate,
                create_persona,
                attach_video,
                reactivate,
                offer,
                accept_offer,
                decline_offer,
                create_broadcast,
                cancel_broadcast,
                list_broadcasts,
                options,
            ],
        )
}

// Main server start function
pub async fn start_web_server(config: ConfigManager) -> Result<()> {
    let port = config.environment.port;
    let identity = IdentityProvider::from_settings(&config.auth);
    let (state, _sync) = AppState::from_config(config).await?;

    info!("Starting QuickHire API server on port {}", port);
    info!("Environment: {}", state.config.environment.name);
    info!("Database: {}", state.config.environment.database_path.display());

    build_rocket(port, state, identity)
        .launch()
        .await
        .map_err(|e| anyhow::anyhow!("Rocket failed: {}", e))?;

    Ok(())
}
