use crate::api::AppState;
use crate::scene::SceneProgress;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracefarm_core::partition;
use tracefarm_persistence::{PersistenceError, SceneRecord};
use uuid::Uuid;

/// REST API routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/scenes", get(list_scenes).post(create_scene))
        .route("/api/v1/scenes/:scene_id", get(get_scene))
        .route("/health", get(health_check))
}

#[derive(Debug, Deserialize)]
struct CreateSceneRequest {
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct CreateSceneResponse {
    scene_id: Uuid,
    width: u32,
    height: u32,
    units: usize,
}

#[derive(Debug, Serialize)]
struct SceneResponse {
    #[serde(flatten)]
    record: SceneRecord,
    /// Live scheduling state, absent once the scene has finished
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<SceneProgress>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    active_scenes: usize,
}

/// Persist a new scene and start rendering it
async fn create_scene(
    State(state): State<AppState>,
    Json(req): Json<CreateSceneRequest>,
) -> Result<(StatusCode, Json<CreateSceneResponse>), ApiError> {
    let units = partition(req.width, req.height, state.dispatcher.config().chunk_size)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .len();

    let record = state.store.create_scene(req.width, req.height).map_err(|e| match e {
        PersistenceError::SceneError(e) => ApiError::BadRequest(e.to_string()),
        e => ApiError::Internal(e.to_string()),
    })?;

    let spec = record
        .spec()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state
        .dispatcher
        .start_scene(spec)
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSceneResponse {
            scene_id: record.id,
            width: record.width,
            height: record.height,
            units,
        }),
    ))
}

/// Progress of every scene being rendered
async fn list_scenes(State(state): State<AppState>) -> Json<Vec<SceneProgress>> {
    Json(state.dispatcher.all_progress().await)
}

/// Stored record plus live progress
async fn get_scene(
    State(state): State<AppState>,
    Path(scene_id): Path<Uuid>,
) -> Result<Json<SceneResponse>, ApiError> {
    let record = state
        .store
        .get_scene(&scene_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    let progress = state.dispatcher.progress(scene_id).await;

    Ok(Json(SceneResponse { record, progress }))
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        active_scenes: state.dispatcher.active_count(),
    })
}

/// API error types
#[derive(Debug)]
enum ApiError {
    NotFound,
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
