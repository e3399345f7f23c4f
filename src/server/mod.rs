//! HTTP surface: submit, poll, word match.

pub mod requests;
pub mod responses;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{self, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info};

use crate::lexicon::{self, WordLexicon};
use crate::pipeline::InferencePipeline;
use crate::task::{TaskId, TaskQueue, TaskStore, TaskStoreError};

use requests::{GenerateContextRequest, MatchWordsRequest};
use responses::{ErrorResponse, TaskCreatedResponse, TaskStatusResponse};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub queue: TaskQueue,
    pub lexicon: Arc<dyn WordLexicon>,
}

pub fn router(state: AppState) -> Router {
    let allow_origin = AllowOrigin::any();
    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_origin(allow_origin);

    Router::new()
        .route("/", get(index))
        .route("/api/generate-context", post(generate_context))
        .route("/api/get-context-result/:task_id", get(get_context_result))
        .route("/api/get-context-result", get(missing_task_id))
        .route("/api/match-words", post(match_words))
        .layer(cors_layer)
        .with_state(state)
}

async fn index() -> &'static str {
    "parolier: French lyric context service"
}

/// Accepts a lyric for background processing and returns its task id.
async fn generate_context(
    State(state): State<AppState>,
    Json(request): Json<GenerateContextRequest>,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), (StatusCode, Json<ErrorResponse>)> {
    InferencePipeline::validate(&request.lyric)?;
    let task = state.store.create(&request.lyric).map_err(storage_error)?;
    state.queue.submit(task.id);
    info!(task_id = %task.id, "task accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskCreatedResponse { task_id: task.id }),
    ))
}

/// Reports the current state of a task.
async fn get_context_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<(StatusCode, Json<TaskStatusResponse>), (StatusCode, Json<ErrorResponse>)> {
    let task_id = TaskId::parse(&task_id).ok_or_else(unknown_task)?;
    match state.store.get(task_id) {
        Ok(task) => {
            debug!(task_id = %task.id, state = %task.state, "task polled");
            Ok(TaskStatusResponse::from_task(&task))
        }
        Err(TaskStoreError::NotFound(_)) => Err(unknown_task()),
        Err(err) => Err(storage_error(err)),
    }
}

async fn missing_task_id() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "task_id is required".to_string(),
        }),
    )
}

/// Returns the known words found in the submitted lyrics as a bare array.
async fn match_words(
    State(state): State<AppState>,
    Json(request): Json<MatchWordsRequest>,
) -> Result<Json<Vec<String>>, (StatusCode, Json<ErrorResponse>)> {
    if request.lyrics.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Lyrics are required".to_string(),
            }),
        ));
    }
    Ok(Json(lexicon::match_words(
        state.lexicon.as_ref(),
        &request.lyrics,
    )))
}

fn unknown_task() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "unknown task id".to_string(),
        }),
    )
}

fn storage_error(err: TaskStoreError) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}
