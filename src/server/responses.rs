use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::task::{Task, TaskId, TaskState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreatedResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Polling response. `context` is present only on success, `error` only on
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskStatusResponse {
    /// Maps a task record onto the polling contract: in-flight states report
    /// 202 pending, success reports 200 completed, failure 500 failed.
    pub fn from_task(task: &Task) -> (StatusCode, Json<TaskStatusResponse>) {
        let (code, response) = match task.state {
            TaskState::Pending | TaskState::Running => (
                StatusCode::ACCEPTED,
                TaskStatusResponse {
                    status: "pending".to_string(),
                    context: None,
                    error: None,
                },
            ),
            TaskState::Succeeded => (
                StatusCode::OK,
                TaskStatusResponse {
                    status: "completed".to_string(),
                    context: task.context.clone(),
                    error: None,
                },
            ),
            TaskState::Failed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                TaskStatusResponse {
                    status: "failed".to_string(),
                    context: None,
                    error: task.error.clone(),
                },
            ),
        };
        (code, Json(response))
    }
}

impl From<TaskError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: TaskError) -> Self {
        let status_code = match err {
            TaskError::Validation(_) => StatusCode::BAD_REQUEST,
            TaskError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            TaskError::Transient(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TaskError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status_code,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
    }
}
