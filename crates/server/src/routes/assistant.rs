use axum::{Json, Router, extract::State, response::Json as ResponseJson, routing::post};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, middleware::AuthUser};

#[derive(Debug, Clone, Deserialize, TS)]
pub struct AssistantRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AssistantReply {
    pub text: String,
}

/// POST /api/assistant
/// Answers with the caller's current task list as context.
pub async fn ask_assistant(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<AssistantRequest>,
) -> Result<ResponseJson<ApiResponse<AssistantReply>>, ApiError> {
    let tasks = state.tasks.get_all_tasks(&uid).await?;
    let text = state.assistant.ask(&payload.prompt, &tasks).await?;
    Ok(ResponseJson(ApiResponse::success(AssistantReply { text })))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/assistant", post(ask_assistant))
}
