//! Relay endpoints in front of the hosted model. These keep the bare wire format
//! (`{ text }`, `{ tasks }`, plain-text 500s) rather than the `/api` envelope.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
};
use chrono::Utc;
use db::models::task::Task;
use serde::{Deserialize, Serialize};
use services::services::relay::RelayError;
use ts_rs::TS;

use crate::AppState;

const IMAGE_FIELD: &str = "image";
const DEFAULT_IMAGE_MIME: &str = "image/jpeg";
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

type RelayResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct GenerateResponse {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ParseImageResponse {
    pub tasks: Vec<Task>,
}

fn relay_failure(err: RelayError) -> (StatusCode, String) {
    tracing::error!(error = %err, "Relay request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// POST /generate
pub async fn generate(
    State(state): State<AppState>,
    Json(payload): Json<GenerateRequest>,
) -> RelayResult<GenerateResponse> {
    let text = state
        .relay
        .generate(payload.prompt.as_deref())
        .await
        .map_err(relay_failure)?;
    Ok(Json(GenerateResponse { text }))
}

/// POST /parse-image
/// Multipart upload with the picture in the `image` field.
pub async fn parse_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> RelayResult<ParseImageResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let mime_type = field
            .content_type()
            .unwrap_or(DEFAULT_IMAGE_MIME)
            .to_string();
        let image = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

        let tasks = state
            .relay
            .parse_image(&mime_type, &image, Utc::now())
            .await
            .map_err(relay_failure)?;
        return Ok(Json(ParseImageResponse { tasks }));
    }

    Err((
        StatusCode::BAD_REQUEST,
        format!("Missing multipart field `{IMAGE_FIELD}`"),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/generate", post(generate)).route(
        "/parse-image",
        post(parse_image).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
    )
}
