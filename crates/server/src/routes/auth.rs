use axum::{Json, Router, extract::State, response::Json as ResponseJson, routing::post};
use services::services::auth::{AuthSession, GoogleLoginRequest, LoginRequest, RegisterRequest};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<ResponseJson<ApiResponse<AuthSession>>, ApiError> {
    let session = state.auth.register(payload).await?;
    Ok(ResponseJson(ApiResponse::success(session)))
}

/// POST /api/auth/login
/// Returns the stored profile, tasks included, with a fresh session token.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<ResponseJson<ApiResponse<AuthSession>>, ApiError> {
    let session = state.auth.login(payload).await?;
    Ok(ResponseJson(ApiResponse::success(session)))
}

/// POST /api/auth/google
/// Exchanges a Google ID token for a session; the first sign-in creates the user document.
pub async fn login_with_google(
    State(state): State<AppState>,
    Json(payload): Json<GoogleLoginRequest>,
) -> Result<ResponseJson<ApiResponse<AuthSession>>, ApiError> {
    let session = state.auth.login_with_google(payload).await?;
    Ok(ResponseJson(ApiResponse::success(session)))
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<AppState>) -> ResponseJson<ApiResponse<()>> {
    state.auth.logout();
    ResponseJson(ApiResponse::success(()))
}

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/auth",
        Router::new()
            .route("/register", post(register))
            .route("/login", post(login))
            .route("/google", post(login_with_google))
            .route("/logout", post(logout)),
    )
}
