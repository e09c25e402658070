use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::task::TaskValidationError;
use services::services::{
    assistant::AssistantError, auth::AuthError, relay::RelayError, task_repo::TaskRepoError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    TaskRepo(#[from] TaskRepoError),
    #[error(transparent)]
    Validation(#[from] TaskValidationError),
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::TaskRepo(err) => match err {
                TaskRepoError::Validation(_) => StatusCode::BAD_REQUEST,
                TaskRepoError::TaskNotFound | TaskRepoError::UserNotFound => StatusCode::NOT_FOUND,
                TaskRepoError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Assistant(err) => match err {
                AssistantError::EmptyPrompt => StatusCode::BAD_REQUEST,
                AssistantError::InvalidResponse | AssistantError::Upstream(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },
            ApiError::Relay(_) => StatusCode::BAD_GATEWAY,
            ApiError::Auth(err) => match err {
                AuthError::MissingFields(_) | AuthError::EmailExists => StatusCode::BAD_REQUEST,
                AuthError::InvalidCredentials | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
                AuthError::ProfileNotFound => StatusCode::NOT_FOUND,
                AuthError::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                AuthError::Provider(_) => StatusCode::BAD_GATEWAY,
                AuthError::Token(_) | AuthError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
            match status {
                StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
                _ => self.to_string(),
            }
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
            self.to_string()
        };

        (status, Json(ApiResponse::<()>::error(&message))).into_response()
    }
}
