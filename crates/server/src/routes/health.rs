use axum::{Router, routing::get};

use crate::AppState;

pub async fn health_check() -> &'static str {
    "ok"
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
