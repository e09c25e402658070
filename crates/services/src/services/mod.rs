pub mod assistant;
pub mod auth;
pub mod config;
pub mod gemini_api;
pub mod relay;
pub mod task_query;
pub mod task_repo;
