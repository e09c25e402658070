use std::{env, fs, path::PathBuf};

use db::models::{
    task::{CreateTask, Level, Task, UpdateTask},
    user::UserDocument,
};
use server::routes::{
    assistant::{AssistantReply, AssistantRequest},
    relay::{GenerateRequest, GenerateResponse, ParseImageResponse},
    tasks::{TaskListQuery, TaskOrder},
};
use services::services::{
    auth::{AuthSession, GoogleLoginRequest, LoginRequest, RegisterRequest},
    task_query::{
        Analytics, CompletionPoint, ExtendedTaskStats, HeatmapRow, LevelCounts, MatrixPoint,
        MatrixStatus, TaskStats, TimelineRange,
    },
};
use ts_rs::TS;

fn generate_types_content() -> String {
    let header = "// This file was generated by `generate_types`. Do not edit it by hand.\n";
    let decls = [
        Level::decl(),
        Task::decl(),
        CreateTask::decl(),
        UpdateTask::decl(),
        UserDocument::decl(),
        RegisterRequest::decl(),
        LoginRequest::decl(),
        GoogleLoginRequest::decl(),
        AuthSession::decl(),
        TaskOrder::decl(),
        TaskListQuery::decl(),
        TaskStats::decl(),
        ExtendedTaskStats::decl(),
        LevelCounts::decl(),
        CompletionPoint::decl(),
        HeatmapRow::decl(),
        MatrixStatus::decl(),
        MatrixPoint::decl(),
        TimelineRange::decl(),
        Analytics::decl(),
        GenerateRequest::decl(),
        GenerateResponse::decl(),
        ParseImageResponse::decl(),
        AssistantRequest::decl(),
        AssistantReply::decl(),
        utils::response::ApiResponse::<()>::decl(),
    ];

    let body = decls
        .into_iter()
        .map(|d| format!("export {}", d.trim_end_matches(';')))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{header}\n{body}\n")
}

fn main() {
    let path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("shared/types.ts"));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).expect("cannot create output directory");
    }
    fs::write(&path, generate_types_content()).expect("unable to write types file");
    println!("Wrote TypeScript types to {}", path.display());
}
