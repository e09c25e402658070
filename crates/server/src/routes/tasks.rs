use std::{collections::BTreeMap, convert::Infallible};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::{
        Json as ResponseJson,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post, put},
};
use chrono::{NaiveDate, Utc};
use db::models::task::{CreateTask, Level, Task, UpdateTask};
use futures_util::{Stream, StreamExt, stream};
use serde::Deserialize;
use services::services::{
    task_query::{
        Analytics, ExtendedTaskStats, TaskFilter, analytics, calendar_groups, do_now_tasks,
        extended_stats, sort_tasks,
    },
    task_repo::{TaskRepo, TaskRepoError},
};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, middleware::AuthUser};

const SNAPSHOT_EVENT: &str = "tasks";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrder {
    /// Incomplete first, then by deadline.
    #[default]
    Sorted,
    /// Incomplete only, most urgent first.
    DoNow,
    /// Storage order.
    None,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct TaskListQuery {
    pub complexity: Option<Level>,
    pub priority: Option<Level>,
    #[serde(default)]
    pub due_today: bool,
    pub search: Option<String>,
    #[serde(default)]
    pub order: TaskOrder,
}

impl TaskListQuery {
    fn filter(&self) -> TaskFilter {
        TaskFilter {
            complexity: self.complexity,
            priority: self.priority,
            due_today: self.due_today,
            search: self.search.clone(),
        }
    }
}

/// GET /api/tasks
pub async fn list_tasks(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let all = state.tasks.get_all_tasks(&uid).await?;
    let mut tasks = query.filter().apply(&all, Utc::now(), state.utc_offset);
    match query.order {
        TaskOrder::Sorted => sort_tasks(&mut tasks),
        TaskOrder::DoNow => {
            tasks.retain(|t| !t.completed);
            do_now_tasks(&mut tasks);
        }
        TaskOrder::None => {}
    }
    Ok(ResponseJson(ApiResponse::success(tasks)))
}

/// POST /api/tasks
pub async fn create_task(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateTask>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let now = Utc::now();
    payload.validate(now, state.utc_offset)?;
    let task = state.tasks.upsert_task(&uid, payload.into_task(now)).await?;
    tracing::debug!(uid = %uid, task_id = %task.id, priority = %task.priority, "Created task");
    Ok(ResponseJson(ApiResponse::success(task)))
}

/// PUT /api/tasks
/// Replaces the whole list, e.g. when importing.
pub async fn replace_tasks(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
    Json(tasks): Json<Vec<Task>>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    state.tasks.replace_all(&uid, tasks.clone()).await?;
    Ok(ResponseJson(ApiResponse::success(tasks)))
}

/// PUT /api/tasks/{task_id}
pub async fn update_task(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(payload): Json<UpdateTask>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let (now, offset) = (Utc::now(), state.utc_offset);
    let task = state
        .tasks
        .update_task(&uid, &task_id, |task| payload.apply_to(task, now, offset))
        .await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

/// POST /api/tasks/{task_id}/toggle
pub async fn toggle_task(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let now = Utc::now();
    let task = state
        .tasks
        .update_task(&uid, &task_id, |task| {
            task.toggle_complete(now);
            Ok(())
        })
        .await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

/// DELETE /api/tasks/{task_id}
pub async fn delete_task(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    if !state.tasks.delete_task(&uid, &task_id).await? {
        return Err(TaskRepoError::TaskNotFound.into());
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

/// GET /api/tasks/stats
pub async fn get_stats(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<ExtendedTaskStats>>, ApiError> {
    let tasks = state.tasks.get_all_tasks(&uid).await?;
    Ok(ResponseJson(ApiResponse::success(extended_stats(
        &tasks,
        Utc::now(),
    ))))
}

/// GET /api/tasks/calendar
/// Tasks keyed by their local deadline date.
pub async fn get_calendar(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<BTreeMap<NaiveDate, Vec<Task>>>>, ApiError> {
    let tasks = state.tasks.get_all_tasks(&uid).await?;
    Ok(ResponseJson(ApiResponse::success(calendar_groups(
        &tasks,
        state.utc_offset,
    ))))
}

/// GET /api/tasks/analytics
pub async fn get_analytics(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Analytics>>, ApiError> {
    let tasks = state.tasks.get_all_tasks(&uid).await?;
    Ok(ResponseJson(ApiResponse::success(analytics(
        &tasks,
        Utc::now(),
        state.utc_offset,
    ))))
}

fn snapshot_event(tasks: &[Task]) -> Event {
    Event::default()
        .event(SNAPSHOT_EVENT)
        .json_data(tasks)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Releases the per-user channel once the SSE stream is dropped.
struct SubscriptionGuard {
    repo: TaskRepo,
    uid: String,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.repo.unsubscribe(&self.uid);
    }
}

/// GET /api/tasks/stream
/// One `tasks` event with the current list, then one per change.
pub async fn stream_tasks(
    AuthUser { uid }: AuthUser,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // The guard is declared first so it drops after the receiver, also when the
    // read below fails. Subscribing before the read means no write is missed.
    let guard = SubscriptionGuard {
        repo: state.tasks.clone(),
        uid,
    };
    let rx = state.tasks.subscribe(&guard.uid);
    let initial = state.tasks.get_all_tasks(&guard.uid).await?;
    tracing::debug!(
        uid = %guard.uid,
        subscribers = state.tasks.subscriber_count(&guard.uid),
        "Task stream opened"
    );

    let updates = BroadcastStream::new(rx).filter_map(|snapshot| async move {
        match snapshot {
            Ok(tasks) => Some(snapshot_event(&tasks)),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Task stream lagged, waiting for next snapshot");
                None
            }
        }
    });
    let events = stream::once(async move { snapshot_event(&initial) })
        .chain(updates)
        .map(move |event| {
            let _guard = &guard;
            Ok(event)
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/tasks",
        Router::new()
            .route("/", get(list_tasks).post(create_task).put(replace_tasks))
            .route("/stats", get(get_stats))
            .route("/calendar", get(get_calendar))
            .route("/analytics", get(get_analytics))
            .route("/stream", get(stream_tasks))
            .route("/{task_id}", put(update_task).delete(delete_task))
            .route("/{task_id}/toggle", post(toggle_task)),
    )
}
