//! Thin relay in front of the hosted model: prompt forwarding and task extraction from images.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use db::models::task::{Level, Task, derive_priority, generate_task_id};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use utils::text::{preview, truncate_chars};

use super::gemini_api::{GeminiApiError, TextGenerator, extract_json};

pub const DEFAULT_PROMPT: &str = "Xin chào Gemini!";
pub const STUB_TASK_TITLE: &str = "Review uploaded image";

const IMAGE_PROMPT: &str = r#"Extract every task you can find in this image (a to-do list, schedule, whiteboard or note).
Return ONLY a JSON array, no prose, where each element has this shape:
{"title": "short task title", "deadline": "ISO-8601 timestamp or null", "value": "high|medium|low", "complexity": "high|medium|low", "priority": "high|medium|low or null", "note": "extra details or empty string"}
If the image contains no tasks return []."#;

static FIRST_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("array pattern compiles"));

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Upstream(#[from] GeminiApiError),
}

/// Replaces a blank prompt with the default greeting, then truncates to `max_chars`.
pub fn truncate_prompt(prompt: Option<&str>, max_chars: usize) -> String {
    let prompt = prompt.filter(|p| !p.is_empty()).unwrap_or(DEFAULT_PROMPT);
    truncate_chars(prompt, max_chars).to_string()
}

/// A task as the vision model describes it; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedTask {
    title: Option<String>,
    deadline: Option<String>,
    value: Option<String>,
    complexity: Option<String>,
    priority: Option<String>,
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtractedTasks {
    List(Vec<ExtractedTask>),
    Wrapped { tasks: Vec<ExtractedTask> },
}

impl From<ExtractedTasks> for Vec<ExtractedTask> {
    fn from(value: ExtractedTasks) -> Self {
        match value {
            ExtractedTasks::List(tasks) | ExtractedTasks::Wrapped { tasks } => tasks,
        }
    }
}

fn parse_level(raw: Option<&str>) -> Option<Level> {
    raw.and_then(|s| s.trim().parse().ok())
}

fn parse_deadline(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Date-only answers are common; treat them as end of day UTC.
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 0))
        .map(|naive| naive.and_utc())
}

impl ExtractedTask {
    fn into_task(self, now: DateTime<Utc>) -> Option<Task> {
        let title = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        let deadline =
            parse_deadline(self.deadline.as_deref()).unwrap_or_else(|| now + Duration::days(1));
        let value = parse_level(self.value.as_deref()).unwrap_or_default();
        let complexity = parse_level(self.complexity.as_deref()).unwrap_or_default();
        let priority = parse_level(self.priority.as_deref())
            .unwrap_or_else(|| derive_priority(value, complexity, deadline, now));
        Some(Task {
            id: generate_task_id(now),
            title: title.to_string(),
            deadline,
            value,
            complexity,
            priority,
            note: self.note.unwrap_or_default().trim().to_string(),
            completed: false,
            completed_at: None,
        })
    }
}

/// Placeholder returned when nothing usable could be parsed from the model reply.
pub fn stub_task(raw_reply: &str, now: DateTime<Utc>) -> Task {
    Task {
        id: generate_task_id(now),
        title: STUB_TASK_TITLE.to_string(),
        deadline: now + Duration::days(1),
        value: Level::Medium,
        complexity: Level::Medium,
        priority: Level::Medium,
        note: preview(raw_reply.trim(), 500),
        completed: false,
        completed_at: None,
    }
}

/// Best-effort parse of a model reply: direct JSON, then the first bracketed array, then a stub.
pub fn parse_tasks_reply(reply: &str, now: DateTime<Utc>) -> Vec<Task> {
    let candidate = extract_json(reply);
    let parsed = serde_json::from_str::<ExtractedTasks>(candidate)
        .ok()
        .or_else(|| {
            FIRST_ARRAY
                .find(reply)
                .and_then(|m| serde_json::from_str::<ExtractedTasks>(m.as_str()).ok())
        });

    match parsed {
        Some(extracted) => {
            let items: Vec<ExtractedTask> = extracted.into();
            let total = items.len();
            let tasks: Vec<Task> = items.into_iter().filter_map(|t| t.into_task(now)).collect();
            if tasks.len() < total {
                warn!(
                    dropped = total - tasks.len(),
                    "Dropped extracted tasks without a title"
                );
            }
            tasks
        }
        None => {
            warn!(
                reply_preview = %preview(reply, 200),
                "Could not parse tasks from model reply, returning stub task"
            );
            vec![stub_task(reply, now)]
        }
    }
}

#[derive(Clone)]
pub struct RelayService {
    generator: Arc<dyn TextGenerator>,
    prompt_max_chars: usize,
}

impl RelayService {
    pub fn new(generator: Arc<dyn TextGenerator>, prompt_max_chars: usize) -> Self {
        Self {
            generator,
            prompt_max_chars,
        }
    }

    /// Forwards the (truncated) prompt and returns the model text verbatim.
    pub async fn generate(&self, prompt: Option<&str>) -> Result<String, RelayError> {
        let prompt = truncate_prompt(prompt, self.prompt_max_chars);
        let text = self.generator.generate(&prompt).await?;
        info!(
            prompt_chars = prompt.chars().count(),
            reply_chars = text.chars().count(),
            "Relayed prompt"
        );
        Ok(text)
    }

    /// Asks the vision model for the tasks visible in `image`.
    pub async fn parse_image(
        &self,
        mime_type: &str,
        image: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>, RelayError> {
        let reply = self
            .generator
            .generate_with_image(IMAGE_PROMPT, mime_type, image)
            .await?;
        let tasks = parse_tasks_reply(&reply, now);
        info!(
            image_bytes = image.len(),
            task_count = tasks.len(),
            "Parsed tasks from image"
        );
        Ok(tasks)
    }
}
