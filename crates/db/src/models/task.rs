use chrono::{DateTime, Duration, FixedOffset, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use ts_rs::TS;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

/// Three-step scale shared by value, complexity and priority.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    TS,
    EnumString,
    Display,
    Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Level {
    High,
    #[default]
    Medium,
    Low,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::High, Level::Medium, Level::Low];

    /// Axis position on the value/complexity matrix: low=1, medium=2, high=3.
    pub fn score(self) -> u8 {
        match self {
            Level::Low => 1,
            Level::Medium => 2,
            Level::High => 3,
        }
    }

    /// Sort key where the most urgent level comes first.
    pub fn urgency_rank(self) -> u8 {
        match self {
            Level::High => 0,
            Level::Medium => 1,
            Level::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskValidationError {
    #[error("Task name cannot be empty")]
    EmptyTitle,
    #[error("Deadline cannot be in the past")]
    DeadlineInPast,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub value: Level,
    #[serde(default)]
    pub complexity: Level,
    #[serde(default)]
    pub priority: Level,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Flips completion; `completed_at` follows the new state.
    pub fn toggle_complete(&mut self, now: DateTime<Utc>) {
        self.set_completed(!self.completed, now);
    }

    pub fn set_completed(&mut self, completed: bool, now: DateTime<Utc>) {
        if completed == self.completed {
            return;
        }
        self.completed = completed;
        self.completed_at = completed.then_some(now);
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.deadline <= now
    }
}

/// `task_<unix millis>_<9 base36 chars>`. Uniqueness is probabilistic only.
pub fn generate_task_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("task_{}_{}", now.timestamp_millis(), suffix)
}

/// Priority from value, complexity and time left: <=24h or any high input gives high,
/// <=72h or any medium input gives medium, otherwise low.
pub fn derive_priority(
    value: Level,
    complexity: Level,
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Level {
    let remaining = deadline - now;
    if remaining <= Duration::hours(24) || value == Level::High || complexity == Level::High {
        Level::High
    } else if remaining <= Duration::hours(72)
        || value == Level::Medium
        || complexity == Level::Medium
    {
        Level::Medium
    } else {
        Level::Low
    }
}

/// A deadline is accepted when its calendar day in `offset` is today or later.
fn check_deadline(
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<(), TaskValidationError> {
    let deadline_day = deadline.with_timezone(&offset).date_naive();
    let today = now.with_timezone(&offset).date_naive();
    if deadline_day < today {
        return Err(TaskValidationError::DeadlineInPast);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTask {
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub value: Option<Level>,
    pub complexity: Option<Level>,
    /// When omitted the priority is derived from value, complexity and deadline.
    pub priority: Option<Level>,
    pub note: Option<String>,
}

impl CreateTask {
    /// Rejects a blank title and a deadline whose calendar day (in `offset`) is before today.
    pub fn validate(
        &self,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<(), TaskValidationError> {
        if self.title.trim().is_empty() {
            return Err(TaskValidationError::EmptyTitle);
        }
        check_deadline(self.deadline, now, offset)
    }

    pub fn into_task(self, now: DateTime<Utc>) -> Task {
        let value = self.value.unwrap_or_default();
        let complexity = self.complexity.unwrap_or_default();
        let priority = self
            .priority
            .unwrap_or_else(|| derive_priority(value, complexity, self.deadline, now));
        Task {
            id: generate_task_id(now),
            title: self.title.trim().to_string(),
            deadline: self.deadline,
            value,
            complexity,
            priority,
            note: self.note.map(|n| n.trim().to_string()).unwrap_or_default(),
            completed: false,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub value: Option<Level>,
    pub complexity: Option<Level>,
    pub priority: Option<Level>,
    pub note: Option<String>,
    pub completed: Option<bool>,
}

impl UpdateTask {
    /// Validates the whole edit first, so a rejected edit leaves `task` untouched.
    pub fn apply_to(
        &self,
        task: &mut Task,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<(), TaskValidationError> {
        let title = self.title.as_deref().map(str::trim);
        if title.is_some_and(str::is_empty) {
            return Err(TaskValidationError::EmptyTitle);
        }
        if let Some(deadline) = self.deadline {
            check_deadline(deadline, now, offset)?;
        }

        if let Some(title) = title {
            task.title = title.to_string();
        }
        if let Some(deadline) = self.deadline {
            task.deadline = deadline;
        }
        if let Some(value) = self.value {
            task.value = value;
        }
        if let Some(complexity) = self.complexity {
            task.complexity = complexity;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(note) = &self.note {
            task.note = note.trim().to_string();
        }
        if let Some(completed) = self.completed {
            task.set_completed(completed, now);
        }
        Ok(())
    }
}
