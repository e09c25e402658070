//! Orderings, filters and statistics over a user's task list.
//!
//! Everything here is pure: callers pass `now` and the UTC offset used for
//! calendar-day bucketing.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use db::models::task::{Level, Task};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Conjunctive filter; unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct TaskFilter {
    pub complexity: Option<Level>,
    pub priority: Option<Level>,
    #[serde(default)]
    pub due_today: bool,
    pub search: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task, now: DateTime<Utc>, offset: FixedOffset) -> bool {
        if self.complexity.is_some_and(|c| c != task.complexity) {
            return false;
        }
        if self.priority.is_some_and(|p| p != task.priority) {
            return false;
        }
        if self.due_today && local_date(task.deadline, offset) != local_date(now, offset) {
            return false;
        }
        match self.search_term() {
            Some(term) => task.title.to_lowercase().contains(&term),
            None => true,
        }
    }

    fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    pub fn apply(&self, tasks: &[Task], now: DateTime<Utc>, offset: FixedOffset) -> Vec<Task> {
        tasks
            .iter()
            .filter(|t| self.matches(t, now, offset))
            .cloned()
            .collect()
    }
}

fn local_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// Incomplete first, then earliest deadline. Stable.
pub fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        a.completed
            .cmp(&b.completed)
            .then_with(|| a.deadline.cmp(&b.deadline))
    });
}

/// Incomplete first, then high priority first, then earliest deadline.
pub fn do_now_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        a.completed
            .cmp(&b.completed)
            .then_with(|| a.priority.urgency_rank().cmp(&b.priority.urgency_rank()))
            .then_with(|| a.deadline.cmp(&b.deadline))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct TaskStats {
    pub total: usize,
    pub incomplete: usize,
    pub completed: usize,
    pub overdue: usize,
}

pub fn task_stats(tasks: &[Task], now: DateTime<Utc>) -> TaskStats {
    let completed = tasks.iter().filter(|t| t.completed).count();
    TaskStats {
        total: tasks.len(),
        incomplete: tasks.len() - completed,
        completed,
        overdue: tasks.iter().filter(|t| t.is_overdue(now)).count(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct ExtendedTaskStats {
    #[serde(flatten)]
    #[ts(flatten)]
    pub basic: TaskStats,
    pub completion_percentage: u32,
    pub overdue_percentage: u32,
    /// Incomplete tasks due within the next seven days.
    pub upcoming_deadlines: usize,
}

fn percentage(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

pub fn extended_stats(tasks: &[Task], now: DateTime<Utc>) -> ExtendedTaskStats {
    let basic = task_stats(tasks, now);
    let horizon = now + Duration::days(7);
    let upcoming_deadlines = tasks
        .iter()
        .filter(|t| !t.completed && t.deadline > now && t.deadline <= horizon)
        .count();
    ExtendedTaskStats {
        basic,
        completion_percentage: percentage(basic.completed, basic.total),
        overdue_percentage: percentage(basic.overdue, basic.total),
        upcoming_deadlines,
    }
}

/// Tasks bucketed by the calendar day of their deadline.
pub fn calendar_groups(tasks: &[Task], offset: FixedOffset) -> BTreeMap<NaiveDate, Vec<Task>> {
    let mut groups: BTreeMap<NaiveDate, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        groups
            .entry(local_date(task.deadline, offset))
            .or_default()
            .push(task.clone());
    }
    groups
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct LevelCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl LevelCounts {
    fn bump(&mut self, level: Level) {
        match level {
            Level::High => self.high += 1,
            Level::Medium => self.medium += 1,
            Level::Low => self.low += 1,
        }
    }

    fn from_levels(levels: impl Iterator<Item = Level>) -> Self {
        let mut counts = Self::default();
        levels.for_each(|l| counts.bump(l));
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct CompletionPoint {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct HeatmapRow {
    pub complexity: Level,
    pub priorities: LevelCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum MatrixStatus {
    Todo,
    Done,
}

/// One dot of the value/complexity scatter matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct MatrixPoint {
    pub id: String,
    pub title: String,
    pub value: u8,
    pub complexity: u8,
    pub status: MatrixStatus,
    pub priority: Level,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct TimelineRange {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Analytics {
    pub stats: TaskStats,
    pub by_priority: LevelCounts,
    pub by_complexity: LevelCounts,
    pub completion_trend: Vec<CompletionPoint>,
    pub heatmap: Vec<HeatmapRow>,
    pub matrix: Vec<MatrixPoint>,
    pub timeline: Vec<TimelineRange>,
}

pub fn analytics(tasks: &[Task], now: DateTime<Utc>, offset: FixedOffset) -> Analytics {
    let mut trend: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for completed_at in tasks
        .iter()
        .filter(|t| t.completed)
        .filter_map(|t| t.completed_at)
    {
        *trend.entry(local_date(completed_at, offset)).or_default() += 1;
    }

    let heatmap = [Level::Low, Level::Medium, Level::High]
        .into_iter()
        .map(|complexity| HeatmapRow {
            complexity,
            priorities: LevelCounts::from_levels(
                tasks
                    .iter()
                    .filter(|t| t.complexity == complexity)
                    .map(|t| t.priority),
            ),
        })
        .collect();

    let matrix = tasks
        .iter()
        .map(|t| MatrixPoint {
            id: t.id.clone(),
            title: t.title.clone(),
            value: t.value.score(),
            complexity: t.complexity.score(),
            status: if t.completed {
                MatrixStatus::Done
            } else {
                MatrixStatus::Todo
            },
            priority: t.priority,
        })
        .collect();

    let timeline = tasks
        .iter()
        .map(|t| TimelineRange {
            id: t.id.clone(),
            title: t.title.clone(),
            start: now,
            end: t.deadline,
        })
        .collect();

    Analytics {
        stats: task_stats(tasks, now),
        by_priority: LevelCounts::from_levels(tasks.iter().map(|t| t.priority)),
        by_complexity: LevelCounts::from_levels(tasks.iter().map(|t| t.complexity)),
        completion_trend: trend
            .into_iter()
            .map(|(date, count)| CompletionPoint { date, count })
            .collect(),
        heatmap,
        matrix,
        timeline,
    }
}
