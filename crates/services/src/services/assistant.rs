//! Deadline-management assistant: wraps the user's question with their task list.

use std::sync::Arc;

use db::models::task::Task;
use thiserror::Error;
use tracing::info;

use super::gemini_api::{GeminiApiError, TextGenerator};

const CONTEXT_HEADER: &str = "Dưới đây là danh sách task hiện tại của bạn:";
const CLOSING_INSTRUCTION: &str = "Hãy đưa ra gợi ý quản lý deadline hiệu quả.";

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Prompt cannot be empty")]
    EmptyPrompt,
    #[error("Invalid response format from AI service")]
    InvalidResponse,
    #[error(transparent)]
    Upstream(#[from] GeminiApiError),
}

/// One line per task: `- title | deadline: ... | priority: ... | completed: ...`.
pub fn task_context(tasks: &[Task]) -> String {
    tasks
        .iter()
        .map(|task| {
            format!(
                "- {} | deadline: {} | priority: {} | completed: {}",
                task.title,
                task.deadline.to_rfc3339(),
                task.priority,
                task.completed
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_assistant_prompt(prompt: &str, tasks: &[Task]) -> String {
    format!(
        "{}\n\n{}\n\n{}\n\n{}",
        prompt.trim(),
        CONTEXT_HEADER,
        task_context(tasks),
        CLOSING_INSTRUCTION
    )
}

#[derive(Clone)]
pub struct AssistantService {
    generator: Arc<dyn TextGenerator>,
}

impl AssistantService {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn ask(&self, prompt: &str, tasks: &[Task]) -> Result<String, AssistantError> {
        if prompt.trim().is_empty() {
            return Err(AssistantError::EmptyPrompt);
        }

        let full_prompt = build_assistant_prompt(prompt, tasks);
        let text = match self.generator.generate(&full_prompt).await {
            Ok(text) => text,
            Err(GeminiApiError::EmptyResponse) => return Err(AssistantError::InvalidResponse),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Err(AssistantError::InvalidResponse);
        }

        info!(
            task_count = tasks.len(),
            reply_chars = text.chars().count(),
            "Assistant answered"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use db::models::task::Level;

    use super::*;

    struct FixedReply(&'static str);

    #[async_trait]
    impl TextGenerator for FixedReply {
        async fn generate(&self, prompt: &str) -> Result<String, GeminiApiError> {
            assert!(prompt.contains(CLOSING_INSTRUCTION));
            Ok(self.0.to_string())
        }

        async fn generate_with_image(
            &self,
            _prompt: &str,
            _mime_type: &str,
            _image: &[u8],
        ) -> Result<String, GeminiApiError> {
            unreachable!("assistant never sends images")
        }
    }

    fn task(title: &str, completed: bool) -> Task {
        Task {
            id: format!("task_1_{title}"),
            title: title.to_string(),
            deadline: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
            value: Level::Medium,
            complexity: Level::Medium,
            priority: Level::High,
            note: String::new(),
            completed,
            completed_at: None,
        }
    }

    #[test]
    fn context_lists_every_task() {
        let context = task_context(&[task("Report", false), task("Gym", true)]);
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(
            lines,
            [
                "- Report | deadline: 2025-06-01T09:00:00+00:00 | priority: high | completed: false",
                "- Gym | deadline: 2025-06-01T09:00:00+00:00 | priority: high | completed: true",
            ]
        );
    }

    #[test]
    fn prompt_starts_with_question() {
        let prompt = build_assistant_prompt("  What first? ", &[task("Report", false)]);
        assert!(prompt.starts_with("What first?\n\n"));
        assert!(prompt.contains(CONTEXT_HEADER));
        assert!(prompt.ends_with(CLOSING_INSTRUCTION));
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let service = AssistantService::new(Arc::new(FixedReply("unused")));
        let err = service.ask("   ", &[]).await.unwrap_err();
        assert!(matches!(err, AssistantError::EmptyPrompt));
    }

    #[tokio::test]
    async fn blank_reply_is_invalid() {
        let service = AssistantService::new(Arc::new(FixedReply("  ")));
        let err = service.ask("help", &[]).await.unwrap_err();
        assert!(matches!(err, AssistantError::InvalidResponse));
    }

    #[tokio::test]
    async fn reply_is_returned() {
        let service = AssistantService::new(Arc::new(FixedReply("Start with the report.")));
        let text = service.ask("help", &[task("Report", false)]).await.unwrap();
        assert_eq!(text, "Start with the report.");
    }
}
