use async_trait::async_trait;
use callpipe_db::{DatabaseManager, Priority};
use serde::Deserialize;

use crate::agent::Artifact;

const INSTRUCTION: &str = r#"You are a task extraction assistant.
Given a meeting transcript, identify actionable tasks that were discussed or assigned.

Return a JSON array of task objects with these fields:
  - "title": short description of the task
  - "description": fuller context (1-2 sentences)
  - "assigned_to": name of the person responsible (or null if unclear)
  - "priority": "low", "medium", or "high"
  - "due_date": ISO date string if mentioned, or null
  - "source_text": the exact quote from the transcript that led to this task

Rules:
- Only include concrete, actionable tasks, not vague suggestions.
- If no tasks are found, return an empty array [].
- Only return the JSON array, nothing else."#;

/// An action item extracted from the transcript.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub source_text: Option<String>,
}

#[async_trait]
impl Artifact for ExtractedTask {
    const AGENT: &'static str = "task_agent";
    const INSTRUCTION: &'static str = INSTRUCTION;
    const WRAPPER_KEYS: &'static [&'static str] = &["tasks"];

    async fn delete_existing(db: &DatabaseManager, meeting_id: i64) -> Result<u64, sqlx::Error> {
        db.delete_tasks_for_meeting(meeting_id).await
    }

    async fn insert(
        db: &DatabaseManager,
        meeting_id: i64,
        row: &Self,
    ) -> Result<i64, sqlx::Error> {
        db.insert_task(
            meeting_id,
            &row.title,
            row.description.as_deref(),
            row.assigned_to.as_deref(),
            row.priority,
            row.due_date.as_deref(),
            row.source_text.as_deref(),
        )
        .await
    }
}
