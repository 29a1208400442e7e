use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MeetingStatus {
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

/// Priority scale shared by tasks and gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NoteSectionKind {
    Summary,
    KeyPoints,
    Decisions,
}

/// One persisted record per live call.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Meeting {
    pub id: i64,
    pub title: String,
    pub call_sid: Option<String>,
    pub status: MeetingStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Append-only transcription result; never mutated or deleted.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TranscriptSegment {
    pub id: i64,
    pub meeting_id: i64,
    pub speaker: Option<String>,
    pub content: String,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MeetingNote {
    pub id: i64,
    pub meeting_id: i64,
    pub section: NoteSectionKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MeetingTask {
    pub id: i64,
    pub meeting_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub priority: Priority,
    pub due_date: Option<String>,
    pub status: TaskStatus,
    pub source_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `suggested_questions` is stored as a JSON-encoded array of strings.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MeetingGap {
    pub id: i64,
    pub meeting_id: i64,
    pub topic: String,
    pub description: Option<String>,
    pub suggested_questions: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

impl MeetingGap {
    pub fn questions(&self) -> Vec<String> {
        serde_json::from_str(&self.suggested_questions).unwrap_or_default()
    }
}
