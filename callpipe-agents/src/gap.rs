use async_trait::async_trait;
use callpipe_db::{DatabaseManager, Priority};
use serde::Deserialize;

use crate::agent::Artifact;

const INSTRUCTION: &str = r#"You are a meeting analysis assistant that finds gaps.
Given a meeting transcript, identify topics that were:
  - Raised but not resolved
  - Mentioned briefly without enough detail
  - Promised for follow-up but no clear next step
  - Questions that were asked but not answered

Return a JSON array of gap objects with:
  - "topic": short name for the gap
  - "description": 1-2 sentence explanation of the gap
  - "suggested_questions": array of 1-3 questions to address in the next meeting
  - "priority": "low", "medium", or "high"

Rules:
- Focus on substantive gaps, not minor details.
- If no meaningful gaps are found, return an empty array [].
- Only return the JSON array, nothing else."#;

/// An unresolved topic worth a follow-up.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentifiedGap {
    pub topic: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub suggested_questions: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[async_trait]
impl Artifact for IdentifiedGap {
    const AGENT: &'static str = "gap_agent";
    const INSTRUCTION: &'static str = INSTRUCTION;
    const WRAPPER_KEYS: &'static [&'static str] = &["gaps"];

    async fn delete_existing(db: &DatabaseManager, meeting_id: i64) -> Result<u64, sqlx::Error> {
        db.delete_gaps_for_meeting(meeting_id).await
    }

    async fn insert(
        db: &DatabaseManager,
        meeting_id: i64,
        row: &Self,
    ) -> Result<i64, sqlx::Error> {
        db.insert_gap(
            meeting_id,
            &row.topic,
            row.description.as_deref(),
            &row.suggested_questions,
            row.priority,
        )
        .await
    }
}
