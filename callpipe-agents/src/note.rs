use async_trait::async_trait;
use callpipe_db::{DatabaseManager, NoteSectionKind};
use serde::Deserialize;

use crate::agent::Artifact;

const INSTRUCTION: &str = r#"You are a meeting note-taking assistant.
Given the transcript of a meeting, produce structured notes in JSON format.
Return a JSON array of objects, each with:
  - "section": one of "summary", "key_points", "decisions"
  - "content": the text for that section

Rules:
- The summary should be 2-4 sentences.
- key_points should be a bulleted list (use "- " prefixes).
- decisions should list any explicit decisions or agreements.
- If there are no decisions yet, omit that section.
- Only return the JSON array, nothing else."#;

/// Meeting notes broken into sections: summary, key points, decisions.
#[derive(Debug, Clone, Deserialize)]
pub struct NoteSection {
    pub section: NoteSectionKind,
    pub content: String,
}

#[async_trait]
impl Artifact for NoteSection {
    const AGENT: &'static str = "note_agent";
    const INSTRUCTION: &'static str = INSTRUCTION;
    const WRAPPER_KEYS: &'static [&'static str] =
        &["notes", "sections", "note_sections", "meeting_notes"];

    async fn delete_existing(db: &DatabaseManager, meeting_id: i64) -> Result<u64, sqlx::Error> {
        db.delete_notes_for_meeting(meeting_id).await
    }

    async fn insert(
        db: &DatabaseManager,
        meeting_id: i64,
        row: &Self,
    ) -> Result<i64, sqlx::Error> {
        db.insert_note(meeting_id, row.section, &row.content).await
    }
}
