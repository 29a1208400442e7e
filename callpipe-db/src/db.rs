use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::time::Duration;
use tracing::debug;

use crate::{
    Meeting, MeetingGap, MeetingNote, MeetingStatus, MeetingTask, NoteSectionKind, Priority,
    TaskStatus, TranscriptSegment,
};

// DatabaseManager struct to encapsulate database operations
pub struct DatabaseManager {
    pub pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        debug!("initializing database at {}", database_path);

        let connect_options: SqliteConnectOptions = database_path
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30))
            .pragma("journal_mode", "WAL")
            .pragma("synchronous", "NORMAL");

        // An in-memory sqlite database exists per connection, so the pool must
        // keep exactly one long-lived connection for every caller to see the
        // same schema.
        let pool_options = if database_path.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(30))
        };

        let pool = pool_options.connect_with(connect_options).await?;

        sqlx::migrate!("./src/migrations").run(&pool).await?;

        Ok(DatabaseManager { pool })
    }

    // ---- meetings ----

    pub async fn create_meeting(&self, title: &str, call_sid: &str) -> Result<i64, sqlx::Error> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO meetings (title, call_sid, status, start_time, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(title)
        .bind(call_sid)
        .bind(MeetingStatus::InProgress)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_meeting(&self, meeting_id: i64) -> Result<Option<Meeting>, sqlx::Error> {
        sqlx::query_as::<_, Meeting>(
            "SELECT id, title, call_sid, status, start_time, end_time, created_at FROM meetings WHERE id = ?1",
        )
        .bind(meeting_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Marks the meeting completed and stamps its end time.
    pub async fn complete_meeting(&self, meeting_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE meetings SET status = ?1, end_time = ?2 WHERE id = ?3")
            .bind(MeetingStatus::Completed)
            .bind(Utc::now())
            .bind(meeting_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- transcript segments (append-only) ----

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_transcript_segment(
        &self,
        meeting_id: i64,
        speaker: Option<&str>,
        content: &str,
        start_time: Option<f64>,
        end_time: Option<f64>,
        confidence: Option<f64>,
    ) -> Result<i64, sqlx::Error> {
        let id = sqlx::query(
            "INSERT INTO transcript_segments (meeting_id, speaker, content, start_time, end_time, confidence, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(meeting_id)
        .bind(speaker)
        .bind(content)
        .bind(start_time)
        .bind(end_time)
        .bind(confidence)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_transcript_segments(
        &self,
        meeting_id: i64,
    ) -> Result<Vec<TranscriptSegment>, sqlx::Error> {
        sqlx::query_as::<_, TranscriptSegment>(
            "SELECT id, meeting_id, speaker, content, start_time, end_time, confidence, created_at FROM transcript_segments WHERE meeting_id = ?1 ORDER BY id",
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await
    }

    // ---- notes (replaceable set) ----

    pub async fn delete_notes_for_meeting(&self, meeting_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM notes WHERE meeting_id = ?1")
            .bind(meeting_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_note(
        &self,
        meeting_id: i64,
        section: NoteSectionKind,
        content: &str,
    ) -> Result<i64, sqlx::Error> {
        let id = sqlx::query(
            "INSERT INTO notes (meeting_id, section, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(meeting_id)
        .bind(section)
        .bind(content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_notes_for_meeting(
        &self,
        meeting_id: i64,
    ) -> Result<Vec<MeetingNote>, sqlx::Error> {
        sqlx::query_as::<_, MeetingNote>(
            "SELECT id, meeting_id, section, content, created_at FROM notes WHERE meeting_id = ?1 ORDER BY id",
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await
    }

    // ---- tasks (replaceable set) ----

    pub async fn delete_tasks_for_meeting(&self, meeting_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE meeting_id = ?1")
            .bind(meeting_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_task(
        &self,
        meeting_id: i64,
        title: &str,
        description: Option<&str>,
        assigned_to: Option<&str>,
        priority: Priority,
        due_date: Option<&str>,
        source_text: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let id = sqlx::query(
            "INSERT INTO tasks (meeting_id, title, description, assigned_to, priority, due_date, status, source_text, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(meeting_id)
        .bind(title)
        .bind(description)
        .bind(assigned_to)
        .bind(priority)
        .bind(due_date)
        .bind(TaskStatus::Pending)
        .bind(source_text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_tasks_for_meeting(
        &self,
        meeting_id: i64,
    ) -> Result<Vec<MeetingTask>, sqlx::Error> {
        sqlx::query_as::<_, MeetingTask>(
            "SELECT id, meeting_id, title, description, assigned_to, priority, due_date, status, source_text, created_at FROM tasks WHERE meeting_id = ?1 ORDER BY id",
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await
    }

    // ---- gaps (replaceable set) ----

    pub async fn delete_gaps_for_meeting(&self, meeting_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM gaps WHERE meeting_id = ?1")
            .bind(meeting_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_gap(
        &self,
        meeting_id: i64,
        topic: &str,
        description: Option<&str>,
        suggested_questions: &[String],
        priority: Priority,
    ) -> Result<i64, sqlx::Error> {
        let questions_json =
            serde_json::to_string(suggested_questions).unwrap_or_else(|_| "[]".to_string());
        let id = sqlx::query(
            "INSERT INTO gaps (meeting_id, topic, description, suggested_questions, priority, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(meeting_id)
        .bind(topic)
        .bind(description)
        .bind(questions_json)
        .bind(priority)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_gaps_for_meeting(
        &self,
        meeting_id: i64,
    ) -> Result<Vec<MeetingGap>, sqlx::Error> {
        sqlx::query_as::<_, MeetingGap>(
            "SELECT id, meeting_id, topic, description, suggested_questions, priority, created_at FROM gaps WHERE meeting_id = ?1 ORDER BY id",
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await
    }
}
