use async_trait::async_trait;
use callpipe_db::DatabaseManager;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::llm::LanguageModel;

/// One artifact kind the extraction pipeline can produce.
///
/// The run/parse/replace sequence is identical across kinds; a kind only
/// contributes its instruction, the wrapper keys the model is known to hide
/// its array under, and the row mapping into storage.
#[async_trait]
pub trait Artifact: DeserializeOwned + Send + Sync + Sized {
    /// Name used in logs.
    const AGENT: &'static str;
    /// Fixed task instruction sent as the system prompt.
    const INSTRUCTION: &'static str;
    /// Plausible wrapper keys, probed in order.
    const WRAPPER_KEYS: &'static [&'static str];

    async fn delete_existing(db: &DatabaseManager, meeting_id: i64) -> Result<u64, sqlx::Error>;

    async fn insert(db: &DatabaseManager, meeting_id: i64, row: &Self)
        -> Result<i64, sqlx::Error>;
}

/// Run one extraction agent over the full transcript and replace the stored
/// rows of its artifact kind.
///
/// Persistence and parse problems are logged and swallowed so that one
/// agent's trouble never blocks another's output; only a failed model call
/// surfaces as an error, for the orchestrator's per-agent report. An
/// unparseable response aborts *before* the delete — existing rows are never
/// dropped without a valid replacement.
pub async fn run_agent<A: Artifact>(
    llm: &dyn LanguageModel,
    db: &DatabaseManager,
    meeting_id: i64,
    transcript: &str,
) -> anyhow::Result<usize> {
    let user = format!("Transcript:\n\n{}", transcript);
    let raw = match llm.complete(A::INSTRUCTION, &user).await? {
        Some(content) => content,
        None => {
            warn!("[{}] no response content from language model", A::AGENT);
            return Ok(0);
        }
    };

    debug!("[{}] raw model response: {:.500}", A::AGENT, raw);

    let parsed: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            error!("[{}] failed to parse model response: {}", A::AGENT, e);
            return Ok(0);
        }
    };

    let items = extract_array(parsed, A::WRAPPER_KEYS);
    let mut rows: Vec<A> = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value(item) {
            Ok(row) => rows.push(row),
            Err(e) => warn!("[{}] skipping malformed row: {}", A::AGENT, e),
        }
    }

    info!("[{}] parsed {} rows", A::AGENT, rows.len());

    if let Err(e) = A::delete_existing(db, meeting_id).await {
        error!("[{}] delete error for meeting {}: {}", A::AGENT, meeting_id, e);
    }

    let mut inserted = 0;
    for row in &rows {
        match A::insert(db, meeting_id, row).await {
            Ok(_) => inserted += 1,
            Err(e) => error!("[{}] insert error for meeting {}: {}", A::AGENT, meeting_id, e),
        }
    }

    Ok(inserted)
}

/// The model may return the array bare, wrapped under one of the expected
/// keys, or wrapped under something novel; probe in that order and fall back
/// to the first array-valued field. Anything else counts as an empty result.
fn extract_array(parsed: Value, wrapper_keys: &[&str]) -> Vec<Value> {
    match parsed {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in wrapper_keys {
                if matches!(map.get(*key), Some(Value::Array(_))) {
                    if let Some(Value::Array(items)) = map.remove(*key) {
                        return items;
                    }
                }
            }
            for (_, value) in map {
                if let Value::Array(items) = value {
                    return items;
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}
