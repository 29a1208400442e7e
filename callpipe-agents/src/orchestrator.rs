use callpipe_db::DatabaseManager;
use tracing::{error, info};

use crate::{
    agent::run_agent, gap::IdentifiedGap, llm::LanguageModel, note::NoteSection,
    task::ExtractedTask,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AgentOutcome {
    /// The run was skipped before any model call was made.
    #[default]
    Skipped,
    Completed {
        rows: usize,
    },
    Failed,
}

/// Per-agent outcome of one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorReport {
    pub note: AgentOutcome,
    pub task: AgentOutcome,
    pub gap: AgentOutcome,
}

/// Run all three agents concurrently against the same transcript snapshot.
///
/// Waits for every agent to settle and never propagates an individual
/// failure — each outcome is logged and reported. Safe to invoke repeatedly:
/// every agent replaces its artifact rows rather than appending.
pub async fn run_agents(
    llm: &dyn LanguageModel,
    db: &DatabaseManager,
    meeting_id: i64,
    transcript: &str,
) -> OrchestratorReport {
    if transcript.trim().is_empty() {
        return OrchestratorReport::default();
    }

    info!(
        "running agents for meeting {} ({} chars)",
        meeting_id,
        transcript.len()
    );

    let (note, task, gap) = tokio::join!(
        run_agent::<NoteSection>(llm, db, meeting_id, transcript),
        run_agent::<ExtractedTask>(llm, db, meeting_id, transcript),
        run_agent::<IdentifiedGap>(llm, db, meeting_id, transcript),
    );

    OrchestratorReport {
        note: settle("note_agent", note),
        task: settle("task_agent", task),
        gap: settle("gap_agent", gap),
    }
}

fn settle(agent: &str, result: anyhow::Result<usize>) -> AgentOutcome {
    match result {
        Ok(rows) => {
            info!("[{}] completed successfully", agent);
            AgentOutcome::Completed { rows }
        }
        Err(e) => {
            error!("[{}] failed: {:#}", agent, e);
            AgentOutcome::Failed
        }
    }
}
