mod agent;
mod gap;
mod llm;
mod note;
mod orchestrator;
mod task;

pub use agent::{run_agent, Artifact};
pub use gap::IdentifiedGap;
pub use llm::{LanguageModel, OpenAiChat, DEFAULT_LLM_API_URL, DEFAULT_LLM_MODEL};
pub use note::NoteSection;
pub use orchestrator::{run_agents, AgentOutcome, OrchestratorReport};
pub use task::ExtractedTask;
