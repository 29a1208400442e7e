use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "callpipe")]
#[command(author, version, about = "live call transcription and meeting copilot server", long_about = None)]
pub struct Cli {
    #[arg(
        short,
        long,
        default_value_t = 3001,
        env = "CALLPIPE_PORT",
        help = "Port for the media stream server"
    )]
    pub port: u16,

    #[arg(long, env = "CALLPIPE_DATA_DIR", help = "Data directory (default: ~/.callpipe)")]
    pub data_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "ELEVENLABS_API_KEY",
        hide_env_values = true,
        help = "Speech-to-text API key"
    )]
    pub stt_api_key: Option<String>,

    #[arg(
        long,
        default_value = callpipe_audio::transcription::DEFAULT_STT_MODEL,
        help = "Speech-to-text model id"
    )]
    pub stt_model: String,

    #[arg(
        long,
        env = "OPENAI_API_KEY",
        hide_env_values = true,
        help = "Language model API key"
    )]
    pub llm_api_key: Option<String>,

    #[arg(
        long,
        default_value = callpipe_agents::DEFAULT_LLM_MODEL,
        help = "Language model used by the analysis agents"
    )]
    pub llm_model: String,

    #[arg(
        long,
        default_value_t = callpipe_audio::DEFAULT_BATCH_CHUNKS,
        help = "Media chunks to accumulate per transcription batch"
    )]
    pub batch_chunks: usize,

    #[arg(
        long,
        default_value_t = 30,
        help = "Seconds between analysis passes over a live transcript"
    )]
    pub analysis_interval: u64,

    #[arg(short, long, help = "Enable debug logging")]
    pub debug: bool,
}
