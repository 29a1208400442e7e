use std::{fs, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use callpipe_agents::OpenAiChat;
use callpipe_audio::ScribeClient;
use callpipe_db::DatabaseManager;
use callpipe_server::{cli::Cli, AppState, Server, SessionSettings};

fn get_base_dir(custom_path: &Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let default_path = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("failed to get home directory"))?
        .join(".callpipe");

    let base_dir = custom_path.clone().unwrap_or(default_path);
    fs::create_dir_all(&base_dir)?;
    Ok(base_dir)
}

fn setup_logging(base_dir: &PathBuf, cli: &Cli) -> anyhow::Result<WorkerGuard> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("callpipe")
        .filename_suffix("log")
        .max_log_files(5)
        .build(base_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("info".parse().unwrap())
        .add_directive("sqlx=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

    let env_filter = if cli.debug {
        env_filter.add_directive("callpipe=debug".parse().unwrap())
    } else {
        env_filter
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let base_dir = get_base_dir(&cli.data_dir)?;
    let _guard = setup_logging(&base_dir, &cli)?;

    if cli.stt_api_key.is_none() {
        warn!("no speech-to-text api key configured, transcription requests will fail");
    }
    if cli.llm_api_key.is_none() {
        warn!("no language model api key configured, analysis requests will fail");
    }

    let db_path = base_dir.join("callpipe.db");
    let db = Arc::new(DatabaseManager::new(&format!("sqlite:{}", db_path.display())).await?);

    let state = Arc::new(AppState {
        db,
        stt: Arc::new(ScribeClient::new(
            cli.stt_api_key.clone().unwrap_or_default(),
            cli.stt_model.clone(),
        )),
        llm: Arc::new(OpenAiChat::new(
            cli.llm_api_key.clone().unwrap_or_default(),
            cli.llm_model.clone(),
        )),
        settings: SessionSettings {
            batch_chunks: cli.batch_chunks,
            analysis_interval: Duration::from_secs(cli.analysis_interval),
        },
    });

    let server = Server::new(state, SocketAddr::from(([0, 0, 0, 0], cli.port)));

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }

    Ok(())
}
