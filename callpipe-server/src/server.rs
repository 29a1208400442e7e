use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{Json as JsonResponse, Response},
    routing::get,
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use callpipe_agents::LanguageModel;
use callpipe_audio::SpeechToText;
use callpipe_db::DatabaseManager;

use crate::media_stream;

/// Per-session knobs, shared by every connection.
#[derive(Clone)]
pub struct SessionSettings {
    pub batch_chunks: usize,
    pub analysis_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            batch_chunks: callpipe_audio::DEFAULT_BATCH_CHUNKS,
            analysis_interval: Duration::from_secs(30),
        }
    }
}

pub struct AppState {
    pub db: Arc<DatabaseManager>,
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub settings: SessionSettings,
}

pub struct Server {
    state: Arc<AppState>,
    addr: SocketAddr,
}

impl Server {
    pub fn new(state: Arc<AppState>, addr: SocketAddr) -> Self {
        Server { state, addr }
    }

    pub async fn start(self) -> Result<(), std::io::Error> {
        let app = Router::new()
            .route("/health", get(health))
            .route("/media-stream", get(media_stream_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        info!("starting server on {}", self.addr);

        axum::serve(TcpListener::bind(self.addr).await?, app.into_make_service()).await
    }
}

async fn health() -> JsonResponse<serde_json::Value> {
    JsonResponse(json!({"status": "ok"}))
}

async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| media_stream::handle_socket(socket, state))
}
