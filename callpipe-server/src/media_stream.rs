use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use callpipe_agents::{run_agents, LanguageModel};
use callpipe_audio::{transcribe_batch, AudioBatcher, SegmentDraft, SpeechToText};
use callpipe_db::DatabaseManager;

use crate::server::{AppState, SessionSettings};

// ---- inbound wire protocol ----

/// One message on the media stream connection. Field names follow the
/// telephony provider's JSON exactly.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Start { stream_sid: String, start: StartMeta },
    #[serde(rename_all = "camelCase")]
    Media { stream_sid: String, media: MediaFrame },
    #[serde(rename_all = "camelCase")]
    Stop { stream_sid: String, stop: StopMeta },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaFrame {
    #[serde(default)]
    pub track: Option<String>,
    /// base64-encoded audio
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMeta {
    #[serde(default)]
    pub call_sid: Option<String>,
}

// ---- per-call session ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Started,
    Active,
    Stopped,
}

/// State the event path shares with spawned transcription tasks and the
/// recurring analysis task.
struct Shared {
    meeting_id: Option<i64>,
    transcript: Vec<String>,
}

/// The state machine for one live call's media stream.
///
/// Owned exclusively by the connection handler; never shared across
/// sessions. Events arrive in order, one at a time. Slow work (batch
/// transcription, analysis) runs on spawned tasks so the stream itself is
/// never blocked.
pub struct StreamSession {
    db: Arc<DatabaseManager>,
    stt: Arc<dyn SpeechToText>,
    llm: Arc<dyn LanguageModel>,
    settings: SessionSettings,
    shared: Arc<Mutex<Shared>>,
    batcher: AudioBatcher,
    call_sid: String,
    stream_sid: String,
    phase: Phase,
    cancel: CancellationToken,
    pending: Vec<JoinHandle<()>>,
}

impl StreamSession {
    pub fn new(
        db: Arc<DatabaseManager>,
        stt: Arc<dyn SpeechToText>,
        llm: Arc<dyn LanguageModel>,
        settings: SessionSettings,
    ) -> Self {
        let batcher = AudioBatcher::new(settings.batch_chunks);
        StreamSession {
            db,
            stt,
            llm,
            settings,
            shared: Arc::new(Mutex::new(Shared {
                meeting_id: None,
                transcript: Vec::new(),
            })),
            batcher,
            call_sid: String::new(),
            stream_sid: String::new(),
            phase: Phase::Created,
            cancel: CancellationToken::new(),
            pending: Vec::new(),
        }
    }

    pub async fn handle_event(&mut self, event: StreamEvent) {
        if self.phase == Phase::Stopped {
            debug!("ignoring event after stop for call {}", self.call_sid);
            return;
        }

        match event {
            StreamEvent::Connected { .. } => {
                info!("media stream protocol connected");
            }
            StreamEvent::Start { stream_sid, start } => self.on_start(stream_sid, start).await,
            StreamEvent::Media { media, .. } => self.on_media(media).await,
            StreamEvent::Stop { .. } => self.on_stop().await,
        }
    }

    async fn on_start(&mut self, stream_sid: String, start: StartMeta) {
        self.call_sid = start.call_sid;
        self.stream_sid = stream_sid;
        info!(
            "media stream started for call {} (stream {})",
            self.call_sid, self.stream_sid
        );

        let title = format!("Call {}", short_sid(&self.call_sid));
        match self.db.create_meeting(&title, &self.call_sid).await {
            Ok(meeting_id) => {
                info!("meeting {} created for call {}", meeting_id, self.call_sid);
                self.shared.lock().await.meeting_id = Some(meeting_id);
            }
            Err(e) => {
                // Degraded mode: audio keeps flowing so the call is not
                // dropped, but nothing gets persisted for it.
                error!("failed to create meeting for call {}: {}", self.call_sid, e);
            }
        }

        self.spawn_analysis_task();
        self.phase = Phase::Started;
    }

    /// Recurring analysis over the accumulated transcript while the call is
    /// live. Cancellation is observed between ticks only, so a run already
    /// in flight finishes naturally.
    fn spawn_analysis_task(&mut self) {
        let shared = self.shared.clone();
        let db = self.db.clone();
        let llm = self.llm.clone();
        let cancel = self.cancel.clone();
        let period = self.settings.analysis_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // tokio intervals fire immediately; skip the zeroth tick to get
            // fixed-delay behavior.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let (meeting_id, transcript) = {
                            let shared = shared.lock().await;
                            (shared.meeting_id, shared.transcript.join(" "))
                        };
                        if let Some(meeting_id) = meeting_id {
                            if !transcript.trim().is_empty() {
                                run_agents(llm.as_ref(), &db, meeting_id, &transcript).await;
                            }
                        }
                    }
                }
            }
        });
    }

    async fn on_media(&mut self, media: MediaFrame) {
        self.phase = Phase::Active;

        let bytes = match STANDARD.decode(media.payload.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("dropping media frame with invalid payload: {}", e);
                return;
            }
        };

        if let Some(wav) = self.batcher.ingest(bytes) {
            let stt = self.stt.clone();
            let db = self.db.clone();
            let shared = self.shared.clone();
            let track = media.track;
            // Transcription overlaps with later events; transcript appends
            // land in completion order.
            self.pending.push(tokio::spawn(async move {
                if let Some(segment) = transcribe_batch(stt.as_ref(), wav, track.as_deref()).await
                {
                    append_and_persist(&db, &shared, segment).await;
                }
            }));
        }
    }

    async fn on_stop(&mut self) {
        info!("media stream stopped for call {}", self.call_sid);

        // Let in-flight batches land before the final analysis pass.
        for task in self.pending.drain(..) {
            if let Err(e) = task.await {
                error!("transcription task failed: {}", e);
            }
        }

        // Capture the partial trailing batch.
        if let Some(wav) = self.batcher.flush() {
            if let Some(segment) = transcribe_batch(self.stt.as_ref(), wav, None).await {
                append_and_persist(&self.db, &self.shared, segment).await;
            }
        }

        let (meeting_id, transcript) = {
            let shared = self.shared.lock().await;
            (shared.meeting_id, shared.transcript.join(" "))
        };

        match meeting_id {
            Some(meeting_id) if !transcript.trim().is_empty() => {
                run_agents(self.llm.as_ref(), &self.db, meeting_id, &transcript).await;
            }
            _ => warn!(
                "skipping final analysis for call {}: no meeting or empty transcript",
                self.call_sid
            ),
        }

        if let Some(meeting_id) = meeting_id {
            if let Err(e) = self.db.complete_meeting(meeting_id).await {
                error!("failed to mark meeting {} completed: {}", meeting_id, e);
            }
        }

        self.cancel.cancel();
        self.phase = Phase::Stopped;
    }

    /// Cancels the recurring analysis task. Must run before the session is
    /// dropped; harmless after a normal stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn append_and_persist(db: &DatabaseManager, shared: &Mutex<Shared>, segment: SegmentDraft) {
    let meeting_id = {
        let mut shared = shared.lock().await;
        match shared.meeting_id {
            Some(meeting_id) => {
                shared.transcript.push(segment.content.clone());
                Some(meeting_id)
            }
            None => None,
        }
    };

    if let Some(meeting_id) = meeting_id {
        if let Err(e) = db
            .insert_transcript_segment(
                meeting_id,
                Some(&segment.speaker),
                &segment.content,
                segment.start_time,
                segment.end_time,
                segment.confidence,
            )
            .await
        {
            error!("failed to persist transcript segment: {}", e);
        }
    }
}

fn short_sid(call_sid: &str) -> &str {
    let start = call_sid
        .char_indices()
        .rev()
        .nth(5)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &call_sid[start..]
}

/// Drives one WebSocket connection through the session state machine.
pub(crate) async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    info!("media stream connected");

    let mut session = StreamSession::new(
        state.db.clone(),
        state.stt.clone(),
        state.llm.clone(),
        state.settings.clone(),
    );

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("media stream socket error: {}", e);
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<StreamEvent>(&text) {
                Ok(event) => session.handle_event(event).await,
                // A single bad frame must not terminate the session.
                Err(e) => warn!("ignoring malformed stream event: {}", e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.shutdown();
    info!("media stream disconnected");
}
