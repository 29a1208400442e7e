use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use callpipe_agents::LanguageModel;
use callpipe_audio::{SpeechToText, SttResponse};
use callpipe_db::{DatabaseManager, MeetingStatus};
use callpipe_server::{SessionSettings, StreamEvent, StreamSession};

/// Speech-to-text stub that records every payload it is asked to transcribe.
struct RecordingStt {
    payloads: Mutex<Vec<Vec<u8>>>,
    text: String,
    fail: bool,
}

impl RecordingStt {
    fn transcribing(text: &str) -> Arc<Self> {
        Arc::new(RecordingStt {
            payloads: Mutex::new(Vec::new()),
            text: text.to_string(),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(RecordingStt {
            payloads: Mutex::new(Vec::new()),
            text: String::new(),
            fail: true,
        })
    }

    fn call_count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechToText for RecordingStt {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<SttResponse> {
        self.payloads.lock().unwrap().push(wav);
        if self.fail {
            anyhow::bail!("502 bad gateway");
        }
        Ok(SttResponse {
            text: self.text.clone(),
            words: vec![],
        })
    }
}

/// Language model stub with a fixed response and a call counter.
struct CountingLlm {
    calls: AtomicUsize,
    response: String,
}

impl CountingLlm {
    fn new(response: &str) -> Arc<Self> {
        Arc::new(CountingLlm {
            calls: AtomicUsize::new(0),
            response: response.to_string(),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for CountingLlm {
    async fn complete(&self, _system: &str, _user: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.response.clone()))
    }
}

const AGENT_RESPONSE: &str = r#"{
    "notes": [{"section": "summary", "content": "a short call"}],
    "tasks": [{"title": "follow up"}],
    "gaps": [{"topic": "pricing", "suggested_questions": ["which tier?"], "priority": "medium"}]
}"#;

fn settings(batch_chunks: usize, analysis_interval: Duration) -> SessionSettings {
    SessionSettings {
        batch_chunks,
        analysis_interval,
    }
}

fn start_event(call_sid: &str) -> StreamEvent {
    let raw = format!(
        r#"{{"event": "start", "streamSid": "MZ0001", "start": {{"streamSid": "MZ0001", "callSid": "{}", "tracks": ["inbound"], "mediaFormat": {{"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}}}}}}"#,
        call_sid
    );
    serde_json::from_str(&raw).unwrap()
}

fn media_event(bytes: &[u8]) -> StreamEvent {
    let raw = format!(
        r#"{{"event": "media", "streamSid": "MZ0001", "media": {{"track": "inbound", "payload": "{}"}}}}"#,
        STANDARD.encode(bytes)
    );
    serde_json::from_str(&raw).unwrap()
}

fn stop_event(call_sid: &str) -> StreamEvent {
    let raw = format!(
        r#"{{"event": "stop", "streamSid": "MZ0001", "stop": {{"callSid": "{}"}}}}"#,
        call_sid
    );
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn end_to_end_call_lifecycle() {
    let db = Arc::new(DatabaseManager::new("sqlite::memory:").await.unwrap());
    let stt = RecordingStt::transcribing("hello world");
    let llm = CountingLlm::new(AGENT_RESPONSE);

    let mut session = StreamSession::new(
        db.clone(),
        stt.clone(),
        llm.clone(),
        settings(50, Duration::from_secs(300)),
    );

    session.handle_event(start_event("CA123")).await;

    let meeting = db.get_meeting(1).await.unwrap().unwrap();
    assert_eq!(meeting.status, MeetingStatus::InProgress);
    assert_eq!(meeting.call_sid.as_deref(), Some("CA123"));
    assert_eq!(meeting.title, "Call CA123");
    assert!(meeting.end_time.is_none());

    // Exactly at the batch threshold: one transcription request.
    for _ in 0..50 {
        session.handle_event(media_event(&[0x55u8; 160])).await;
    }

    session.handle_event(stop_event("CA123")).await;

    // One request, containing every buffered byte as one sample.
    let payloads = stt.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    let mut reader = hound::WavReader::new(Cursor::new(payloads[0].clone())).unwrap();
    assert_eq!(reader.spec().sample_rate, 8000);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.samples::<i16>().count(), 50 * 160);
    drop(payloads);

    let segments = db.get_transcript_segments(1).await.unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].content, "hello world");
    assert_eq!(segments[0].speaker.as_deref(), Some("Caller"));

    // Exactly one orchestrator pass (the final one), three agent calls.
    assert_eq!(llm.call_count(), 3);
    assert_eq!(db.get_notes_for_meeting(1).await.unwrap().len(), 1);
    assert_eq!(db.get_tasks_for_meeting(1).await.unwrap().len(), 1);
    assert_eq!(db.get_gaps_for_meeting(1).await.unwrap().len(), 1);

    let meeting = db.get_meeting(1).await.unwrap().unwrap();
    assert_eq!(meeting.status, MeetingStatus::Completed);
    assert!(meeting.end_time.is_some());
}

#[tokio::test]
async fn stop_without_media_completes_the_meeting_and_skips_analysis() {
    let db = Arc::new(DatabaseManager::new("sqlite::memory:").await.unwrap());
    let stt = RecordingStt::transcribing("unused");
    let llm = CountingLlm::new(AGENT_RESPONSE);

    let mut session = StreamSession::new(
        db.clone(),
        stt.clone(),
        llm.clone(),
        settings(50, Duration::from_secs(300)),
    );

    session.handle_event(start_event("CA555000")).await;
    session.handle_event(stop_event("CA555000")).await;

    // Empty buffer: no flush request, no analysis.
    assert_eq!(stt.call_count(), 0);
    assert_eq!(llm.call_count(), 0);

    let meeting = db.get_meeting(1).await.unwrap().unwrap();
    assert_eq!(meeting.status, MeetingStatus::Completed);
    assert!(meeting.end_time.is_some());
}

#[tokio::test]
async fn stop_flushes_a_partial_trailing_batch() {
    let db = Arc::new(DatabaseManager::new("sqlite::memory:").await.unwrap());
    let stt = RecordingStt::transcribing("trailing words");
    let llm = CountingLlm::new(AGENT_RESPONSE);

    let mut session = StreamSession::new(
        db.clone(),
        stt.clone(),
        llm.clone(),
        settings(50, Duration::from_secs(300)),
    );

    session.handle_event(start_event("CA9")).await;
    // Under the threshold: nothing sent until the stream stops.
    for _ in 0..7 {
        session.handle_event(media_event(&[0x55u8; 160])).await;
    }
    assert_eq!(stt.call_count(), 0);

    session.handle_event(stop_event("CA9")).await;

    assert_eq!(stt.call_count(), 1);
    let segments = db.get_transcript_segments(1).await.unwrap();
    assert_eq!(segments.len(), 1);
    // The flush has no track to attribute, so the static fallback applies.
    assert_eq!(segments[0].speaker.as_deref(), Some("Agent"));
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn failed_transcription_is_a_bounded_loss() {
    let db = Arc::new(DatabaseManager::new("sqlite::memory:").await.unwrap());
    let stt = RecordingStt::failing();
    let llm = CountingLlm::new(AGENT_RESPONSE);

    let mut session = StreamSession::new(
        db.clone(),
        stt.clone(),
        llm.clone(),
        settings(2, Duration::from_secs(300)),
    );

    session.handle_event(start_event("CA77")).await;
    session.handle_event(media_event(&[0x55u8; 160])).await;
    session.handle_event(media_event(&[0x55u8; 160])).await;
    session.handle_event(stop_event("CA77")).await;

    // The batch was attempted and dropped; the call itself survived.
    assert_eq!(stt.call_count(), 1);
    assert!(db.get_transcript_segments(1).await.unwrap().is_empty());
    // Empty transcript: the final analysis pass is skipped.
    assert_eq!(llm.call_count(), 0);

    let meeting = db.get_meeting(1).await.unwrap().unwrap();
    assert_eq!(meeting.status, MeetingStatus::Completed);
}

#[tokio::test]
async fn meeting_creation_failure_degrades_without_dropping_the_stream() {
    let db = Arc::new(DatabaseManager::new("sqlite::memory:").await.unwrap());
    sqlx::query("DROP TABLE meetings")
        .execute(&db.pool)
        .await
        .unwrap();

    let stt = RecordingStt::transcribing("hello");
    let llm = CountingLlm::new(AGENT_RESPONSE);

    let mut session = StreamSession::new(
        db.clone(),
        stt.clone(),
        llm.clone(),
        settings(1, Duration::from_secs(300)),
    );

    session.handle_event(start_event("CA404")).await;
    // Audio still flows and is still transcribed, it just is not persisted.
    for _ in 0..3 {
        session.handle_event(media_event(&[0x55u8; 160])).await;
    }
    session.handle_event(stop_event("CA404")).await;

    assert_eq!(stt.call_count(), 3);
    assert!(db.get_transcript_segments(1).await.unwrap().is_empty());
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn malformed_payload_and_post_stop_events_are_ignored() {
    let db = Arc::new(DatabaseManager::new("sqlite::memory:").await.unwrap());
    let stt = RecordingStt::transcribing("hello");
    let llm = CountingLlm::new(AGENT_RESPONSE);

    let mut session = StreamSession::new(
        db.clone(),
        stt.clone(),
        llm.clone(),
        settings(1, Duration::from_secs(300)),
    );

    session.handle_event(start_event("CA1")).await;

    // Invalid base64 never reaches the batcher.
    let bad: StreamEvent = serde_json::from_str(
        r#"{"event": "media", "streamSid": "MZ0001", "media": {"track": "inbound", "payload": "!!not-base64!!"}}"#,
    )
    .unwrap();
    session.handle_event(bad).await;
    session.handle_event(stop_event("CA1")).await;
    assert_eq!(stt.call_count(), 0);

    // The session is terminal: later media is not processed.
    session.handle_event(media_event(&[0x55u8; 160])).await;
    session.handle_event(stop_event("CA1")).await;
    assert_eq!(stt.call_count(), 0);

    let meeting = db.get_meeting(1).await.unwrap().unwrap();
    assert_eq!(meeting.status, MeetingStatus::Completed);
}

#[tokio::test]
async fn periodic_analysis_runs_while_the_call_is_live() {
    let db = Arc::new(DatabaseManager::new("sqlite::memory:").await.unwrap());
    let stt = RecordingStt::transcribing("we should discuss pricing");
    let llm = CountingLlm::new(AGENT_RESPONSE);

    let mut session = StreamSession::new(
        db.clone(),
        stt.clone(),
        llm.clone(),
        settings(1, Duration::from_millis(100)),
    );

    session.handle_event(start_event("CA42")).await;
    session.handle_event(media_event(&[0x55u8; 160])).await;

    // Give the transcription task time to land, then span a few timer ticks.
    tokio::time::sleep(Duration::from_millis(450)).await;

    // At least one full periodic pass (three agent calls) before any stop.
    assert!(llm.call_count() >= 3, "got {} llm calls", llm.call_count());
    assert_eq!(db.get_notes_for_meeting(1).await.unwrap().len(), 1);

    session.handle_event(stop_event("CA42")).await;
    let meeting = db.get_meeting(1).await.unwrap().unwrap();
    assert_eq!(meeting.status, MeetingStatus::Completed);
}

#[tokio::test]
async fn shutdown_cancels_the_analysis_timer() {
    let db = Arc::new(DatabaseManager::new("sqlite::memory:").await.unwrap());
    let stt = RecordingStt::transcribing("hello");
    let llm = CountingLlm::new(AGENT_RESPONSE);

    let mut session = StreamSession::new(
        db.clone(),
        stt.clone(),
        llm.clone(),
        settings(1, Duration::from_millis(50)),
    );

    session.handle_event(start_event("CA2")).await;
    // The connection goes away before the first tick.
    session.shutdown();

    session.handle_event(media_event(&[0x55u8; 160])).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    // No dangling analysis runs against the discarded session.
    assert_eq!(llm.call_count(), 0);
}
