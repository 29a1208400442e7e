use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info};

pub const DEFAULT_STT_API_URL: &str = "https://api.elevenlabs.io/v1/speech-to-text";
pub const DEFAULT_STT_MODEL: &str = "scribe_v1";

/// Both call participants land on the same stream, one per track.
const EXPECTED_SPEAKERS: &str = "2";

/// Raw provider response: free-text transcript plus optional word-level
/// timing/speaker metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SttResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub words: Vec<SttWord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SttWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub speaker_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Narrow contract over the external speech-to-text service.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<SttResponse>;
}

/// A normalized transcription result for one audio batch, ready to be
/// appended to the session transcript and persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDraft {
    pub speaker: String,
    pub content: String,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub confidence: Option<f64>,
}

/// ElevenLabs-style scribe client.
pub struct ScribeClient {
    client: Client,
    api_url: String,
    api_key: String,
    model_id: String,
}

impl ScribeClient {
    pub fn new(api_key: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self::with_url(DEFAULT_STT_API_URL, api_key, model_id)
    }

    pub fn with_url(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        ScribeClient {
            client: Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl SpeechToText for ScribeClient {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<SttResponse> {
        debug!("sending {} byte batch for transcription", wav.len());

        let file = Part::bytes(wav).file_name("audio.wav").mime_str("audio/wav")?;
        let form = Form::new()
            .part("file", file)
            .text("model_id", self.model_id.clone())
            .text("num_speakers", EXPECTED_SPEAKERS);

        let response = self
            .client
            .post(&self.api_url)
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("speech-to-text request failed with {}: {}", status, body);
        }

        Ok(response.json::<SttResponse>().await?)
    }
}

/// Send a packaged batch for transcription and normalize the result.
///
/// Returns `None` for provider failures (no retry — one dropped batch is a
/// bounded loss) and for silence/noise batches that transcribe to nothing.
/// `track` is the audio track the batch came from and only matters as the
/// speaker-label fallback when the provider returns no speaker tag.
pub async fn transcribe_batch(
    stt: &dyn SpeechToText,
    wav: Vec<u8>,
    track: Option<&str>,
) -> Option<SegmentDraft> {
    let response = match stt.transcribe(wav).await {
        Ok(r) => r,
        Err(e) => {
            error!("speech-to-text error: {:#}", e);
            return None;
        }
    };

    let content = response.text.trim();
    if content.is_empty() {
        info!("transcription is empty, dropping batch");
        return None;
    }

    let speaker = response
        .words
        .first()
        .and_then(|w| w.speaker_id.clone())
        .unwrap_or_else(|| {
            if track == Some("inbound") {
                "Caller".to_string()
            } else {
                "Agent".to_string()
            }
        });

    let start_time = response.words.first().map(|w| w.start);
    let end_time = response.words.last().map(|w| w.end);
    let confidence = if response.words.is_empty() {
        None
    } else {
        // A word without a confidence score counts as fully confident.
        let sum: f64 = response
            .words
            .iter()
            .map(|w| w.confidence.unwrap_or(1.0))
            .sum();
        Some(sum / response.words.len() as f64)
    };

    Some(SegmentDraft {
        speaker,
        content: content.to_string(),
        start_time,
        end_time,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubStt {
        response: Result<SttResponse, String>,
    }

    impl StubStt {
        fn ok(response: SttResponse) -> Self {
            StubStt {
                response: Ok(response),
            }
        }

        fn failing(message: &str) -> Self {
            StubStt {
                response: Err(message.to_string()),
            }
        }
    }

    #[async_trait]
    impl SpeechToText for StubStt {
        async fn transcribe(&self, _wav: Vec<u8>) -> Result<SttResponse> {
            match &self.response {
                Ok(r) => Ok(r.clone()),
                Err(m) => Err(anyhow::anyhow!(m.clone())),
            }
        }
    }

    fn word(text: &str, start: f64, end: f64, speaker: Option<&str>, conf: Option<f64>) -> SttWord {
        SttWord {
            text: text.to_string(),
            start,
            end,
            speaker_id: speaker.map(|s| s.to_string()),
            confidence: conf,
        }
    }

    #[tokio::test]
    async fn provider_error_drops_the_batch() {
        let stt = StubStt::failing("503 service unavailable");
        assert!(transcribe_batch(&stt, vec![0u8; 4], Some("inbound"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn whitespace_only_text_drops_the_batch() {
        let stt = StubStt::ok(SttResponse {
            text: "   \n".to_string(),
            words: vec![],
        });
        assert!(transcribe_batch(&stt, vec![0u8; 4], None).await.is_none());
    }

    #[tokio::test]
    async fn provider_speaker_tag_is_preferred() {
        let stt = StubStt::ok(SttResponse {
            text: "hello there".to_string(),
            words: vec![
                word("hello", 0.1, 0.4, Some("speaker_0"), Some(0.8)),
                word("there", 0.5, 0.9, Some("speaker_1"), Some(0.6)),
            ],
        });

        let segment = transcribe_batch(&stt, vec![0u8; 4], Some("inbound"))
            .await
            .unwrap();
        assert_eq!(segment.speaker, "speaker_0");
        assert_eq!(segment.start_time, Some(0.1));
        assert_eq!(segment.end_time, Some(0.9));
        assert_eq!(segment.confidence, Some(0.7));
    }

    #[tokio::test]
    async fn speaker_falls_back_to_track_label() {
        let response = SttResponse {
            text: "hello".to_string(),
            words: vec![],
        };

        let inbound = transcribe_batch(&StubStt::ok(response.clone()), vec![], Some("inbound"))
            .await
            .unwrap();
        assert_eq!(inbound.speaker, "Caller");

        let outbound = transcribe_batch(&StubStt::ok(response.clone()), vec![], Some("outbound"))
            .await
            .unwrap();
        assert_eq!(outbound.speaker, "Agent");

        // Flush at stream end has no track to attribute.
        let unknown = transcribe_batch(&StubStt::ok(response), vec![], None)
            .await
            .unwrap();
        assert_eq!(unknown.speaker, "Agent");
    }

    #[tokio::test]
    async fn missing_word_confidence_counts_as_full() {
        let stt = StubStt::ok(SttResponse {
            text: "one two".to_string(),
            words: vec![
                word("one", 0.0, 0.2, None, Some(0.5)),
                word("two", 0.3, 0.5, None, None),
            ],
        });

        let segment = transcribe_batch(&stt, vec![], None).await.unwrap();
        assert_eq!(segment.confidence, Some(0.75));
    }

    #[tokio::test]
    async fn no_words_means_no_timing_or_confidence() {
        let stt = StubStt::ok(SttResponse {
            text: "untimed transcript".to_string(),
            words: vec![],
        });

        let segment = transcribe_batch(&stt, vec![], None).await.unwrap();
        assert!(segment.start_time.is_none());
        assert!(segment.end_time.is_none());
        assert!(segment.confidence.is_none());
        assert_eq!(segment.content, "untimed transcript");
    }

    #[tokio::test]
    async fn content_is_trimmed() {
        let stt = StubStt::ok(SttResponse {
            text: "  padded text \n".to_string(),
            words: vec![],
        });

        let segment = transcribe_batch(&stt, vec![], None).await.unwrap();
        assert_eq!(segment.content, "padded text");
    }
}
