pub mod batcher;
pub mod mulaw;
pub mod transcription;

pub use batcher::{AudioBatcher, DEFAULT_BATCH_CHUNKS};
pub use transcription::{
    transcribe_batch, ScribeClient, SegmentDraft, SpeechToText, SttResponse, SttWord,
};
