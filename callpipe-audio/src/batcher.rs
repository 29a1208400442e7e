use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::error;

use crate::mulaw;

/// Inbound stream encoding. These must match what the telephony provider
/// actually sends — a mismatch silently corrupts the downstream decode.
pub const SAMPLE_RATE: u32 = 8000;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

/// How many media chunks to accumulate before sending for transcription
/// (~1 second of audio at 20ms per chunk).
pub const DEFAULT_BATCH_CHUNKS: usize = 50;

/// Accumulates raw μ-law chunks for one session and packages them into a
/// WAV payload once the configured threshold is reached.
///
/// One instance per session; ingest and flush are only ever called from the
/// session's serialized event path.
pub struct AudioBatcher {
    chunks: Vec<Vec<u8>>,
    counter: usize,
    threshold: usize,
}

impl AudioBatcher {
    pub fn new(threshold: usize) -> Self {
        AudioBatcher {
            chunks: Vec::new(),
            counter: 0,
            threshold,
        }
    }

    /// Buffer one chunk. Returns the packaged batch when the threshold is
    /// reached, `None` while still accumulating.
    pub fn ingest(&mut self, raw: Vec<u8>) -> Option<Vec<u8>> {
        self.chunks.push(raw);
        self.counter += 1;

        if self.counter < self.threshold {
            return None;
        }
        self.flush()
    }

    /// Package whatever is buffered, even under threshold. Used at stream
    /// termination so a partial trailing batch is not lost.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.chunks.is_empty() {
            return None;
        }
        let chunks = std::mem::take(&mut self.chunks);
        self.counter = 0;

        match package_wav(&chunks) {
            Ok(wav) => Some(wav),
            Err(e) => {
                // Dropping the batch is a bounded loss; the stream keeps flowing.
                error!("failed to package audio batch: {}", e);
                None
            }
        }
    }
}

/// μ-law-expand the buffered chunks and frame them as a mono 8 kHz PCM WAV
/// in memory. One μ-law byte becomes exactly one 16-bit sample.
fn package_wav(chunks: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    let spec = WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for chunk in chunks {
            for sample in mulaw::expand(chunk) {
                writer.write_sample(sample)?;
            }
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
