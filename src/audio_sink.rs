//! `AudioSink` — the external collaborator that decodes and plays the
//! synthesized MP3. Playback itself is out of scope for this core; it only
//! drives the trait's lifecycle.
//!
//! Trait shape grounded on `thaumic-core`'s `runtime::TaskSpawner`
//! (trait-plus-default-impl, `async-trait` methods where the host does
//! real I/O).

use async_trait::async_trait;

use crate::buffer::detect_mp3;
use crate::error::{SpeechError, SpeechResult};

/// Audio format descriptor handed to [`AudioSink::prepare`].
#[derive(Debug, Clone, Copy)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub bitrate_kbps: u32,
    pub channels: u8,
}

/// Edge TTS's one supported output format: `audio-24khz-48kbitrate-mono-mp3`.
pub const EDGE_OUTPUT_FORMAT: AudioFormat = AudioFormat {
    sample_rate_hz: 24_000,
    bitrate_kbps: 48,
    channels: 1,
};

/// Playback state reported back to the coordinator.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Started,
    Progress { position_ms: u64 },
    Completed,
    Interrupted,
    Error(SpeechError),
}

/// External audio playback collaborator.
///
/// Both streaming (`append` called incrementally as frames arrive) and
/// batch (`append` never called; `finalize` receives the full buffer) modes
/// must be supported; the implementation selects its mode at construction.
/// This core only ever drives the batch path; progressive mid-stream
/// playback is left to a future coordinator revision.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Called before any bytes are delivered for `session_id`.
    async fn prepare(&self, session_id: &str, format: AudioFormat) -> SpeechResult<()>;

    /// May be called zero or more times with incremental audio data.
    async fn append(&self, session_id: &str, bytes: &[u8]) -> SpeechResult<()>;

    /// Called once after `turn.end`, with the complete merged buffer.
    async fn finalize(&self, session_id: &str, audio: &[u8]) -> SpeechResult<()>;
}

/// No-op sink for headless use or testing — validates the MP3 frame-sync
/// marker on `finalize` but does not actually play anything.
pub struct NoopAudioSink;

#[async_trait]
impl AudioSink for NoopAudioSink {
    async fn prepare(&self, _session_id: &str, _format: AudioFormat) -> SpeechResult<()> {
        Ok(())
    }

    async fn append(&self, _session_id: &str, _bytes: &[u8]) -> SpeechResult<()> {
        Ok(())
    }

    async fn finalize(&self, _session_id: &str, audio: &[u8]) -> SpeechResult<()> {
        if !audio.is_empty() && !detect_mp3(audio) {
            return Err(SpeechError::InvalidMp3);
        }
        Ok(())
    }
}
