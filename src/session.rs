//! In-flight synthesis state, exclusively owned by the coordinator.
//!
//! Grounded on `thaumic-core`'s `PlaybackSession`/`PlaybackEpoch` shape
//! (`services/stream_coordinator.rs`, `stream/manager.rs`): a plain data
//! struct the coordinator owns and mutates directly, with a completion
//! signal (`tokio::sync::oneshot`, consistent with this crate's
//! message-passing concurrency model) rather than a shared future.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::boundary::BoundaryCursor;
use crate::error::SpeechError;
use crate::events::SpeechCallbacks;
use crate::ssml::SpeechParams;

/// Lifecycle state of a [`Session`], independent of the underlying
/// connection's protocol state machine (a session can be `Cancelled` while
/// its connection is still mid-close, for instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Admitted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Owned synthesis request parameters, independent of the borrowed
/// [`SpeechParams`] used while building SSML.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub text: String,
    pub voice: String,
    pub language: Option<String>,
    pub rate: Option<f64>,
    pub pitch: Option<f64>,
    pub volume: Option<f64>,
}

impl SessionRequest {
    pub fn params(&self) -> SpeechParams<'_> {
        SpeechParams {
            voice: &self.voice,
            language: self.language.as_deref(),
            rate: self.rate,
            pitch: self.pitch,
            volume: self.volume,
        }
    }
}

/// Outcome delivered through a session's completion channel.
pub type SessionOutcome = Result<Vec<u8>, SpeechError>;

/// One in-flight synthesis.
///
/// `audio_chunks` duplicates what the [`crate::buffer::BufferService`]
/// tracks for this connection id; the session keeps its own copy so the
/// invariant "`sum(len(chunk)) == StreamingBuffer.total_size`" is a
/// property the coordinator can assert directly against two independently
/// maintained accumulators rather than trusting a single source.
pub struct Session {
    pub connection_id: String,
    pub request: SessionRequest,
    pub state: SessionState,
    pub audio_chunks: Vec<Vec<u8>>,
    pub boundaries: Vec<crate::boundary::BoundaryEvent>,
    pub cursor: BoundaryCursor,
    pub created_at: Instant,
    pub retry_count: u32,
    /// Shared with the coordinator's `ActiveHandle` so `pause`/`resume` can
    /// fire `onPause`/`onResume` from outside the task that owns the
    /// session, without the core ever invoking a callback while holding an
    /// internal lock for longer than the call itself.
    pub callbacks: Arc<Mutex<SpeechCallbacks>>,
    completion_tx: Option<oneshot::Sender<SessionOutcome>>,
}

impl Session {
    pub fn new(connection_id: String, request: SessionRequest, callbacks: SpeechCallbacks) -> (Self, oneshot::Receiver<SessionOutcome>) {
        let (tx, rx) = oneshot::channel();
        let session = Self {
            connection_id,
            request,
            state: SessionState::Admitted,
            audio_chunks: Vec::new(),
            boundaries: Vec::new(),
            cursor: BoundaryCursor::new(),
            created_at: Instant::now(),
            retry_count: 0,
            callbacks: Arc::new(Mutex::new(callbacks)),
            completion_tx: Some(tx),
        };
        (session, rx)
    }

    /// Returns a clone of the shared callback handle, for the coordinator to
    /// hand to the `ActiveHandle` it tracks alongside this session.
    pub fn callbacks_handle(&self) -> Arc<Mutex<SpeechCallbacks>> {
        self.callbacks.clone()
    }

    /// Total accumulated audio bytes, used to cross-check against the
    /// streaming buffer's `total_size`.
    pub fn audio_len(&self) -> usize {
        self.audio_chunks.iter().map(Vec::len).sum()
    }

    /// Resolves and records one boundary, firing `onBoundary` synchronously.
    pub fn record_boundary(&mut self, word: &str, reported_length: usize) {
        let event = self.cursor.resolve(&self.request.text, word, reported_length);
        self.boundaries.push(event);
        self.callbacks.lock().fire_boundary(event);
    }

    /// Resolves the completion channel exactly once. Subsequent calls are
    /// no-ops, enforcing "exactly one of resolve/reject, exactly once"
    /// even if dispatch code calls this more than once by mistake.
    pub fn resolve(&mut self, outcome: SessionOutcome) {
        if let Some(tx) = self.completion_tx.take() {
            let _ = tx.send(outcome);
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}
