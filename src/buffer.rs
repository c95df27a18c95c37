//! Per-connection streaming buffer and the process-wide buffer service.
//!
//! Grounded on `thaumic-core`'s `state::SonosState` (a `DashMap`-keyed
//! shared state struct with a periodic stale-entry sweep) and
//! `stream::manager` (per-stream byte caps and activity tracking).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{SpeechError, SpeechResult};

/// Minimum accepted chunk size for `append`; below this is a protocol
/// conformance guard, not a correctness requirement of the MP3 format.
pub const MIN_CHUNK_SIZE: usize = 256;
/// Maximum accepted chunk size for `append`.
pub const MAX_CHUNK_SIZE: usize = 32_768;

/// Lifecycle state of a [`StreamingBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Active,
    Completed,
    Cleaning,
}

/// Ordered byte buffer for one connection's audio stream.
pub struct StreamingBuffer {
    chunks: Vec<Vec<u8>>,
    total_size: AtomicU64,
    last_activity: std::sync::Mutex<Instant>,
    state: std::sync::Mutex<BufferState>,
}

impl StreamingBuffer {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            total_size: AtomicU64::new(0),
            last_activity: std::sync::Mutex::new(Instant::now()),
            state: std::sync::Mutex::new(BufferState::Active),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn state(&self) -> BufferState {
        *self.state.lock().unwrap()
    }
}

/// Snapshot returned by [`BufferService::info`] — never panics for an
/// unknown id; `exists` is `false` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub exists: bool,
    pub size: usize,
    pub chunk_count: usize,
    pub state: Option<BufferState>,
}

/// Process-wide `ConnectionId -> StreamingBuffer` map.
///
/// All mutation happens through this service; callers never get a `&mut`
/// reference to a buffer's internals, so access is serialized the way
/// `thaumic-core`'s `SonosState` serializes writes through `DashMap`
/// entries rather than one big lock.
pub struct BufferService {
    buffers: DashMap<String, StreamingBuffer>,
    max_buffer_bytes: usize,
    warn_threshold: f64,
}

impl BufferService {
    pub fn new(max_buffer_bytes: usize, warn_threshold: f64) -> Self {
        Self {
            buffers: DashMap::new(),
            max_buffer_bytes,
            warn_threshold,
        }
    }

    /// Creates a new buffer for `id`. With `allow_existing = false` (the
    /// strict default), a duplicate id is `Buffer.DuplicateId`; with
    /// `true`, an existing buffer is left untouched and `Ok(())` is
    /// returned, supporting a late `turn.start`-driven `create` call.
    pub fn create(&self, id: &str, allow_existing: bool) -> SpeechResult<()> {
        if self.buffers.contains_key(id) {
            if allow_existing {
                return Ok(());
            }
            return Err(SpeechError::BufferDuplicateId(id.to_string()));
        }
        self.buffers.insert(id.to_string(), StreamingBuffer::new());
        Ok(())
    }

    /// Appends a chunk of audio bytes to `id`'s buffer.
    ///
    /// Returns `Ok(false)` (no error) if the buffer is not `Active`
    /// (completed buffers silently refuse further writes). Returns
    /// `Buffer.LimitExceeded` if appending would cross
    /// `max_buffer_bytes`. Logs (does not fail) when crossing
    /// `warn_threshold` of the cap.
    pub fn append(&self, id: &str, bytes: &[u8]) -> SpeechResult<bool> {
        if bytes.is_empty() || bytes.len() < MIN_CHUNK_SIZE || bytes.len() > MAX_CHUNK_SIZE {
            return Err(SpeechError::BufferLimitExceeded {
                id: id.to_string(),
                attempted: bytes.len(),
                limit: MAX_CHUNK_SIZE,
            });
        }

        let Some(mut entry) = self.buffers.get_mut(id) else {
            return Err(SpeechError::SessionNotFound(id.to_string()));
        };

        if entry.state() != BufferState::Active {
            return Ok(false);
        }

        let before = entry.total_size.load(Ordering::SeqCst) as usize;
        let after = before + bytes.len();
        if after > self.max_buffer_bytes {
            return Err(SpeechError::BufferLimitExceeded {
                id: id.to_string(),
                attempted: after,
                limit: self.max_buffer_bytes,
            });
        }

        let warn_at = (self.max_buffer_bytes as f64 * self.warn_threshold) as usize;
        if before < warn_at && after >= warn_at {
            tracing::warn!(id, after, cap = self.max_buffer_bytes, "streaming buffer crossed warning threshold");
        }

        entry.chunks.push(bytes.to_vec());
        entry.total_size.store(after as u64, Ordering::SeqCst);
        entry.touch();
        Ok(true)
    }

    /// Returns the contiguous concatenation of all chunks appended so far,
    /// in append order.
    pub fn merged(&self, id: &str) -> Option<Vec<u8>> {
        let entry = self.buffers.get(id)?;
        let mut out = Vec::with_capacity(entry.total_size.load(Ordering::SeqCst) as usize);
        for chunk in &entry.chunks {
            out.extend_from_slice(chunk);
        }
        Some(out)
    }

    /// Transitions `id`'s buffer to `Completed`; further `append` calls
    /// return `Ok(false)` instead of erroring.
    pub fn mark_completed(&self, id: &str) {
        if let Some(entry) = self.buffers.get(id) {
            *entry.state.lock().unwrap() = BufferState::Completed;
        }
    }

    /// Removes `id`'s buffer, passing through `Cleaning` first. Idempotent:
    /// a second call for an already-removed id returns `false`.
    pub fn cleanup(&self, id: &str) -> bool {
        if let Some(entry) = self.buffers.get(id) {
            *entry.state.lock().unwrap() = BufferState::Cleaning;
        } else {
            return false;
        }
        self.buffers.remove(id).is_some()
    }

    /// Returns a snapshot of `id`'s buffer without panicking for unknown ids.
    pub fn info(&self, id: &str) -> BufferInfo {
        match self.buffers.get(id) {
            Some(entry) => BufferInfo {
                exists: true,
                size: entry.total_size.load(Ordering::SeqCst) as usize,
                chunk_count: entry.chunks.len(),
                state: Some(entry.state()),
            },
            None => BufferInfo {
                exists: false,
                size: 0,
                chunk_count: 0,
                state: None,
            },
        }
    }

    /// Reaps any buffer that is `Completed`, or `Active`/`Cleaning` but
    /// idle for longer than `max_idle`. Returns the ids actually removed.
    ///
    /// Intended to be driven by a periodic timer task; never removes a
    /// buffer already mid-`cleanup` from
    /// elsewhere (the `DashMap` entry API makes this check-then-remove
    /// atomic per key).
    pub fn sweep(&self, max_idle: Duration) -> Vec<String> {
        let mut reaped = Vec::new();
        let stale: Vec<String> = self
            .buffers
            .iter()
            .filter(|entry| {
                let state = entry.state();
                state == BufferState::Completed
                    || entry.last_activity.lock().unwrap().elapsed() > max_idle
            })
            .map(|entry| entry.key().clone())
            .collect();

        for id in stale {
            if self.buffers.remove(&id).is_some() {
                reaped.push(id);
            }
        }
        reaped
    }
}

/// Checks the first two bytes of `bytes` for the MP3 frame-sync pattern
/// (`0xFF`, high nibble `0xE`). Used by the external `AudioSink` boundary,
/// not by [`BufferService::append`].
pub fn detect_mp3(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(len: usize, fill: u8) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn create_is_idempotent_with_allow_existing() {
        let svc = BufferService::new(1_000_000, 0.8);
        svc.create("a", false).unwrap();
        assert!(matches!(
            svc.create("a", false),
            Err(SpeechError::BufferDuplicateId(_))
        ));
        assert!(svc.create("a", true).is_ok());
    }

    #[test]
    fn append_accumulates_in_order_and_total_size_matches_sum() {
        let svc = BufferService::new(1_000_000, 0.8);
        svc.create("a", false).unwrap();
        svc.append("a", &chunk(300, 1)).unwrap();
        svc.append("a", &chunk(400, 2)).unwrap();

        let info = svc.info("a");
        assert_eq!(info.size, 700);
        assert_eq!(info.chunk_count, 2);

        let merged = svc.merged("a").unwrap();
        assert_eq!(merged.len(), 700);
        assert_eq!(merged[0], 1);
        assert_eq!(merged[700 - 1], 2);
    }

    #[test]
    fn append_rejects_chunk_crossing_the_cap_exactly_at_the_boundary() {
        let svc = BufferService::new(1_000, 0.8);
        svc.create("a", false).unwrap();
        svc.append("a", &chunk(MIN_CHUNK_SIZE, 0)).unwrap(); // 256
        svc.append("a", &chunk(700, 0)).unwrap(); // total 956
        let result = svc.append("a", &chunk(MIN_CHUNK_SIZE, 0)); // would be 1212 > 1000
        assert!(matches!(result, Err(SpeechError::BufferLimitExceeded { .. })));
    }

    #[test]
    fn append_rejects_chunks_outside_the_size_thresholds() {
        let svc = BufferService::new(1_000_000, 0.8);
        svc.create("a", false).unwrap();
        assert!(svc.append("a", &[]).is_err());
        assert!(svc.append("a", &chunk(10, 0)).is_err());
        assert!(svc.append("a", &chunk(MAX_CHUNK_SIZE + 1, 0)).is_err());
    }

    #[test]
    fn append_after_mark_completed_returns_false_without_erroring() {
        let svc = BufferService::new(1_000_000, 0.8);
        svc.create("a", false).unwrap();
        svc.mark_completed("a");
        let result = svc.append("a", &chunk(300, 0));
        assert_eq!(result.unwrap(), false);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let svc = BufferService::new(1_000_000, 0.8);
        svc.create("a", false).unwrap();
        assert!(svc.cleanup("a"));
        assert!(!svc.cleanup("a"));
    }

    #[test]
    fn info_does_not_panic_for_unknown_id() {
        let svc = BufferService::new(1_000_000, 0.8);
        let info = svc.info("missing");
        assert!(!info.exists);
        assert_eq!(info.size, 0);
    }

    #[test]
    fn sweep_reaps_completed_buffers() {
        let svc = BufferService::new(1_000_000, 0.8);
        svc.create("a", false).unwrap();
        svc.mark_completed("a");
        let reaped = svc.sweep(Duration::from_secs(3600));
        assert_eq!(reaped, vec!["a".to_string()]);
        assert!(!svc.info("a").exists);
    }

    #[test]
    fn detect_mp3_matches_the_frame_sync_pattern() {
        assert!(detect_mp3(&[0xFF, 0xE3, 0x00]));
        assert!(!detect_mp3(&[0xFF]));
        assert!(!detect_mp3(&[]));
        assert!(!detect_mp3(&[0xFF, 0x00]));
        assert!(!detect_mp3(&[0x00, 0xE3]));
    }
}
