//! Top-level admission, retry, and lifecycle orchestration.
//!
//! Grounded on `thaumic-core`'s `services/stream_coordinator.rs`: a single
//! long-lived struct holding a `DashMap` of in-flight work plus a
//! `CircuitBreaker`, driving retries with exponential backoff, and exposing
//! `stop`/`pause`/`resume`/`shutdown` as the one place the host ever talks
//! to. Cooperative cancellation goes through a `tokio::sync::watch` flag per
//! session rather than a shared lock, matching this crate's message-passing
//! concurrency model.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, OwnedSemaphorePermit, Semaphore};

use crate::audio_sink::{AudioSink, NoopAudioSink, EDGE_OUTPUT_FORMAT};
use crate::breaker::{AdmitDecision, BreakerState, CircuitBreaker};
use crate::buffer::BufferService;
use crate::config::CoordinatorConfig;
use crate::connection::{new_connection_id, run_attempt, Connection};
use crate::error::{SpeechError, SpeechResult};
use crate::events::SpeechCallbacks;
use crate::runtime::TaskSpawner;
use crate::session::{Session, SessionOutcome, SessionRequest, SessionState};
use crate::ssml::build_ssml;

/// A handle the coordinator keeps for each admitted session, independent of
/// the `Session` itself (which is moved into the background task).
struct ActiveHandle {
    cancel: watch::Sender<bool>,
    paused: AtomicBool,
    callbacks: Arc<Mutex<SpeechCallbacks>>,
}

/// Snapshot returned by [`Coordinator::status`].
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorStatus {
    pub active_connections: usize,
    pub queued: usize,
    pub breaker_state: BreakerState,
    pub breaker_failure_count: u32,
}

/// Returned by [`Coordinator::speak`] on successful admission: the id
/// needed for `stop`/`pause`/`resume`, plus the session's completion
/// channel.
pub struct SessionHandle {
    pub id: String,
    pub completion: oneshot::Receiver<SessionOutcome>,
}

/// Either a permit already held (non-pooling admission) or the semaphore to
/// acquire one from once the task actually runs (pooling admission).
enum PermitSource {
    Owned(OwnedSemaphorePermit),
    Deferred(Arc<Semaphore>),
}

/// Owns admission, retry, circuit-breaking, and lifecycle for every
/// synthesis this process runs.
///
/// One instance is shared (behind an `Arc`) across however many concurrent
/// callers the host has; it is the only type in this crate a host embeds
/// directly.
pub struct Coordinator {
    config: CoordinatorConfig,
    breaker: CircuitBreaker,
    buffer: Arc<BufferService>,
    permits: Arc<Semaphore>,
    active: DashMap<String, ActiveHandle>,
    queued: AtomicUsize,
    spawner: Arc<dyn TaskSpawner>,
    sink: Arc<dyn AudioSink>,
}

impl Coordinator {
    /// Constructs a coordinator with a [`NoopAudioSink`], suitable for
    /// headless use and the test suite. Hosts that play audio should use
    /// [`Coordinator::with_audio_sink`] instead.
    pub fn new(config: CoordinatorConfig, spawner: Arc<dyn TaskSpawner>) -> Arc<Self> {
        Self::with_audio_sink(config, spawner, Arc::new(NoopAudioSink))
    }

    pub fn with_audio_sink(
        config: CoordinatorConfig,
        spawner: Arc<dyn TaskSpawner>,
        sink: Arc<dyn AudioSink>,
    ) -> Arc<Self> {
        let breaker = CircuitBreaker::new(
            config.breaker_failure_threshold,
            config.breaker_recovery_timeout,
            config.breaker_test_request_limit,
        );
        let buffer = Arc::new(BufferService::new(config.max_buffer_bytes, config.warn_threshold));
        let permits = Arc::new(Semaphore::new(config.max_connections));

        let coordinator = Arc::new(Self {
            config,
            breaker,
            buffer,
            permits,
            active: DashMap::new(),
            queued: AtomicUsize::new(0),
            spawner,
            sink,
        });
        coordinator.clone().spawn_sweeper();
        coordinator
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let buffer = self.buffer.clone();
        let interval = self.config.cleanup_interval;
        self.spawner.spawn(Box::pin(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let reaped = buffer.sweep(interval * 4);
                if !reaped.is_empty() {
                    tracing::debug!(count = reaped.len(), "buffer sweeper reaped stale buffers");
                }
            }
        }));
    }

    /// Submits one synthesis request for admission and, once admitted,
    /// drives it (including retries) to completion on a spawned task.
    ///
    /// Returns the receiver half of the session's completion channel
    /// immediately after admission; the caller awaits it (or relies on
    /// `callbacks.on_done`/`on_error`) to learn the outcome. Rejected
    /// admissions (`Circuit.Open`, `Protocol.PoolFull`) fire `on_error` and
    /// return `Err` synchronously without spawning anything.
    pub fn speak(
        self: &Arc<Self>,
        request: SessionRequest,
        mut callbacks: SpeechCallbacks,
    ) -> SpeechResult<SessionHandle> {
        if self.breaker.try_admit() == AdmitDecision::Reject {
            let err = SpeechError::CircuitOpen;
            callbacks.fire_error(err.clone());
            return Err(err);
        }

        let permit_source = if self.config.pooling_enabled {
            PermitSource::Deferred(self.permits.clone())
        } else {
            match self.permits.clone().try_acquire_owned() {
                Ok(permit) => PermitSource::Owned(permit),
                Err(_) => {
                    let err = SpeechError::PoolFull;
                    callbacks.fire_error(err.clone());
                    return Err(err);
                }
            }
        };

        let connection_id = new_connection_id();
        callbacks.fire_start();
        let (mut session, rx) = Session::new(connection_id.clone(), request, callbacks);
        session.state = SessionState::InProgress;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active.insert(
            connection_id.clone(),
            ActiveHandle {
                cancel: cancel_tx,
                paused: AtomicBool::new(false),
                callbacks: session.callbacks_handle(),
            },
        );

        let is_queued = matches!(permit_source, PermitSource::Deferred(_));
        if is_queued {
            self.queued.fetch_add(1, Ordering::SeqCst);
        }

        let coordinator = self.clone();
        self.spawner.spawn(Box::pin(async move {
            let _permit = match permit_source {
                PermitSource::Owned(permit) => permit,
                PermitSource::Deferred(semaphore) => {
                    let result = semaphore.acquire_owned().await;
                    coordinator.queued.fetch_sub(1, Ordering::SeqCst);
                    match result {
                        Ok(permit) => permit,
                        Err(_) => return,
                    }
                }
            };
            coordinator.drive(session, cancel_rx).await;
        }));

        Ok(SessionHandle {
            id: connection_id,
            completion: rx,
        })
    }

    async fn drive(self: Arc<Self>, mut session: Session, mut cancel: watch::Receiver<bool>) {
        let connection_id = session.connection_id.clone();
        let ssml = match build_ssml(
            &session.request.text,
            &session.request.params(),
            self.config.max_text_chars,
            self.config.max_ssml_bytes,
        ) {
            Ok(ssml) => ssml,
            Err(e) => {
                self.finish(&connection_id, &mut session, Err(e)).await;
                return;
            }
        };

        let mut attempt = 0u32;
        let outcome: SpeechResult<()> = loop {
            let mut connection = Connection::new(connection_id.clone());
            let result = run_attempt(
                &mut connection,
                &mut session,
                &self.buffer,
                &ssml,
                &self.config,
                &mut cancel,
            )
            .await;

            match result {
                Ok(()) => break Ok(()),
                Err(SpeechError::Cancelled) => break Err(SpeechError::Cancelled),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let backoff = self
                        .config
                        .base_retry_delay
                        .checked_mul(1u32 << attempt.min(16))
                        .unwrap_or(self.config.max_retry_delay)
                        .min(self.config.max_retry_delay);
                    tracing::warn!(id = %connection_id, attempt, ?backoff, "retrying synthesis after transient error");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                    session.retry_count = attempt;
                }
                Err(e) if e.is_retryable() => break Err(SpeechError::MaxRetriesExceeded),
                Err(e) => break Err(e),
            }
        };

        match &outcome {
            Ok(()) => self.breaker.record_success(),
            Err(e) if e.counts_as_breaker_failure() => self.breaker.record_failure(),
            Err(_) => {}
        }

        let outcome = outcome.map(|()| self.buffer.merged(&connection_id).unwrap_or_default());
        self.finish(&connection_id, &mut session, outcome).await;
    }

    /// Finalizes a session: removes it from `active`, cleans up its buffer,
    /// and (on success) hands the merged audio to the `AudioSink` before
    /// firing `onDone` — `onDone` only fires once the sink reports the
    /// audio finalized, per the ordering guarantee that it follows both
    /// `turn.end` and sink completion.
    async fn finish(&self, connection_id: &str, session: &mut Session, outcome: SessionOutcome) {
        self.active.remove(connection_id);
        self.buffer.cleanup(connection_id);

        let outcome = match outcome {
            Ok(audio) => match self.run_audio_sink(connection_id, &audio).await {
                Ok(()) => Ok(audio),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(audio) => {
                session.state = SessionState::Completed;
                session.callbacks.lock().fire_done(audio.clone());
            }
            Err(SpeechError::Cancelled) => {
                session.state = SessionState::Cancelled;
                session.callbacks.lock().fire_stopped();
            }
            Err(e) => {
                session.state = SessionState::Failed;
                session.callbacks.lock().fire_error(e.clone());
            }
        }
        session.resolve(outcome);
    }

    /// Drives the batch `AudioSink` path: `prepare` then `finalize` with the
    /// full merged buffer. This core never calls `append` mid-stream.
    async fn run_audio_sink(&self, connection_id: &str, audio: &[u8]) -> SpeechResult<()> {
        self.sink.prepare(connection_id, EDGE_OUTPUT_FORMAT).await?;
        self.sink.finalize(connection_id, audio).await
    }

    /// Requests cancellation of an in-flight session. No-op if `session_id`
    /// is not currently active (already finished, or never existed).
    pub fn stop(&self, session_id: &str) -> SpeechResult<()> {
        match self.active.get(session_id) {
            Some(handle) => {
                let _ = handle.cancel.send(true);
                Ok(())
            }
            None => Err(SpeechError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Marks a session paused. Playback pausing is the host's `AudioSink`
    /// responsibility; this only flips the bookkeeping flag and fires
    /// `onPause` so the host can react. No-op (but still fires) if the
    /// session was already paused.
    pub fn pause(&self, session_id: &str) -> SpeechResult<()> {
        let handle = self
            .active
            .get(session_id)
            .ok_or_else(|| SpeechError::SessionNotFound(session_id.to_string()))?;
        handle.paused.store(true, Ordering::SeqCst);
        handle.callbacks.lock().fire_pause();
        Ok(())
    }

    pub fn resume(&self, session_id: &str) -> SpeechResult<()> {
        let handle = self
            .active
            .get(session_id)
            .ok_or_else(|| SpeechError::SessionNotFound(session_id.to_string()))?;
        handle.paused.store(false, Ordering::SeqCst);
        handle.callbacks.lock().fire_resume();
        Ok(())
    }

    pub fn is_paused(&self, session_id: &str) -> bool {
        self.active
            .get(session_id)
            .map(|h| h.paused.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Cancels every currently active session. Used directly and by
    /// [`Coordinator::on_background`].
    pub fn shutdown(&self) {
        for entry in self.active.iter() {
            let _ = entry.value().cancel.send(true);
        }
    }

    /// Called by the host when the app is backgrounded: stops all active
    /// sessions, matching the documented "background = stopAll" behavior.
    pub fn on_background(&self) {
        tracing::info!("app backgrounded, stopping all active sessions");
        self.shutdown();
    }

    /// Called by the host when the app returns to the foreground. New
    /// `speak` calls are accepted regardless; this exists for symmetry and
    /// future host-side bookkeeping.
    pub fn on_foreground(&self) {
        tracing::debug!("app foregrounded");
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            active_connections: self.active.len(),
            queued: self.queued.load(Ordering::SeqCst),
            breaker_state: self.breaker.state(),
            breaker_failure_count: self.breaker.failure_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TokioSpawner;

    fn request(text: &str) -> SessionRequest {
        SessionRequest {
            text: text.to_string(),
            voice: "en-US-AriaNeural".to_string(),
            language: None,
            rate: None,
            pitch: None,
            volume: None,
        }
    }

    #[tokio::test]
    async fn stopping_an_unknown_session_is_session_not_found() {
        let spawner = Arc::new(TokioSpawner::current());
        let coordinator = Coordinator::new(CoordinatorConfig::test_profile(), spawner);
        assert!(matches!(
            coordinator.stop("nonexistent"),
            Err(SpeechError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn status_reports_breaker_state_and_zero_active_sessions_initially() {
        let spawner = Arc::new(TokioSpawner::current());
        let coordinator = Coordinator::new(CoordinatorConfig::test_profile(), spawner);
        let status = coordinator.status();
        assert_eq!(status.active_connections, 0);
        assert_eq!(status.queued, 0);
        assert_eq!(status.breaker_state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn speak_with_empty_text_fails_during_ssml_assembly_not_admission() {
        let spawner = Arc::new(TokioSpawner::current());
        let coordinator = Coordinator::new(CoordinatorConfig::test_profile(), spawner);
        let handle = coordinator.speak(request("   "), SpeechCallbacks::default()).unwrap();
        let outcome = handle.completion.await.unwrap();
        assert!(matches!(outcome, Err(SpeechError::EmptyText)));

        tokio::task::yield_now().await;
        assert_eq!(coordinator.status().active_connections, 0);
    }

    #[tokio::test]
    async fn pool_full_rejects_admission_when_pooling_disabled_and_at_capacity() {
        let mut config = CoordinatorConfig::test_profile();
        config.max_connections = 1;
        config.pooling_enabled = false;
        let spawner = Arc::new(TokioSpawner::current());
        let coordinator = Coordinator::new(config, spawner);

        // The only permit is held by this admitted (if short-lived) session;
        // a second admission attempt must see the pool as full immediately.
        let _rx1 = coordinator
            .speak(request("hello there"), SpeechCallbacks::default())
            .unwrap();
        let result = coordinator.speak(request("hello again"), SpeechCallbacks::default());
        assert!(matches!(result, Err(SpeechError::PoolFull)));
    }

    #[tokio::test]
    async fn open_breaker_rejects_admission_with_circuit_open() {
        let mut config = CoordinatorConfig::test_profile();
        config.breaker_failure_threshold = 1;
        let spawner = Arc::new(TokioSpawner::current());
        let coordinator = Coordinator::new(config, spawner);
        coordinator.breaker.record_failure();

        let result = coordinator.speak(request("hi"), SpeechCallbacks::default());
        assert!(matches!(result, Err(SpeechError::CircuitOpen)));
    }
}
