//! Synthesis pipeline for driving Microsoft Edge's cloud text-to-speech
//! service over its WebSocket protocol.
//!
//! [`Coordinator`] is the single entry point a host embeds: it owns
//! admission control (connection pooling, circuit breaking), retries with
//! backoff, and the per-session lifecycle. Everything else in this crate is
//! a collaborator it wires together — SSML assembly, wire framing, the
//! word-boundary timing reconstruction, and the streaming audio buffer.

pub mod audio_sink;
pub mod auth;
pub mod boundary;
pub mod breaker;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod runtime;
pub mod session;
pub mod ssml;

pub use audio_sink::{AudioFormat, AudioSink, NoopAudioSink, SinkEvent, EDGE_OUTPUT_FORMAT};
pub use boundary::BoundaryEvent;
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorStatus, SessionHandle};
pub use error::{SpeechError, SpeechResult};
pub use events::SpeechCallbacks;
pub use lifecycle::{AppLifecycleObserver, NoopLifecycleObserver};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{SessionOutcome, SessionRequest, SessionState};
