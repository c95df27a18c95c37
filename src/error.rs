//! Centralized error taxonomy for the synthesis pipeline.
//!
//! Every public boundary in this crate returns [`SpeechError`]. Internal
//! collaborator errors (WebSocket handshake failures, JSON parse errors, …)
//! are converted into it via `From` impls rather than propagated as foreign
//! types.

use thiserror::Error;

/// Structured error type covering the full synthesis-pipeline error taxonomy.
///
/// Variants are grouped by category (`Config`, `Auth`, `Network`,
/// `Protocol`, `Buffer`, `Audio`); [`SpeechError::category`] returns the
/// dotted-path name (e.g. `"Network.Timeout"`) used for logging and for the
/// retry/circuit-breaker policy tables in the coordinator.
#[derive(Debug, Error, Clone)]
pub enum SpeechError {
    /// Synthesis text was empty or all whitespace.
    #[error("text is empty")]
    EmptyText,
    /// Synthesis text exceeded the configured character limit.
    #[error("text exceeds maximum length of {max} characters ({actual} given)")]
    TextTooLong { max: usize, actual: usize },
    /// Voice identifier could not be parsed into a Microsoft voice name.
    #[error("invalid voice identifier: {0}")]
    InvalidVoice(String),
    /// A numeric parameter (rate/pitch/volume) was malformed.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Auth token derivation failed (system clock unavailable, etc.).
    #[error("auth token skew adjustment failed: {0}")]
    SkewAdjustment(String),

    /// Operation exceeded its configured timeout.
    #[error("operation timed out")]
    Timeout,
    /// A transient network error occurred; eligible for retry.
    #[error("transient network error: {0}")]
    Transient(String),
    /// The underlying socket reported an error.
    #[error("socket error: {0}")]
    SocketError(String),
    /// The socket closed unexpectedly mid-synthesis.
    #[error("unexpected close (code {0:?})")]
    UnexpectedClose(Option<u16>),

    /// An inbound text frame was missing the header/body separator.
    #[error("malformed text frame")]
    MalformedText,
    /// An inbound binary frame's header length was inconsistent with its size.
    #[error("malformed binary frame")]
    MalformedBinary,
    /// An inbound frame referenced a request id with no matching session.
    #[error("unknown session for request id {0}")]
    UnknownSession(String),
    /// An inbound frame used a path this state machine did not expect.
    #[error("unexpected response on path {0}")]
    UnexpectedResponse(String),
    /// Admission rejected because the circuit breaker is open.
    #[error("circuit breaker is open")]
    CircuitOpen,
    /// Admission rejected because the connection pool is full and pooling is disabled.
    #[error("connection pool is full")]
    PoolFull,
    /// The session was cancelled (user-requested stop or app backgrounding).
    #[error("session cancelled")]
    Cancelled,
    /// All configured retry attempts were exhausted.
    #[error("maximum retries exceeded")]
    MaxRetriesExceeded,
    /// A lookup referenced a session id that does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A streaming buffer was created twice for the same connection id.
    #[error("duplicate streaming buffer id: {0}")]
    BufferDuplicateId(String),
    /// An append would have pushed a streaming buffer past its byte cap.
    #[error("streaming buffer limit exceeded for {id}: {attempted} > {limit}")]
    BufferLimitExceeded {
        id: String,
        attempted: usize,
        limit: usize,
    },

    /// `turn.end` arrived with zero audio bytes accumulated.
    #[error("no audio received")]
    NoAudioReceived,
    /// The audio sink rejected the data as not valid MP3.
    #[error("invalid MP3 data")]
    InvalidMp3,
}

impl SpeechError {
    /// Returns the dotted-path category name, e.g. `"Network.Timeout"`.
    pub fn category(&self) -> &'static str {
        match self {
            Self::EmptyText => "Config.EmptyText",
            Self::TextTooLong { .. } => "Config.TextTooLong",
            Self::InvalidVoice(_) => "Config.InvalidVoice",
            Self::InvalidParameter { .. } => "Config.InvalidParameter",
            Self::SkewAdjustment(_) => "Auth.SkewAdjustment",
            Self::Timeout => "Network.Timeout",
            Self::Transient(_) => "Network.Transient",
            Self::SocketError(_) => "Network.SocketError",
            Self::UnexpectedClose(_) => "Network.UnexpectedClose",
            Self::MalformedText => "Protocol.MalformedText",
            Self::MalformedBinary => "Protocol.MalformedBinary",
            Self::UnknownSession(_) => "Protocol.UnknownSession",
            Self::UnexpectedResponse(_) => "Protocol.UnexpectedResponse",
            Self::CircuitOpen => "Protocol.CircuitOpen",
            Self::PoolFull => "Protocol.PoolFull",
            Self::Cancelled => "Protocol.Cancelled",
            Self::MaxRetriesExceeded => "Protocol.MaxRetriesExceeded",
            Self::SessionNotFound(_) => "Protocol.SessionNotFound",
            Self::BufferDuplicateId(_) => "Buffer.DuplicateId",
            Self::BufferLimitExceeded { .. } => "Buffer.LimitExceeded",
            Self::NoAudioReceived => "Audio.NoAudioReceived",
            Self::InvalidMp3 => "Audio.InvalidMp3",
        }
    }

    /// Whether the coordinator's retry policy should retry this error.
    ///
    /// The `Network.*` category (`Timeout`, `Transient`, `SocketError`,
    /// `UnexpectedClose`) is retried; everything else is either a
    /// programmer/config error or already terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Transient(_) | Self::SocketError(_) | Self::UnexpectedClose(_)
        )
    }

    /// Whether a terminal occurrence of this error should count against the
    /// circuit breaker's failure count.
    ///
    /// `Config.*`/`Auth.*` are excluded (caller error, not service health),
    /// as are `Protocol.CircuitOpen`/`PoolFull`/`Cancelled`/`SessionNotFound`
    /// (rejected or cancelled before doing any service work) and
    /// `Buffer.DuplicateId` (an admission-time programmer error).
    pub fn counts_as_breaker_failure(&self) -> bool {
        match self {
            Self::EmptyText
            | Self::TextTooLong { .. }
            | Self::InvalidVoice(_)
            | Self::InvalidParameter { .. }
            | Self::SkewAdjustment(_)
            | Self::CircuitOpen
            | Self::PoolFull
            | Self::Cancelled
            | Self::SessionNotFound(_)
            | Self::BufferDuplicateId(_) => false,
            _ => true,
        }
    }
}

/// Convenient `Result` alias for crate-internal operations.
pub type SpeechResult<T> = Result<T, SpeechError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_and_auth_errors_are_not_retryable_or_counted() {
        let e = SpeechError::EmptyText;
        assert!(!e.is_retryable());
        assert!(!e.counts_as_breaker_failure());

        let e = SpeechError::SkewAdjustment("clock".into());
        assert!(!e.is_retryable());
        assert!(!e.counts_as_breaker_failure());
    }

    #[test]
    fn network_errors_are_retryable_and_counted() {
        for e in [
            SpeechError::Timeout,
            SpeechError::Transient("reset".into()),
            SpeechError::SocketError("boom".into()),
            SpeechError::UnexpectedClose(Some(1006)),
        ] {
            assert!(e.is_retryable());
            assert!(e.counts_as_breaker_failure());
        }
    }

    #[test]
    fn malformed_protocol_errors_are_terminal_and_counted() {
        let e = SpeechError::MalformedText;
        assert!(!e.is_retryable());
        assert!(e.counts_as_breaker_failure());
    }

    #[test]
    fn cancellation_and_admission_rejections_are_not_counted() {
        for e in [
            SpeechError::CircuitOpen,
            SpeechError::PoolFull,
            SpeechError::Cancelled,
            SpeechError::SessionNotFound("abc".into()),
        ] {
            assert!(!e.counts_as_breaker_failure());
        }
    }

    #[test]
    fn categories_match_the_documented_dotted_paths() {
        assert_eq!(SpeechError::Timeout.category(), "Network.Timeout");
        assert_eq!(SpeechError::CircuitOpen.category(), "Protocol.CircuitOpen");
        assert_eq!(
            SpeechError::BufferLimitExceeded {
                id: "x".into(),
                attempted: 1,
                limit: 0
            }
            .category(),
            "Buffer.LimitExceeded"
        );
    }
}
