//! Connection & protocol state machine.
//!
//! The send-then-loop-read shape and per-message dispatch are ported from
//! `BlacK201-edge-tts`'s `process_socket_data`, moved from a synchronous
//! `tungstenite::WebSocket` onto `tokio_tungstenite`'s async
//! `WebSocketStream` split into sink/stream halves — the way
//! `thaumic-core`'s `api/ws_connection.rs` holds an async socket task per
//! connection instead of blocking a thread on it.

use std::time::{Duration, Instant};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use uuid::Uuid;

use crate::audio_sink::EDGE_OUTPUT_FORMAT;
use crate::auth::{generate_sec_ms_gec, SEC_MS_GEC_VERSION};
use crate::buffer::BufferService;
use crate::codec::{
    build_speech_config_frame, build_ssml_frame, decode_binary_frame, decode_text_frame,
    header_value,
};
use crate::config::CoordinatorConfig;
use crate::error::{SpeechError, SpeechResult};
use crate::session::Session;

const SYNTH_URL_BASE: &str = "wss://speech.platform.bing.com/consumer/speech/synthesize/readaloud/edge/v1?TrustedClientToken=6A5AA1D4EAFF4E9FB37E23D68491D6F4";
const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

/// States a [`Connection`] moves through for one synthesis attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Synthesizing,
    Error,
}

/// Owns one WebSocket for one synthesis attempt.
pub struct Connection {
    pub id: String,
    pub state: ConnectionState,
    pub created_at: Instant,
    pub last_activity: Instant,
}

/// Generates a fresh `ConnectionId`: a random UUID with dashes stripped,
/// 32 lowercase hex characters. Doubles as `SessionId` and `X-RequestId`
/// for the lifetime of the synthesis.
pub fn new_connection_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl Connection {
    pub fn new(id: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: ConnectionState::Disconnected,
            created_at: now,
            last_activity: now,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::info!(id = %self.id, from = ?self.state, to = ?next, "connection state transition");
        self.state = next;
        self.touch();
    }
}

/// Builds the Edge TTS WebSocket URL for `connection_id`, substituting a
/// freshly derived `Sec-MS-GEC` token.
pub fn build_synth_url(connection_id: &str) -> SpeechResult<String> {
    let token = generate_sec_ms_gec()?;
    Ok(format!(
        "{SYNTH_URL_BASE}&Sec-MS-GEC={token}&Sec-MS-GEC-Version={SEC_MS_GEC_VERSION}&ConnectionId={connection_id}"
    ))
}

/// Applies the browser-like handshake headers Edge TTS expects.
pub fn configure_request(
    mut request: tokio_tungstenite::tungstenite::http::Request<()>,
    sec_ms_gec: &str,
) -> SpeechResult<tokio_tungstenite::tungstenite::http::Request<()>> {
    let headers = request.headers_mut();
    headers.insert(
        "User-Agent",
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36 Edg/143.0.0.0",
        ),
    );
    headers.insert(
        "Origin",
        HeaderValue::from_static("chrome-extension://jdiccldimpdaibmpdkjnbmckianbfold"),
    );
    headers.insert(
        "Sec-MS-GEC",
        HeaderValue::from_str(sec_ms_gec).map_err(|e| SpeechError::SocketError(e.to_string()))?,
    );
    headers.insert("Sec-MS-GEC-Version", HeaderValue::from_static(SEC_MS_GEC_VERSION));
    Ok(request)
}

#[derive(Deserialize)]
struct MetadataBody {
    #[serde(rename = "Metadata")]
    metadata: Vec<MetadataEntry>,
}

#[derive(Deserialize)]
struct MetadataEntry {
    #[serde(rename = "Type")]
    type_: String,
    #[serde(rename = "Data")]
    data: MetadataData,
}

#[derive(Deserialize)]
struct MetadataData {
    text: MetadataText,
}

#[derive(Deserialize)]
struct MetadataText {
    #[serde(rename = "Text")]
    text: String,
    #[serde(rename = "Length")]
    length: usize,
}

/// Outcome of dispatching one inbound text frame.
#[derive(Debug, PartialEq)]
pub enum TextDispatchOutcome {
    /// `turn.start`, `audio.metadata`, or `response` — keep reading.
    Continue,
    /// `turn.end` — normal termination, the caller should close the socket.
    TurnEnd,
}

impl Connection {
    /// Dispatches one inbound text frame for `request_id`'s session,
    /// mutating `session` and `buffer` as dictated by the frame's `Path`.
    ///
    /// Pulled out of the async receive loop so it can be exercised with
    /// synthetic frames in tests, against an in-process mock transport
    /// rather than the live service.
    pub fn dispatch_text_frame(
        &mut self,
        session: &mut Session,
        buffer: &BufferService,
        request_id: &str,
        message: &str,
    ) -> SpeechResult<TextDispatchOutcome> {
        let (headers, body) = decode_text_frame(message)?;
        let path = header_value(&headers, "Path").unwrap_or("");

        if let Some(frame_id) = header_value(&headers, "X-RequestId") {
            if frame_id != request_id {
                tracing::warn!(expected = request_id, got = frame_id, "dropping frame for unknown session");
                return Ok(TextDispatchOutcome::Continue);
            }
        }

        match path {
            "turn.start" => {
                self.touch();
                buffer.create(request_id, true)?;
                Ok(TextDispatchOutcome::Continue)
            }
            "audio.metadata" => {
                self.handle_audio_metadata(session, body)?;
                Ok(TextDispatchOutcome::Continue)
            }
            "response" => {
                tracing::debug!(id = %self.id, "received response frame");
                Ok(TextDispatchOutcome::Continue)
            }
            "turn.end" => {
                self.touch();
                Ok(TextDispatchOutcome::TurnEnd)
            }
            other => {
                tracing::warn!(id = %self.id, path = other, "dropping unknown inbound path");
                Ok(TextDispatchOutcome::Continue)
            }
        }
    }

    /// Dispatches one inbound binary (`audio`) frame: appends the MP3
    /// payload to both the session's own chunk list and the streaming
    /// buffer, preserving wire order in both places.
    pub fn dispatch_binary_frame(
        &mut self,
        session: &mut Session,
        buffer: &BufferService,
        request_id: &str,
        frame: &[u8],
    ) -> SpeechResult<()> {
        let (headers, payload) = decode_binary_frame(frame)?;
        let path = header_value(&headers, "Path").unwrap_or("");
        if path != "audio" {
            return Ok(());
        }
        if let Some(frame_id) = header_value(&headers, "X-RequestId") {
            if frame_id != request_id {
                tracing::warn!(expected = request_id, got = frame_id, "dropping audio frame for unknown session");
                return Ok(());
            }
        }

        session.audio_chunks.push(payload.to_vec());
        buffer.append(request_id, payload)?;
        self.touch();
        Ok(())
    }

    fn handle_audio_metadata(&mut self, session: &mut Session, body: &str) -> SpeechResult<()> {
        let parsed: MetadataBody =
            serde_json::from_str(body).map_err(|_| SpeechError::MalformedText)?;
        for entry in parsed.metadata {
            if entry.type_ == "WordBoundary" {
                session.record_boundary(&entry.data.text.text, entry.data.text.length);
            }
        }
        Ok(())
    }
}

/// Estimates playback duration in milliseconds from total byte count and
/// the output format's bitrate (`bytes * 8 / (bitRateKbps * 1000)` seconds).
pub fn estimate_duration_ms(total_bytes: usize) -> u64 {
    let bits = total_bytes as u64 * 8;
    let bits_per_sec = EDGE_OUTPUT_FORMAT.bitrate_kbps as u64 * 1000;
    (bits * 1000) / bits_per_sec.max(1)
}

/// Drives one synthesis turn over an already-established transport: sends
/// `speech.config` + `ssml`, reads frames until `turn.end` or an error,
/// finalizes the buffer, and closes gracefully.
///
/// Generic over the transport so it can be driven by a mock `Sink`/`Stream`
/// pair in tests instead of a live socket, per the synthesis pipeline's
/// test-tooling guidance to exercise the async receive loop against an
/// in-process transport rather than the live Edge endpoint. `run_attempt`
/// is the only caller that supplies a real `WebSocketStream`.
async fn drive_turn<T>(
    connection: &mut Connection,
    session: &mut Session,
    buffer: &BufferService,
    ssml: &str,
    config: &CoordinatorConfig,
    cancel: &mut tokio::sync::watch::Receiver<bool>,
    transport: &mut T,
) -> SpeechResult<()>
where
    T: Sink<Message, Error = WsError> + Stream<Item = Result<Message, WsError>> + Unpin,
{
    buffer.create(&connection.id, true)?;

    transport
        .send(Message::Text(build_speech_config_frame(&connection.id, OUTPUT_FORMAT)))
        .await
        .map_err(|e| SpeechError::SocketError(e.to_string()))?;

    transport
        .send(Message::Text(build_ssml_frame(&connection.id, ssml)))
        .await
        .map_err(|e| SpeechError::SocketError(e.to_string()))?;

    connection.transition(ConnectionState::Synthesizing);

    let deadline = tokio::time::sleep(config.total_timeout);
    tokio::pin!(deadline);

    let result = loop {
        tokio::select! {
            _ = &mut deadline => {
                break Err(SpeechError::Timeout);
            }
            changed = cancel.changed() => {
                if changed.is_ok() && *cancel.borrow() {
                    break Err(SpeechError::Cancelled);
                }
            }
            message = transport.next() => {
                match message {
                    None => break Err(SpeechError::UnexpectedClose(None)),
                    Some(Err(e)) => break Err(SpeechError::SocketError(e.to_string())),
                    Some(Ok(Message::Text(text))) => {
                        match connection.dispatch_text_frame(session, buffer, &connection.id, &text) {
                            Ok(TextDispatchOutcome::Continue) => continue,
                            Ok(TextDispatchOutcome::TurnEnd) => break Ok(()),
                            Err(e) => break Err(e),
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Err(e) = connection.dispatch_binary_frame(session, buffer, &connection.id, &bytes) {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break Err(SpeechError::UnexpectedClose(frame.map(|f| f.code.into())));
                    }
                    Some(Ok(_)) => continue,
                }
            }
        }
    };

    match &result {
        Ok(()) => {
            connection.transition(ConnectionState::Disconnected);
            if session.audio_len() == 0 {
                buffer.mark_completed(&connection.id);
                let _ = tokio::time::timeout(config.graceful_close, transport.send(Message::Close(None))).await;
                return Err(SpeechError::NoAudioReceived);
            }
            let duration_ms = estimate_duration_ms(session.audio_len());
            tracing::info!(id = %connection.id, duration_ms, "synthesis turn ended");
            buffer.mark_completed(&connection.id);
        }
        Err(_) => {
            connection.transition(ConnectionState::Error);
            buffer.mark_completed(&connection.id);
        }
    }

    let _ = tokio::time::timeout(config.graceful_close, transport.send(Message::Close(None))).await;

    result
}

/// Drives one full synthesis attempt over a live WebSocket: connect, then
/// hand off to [`drive_turn`].
///
/// This is the one function in the crate that actually touches the
/// network; everything it delegates to (`dispatch_text_frame`,
/// `dispatch_binary_frame`, `drive_turn`) is pure/generic enough to unit
/// test without a live socket.
pub async fn run_attempt(
    connection: &mut Connection,
    session: &mut Session,
    buffer: &BufferService,
    ssml: &str,
    config: &CoordinatorConfig,
    cancel: &mut tokio::sync::watch::Receiver<bool>,
) -> SpeechResult<()> {
    connection.transition(ConnectionState::Connecting);

    let url = build_synth_url(&connection.id)?;
    let sec_ms_gec = url
        .split("Sec-MS-GEC=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .unwrap_or_default()
        .to_string();

    let request = url
        .as_str()
        .into_client_request()
        .map_err(|e| SpeechError::SocketError(e.to_string()))?;
    let request = configure_request(request, &sec_ms_gec)?;

    let connect = tokio_tungstenite::connect_async(request);
    let (mut ws_stream, _response) = tokio::time::timeout(config.conn_timeout, connect)
        .await
        .map_err(|_| SpeechError::Timeout)?
        .map_err(|e| SpeechError::SocketError(e.to_string()))?;

    connection.transition(ConnectionState::Connected);

    drive_turn(connection, session, buffer, ssml, config, cancel, &mut ws_stream).await
}

/// An in-process `Sink`/`Stream` pair standing in for a live `WebSocketStream`,
/// so [`drive_turn`] can be exercised end-to-end against scripted frames.
#[cfg(test)]
struct MockTransport {
    inbound: std::collections::VecDeque<Message>,
    outbound: Vec<Message>,
}

#[cfg(test)]
impl MockTransport {
    fn new(inbound: Vec<Message>) -> Self {
        Self {
            inbound: inbound.into(),
            outbound: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Stream for MockTransport {
    type Item = Result<Message, WsError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::task::Poll::Ready(self.inbound.pop_front().map(Ok))
    }
}

#[cfg(test)]
impl Sink<Message> for MockTransport {
    type Error = WsError;

    fn poll_ready(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn start_send(mut self: std::pin::Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.outbound.push(item);
        Ok(())
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_close(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
}
