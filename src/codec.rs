//! Wire-level framing: header-block text frames and length-prefixed binary
//! frames.
//!
//! The header parsing and binary-frame layout are lifted from
//! `BlacK201-edge-tts`'s `parse_headers` and the inline binary parsing in
//! `process_socket_data`, turned into standalone, independently testable
//! functions with the `Protocol.Malformed*` error paths the original
//! `anyhow!`-string errors didn't distinguish.

use chrono::Utc;

use crate::error::{SpeechError, SpeechResult};

/// A parsed header block: `(name, value)` pairs in wire order.
pub type Headers = Vec<(String, String)>;

/// Case-insensitively looks up a header value by name.
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parses a `Name:Value\r\nName:Value...` header block (no trailing blank line).
fn parse_header_block(block: &str) -> Headers {
    block
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut iter = line.splitn(2, ':');
            let name = iter.next().unwrap_or("").to_string();
            let value = iter.next().unwrap_or("").to_string();
            (name, value)
        })
        .collect()
}

/// Decodes an inbound text frame into its header block and body.
///
/// Returns [`SpeechError::MalformedText`] if the `\r\n\r\n` separator is
/// missing.
pub fn decode_text_frame(message: &str) -> SpeechResult<(Headers, &str)> {
    let idx = message
        .find("\r\n\r\n")
        .ok_or(SpeechError::MalformedText)?;
    let (header_block, rest) = message.split_at(idx);
    let body = &rest[4..];
    Ok((parse_header_block(header_block), body))
}

/// Encodes a header map plus body into the wire text-frame format.
///
/// Headers are emitted in the order given, each as `Name:Value\r\n`,
/// followed by a blank line and the body.
pub fn encode_text_frame(headers: &[(&str, &str)], body: &str) -> String {
    let mut out = String::new();
    for (name, value) in headers {
        out.push_str(name);
        out.push(':');
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out.push_str(body);
    out
}

/// Decodes an inbound binary frame: `[u16 BE headerLen][header block][payload]`.
///
/// Returns [`SpeechError::MalformedBinary`] if the frame is shorter than 2
/// bytes, or if `headerLen` exceeds the bytes remaining after the length
/// prefix.
pub fn decode_binary_frame(frame: &[u8]) -> SpeechResult<(Headers, &[u8])> {
    if frame.len() < 2 {
        return Err(SpeechError::MalformedBinary);
    }
    let header_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    if frame.len() < 2 + header_len {
        return Err(SpeechError::MalformedBinary);
    }
    let header_block = String::from_utf8_lossy(&frame[2..2 + header_len]);
    let headers = parse_header_block(&header_block);
    let payload = &frame[2 + header_len..];
    Ok((headers, payload))
}

/// Formats "now" as an RFC 3339 timestamp with 6-digit fractional seconds
/// and a trailing `Z`, matching the `X-Timestamp` header format Edge TTS
/// expects (milliseconds padded to microsecond width).
pub fn format_timestamp() -> String {
    let now = Utc::now();
    now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Builds the outbound `speech.config` text frame.
pub fn build_speech_config_frame(request_id: &str, output_format: &str) -> String {
    let body = format!(
        "{{\"context\":{{\"synthesis\":{{\"audio\":{{\"metadataoptions\":\
         {{\"sentenceBoundaryEnabled\":false,\"wordBoundaryEnabled\":true}},\
         \"outputFormat\":\"{output_format}\"}}}}}}}}"
    );
    encode_text_frame(
        &[
            ("X-RequestId", request_id),
            ("X-Timestamp", &format_timestamp()),
            ("Content-Type", "application/json; charset=utf-8"),
            ("Path", "speech.config"),
        ],
        &body,
    )
}

/// Builds the outbound `ssml` text frame.
pub fn build_ssml_frame(request_id: &str, ssml: &str) -> String {
    encode_text_frame(
        &[
            ("X-RequestId", request_id),
            ("X-Timestamp", &format_timestamp()),
            ("Content-Type", "application/ssml+xml"),
            ("Path", "ssml"),
        ],
        ssml,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_round_trips_through_encode_decode() {
        let encoded = encode_text_frame(
            &[("X-RequestId", "abc123"), ("Path", "turn.end")],
            "body content",
        );
        let (headers, body) = decode_text_frame(&encoded).unwrap();
        assert_eq!(header_value(&headers, "x-requestid"), Some("abc123"));
        assert_eq!(header_value(&headers, "Path"), Some("turn.end"));
        assert_eq!(body, "body content");
    }

    #[test]
    fn header_names_without_a_colon_space_are_parsed() {
        let (headers, _) = decode_text_frame("Path:turn.start\r\n\r\n{}").unwrap();
        assert_eq!(header_value(&headers, "Path"), Some("turn.start"));
    }

    #[test]
    fn x_request_id_lookup_is_case_insensitive() {
        let (headers, _) = decode_text_frame("x-requestid:abc\r\n\r\n").unwrap();
        assert_eq!(header_value(&headers, "X-RequestId"), Some("abc"));
    }

    #[test]
    fn missing_separator_is_malformed_text() {
        let result = decode_text_frame("X-RequestId:abc");
        assert!(matches!(result, Err(SpeechError::MalformedText)));
    }

    #[test]
    fn binary_frame_round_trips_through_encode_decode() {
        let header_block = "X-RequestId:abc\r\nPath:audio";
        let mut frame = Vec::new();
        frame.extend_from_slice(&(header_block.len() as u16).to_be_bytes());
        frame.extend_from_slice(header_block.as_bytes());
        frame.extend_from_slice(&[0xFF, 0xE3, 0x00, 0x00]);

        let (headers, payload) = decode_binary_frame(&frame).unwrap();
        assert_eq!(header_value(&headers, "Path"), Some("audio"));
        assert_eq!(payload, &[0xFF, 0xE3, 0x00, 0x00]);
    }

    #[test]
    fn binary_frame_shorter_than_two_bytes_is_malformed() {
        assert!(matches!(
            decode_binary_frame(&[0x01]),
            Err(SpeechError::MalformedBinary)
        ));
        assert!(matches!(decode_binary_frame(&[]), Err(SpeechError::MalformedBinary)));
    }

    #[test]
    fn binary_frame_with_header_len_past_payload_is_malformed() {
        let frame = [0x00, 0x10, 0x41, 0x42]; // claims 16-byte header, only 2 bytes present
        assert!(matches!(
            decode_binary_frame(&frame),
            Err(SpeechError::MalformedBinary)
        ));
    }

    #[test]
    fn any_truncated_prefix_of_a_valid_frame_fails_without_panicking() {
        let header_block = "Path:audio";
        let mut frame = Vec::new();
        frame.extend_from_slice(&(header_block.len() as u16).to_be_bytes());
        frame.extend_from_slice(header_block.as_bytes());
        frame.extend_from_slice(b"payload");

        for len in 0..frame.len() {
            let _ = decode_binary_frame(&frame[..len]);
        }
    }

    #[test]
    fn speech_config_frame_contains_output_format_and_path() {
        let frame = build_speech_config_frame("req-1", "audio-24khz-48kbitrate-mono-mp3");
        assert!(frame.contains("Path:speech.config"));
        assert!(frame.contains("audio-24khz-48kbitrate-mono-mp3"));
        assert!(frame.contains("X-RequestId:req-1"));
    }

    #[test]
    fn timestamp_has_six_digit_fractional_seconds_and_trailing_z() {
        let ts = format_timestamp();
        assert!(ts.ends_with('Z'));
        let frac = &ts[ts.find('.').unwrap() + 1..ts.len() - 1];
        assert_eq!(frac.len(), 6);
        assert!(frac.chars().all(|c| c.is_ascii_digit()));
    }
}
