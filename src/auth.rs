//! `Sec-MS-GEC` auth token derivation.
//!
//! Ported from `BlacK201-edge-tts`'s `generate_sec_ms_gec_sync`: the tick
//! arithmetic and salt are kept verbatim, but failures now surface as
//! [`SpeechError::SkewAdjustment`] instead of panicking on the system clock.

use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{SpeechError, SpeechResult};

/// Offset (seconds) between the Unix epoch and the Windows FILETIME epoch.
const WINDOWS_EPOCH_OFFSET_SECS: u64 = 11_644_473_600;

/// 100-nanosecond intervals per second.
const TICKS_PER_SECOND: u64 = 10_000_000;

/// Salt appended to the tick count before hashing, fixed by the service.
const TOKEN_SALT: &str = "MSEdgeSpeechTTS";

/// The `Sec-MS-GEC-Version` value the service expects alongside the token.
pub const SEC_MS_GEC_VERSION: &str = "1-143.0.3650.139";

/// Derives the `Sec-MS-GEC` token from the current wall clock.
///
/// Computes Windows FILETIME ticks for "now", rounds down to the tick
/// count's last 5-minute boundary like the upstream service tolerates, and
/// hashes `"{ticks}MSEdgeSpeechTTS"` with SHA-256, returning the uppercase
/// hex digest.
pub fn generate_sec_ms_gec() -> SpeechResult<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| SpeechError::SkewAdjustment(e.to_string()))?
        .as_secs();

    let ticks = (now + WINDOWS_EPOCH_OFFSET_SECS) * TICKS_PER_SECOND;
    // Round down to a 5-minute boundary (300s * 10_000_000 ticks/s).
    let rounded = ticks - (ticks % (300 * TICKS_PER_SECOND));

    let data = format!("{rounded}{TOKEN_SALT}");
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    let digest = hasher.finalize();

    let mut token = String::with_capacity(digest.len() * 2);
    for byte in digest {
        token.push_str(&format!("{byte:02X}"));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_64_uppercase_hex_chars() {
        let token = generate_sec_ms_gec().expect("token generation should not fail");
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn token_is_deterministic_within_the_same_5_minute_window() {
        let a = generate_sec_ms_gec().unwrap();
        let b = generate_sec_ms_gec().unwrap();
        assert_eq!(a, b);
    }
}
