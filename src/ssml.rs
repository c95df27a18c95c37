//! SSML document assembly and speech parameter mapping.
//!
//! The envelope shape and XML escaping are ported from
//! `BlacK201-edge-tts`'s `build_ssml` (same `xml::escape` usage, same
//! `format!` assembly); the rate/pitch/volume handling is new, since the
//! teacher passes preset keywords straight through where this spec requires
//! numeric-to-percent mapping.

use xml::escape::{escape_str_attribute, escape_str_pcdata};

use crate::error::{SpeechError, SpeechResult};

/// Speech synthesis parameters accepted by [`build_ssml`].
#[derive(Debug, Clone)]
pub struct SpeechParams<'a> {
    pub voice: &'a str,
    pub language: Option<&'a str>,
    pub rate: Option<f64>,
    pub pitch: Option<f64>,
    pub volume: Option<f64>,
}

impl Default for SpeechParams<'_> {
    fn default() -> Self {
        Self {
            voice: "en-US-AriaNeural",
            language: None,
            rate: None,
            pitch: None,
            volume: None,
        }
    }
}

const PARAM_DEFAULT: f64 = 1.0;
const PARAM_MIN: f64 = 0.0;
const PARAM_MAX: f64 = 2.0;

const MICROSOFT_VOICE_PREFIX: &str = "Microsoft Server Speech Text to Speech Voice (";

/// Maps a numeric parameter in `[0.0, 2.0]` (clamped) to the percent string
/// Edge TTS expects, e.g. `1.5 -> "+50%"`, `0.0 -> "-100%"`.
fn map_param_percent(value: Option<f64>) -> String {
    let x = value.unwrap_or(PARAM_DEFAULT).clamp(PARAM_MIN, PARAM_MAX);
    let delta = ((x - 1.0) * 100.0).round() as i64;
    if delta >= 0 {
        format!("+{delta}%")
    } else {
        format!("{delta}%")
    }
}

/// Transforms a short voice identifier like `en-US-AriaNeural` into the full
/// Microsoft voice name Edge TTS expects. Identifiers already carrying the
/// `Microsoft Server Speech Text to Speech Voice (` prefix pass through
/// unchanged.
///
/// Tolerates a 2-3 letter language code, an optional script/region sub-tag,
/// a region code, and a trailing name segment: `{lang}[-{sub}]-{region}-{name}`.
pub fn resolve_voice_name(voice: &str) -> SpeechResult<String> {
    if voice.starts_with(MICROSOFT_VOICE_PREFIX) {
        return Ok(voice.to_string());
    }

    let parts: Vec<&str> = voice.split('-').collect();
    // en-US-AriaNeural -> ["en", "US", "AriaNeural"]  (3 parts, no sub-tag)
    // zh-Hans-CN-XiaoxiaoNeural -> 4 parts, with a script sub-tag
    let (locale_parts, name) = match parts.len() {
        3 => (&parts[..2], parts[2]),
        4 => (&parts[..3], parts[3]),
        _ => return Err(SpeechError::InvalidVoice(voice.to_string())),
    };

    let lang = locale_parts[0];
    if lang.len() < 2 || lang.len() > 3 || !lang.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(SpeechError::InvalidVoice(voice.to_string()));
    }
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SpeechError::InvalidVoice(voice.to_string()));
    }
    for part in &locale_parts[1..] {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SpeechError::InvalidVoice(voice.to_string()));
        }
    }

    let locale = locale_parts.join("-");
    Ok(format!("{MICROSOFT_VOICE_PREFIX}{locale}, {name})"))
}

/// Extracts the locale (e.g. `"en-US"`) from a short voice identifier.
fn locale_from_voice(voice: &str) -> Option<String> {
    let parts: Vec<&str> = voice.split('-').collect();
    match parts.len() {
        3 => Some(format!("{}-{}", parts[0], parts[1])),
        4 => Some(format!("{}-{}-{}", parts[0], parts[1], parts[2])),
        _ => None,
    }
}

/// Builds the SSML document for one synthesis request.
///
/// Validates text length (`Config.EmptyText`/`Config.TextTooLong`) and the
/// voice identifier (`Config.InvalidVoice`) before assembling the document,
/// then re-checks the assembled byte length against `max_ssml_bytes`.
pub fn build_ssml(
    text: &str,
    params: &SpeechParams<'_>,
    max_text_chars: usize,
    max_ssml_bytes: usize,
) -> SpeechResult<String> {
    if text.trim().is_empty() {
        return Err(SpeechError::EmptyText);
    }
    let char_count = text.chars().count();
    if char_count > max_text_chars {
        return Err(SpeechError::TextTooLong {
            max: max_text_chars,
            actual: char_count,
        });
    }

    let voice_name = resolve_voice_name(params.voice)?;
    let language = params
        .language
        .map(str::to_string)
        .or_else(|| locale_from_voice(params.voice))
        .unwrap_or_else(|| "en-US".to_string());

    let rate = map_param_percent(params.rate);
    let pitch = map_param_percent(params.pitch);
    let volume = map_param_percent(params.volume);

    let ssml = format!(
        "<speak version=\"1.0\" xmlns=\"http://www.w3.org/2001/10/synthesis\" \
         xmlns:mstts=\"https://www.w3.org/2001/mstts\" xml:lang=\"{}\">\
         <voice name=\"{}\">\
         <prosody rate=\"{}\" pitch=\"{}\" volume=\"{}\">{}</prosody>\
         </voice></speak>",
        escape_str_attribute(&language),
        escape_str_attribute(&voice_name),
        escape_str_attribute(&rate),
        escape_str_attribute(&pitch),
        escape_str_attribute(&volume),
        escape_str_pcdata(text),
    );

    if ssml.len() > max_ssml_bytes {
        return Err(SpeechError::TextTooLong {
            max: max_ssml_bytes,
            actual: ssml.len(),
        });
    }

    Ok(ssml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_mapping_matches_the_documented_table() {
        assert_eq!(map_param_percent(Some(1.0)), "+0%");
        assert_eq!(map_param_percent(Some(0.0)), "-100%");
        assert_eq!(map_param_percent(Some(2.0)), "+100%");
        assert_eq!(map_param_percent(Some(1.5)), "+50%");
        assert_eq!(map_param_percent(None), "+0%");
    }

    #[test]
    fn param_mapping_clamps_out_of_range_input() {
        assert_eq!(map_param_percent(Some(-5.0)), "-100%");
        assert_eq!(map_param_percent(Some(10.0)), "+100%");
    }

    #[test]
    fn resolve_voice_name_transforms_standard_identifier() {
        let resolved = resolve_voice_name("en-US-AriaNeural").unwrap();
        assert_eq!(
            resolved,
            "Microsoft Server Speech Text to Speech Voice (en-US, AriaNeural)"
        );
    }

    #[test]
    fn resolve_voice_name_tolerates_script_subtag() {
        let resolved = resolve_voice_name("zh-Hans-CN-XiaoxiaoNeural").unwrap();
        assert_eq!(
            resolved,
            "Microsoft Server Speech Text to Speech Voice (zh-Hans-CN, XiaoxiaoNeural)"
        );
    }

    #[test]
    fn resolve_voice_name_passes_through_already_resolved_names() {
        let full = "Microsoft Server Speech Text to Speech Voice (en-US, AriaNeural)";
        assert_eq!(resolve_voice_name(full).unwrap(), full);
    }

    #[test]
    fn resolve_voice_name_rejects_malformed_identifier() {
        assert!(resolve_voice_name("not-a-voice").is_err());
        assert!(matches!(
            resolve_voice_name("not-a-voice"),
            Err(SpeechError::InvalidVoice(_))
        ));
    }

    #[test]
    fn build_ssml_happy_path_contains_expected_fragments() {
        let params = SpeechParams {
            voice: "en-US-AriaNeural",
            ..Default::default()
        };
        let ssml = build_ssml("Hi", &params, 4_000, 65_536).unwrap();
        assert!(ssml.contains("rate=\"+0%\""));
        assert!(ssml.contains("pitch=\"+0%\""));
        assert!(ssml.contains("volume=\"+0%\""));
        assert!(ssml.contains("Microsoft Server Speech Text to Speech Voice (en-US, AriaNeural)"));
        assert!(ssml.contains(">Hi<"));
    }

    #[test]
    fn build_ssml_rejects_empty_text() {
        let params = SpeechParams::default();
        assert!(matches!(
            build_ssml("   ", &params, 4_000, 65_536),
            Err(SpeechError::EmptyText)
        ));
    }

    #[test]
    fn build_ssml_rejects_text_over_the_character_limit() {
        let params = SpeechParams::default();
        let text = "a".repeat(10);
        assert!(matches!(
            build_ssml(&text, &params, 5, 65_536),
            Err(SpeechError::TextTooLong { max: 5, actual: 10 })
        ));
    }

    #[test]
    fn build_ssml_escapes_xml_special_characters() {
        let params = SpeechParams::default();
        let ssml = build_ssml("<a> & \"b\" 'c'", &params, 4_000, 65_536).unwrap();
        assert!(!ssml.contains("<a>"));
        assert!(ssml.contains("&lt;a&gt;"));
        assert!(ssml.contains("&amp;"));
    }

    #[test]
    fn build_ssml_defaults_language_from_voice_identifier() {
        let params = SpeechParams {
            voice: "fr-FR-DeniseNeural",
            ..Default::default()
        };
        let ssml = build_ssml("Bonjour", &params, 4_000, 65_536).unwrap();
        assert!(ssml.contains("xml:lang=\"fr-FR\""));
    }
}
