//! Word-boundary timing compensation and character-position resolution.
//!
//! Edge TTS reports word boundaries in ticks (100ns units) offset by a
//! ~875ms padding the service inserts, and reports the spoken word text
//! rather than a character index into the caller's original text. This
//! module reconstructs the character span in the original text with a
//! forward-only cursor so boundaries stay monotone even across server-side
//! normalization.

/// Ticks of padding Edge TTS inserts before the first boundary.
const COMPENSATION_TICKS: i64 = 8_750_000;

/// 100-nanosecond intervals per millisecond.
const TICKS_PER_MS: i64 = 10_000;

/// A resolved word-boundary event, in original-text character units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryEvent {
    pub char_index: usize,
    pub char_length: usize,
}

/// Subtracts the service's padding offset from a raw tick offset, clamped
/// to zero.
pub fn compensate(raw_offset_ticks: i64) -> i64 {
    (raw_offset_ticks - COMPENSATION_TICKS).max(0)
}

/// Converts a (already compensated) tick offset to milliseconds.
pub fn ticks_to_ms(compensated_ticks: i64) -> i64 {
    compensated_ticks / TICKS_PER_MS
}

/// Cursor tracking the forward-only search position within the original
/// text, owned per-[`crate::session::Session`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryCursor {
    last_position: usize,
}

impl BoundaryCursor {
    pub fn new() -> Self {
        Self { last_position: 0 }
    }

    /// Resolves one reported word into a character span within
    /// `original_text`, advancing the cursor past the resolved span.
    ///
    /// Search order: exact case-insensitive substring match from the
    /// cursor; failing that, a punctuation-insensitive scan of same-length
    /// windows; failing that, fall back to the cursor position itself
    /// (never raises).
    pub fn resolve(&mut self, original_text: &str, word: &str, reported_length: usize) -> BoundaryEvent {
        let chars: Vec<char> = original_text.chars().collect();
        let total_len = chars.len();
        let start = self.last_position.min(total_len);

        let char_index = find_exact(&chars, start, word)
            .or_else(|| find_punctuation_insensitive(&chars, start, word))
            .unwrap_or(start);

        let char_length = reported_length.min(total_len.saturating_sub(char_index));
        self.last_position = char_index + char_length;

        BoundaryEvent {
            char_index,
            char_length,
        }
    }
}

fn find_exact(chars: &[char], start: usize, word: &str) -> Option<usize> {
    let word_chars: Vec<char> = word.chars().collect();
    search_from_anywhere(chars, start, &word_chars, |a, b| {
        a.to_ascii_lowercase() == b.to_ascii_lowercase()
    })
}

fn search_from_anywhere(
    chars: &[char],
    start: usize,
    word_chars: &[char],
    eq: impl Fn(char, char) -> bool,
) -> Option<usize> {
    if word_chars.is_empty() || chars.len() < word_chars.len() {
        return None;
    }
    let last_start = chars.len() - word_chars.len();
    for i in start..=last_start {
        if chars[i..i + word_chars.len()]
            .iter()
            .zip(word_chars.iter())
            .all(|(&a, &b)| eq(a, b))
        {
            return Some(i);
        }
    }
    None
}

/// Punctuation-insensitive scan: compares each same-length window of the
/// original text against `word` after stripping non-alphanumeric characters
/// from both sides.
fn find_punctuation_insensitive(chars: &[char], start: usize, word: &str) -> Option<usize> {
    let stripped_word: String = word
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();
    if stripped_word.is_empty() || chars.len() < word.chars().count() {
        return None;
    }

    let window_len = word.chars().count();
    if chars.len() < window_len {
        return None;
    }
    let last_start = chars.len() - window_len;
    for i in start..=last_start {
        let window: String = chars[i..i + window_len]
            .iter()
            .filter(|c| c.is_alphanumeric())
            .flat_map(|c| c.to_lowercase())
            .collect();
        if window == stripped_word {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compensate_clamps_to_zero() {
        assert_eq!(compensate(0), 0);
        assert_eq!(compensate(1_000_000), 0);
        assert_eq!(compensate(8_750_000), 0);
        assert_eq!(compensate(8_850_000), 100_000);
    }

    #[test]
    fn ticks_to_ms_is_non_negative_and_advances_by_one_ms_per_10000_ticks() {
        let base = compensate(9_000_000);
        let next = compensate(9_000_000 + 10_000);
        assert!(ticks_to_ms(base) >= 0);
        assert_eq!(ticks_to_ms(next) - ticks_to_ms(base), 1);
    }

    #[test]
    fn boundary_mapping_matches_the_worked_tick_example() {
        let text = "Hello world";
        let mut cursor = BoundaryCursor::new();

        assert_eq!(compensate(8_850_000), 100_000);
        assert_eq!(ticks_to_ms(compensate(8_850_000)), 10);
        assert_eq!(compensate(12_850_000), 4_100_000);
        assert_eq!(ticks_to_ms(compensate(12_850_000)), 410);

        let hello = cursor.resolve(text, "Hello", 5);
        assert_eq!(hello, BoundaryEvent { char_index: 0, char_length: 5 });

        let world = cursor.resolve(text, "world", 5);
        assert_eq!(world, BoundaryEvent { char_index: 6, char_length: 5 });
    }

    #[test]
    fn boundaries_are_non_decreasing_across_a_whole_sentence() {
        let text = "The quick brown fox jumps";
        let mut cursor = BoundaryCursor::new();
        let words = ["The", "quick", "brown", "fox", "jumps"];
        let mut last = 0usize;
        for w in words {
            let ev = cursor.resolve(text, w, w.chars().count());
            assert!(ev.char_index >= last);
            last = ev.char_index;
        }
    }

    #[test]
    fn punctuation_insensitive_fallback_matches_normalized_word() {
        let text = "Well, hello there";
        let mut cursor = BoundaryCursor::new();
        // Server-reported word lacks the comma the original text carries.
        let ev = cursor.resolve(text, "Well", 4);
        assert_eq!(ev.char_index, 0);
    }

    #[test]
    fn unmatched_word_falls_back_to_cursor_without_panicking() {
        let text = "abc";
        let mut cursor = BoundaryCursor::new();
        let ev = cursor.resolve(text, "zzzzzz", 6);
        assert_eq!(ev.char_index, 0);
        assert_eq!(ev.char_length, 3);
    }

    #[test]
    fn char_length_is_clamped_to_remaining_text() {
        let text = "hi";
        let mut cursor = BoundaryCursor::new();
        let ev = cursor.resolve(text, "hi", 100);
        assert_eq!(ev.char_length, 2);
    }
}
