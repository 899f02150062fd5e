//! Text cleanup shared by the guards: decorative-symbol stripping, whitespace
//! collapsing, and the normalized form every dedup comparison uses.

use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

fn decorative_re() -> &'static Regex {
    static DECORATIVE_RE: OnceLock<Regex> = OnceLock::new();
    DECORATIVE_RE.get_or_init(|| {
        // Pictographs plus the joiners/selectors/modifiers that glue emoji sequences.
        Regex::new(
            r"[\p{Extended_Pictographic}\x{FE00}-\x{FE0F}\x{200D}\x{20E3}\x{1F3FB}-\x{1F3FF}\x{1F1E6}-\x{1F1FF}\x{E0020}-\x{E007F}]",
        )
        .expect("decorative symbol regex should compile")
    })
}

fn non_speech_re() -> &'static Regex {
    static NON_SPEECH_RE: OnceLock<Regex> = OnceLock::new();
    NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|background)\s*)\)",
        )
        .expect("non-speech regex should compile")
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text as it should be handed to a synthesis engine: no emoji, single spaces.
pub fn speakable_text(text: &str) -> String {
    collapse_whitespace(&decorative_re().replace_all(text, " "))
}

/// Comparison key for dedup checks. Case and spacing differences, as well as
/// decorative symbols, never make two messages distinct.
pub fn normalize_for_compare(text: &str) -> String {
    speakable_text(text).to_lowercase()
}

pub fn text_hash(normalized: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

/// Drop recognizer markers such as `[silence]` or `(music)` from a transcript.
pub fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    collapse_whitespace(&non_speech_re().replace_all(trimmed, " "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speakable_text_strips_emoji_and_selectors() {
        assert_eq!(speakable_text("Great serve! 🎾🔥"), "Great serve!");
        assert_eq!(speakable_text("Nice ❤️ work"), "Nice work");
        assert_eq!(speakable_text("Team 👨‍👩‍👧 effort"), "Team effort");
        assert_eq!(speakable_text("Thumbs 👍🏽 up"), "Thumbs up");
    }

    #[test]
    fn speakable_text_keeps_words_and_digits() {
        assert_eq!(speakable_text("  Hit 3 serves,\n then rest. "), "Hit 3 serves, then rest.");
    }

    #[test]
    fn normalize_ignores_case_spacing_and_emoji() {
        assert_eq!(
            normalize_for_compare("How do I   improve my SERVE? 🎾"),
            normalize_for_compare("how do i improve my serve?")
        );
    }

    #[test]
    fn normalize_keeps_distinct_text_distinct() {
        assert_ne!(
            normalize_for_compare("Focus on your toss"),
            normalize_for_compare("Focus on your grip")
        );
    }

    #[test]
    fn hash_matches_for_equal_normalized_text() {
        let a = text_hash(&normalize_for_compare("Keep your elbow up 💪"));
        let b = text_hash(&normalize_for_compare("keep your elbow up"));
        assert_eq!(a, b);
    }

    #[test]
    fn sanitize_transcript_drops_markers() {
        assert_eq!(sanitize_transcript("[silence] my backhand (noise) feels late"), "my backhand feels late");
        assert_eq!(sanitize_transcript("  [music]  "), "");
    }
}
