//! Pure, deterministic text predicates used by `server-session` to reject
//! Whisper-style hallucinated output (spec §4.6). No audio, no I/O — these
//! are unit-testable in isolation, grounded line-for-line on
//! `server/main.py`'s `clean_hallucination` and `server/utils.py`'s
//! `dedup_repeated_phrases` in the Python original.
//!
//! The Python source expresses most of this with backreference regexes
//! (`(.)\1{5,}`, `(.{2,8})\1{3,}`, ...) that the plain `regex` crate cannot
//! run (no backtracking, no backreferences). `fancy-regex` is used instead —
//! same syntax, backtracking engine — so the filters stay literal
//! translations rather than hand-rolled scans.

use fancy_regex::Regex;
use once_cell::sync::Lazy;

static REPEATED_CHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(.)\1{5,}").unwrap());
static REPEATED_SHORT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(.{2,8})\1{3,}").unwrap());
static REPEATED_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\b\w+\b)(?:\s+\1){4,}").unwrap());
static REPEATED_PHRASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\b\w+\s+\w+\b)(?:\s+\1){3,}").unwrap());

const MIN_TRUNCATED_LEN: usize = 10;

/// Reject or truncate hallucinated text. `None` means the whole string is
/// noise; `Some(truncated)` may be a prefix of the input.
pub fn clean_hallucination(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.chars().count() < 2 {
        return None;
    }

    if REPEATED_CHAR.is_match(text).unwrap_or(false) {
        return None;
    }

    if let Some(truncated) = reject_or_truncate(text, &REPEATED_SHORT_PATTERN) {
        return truncated;
    }
    if let Some(truncated) = reject_or_truncate(text, &REPEATED_WORD) {
        return truncated;
    }
    if let Some(truncated) = reject_or_truncate(text, &REPEATED_PHRASE) {
        return truncated;
    }

    if repeated_sentence(text) {
        return None;
    }

    let char_count = text.chars().count();
    if char_count > MIN_TRUNCATED_LEN {
        let ascii_count = text.chars().filter(|c| c.is_ascii()).count();
        if (ascii_count as f64) / (char_count as f64) < 0.10 {
            return None;
        }
    }

    Some(text.to_string())
}

/// Applies one repeating pattern: no match -> `None` (keep checking other
/// rules); match -> `Some(reject_or_truncated)`.
fn reject_or_truncate(text: &str, pattern: &Regex) -> Option<Option<String>> {
    let m = pattern.find(text).ok()??;
    let truncated = text[..m.start()].trim();
    if truncated.chars().count() >= MIN_TRUNCATED_LEN {
        Some(Some(truncated.to_string()))
    } else {
        Some(None)
    }
}

fn repeated_sentence(text: &str) -> bool {
    let sentences: Vec<String> = text
        .split(['.', '!', '?'])
        .map(|s| s.trim().to_lowercase())
        .filter(|s| s.chars().count() > 10)
        .collect();

    if sentences.len() < 3 {
        return false;
    }

    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for s in &sentences {
        *counts.entry(s.as_str()).or_insert(0) += 1;
    }
    counts.values().any(|&c| c >= 3)
}

/// Truncate partial transcripts at the first over-repeated phrase
/// (1-3 words), used only for `partial` messages. The result is always a
/// prefix of `text` split on whitespace.
pub fn dedup_repeated_phrases(text: &str, max_repeats: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_repeats {
        return text.to_string();
    }

    for start in 0..words.len() {
        let remaining = words.len() - start;
        let max_phrase_len = (remaining / 2).min(3);
        for phrase_len in 1..=max_phrase_len {
            let phrase = &words[start..start + phrase_len];
            let mut count = 0;
            let mut i = start;
            while i + phrase_len <= words.len() {
                if &words[i..i + phrase_len] == phrase {
                    count += 1;
                    i += phrase_len;
                } else {
                    break;
                }
            }
            if count > max_repeats {
                return words[..start + phrase_len].join(" ");
            }
        }
    }

    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_very_short_text() {
        assert_eq!(clean_hallucination("a"), None);
        assert_eq!(clean_hallucination("  "), None);
    }

    #[test]
    fn rejects_repeated_character_runs() {
        assert_eq!(clean_hallucination("లిలిలిలిలిలిలి"), None);
        assert_eq!(clean_hallucination("aaaaaaaaaa"), None);
    }

    #[test]
    fn truncates_repeated_short_pattern_when_prefix_is_long_enough() {
        let text = "this is a valid prefix lilililililili";
        let result = clean_hallucination(text);
        assert_eq!(result.as_deref(), Some("this is a valid prefix"));
    }

    #[test]
    fn rejects_repeated_short_pattern_with_too_short_prefix() {
        assert_eq!(clean_hallucination("ab lilililili"), None);
    }

    #[test]
    fn truncates_repeated_word() {
        let text = "a meaningful lead-in sentence word word word word word";
        let result = clean_hallucination(text).unwrap();
        assert_eq!(result, "a meaningful lead-in sentence");
    }

    #[test]
    fn truncates_repeated_two_word_phrase() {
        let text =
            "plenty of context here wonderful banana wonderful banana wonderful banana wonderful banana";
        let result = clean_hallucination(text).unwrap();
        assert_eq!(result, "plenty of context here");
    }

    #[test]
    fn rejects_repeated_sentences() {
        let text = "This is a long sentence. This is a long sentence. This is a long sentence.";
        assert_eq!(clean_hallucination(text), None);
    }

    #[test]
    fn rejects_mostly_non_ascii_text() {
        let text = "ありがとうございますありがとうございます";
        assert_eq!(clean_hallucination(text), None);
    }

    #[test]
    fn accepts_clean_text_unchanged() {
        let text = "the quick brown fox jumps over the lazy dog";
        assert_eq!(clean_hallucination(text).as_deref(), Some(text));
    }

    #[test]
    fn clean_hallucination_is_idempotent_on_accept_and_reject() {
        let accepted = "a perfectly ordinary sentence about nothing in particular";
        let once = clean_hallucination(accepted);
        let twice = once.as_deref().and_then(clean_hallucination);
        assert_eq!(once, twice);

        let rejected = "aaaaaaaaaaaaaaaa";
        assert_eq!(clean_hallucination(rejected), None);
        assert_eq!(
            clean_hallucination(rejected).and_then(|s| clean_hallucination(&s)),
            None
        );
    }

    #[test]
    fn dedup_truncates_repeated_phrase() {
        let text = "the cat the cat the cat the cat the cat";
        assert_eq!(dedup_repeated_phrases(text, 3), "the cat");
    }

    #[test]
    fn dedup_is_a_prefix_of_input_by_word_split() {
        let text = "alpha beta alpha beta alpha beta alpha beta alpha beta gamma";
        let words: Vec<&str> = text.split_whitespace().collect();
        let result = dedup_repeated_phrases(text, 3);
        let result_words: Vec<&str> = result.split_whitespace().collect();
        assert_eq!(&words[..result_words.len()], result_words.as_slice());
    }

    #[test]
    fn dedup_leaves_short_text_untouched() {
        assert_eq!(dedup_repeated_phrases("hi there", 3), "hi there");
    }
}
