//! S2 soft lexical match: keyword-overlap check rather than exact equality.

const FILLER_PHRASES: &[&str] = &["a ", "an ", "the ", "or equivalent"];
const KEYWORD_MIN_LEN: usize = 2;
const HIT_RATIO_THRESHOLD: f64 = 0.5;

fn strip_fillers(text: &str) -> String {
    let mut out = text.to_string();
    for phrase in FILLER_PHRASES {
        out = out.replace(phrase, "");
    }
    out
}

fn keywords(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() >= KEYWORD_MIN_LEN)
        .collect()
}

/// Lowercase both sides, strip filler phrases from `expected`, extract
/// keywords (len >= 2) from `expected`, and match iff at least half of those
/// keywords appear as substrings of `actual`. An empty expected-keyword set
/// always matches.
pub fn soft_match(expected: &str, actual: &str) -> bool {
    let expected_lower = strip_fillers(&expected.to_lowercase());
    let actual_lower = actual.to_lowercase();

    let expected_keywords = keywords(&expected_lower);
    if expected_keywords.is_empty() {
        return true;
    }

    let hits = expected_keywords
        .iter()
        .filter(|kw| actual_lower.contains(kw.as_str()))
        .count();
    (hits as f64 / expected_keywords.len() as f64) >= HIT_RATIO_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_expected_always_matches() {
        assert!(soft_match("", "anything at all"));
    }

    #[test]
    fn exact_substring_matches() {
        assert!(soft_match("the quick brown fox", "a quick brown fox jumped"));
    }

    #[test]
    fn half_keyword_overlap_matches_at_threshold() {
        // keywords: quick, brown, fox, jumped (4 total) -> need >= 2 hits
        assert!(soft_match("quick brown fox jumped", "the fox and the quick dog ran"));
    }

    #[test]
    fn low_overlap_does_not_match() {
        assert!(!soft_match("quick brown fox jumped over", "completely unrelated text here"));
    }

    #[test]
    fn filler_phrases_are_stripped_from_expected() {
        // "the" and "a" should not themselves count as keywords once stripped
        assert!(soft_match("the cat or equivalent", "a small cat was seen"));
    }

    #[test]
    fn is_case_insensitive() {
        assert!(soft_match("HELLO WORLD", "hello world, how are you"));
    }
}
