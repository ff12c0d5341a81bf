//! Whole-word text matching used by the evaluator and decision functions.

/// Lowercased alphanumeric words of `text`, in order.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// True if `phrase` occurs in `words` as consecutive whole words.
pub fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle: Vec<String> = self::words(phrase);
    if needle.is_empty() || needle.len() > words.len() {
        return false;
    }
    words.windows(needle.len()).any(|window| window == needle.as_slice())
}

/// True if any phrase in `phrases` occurs in `words`.
pub fn contains_any(words: &[String], phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| contains_phrase(words, phrase))
}

/// Canonical form for comparing goal texts: lowercase words joined by single spaces.
pub fn normalize(text: &str) -> String {
    words(text).join(" ")
}
