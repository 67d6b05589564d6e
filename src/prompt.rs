//! Prompt assembly for the speech-to-text binary.
//!
//! A prompt threads context into each segment's transcription: the cleaned
//! source title, a bounded slice of the description sidecar, and the tail of
//! the previous segment's transcript. Character budgets are enforced at word
//! boundaries, and double quotes are removed outright: the STT command line
//! may be logged or reconstructed, and embedded quotes have corrupted both
//! in the past. That stripping stays even though we exec without a shell.

use unicode_normalization::UnicodeNormalization;

/// Budget for the description portion of the prompt.
pub const MAX_DESCRIPTION_CHARS_FOR_PROMPT: usize = 400;
/// Budget for the previous-segment context tail.
pub const INTER_SEGMENT_CONTEXT_LENGTH: usize = 200;
/// Hard bound on the assembled prompt.
pub const MAX_TOTAL_PROMPT_CHARS: usize = 750;

/// Separator marking carried-over context from the previous segment.
const CONTEXT_PREFIX: &str = "[...] ";

/// Derive a human title from the original basename: drop the extension and
/// a trailing `[id]` tag, replace underscores with spaces, normalize to NFC.
pub fn clean_title(basename: &str) -> String {
    let stem = basename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(basename);
    let stem = match stem.rfind(" [") {
        Some(idx) if stem.ends_with(']') => &stem[..idx],
        _ => stem,
    };
    stem.chars()
        .map(|c| if c == '_' { ' ' } else { c })
        .nfc()
        .collect::<String>()
        .trim()
        .to_string()
}

/// First `max_chars` characters of `s`, pulled back to the nearest preceding
/// whitespace so no word is cut in half. Inputs that fit are returned whole.
pub fn truncate_at_word(s: &str, max_chars: usize) -> &str {
    let Some((cut, _)) = s.char_indices().nth(max_chars) else {
        return s;
    };
    let head = &s[..cut];
    match head.rfind(char::is_whitespace) {
        Some(idx) => &head[..idx],
        None => head,
    }
}

/// Tail of `prev` bounded to `max_chars`, with the leading partial word
/// stripped when the bound cut into one. Whitespace is the word boundary.
pub fn context_tail(prev: &str, max_chars: usize) -> String {
    let total = prev.chars().count();
    if total <= max_chars {
        return prev.trim().to_string();
    }
    let start = prev
        .char_indices()
        .nth(total - max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let tail = &prev[start..];

    // The cut landed mid-text; unless it happens to sit on whitespace, the
    // first "word" of the tail is a fragment; drop through it.
    let boundary_clean = prev[..start].ends_with(char::is_whitespace)
        || tail.starts_with(char::is_whitespace);
    if boundary_clean {
        tail.trim().to_string()
    } else {
        match tail.find(char::is_whitespace) {
            Some(idx) => tail[idx..].trim().to_string(),
            None => String::new(),
        }
    }
}

fn flatten(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Assemble the prompt for one segment.
///
/// Order: cleaned title, bounded description, `[...] ` + previous-segment
/// tail. The result is quote-free and at most
/// [`MAX_TOTAL_PROMPT_CHARS`] characters, trimmed at a word boundary.
pub fn build_prompt(title: &str, description: Option<&str>, prev_tail: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !title.is_empty() {
        parts.push(title.to_string());
    }
    if let Some(desc) = description {
        let flat = flatten(desc);
        let bounded = truncate_at_word(&flat, MAX_DESCRIPTION_CHARS_FOR_PROMPT)
            .trim()
            .to_string();
        if !bounded.is_empty() {
            parts.push(bounded);
        }
    }
    if let Some(tail) = prev_tail {
        let flat = flatten(tail);
        let bounded = context_tail(&flat, INTER_SEGMENT_CONTEXT_LENGTH);
        if !bounded.is_empty() {
            parts.push(format!("{CONTEXT_PREFIX}{bounded}"));
        }
    }

    let joined = parts.join(" ");
    let sanitized: String = joined.chars().filter(|c| *c != '"').collect();
    truncate_at_word(&sanitized, MAX_TOTAL_PROMPT_CHARS)
        .trim()
        .to_string()
}
