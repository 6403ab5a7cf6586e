//! JSON object extraction from free-form model output.
//!
//! Models asked for JSON often wrap it in code fences, prepend reasoning, or
//! get cut off mid-object. The extractor tries, in order:
//! 1. a fenced code block (```json or bare ```) holding an object
//! 2. the whole trimmed response when it is an object
//! 3. the largest balanced object anywhere in the text (later wins ties)
//!
//! Only objects are returned; callers that need a specific shape validate the
//! parsed value themselves.
//!
//! ```
//! use research_forge::utils::json_extraction::extract_json_object;
//!
//! let text = "Sure! {\"nextAgent\": \"searcher\"} hope that helps";
//! assert_eq!(extract_json_object(text).as_deref(), Some("{\"nextAgent\": \"searcher\"}"));
//! ```

use std::sync::OnceLock;

use regex::Regex;

/// Outcome of looking for a JSON object in model output.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractionResult {
    /// A syntactically valid JSON object.
    Success(String),
    /// An object was opened but never closed.
    Truncated { partial_json: String, unclosed_braces: usize },
    /// Nothing resembling an object.
    NotFound,
}

impl JsonExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JsonExtractionResult::Success(_))
    }

    pub fn json(&self) -> Option<&str> {
        match self {
            JsonExtractionResult::Success(json) => Some(json),
            _ => None,
        }
    }
}

fn code_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```(?:[A-Za-z]+)?\s*\n?([\s\S]*?)\n?```").expect("static regex is valid")
    })
}

fn is_valid_json(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Finds the index of the `}` closing the object that starts at `s[0]`.
///
/// Braces inside string literals (including escaped quotes) are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn unclosed_braces(s: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

/// Object inside the first fenced code block, if any.
pub fn extract_from_code_block(content: &str) -> Option<String> {
    let caps = code_block_regex().captures(content)?;
    let block = caps.get(1)?.as_str().trim();
    let start = block.find('{')?;
    let end = find_matching_brace(&block[start..])?;
    let candidate = &block[start..=start + end];
    is_valid_json(candidate).then(|| candidate.to_string())
}

/// The largest valid object in `content`; later occurrences win ties.
///
/// Reasoning models often echo example objects before the real answer, which
/// is usually the biggest and the last one.
pub fn extract_largest_json_object(content: &str) -> Option<String> {
    content
        .char_indices()
        .filter(|&(_, c)| c == '{')
        .filter_map(|(start, _)| {
            let tail = &content[start..];
            let end = find_matching_brace(tail)?;
            let candidate = &tail[..=end];
            is_valid_json(candidate).then_some((start, candidate))
        })
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json.to_string())
}

/// Locates a JSON object in model output, reporting truncation separately.
pub fn try_extract_json_object(content: &str) -> JsonExtractionResult {
    let trimmed = content.trim();

    if let Some(json) = extract_from_code_block(trimmed) {
        return JsonExtractionResult::Success(json);
    }

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            let candidate = &trimmed[..=end];
            if is_valid_json(candidate) {
                return JsonExtractionResult::Success(candidate.to_string());
            }
        }
    }

    if let Some(json) = extract_largest_json_object(trimmed) {
        return JsonExtractionResult::Success(json);
    }

    if let Some(start) = trimmed.find('{') {
        let partial = &trimmed[start..];
        let open = unclosed_braces(partial);
        if open > 0 {
            return JsonExtractionResult::Truncated {
                partial_json: partial.to_string(),
                unclosed_braces: open,
            };
        }
    }

    JsonExtractionResult::NotFound
}

/// Convenience wrapper returning only a successfully extracted object.
pub fn extract_json_object(content: &str) -> Option<String> {
    match try_extract_json_object(content) {
        JsonExtractionResult::Success(json) => Some(json),
        _ => None,
    }
}
