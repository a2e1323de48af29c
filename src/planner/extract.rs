use serde_json::Value;

/// Locate the JSON payload inside a chatty model reply.
///
/// Starting at the first `[` or `{`, the span runs to the last matching
/// closer in the text. If an opener has no closer after it, the next opener
/// is tried.
pub fn extract_json_span(text: &str) -> Option<&str> {
    for (start, c) in text.char_indices() {
        let closer = match c {
            '[' => ']',
            '{' => '}',
            _ => continue,
        };
        if let Some(end) = text.rfind(closer) {
            if end > start {
                return Some(&text[start..=end]);
            }
        }
    }
    None
}

/// Extract and parse the JSON payload of a model reply.
pub fn extract_json(text: &str) -> Option<Value> {
    let span = extract_json_span(text)?;
    serde_json::from_str(span).ok()
}
