//! JSON extraction from free-form model output.
//!
//! Models wrap JSON in prose, code fences or an extra envelope object. Each
//! way of digging the payload out is a named [`Strategy`]; extraction runs a
//! fixed chain of strategies and reports which one succeeded.

use serde_json::{Map, Value as JsonValue};

/// Envelope fields a model may wrap a message list in.
const LIST_FIELDS: &[&str] = &["messages", "conversation", "history"];

/// Opening delimiters tried per substring search. Each try may scan to the
/// end of the text, so this bounds the search to linear time.
const MAX_SPAN_STARTS: usize = 64;

/// A named way of locating JSON inside model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The whole text (minus code fences) parses directly.
    Strict,
    /// The first balanced `[...]` substring holding objects parses.
    ArraySubstring,
    /// The first balanced `{...}` substring parses.
    ObjectSubstring,
    /// An object holds the list under a well-known field.
    FieldUnwrap,
}

impl Strategy {
    /// Returns the strategy name used in logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::ArraySubstring => "array_substring",
            Self::ObjectSubstring => "object_substring",
            Self::FieldUnwrap => "field_unwrap",
        }
    }
}

/// Chain used for message lists.
pub const LIST_CHAIN: &[Strategy] = &[
    Strategy::Strict,
    Strategy::ArraySubstring,
    Strategy::FieldUnwrap,
];

/// Chain used for single objects.
pub const OBJECT_CHAIN: &[Strategy] = &[Strategy::Strict, Strategy::ObjectSubstring];

/// Extracts a list of JSON objects, returning the strategy that found it.
#[must_use]
pub fn extract_object_list(text: &str) -> Option<(Strategy, Vec<JsonValue>)> {
    LIST_CHAIN.iter().find_map(|strategy| {
        let items = match strategy {
            Strategy::Strict => match parse(strip_fences(text))? {
                JsonValue::Array(items) => Some(items),
                _ => None,
            },
            Strategy::ArraySubstring => balanced_spans(text, '[', ']')
                .filter_map(|span| match parse(span)? {
                    JsonValue::Array(items) if items.iter().any(JsonValue::is_object) => {
                        Some(items)
                    }
                    _ => None,
                })
                .next(),
            Strategy::FieldUnwrap => extract_object(text).and_then(|(_, object)| {
                LIST_FIELDS.iter().find_map(|field| match object.get(*field) {
                    Some(JsonValue::Array(items)) => Some(items.clone()),
                    _ => None,
                })
            }),
            Strategy::ObjectSubstring => None,
        }?;
        Some((*strategy, items))
    })
}

/// Extracts a single JSON object, returning the strategy that found it.
#[must_use]
pub fn extract_object(text: &str) -> Option<(Strategy, Map<String, JsonValue>)> {
    OBJECT_CHAIN.iter().find_map(|strategy| {
        let object = match strategy {
            Strategy::Strict => match parse(strip_fences(text))? {
                JsonValue::Object(object) => Some(object),
                _ => None,
            },
            Strategy::ObjectSubstring => balanced_spans(text, '{', '}')
                .filter_map(|span| match parse(span)? {
                    JsonValue::Object(object) => Some(object),
                    _ => None,
                })
                .next(),
            Strategy::ArraySubstring | Strategy::FieldUnwrap => None,
        }?;
        Some((*strategy, object))
    })
}

fn parse(text: &str) -> Option<JsonValue> {
    serde_json::from_str(text.trim()).ok()
}

/// Removes a surrounding Markdown code fence, if present.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Yields balanced `open ... close` spans, outermost first, in order of their
/// opening delimiter. Delimiters inside JSON strings are ignored. Only the
/// first [`MAX_SPAN_STARTS`] opening delimiters are tried.
fn balanced_spans(text: &str, open: char, close: char) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(move |(_, c)| *c == open)
        .take(MAX_SPAN_STARTS)
        .filter_map(move |(start, _)| {
            let mut depth = 0usize;
            let mut in_string = false;
            let mut escaped = false;
            for (offset, c) in text[start..].char_indices() {
                if in_string {
                    match c {
                        _ if escaped => escaped = false,
                        '\\' => escaped = true,
                        '"' => in_string = false,
                        _ => {}
                    }
                    continue;
                }
                match c {
                    '"' => in_string = true,
                    c if c == open => depth += 1,
                    c if c == close => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(&text[start..start + offset + c.len_utf8()]);
                        }
                    }
                    _ => {}
                }
            }
            None
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_array() {
        let (strategy, items) =
            extract_object_list(r#"[{"role":"user","content":"hi"}]"#).expect("list");
        assert_eq!(strategy, Strategy::Strict);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn fenced_array_is_strict() {
        let text = "```json\n[{\"role\":\"user\",\"content\":\"hi\"}]\n```";
        let (strategy, _) = extract_object_list(text).expect("list");
        assert_eq!(strategy, Strategy::Strict);
    }

    #[test]
    fn array_inside_prose() {
        let text = r#"Here is the summary [draft]: [{"role":"assistant","content":"ok [1]"}] thanks"#;
        let (strategy, items) = extract_object_list(text).expect("list");
        assert_eq!(strategy, Strategy::ArraySubstring);
        assert_eq!(items[0]["content"], "ok [1]");
    }

    #[test]
    fn envelope_fields_are_unwrapped() {
        for field in LIST_FIELDS {
            let text = format!(r#"Result: {{"{field}": [{{"role":"user","content":"x"}}], "n": 1}}"#);
            // The array substring strategy finds the inner list first.
            let (_, items) = extract_object_list(&text).expect("list");
            assert_eq!(items.len(), 1);
        }

        let text = r#"{"history": "none", "messages": [{"role":"user","content":"x"}]}"#;
        let (_, items) = extract_object_list(text).expect("list");
        assert_eq!(items[0]["content"], "x");
    }

    #[test]
    fn field_unwrap_catches_empty_envelope() {
        let (strategy, items) = extract_object_list(r#"{"messages": []}"#).expect("list");
        assert_eq!(strategy, Strategy::FieldUnwrap);
        assert!(items.is_empty());
    }

    #[test]
    fn array_substring_skips_arrays_without_objects() {
        let text = r#"{"tags": ["a"], "conversation": [{"role":"user","content":"x"}]}"#;
        // The first array has no objects, so the substring strategy skips it
        // and finds the second.
        let (strategy, items) = extract_object_list(text).expect("list");
        assert_eq!(strategy, Strategy::ArraySubstring);
        assert_eq!(items[0]["role"], "user");
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(extract_object_list("I could not summarize that.").is_none());
        assert!(extract_object("no json here { at all").is_none());
    }

    #[test]
    fn object_in_prose_with_braces_in_strings() {
        let text = r#"Sure! {"message":"use {curly} braces","tools":[]} Done."#;
        let (strategy, object) = extract_object(text).expect("object");
        assert_eq!(strategy, Strategy::ObjectSubstring);
        assert_eq!(object["message"], "use {curly} braces");
    }

    #[test]
    fn unmatched_brackets_are_bounded() {
        let text = format!("{}{}", "[".repeat(200_000), r#"{"message":"hi"}"#);
        assert!(extract_object_list(&text).is_none());
        let (strategy, object) = extract_object(&text).expect("object");
        assert_eq!(strategy, Strategy::ObjectSubstring);
        assert_eq!(object["message"], "hi");
    }

    #[test]
    fn strategy_names() {
        assert_eq!(Strategy::FieldUnwrap.name(), "field_unwrap");
    }
}
