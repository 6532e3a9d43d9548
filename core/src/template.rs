//! `{path}` tag substitution over a JSON payload.
//!
//! A tag is the text after a `{` up to the next `}`. Its path is a
//! dot-separated walk through objects and arrays (`user.emails.0`); a literal
//! dot inside a key is written `\.`. Strings are substituted without quotes,
//! `null` as the empty string, anything else as compact JSON.

use serde_json::Value;
use tracing::warn;

use crate::error::TemplateError;

/// Every tag in `template`, left to right. Repeated tags appear repeatedly.
pub fn tags(template: &str) -> Vec<&str> {
    template
        .split('{')
        .skip(1)
        .filter_map(|segment| segment.find('}').map(|end| &segment[..end]))
        .collect()
}

/// Replace every tag in `template` with the value at its path in `payload`.
///
/// Stops at the first tag with no value and returns `TagNotFound`; no
/// partial result is produced. A payload that is not JSON has no values.
pub fn replace_tags(template: &str, payload: &[u8]) -> Result<String, TemplateError> {
    let document: Option<Value> = serde_json::from_slice(payload).ok();
    let mut rendered = template.to_owned();
    for tag in tags(template) {
        let Some(value) = document.as_ref().and_then(|doc| lookup(doc, tag)) else {
            warn!(tag, template, "tag not found");
            return Err(TemplateError::TagNotFound { tag: tag.to_owned() });
        };
        rendered = rendered.replace(&format!("{{{tag}}}"), &render(value));
    }
    Ok(rendered)
}

fn lookup<'v>(document: &'v Value, path: &str) -> Option<&'v Value> {
    split_path(path)
        .iter()
        .try_fold(document, |node, segment| match node {
            Value::Object(fields) => fields.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
            _ => None,
        })
}

fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_extracted_in_order() {
        assert_eq!(tags("/users/{user.id}/orders/{order}"), vec!["user.id", "order"]);
        assert!(tags("no tags here").is_empty());
        assert!(tags("unclosed {tag").is_empty());
    }

    #[test]
    fn nested_open_brace_starts_a_new_tag() {
        assert_eq!(tags("{a{b}"), vec!["b"]);
    }

    #[test]
    fn stray_closing_brace_before_any_tag_is_text() {
        assert_eq!(tags("a}b{c}"), vec!["c"]);
    }

    #[test]
    fn split_path_handles_escaped_dots() {
        assert_eq!(split_path(r"a\.b.c"), vec!["a.b", "c"]);
        assert_eq!(split_path("solo"), vec!["solo"]);
    }

    #[test]
    fn replaces_strings_numbers_and_indices() {
        let payload = br#"{"user":{"id":42,"name":"ada","emails":["a@x.io","b@x.io"]}}"#;
        let rendered =
            replace_tags("/u/{user.id}/{user.name}?mail={user.emails.1}", payload).unwrap();
        assert_eq!(rendered, "/u/42/ada?mail=b@x.io");
    }

    #[test]
    fn repeated_tag_is_replaced_everywhere() {
        let rendered = replace_tags("{id}-{id}", br#"{"id":"x"}"#).unwrap();
        assert_eq!(rendered, "x-x");
    }

    #[test]
    fn missing_tag_aborts() {
        let err = replace_tags("{present}/{absent}", br#"{"present":1}"#).unwrap_err();
        assert_eq!(
            err,
            TemplateError::TagNotFound {
                tag: "absent".to_string()
            }
        );
    }

    #[test]
    fn invalid_payload_only_fails_when_tags_exist() {
        assert_eq!(replace_tags("static", b"not json").unwrap(), "static");
        assert!(replace_tags("{a}", b"not json").is_err());
    }
}
