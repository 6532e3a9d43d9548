//! Check `replace_tags` against the JSON cases in `test-vectors/`.
//!
//! Each case names a template, a payload, and either the expected rendering
//! or the tag expected to be reported missing.

use restkit::template::{replace_tags, tags};
use restkit::TemplateError;

#[test]
fn template_test_vectors() {
    let raw = include_str!("../../test-vectors/templates.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let template = case["template"].as_str().unwrap();
        let payload = serde_json::to_vec(&case["payload"]).unwrap();

        let result = replace_tags(template, &payload);
        match (case["expected"].as_str(), case["error_tag"].as_str()) {
            (Some(expected), None) => assert_eq!(result.unwrap(), expected, "{name}: rendering"),
            (None, Some(tag)) => assert_eq!(
                result.unwrap_err(),
                TemplateError::TagNotFound { tag: tag.to_string() },
                "{name}: error"
            ),
            _ => panic!("{name}: case needs exactly one of expected / error_tag"),
        }
    }
}

#[test]
fn every_vector_tag_is_extracted() {
    let raw = include_str!("../../test-vectors/templates.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let template = case["template"].as_str().unwrap();
        let expected = template.matches('{').count();
        assert_eq!(tags(template).len(), expected, "{}", case["name"]);
    }
}
