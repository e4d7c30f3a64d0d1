//! Best-effort extraction of the JSON payload agents embed in their answers.

use af_core::types::{AgentOutput, StructuredOutput};
use serde_json::{Map, Value};

/// The span from the first `{` to the last `}`, if any.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse the outermost `{ ... }` span of `text` as a JSON object.
pub fn extract_structured(text: &str) -> Option<StructuredOutput> {
    let span = outermost_object(text)?;
    let payload: Map<String, Value> = serde_json::from_str(span).ok()?;
    Some(StructuredOutput {
        approved: payload.get("approved").and_then(Value::as_bool),
        payload,
    })
}

fn approval_note(payload: &Map<String, Value>) -> Option<String> {
    if let Some(guidelines) = payload.get("guidelines") {
        return Some(guidelines.to_string());
    }
    match payload.get("notes")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn risks(payload: &Map<String, Value>) -> Vec<String> {
    match payload.get("risks") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Turn raw model text into an [`AgentOutput`]. Never fails: text without a
/// parseable object comes back as unstructured output.
pub fn parse_output(text: &str) -> AgentOutput {
    match extract_structured(text) {
        Some(structured) => AgentOutput {
            code: Some(text.to_string()),
            approval_note: approval_note(&structured.payload),
            risks: risks(&structured.payload),
            structured: Some(structured),
        },
        None => AgentOutput::text(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_unstructured() {
        let out = parse_output("export const Button = () => null;");
        assert!(out.structured.is_none());
        assert_eq!(out.code.as_deref(), Some("export const Button = () => null;"));
        assert!(out.risks.is_empty());
        assert!(!out.is_blocked());
    }

    #[test]
    fn embedded_object_is_extracted() {
        let text = "Here is my review:\n```json\n{\"approved\": true, \"risks\": [\"n+1 queries\"], \
                    \"guidelines\": {\"backend\": \"use DTOs\"}, \"notes\": \"ok\"}\n```";
        let out = parse_output(text);
        let s = out.structured.as_ref().unwrap();
        assert_eq!(s.approved, Some(true));
        assert_eq!(out.risks, vec!["n+1 queries"]);
        assert_eq!(out.approval_note.as_deref(), Some(r#"{"backend":"use DTOs"}"#));
        assert_eq!(out.code.as_deref(), Some(text));
    }

    #[test]
    fn notes_used_without_guidelines() {
        let out = parse_output(r#"{"approved": true, "notes": "looks fine"}"#);
        assert_eq!(out.approval_note.as_deref(), Some("looks fine"));

        let out = parse_output(r#"{"approved": false, "notes": ["auth", "audit"]}"#);
        assert_eq!(out.approval_note.as_deref(), Some(r#"["auth","audit"]"#));
    }

    #[test]
    fn guidelines_win_over_notes() {
        let out = parse_output(r#"{"notes": "fine", "guidelines": {"security": "rotate keys"}}"#);
        assert_eq!(out.approval_note.as_deref(), Some(r#"{"security":"rotate keys"}"#));
    }

    #[test]
    fn disapproval_blocks() {
        let out = parse_output(r#"{"approved": false, "risks": ["sql injection"]}"#);
        assert!(out.is_blocked());
        assert_eq!(out.risks, vec!["sql injection"]);
        assert!(out.approval_note.is_none());
    }

    #[test]
    fn malformed_json_degrades_to_text() {
        let out = parse_output("{ approved: false ");
        assert!(out.structured.is_none());
        let out = parse_output("fn main() { let x = {; }");
        assert!(out.structured.is_none());
        assert!(!out.is_blocked());
    }

    #[test]
    fn non_object_json_is_ignored() {
        assert!(extract_structured("no braces here").is_none());
        assert!(extract_structured("} backwards {").is_none());
    }
}
