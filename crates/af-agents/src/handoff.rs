//! What one agent is allowed to see of another agent's output.

use af_core::types::{AgentResult, AgentRole, AgentStatus, TaskContext};
use serde_json::Value;

/// Payload fields forwarded from `from` to `to`, or `None` when no rule
/// exists for the pair.
pub fn allowed_fields(from: AgentRole, to: AgentRole) -> Option<&'static [&'static str]> {
    use AgentRole::*;
    match (from, to) {
        (Architect, FrontendUi) => Some(&["approved", "componentGuidelines", "a11yChecklist"]),
        (Architect, FrontendBizlogic) => Some(&["approved", "stateGuidelines", "apiContracts"]),
        (Architect, BackendApi) => Some(&[
            "approved",
            "apiDesign",
            "securityRequirements",
            "performanceTargets",
        ]),
        (Architect, BackendDatabase) => {
            Some(&["approved", "dataRequirements", "relationships", "indexHints"])
        }
        (_, QaTesting) => Some(&[
            "testScenarios",
            "criticalPaths",
            "acceptanceCriteria",
            "apiContracts",
        ]),
        _ => None,
    }
}

/// Context key for a payload field: `apiDesign` becomes `api_design`.
fn context_key(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for c in field.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Fold `extra` into `target`. Keys already in `target` win, except arrays on
/// both sides, which are concatenated without repeating items.
pub fn merge_context(target: &mut TaskContext, extra: TaskContext) {
    for (key, value) in extra {
        match (target.get_mut(&key), value) {
            (Some(Value::Array(existing)), Value::Array(items)) => {
                for item in items {
                    if !existing.contains(&item) {
                        existing.push(item);
                    }
                }
            }
            (Some(_), _) => {}
            (None, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// The briefing entry addressed to `to`. A briefing without a parseable
/// object is handed over whole.
fn skill_briefing(briefing: &AgentResult, to: AgentRole) -> Option<Value> {
    if briefing.status != AgentStatus::Success {
        return None;
    }
    let text = briefing.output.code.as_deref().filter(|t| !t.is_empty())?;
    match &briefing.output.structured {
        Some(structured) => structured.field(to.as_str()).cloned(),
        None => Some(Value::String(text.to_string())),
    }
}

/// Build the context `to` receives from `from`'s result.
///
/// With a rule, only the listed payload fields pass, under snake_case keys,
/// plus `approved` (the source succeeded), `guidelines` (its approval note)
/// and `skill_briefing`.
/// Without a rule the receiver only gets the approval note.
pub fn build_handoff_context(
    from: AgentRole,
    to: AgentRole,
    source: &AgentResult,
    briefing: Option<&AgentResult>,
) -> TaskContext {
    let mut ctx = TaskContext::new();

    let Some(fields) = allowed_fields(from, to) else {
        ctx.insert(
            "architect_approval".into(),
            source
                .output
                .approval_note
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        return ctx;
    };

    if let Some(structured) = &source.output.structured {
        for field in fields {
            if let Some(value) = structured.field(field) {
                ctx.insert(context_key(field), value.clone());
            }
        }
    }

    ctx.insert(
        "approved".into(),
        Value::Bool(source.status == AgentStatus::Success),
    );
    if let Some(note) = &source.output.approval_note {
        ctx.insert("guidelines".into(), Value::String(note.clone()));
    }
    if let Some(entry) = briefing.and_then(|b| skill_briefing(b, to)) {
        ctx.insert("skill_briefing".into(), entry);
    }

    ctx
}
