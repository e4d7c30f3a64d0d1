//! Prompt and context builders for each pipeline phase.
//!
//! System prompts live in the agent registry; everything here is the
//! per-feature user turn and the context bag that follows it.

use af_core::pattern_store::SimilarFeature;
use af_core::types::{AgentResult, AgentRole, FeatureRequest, TaskContext};
use serde_json::{json, Value};

/// Per-agent cap on the code excerpt shown to QA.
pub const QA_CODE_EXCERPT_CHARS: usize = 2000;

pub const CRITICAL_PATHS: [&str; 3] = ["auth", "data-persistence", "api-contracts"];

/// The first `max` characters of `s`, on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Phase prompts
// ---------------------------------------------------------------------------

pub fn architect_prompt(feature: &FeatureRequest, similar: &[SimilarFeature]) -> String {
    let mut prompt = format!(
        "Review and approve architecture for feature: \"{title}\"\n\n\
         Description: {description}\n\
         Complexity: {complexity}\n\
         Acceptance Criteria:\n{criteria}\n\n\
         Respond with a JSON object:\n\
         {{\n  \"approved\": true/false,\n  \"risks\": [\"risk1\", ...],\n  \
         \"guidelines\": {{ \"frontend\": \"...\", \"backend\": \"...\", \"database\": \"...\", \"security\": \"...\" }},\n  \
         \"notes\": \"summary\"\n}}\n\n\
         If you find critical security or performance risks, set approved: false.",
        title = feature.title,
        description = feature.description,
        complexity = feature.complexity,
        criteria = numbered(&feature.acceptance_criteria),
    );

    if !similar.is_empty() {
        let patterns = serde_json::to_string_pretty(similar).unwrap_or_default();
        prompt.push_str(
            "\n\nSimilar past features found in knowledge base (use for consistency):\n",
        );
        prompt.push_str(&patterns);
    }
    prompt
}

pub fn briefing_prompt(feature: &FeatureRequest) -> String {
    format!(
        "Scrutinize the feature \"{}\" and the architect's approval notes. \
         Produce a short required-skills briefing for each implementation agent: \
         frontend-ui, frontend-bizlogic, backend-api, backend-database. \
         Respond with a JSON object keyed by agent name.",
        feature.title
    )
}

pub fn agent_prompt(role: AgentRole, feature: &FeatureRequest) -> String {
    let (ask, deliverable) = match role {
        AgentRole::FrontendUi => (
            "Build React/Next.js components for",
            "Provide complete, production-ready TSX files.",
        ),
        AgentRole::FrontendBizlogic => (
            "Design state management and validation for",
            "Provide Zustand stores, Zod schemas, and API hooks.",
        ),
        AgentRole::BackendApi => (
            "Design NestJS API endpoints for",
            "Provide controllers, services, DTOs, and guards.",
        ),
        AgentRole::BackendDatabase => (
            "Design database schema and migrations for",
            "Provide Prisma schema, migration SQL, and seed data.",
        ),
        _ => return format!("Process task for: \"{}\"", feature.title),
    };
    format!(
        "{ask}: \"{}\"\n\n{}\n\n{deliverable}",
        feature.title, feature.description
    )
}

pub fn qa_prompt(feature: &FeatureRequest, results: &[AgentResult]) -> String {
    let code_summary = results
        .iter()
        .filter(|r| r.is_success())
        .filter_map(|r| {
            r.output
                .code
                .as_deref()
                .filter(|c| !c.is_empty())
                .map(|c| format!("--- {} ---\n{}", r.role, truncate_chars(c, QA_CODE_EXCERPT_CHARS)))
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Write comprehensive tests for: \"{}\"\n\n\
         Acceptance Criteria:\n{}\n\n\
         Code from agents (summary):\n{}\n\n\
         Provide: Vitest unit tests + Playwright E2E tests.",
        feature.title,
        numbered(&feature.acceptance_criteria),
        code_summary
    )
}

// ---------------------------------------------------------------------------
// Phase contexts
// ---------------------------------------------------------------------------

pub fn gate_context(feature: &FeatureRequest) -> TaskContext {
    let mut ctx = TaskContext::new();
    ctx.insert("business_value".into(), json!(feature.business_value));
    ctx.insert(
        "acceptance_criteria".into(),
        json!(feature.acceptance_criteria),
    );
    ctx
}

pub fn briefing_context(gate: &AgentResult) -> TaskContext {
    let mut ctx = TaskContext::new();
    ctx.insert(
        "architect_notes".into(),
        gate.output
            .approval_note
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    ctx
}

pub fn qa_context(results: &[AgentResult]) -> TaskContext {
    let scenarios: Vec<Value> = results
        .iter()
        .filter(|r| r.is_success())
        .map(|r| {
            json!({
                "agent": r.role,
                "has_code": r.output.code.as_deref().is_some_and(|c| !c.is_empty()),
            })
        })
        .collect();
    let mut ctx = TaskContext::new();
    ctx.insert("test_scenarios".into(), Value::Array(scenarios));
    ctx.insert("critical_paths".into(), json!(CRITICAL_PATHS));
    ctx
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// `key: value` entries separated by blank lines. Strings are inserted
/// verbatim, everything else as JSON.
pub fn render_context(ctx: &TaskContext) -> String {
    ctx.iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}: {s}"),
            other => format!("{k}: {other}"),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The single user turn sent to the model.
pub fn user_content(prompt: &str, ctx: &TaskContext) -> String {
    format!("{prompt}\n\n---\nContext:\n{}", render_context(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::parse_output;
    use af_core::types::{AgentStatus, Complexity, CostBreakdown, Priority, TokenUsage};
    use chrono::Utc;

    fn feature() -> FeatureRequest {
        let mut f = FeatureRequest::new("F-1", "Login", Complexity::Medium, Priority::High);
        f.description = "JWT login".into();
        f.acceptance_criteria = vec!["returns token".into(), "rejects bad password".into()];
        f
    }

    fn result(role: AgentRole, status: AgentStatus, text: &str) -> AgentResult {
        AgentResult {
            role,
            task_id: role.task_id("F-1"),
            status,
            output: parse_output(text),
            tokens: TokenUsage::default(),
            cost: 0.0,
            cost_breakdown: CostBreakdown::default(),
            tier: None,
            duration_ms: 0,
            retry_count: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn architect_prompt_numbers_criteria() {
        let p = architect_prompt(&feature(), &[]);
        assert!(p.contains("1. returns token\n2. rejects bad password"));
        assert!(p.contains("Complexity: medium"));
        assert!(!p.contains("Similar past features"));
    }

    #[test]
    fn architect_prompt_lists_similar() {
        let similar = vec![SimilarFeature {
            id: "F-0".into(),
            title: "Signup".into(),
            score: 0.5,
            metadata: json!({}),
        }];
        let p = architect_prompt(&feature(), &similar);
        assert!(p.contains("Similar past features"));
        assert!(p.contains("\"Signup\""));
    }

    #[test]
    fn qa_prompt_caps_excerpts_and_skips_failures() {
        let long = "x".repeat(5000);
        let results = vec![
            result(AgentRole::BackendApi, AgentStatus::Success, &long),
            result(AgentRole::FrontendUi, AgentStatus::Failed, "broken"),
        ];
        let p = qa_prompt(&feature(), &results);
        assert!(p.contains("--- backend-api ---"));
        assert!(!p.contains("frontend-ui"));
        assert_eq!(p.matches('x').count(), QA_CODE_EXCERPT_CHARS);
    }

    #[test]
    fn qa_context_has_fixed_critical_paths() {
        let results = vec![result(AgentRole::BackendApi, AgentStatus::Success, "code")];
        let ctx = qa_context(&results);
        assert_eq!(ctx["critical_paths"], json!(["auth", "data-persistence", "api-contracts"]));
        assert_eq!(ctx["test_scenarios"][0]["agent"], "backend-api");
        assert_eq!(ctx["test_scenarios"][0]["has_code"], true);
    }

    #[test]
    fn context_rendering() {
        let mut ctx = TaskContext::new();
        ctx.insert("a".into(), json!("plain"));
        ctx.insert("b".into(), json!([1, 2]));
        assert_eq!(render_context(&ctx), "a: plain\n\nb: [1,2]");
        assert_eq!(user_content("do it", &ctx), "do it\n\n---\nContext:\na: plain\n\nb: [1,2]");
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
