//! Provider-facing tests: message types, the mock used by the pipeline, and
//! the provider pair routing.

use af_core::types::{AgentRole, Complexity, ModelTier, TokenUsage};
use af_intelligence::llm::{
    LlmConfig, LlmError, LlmMessage, LlmProvider, LlmRole, MockProvider, MockReply,
};
use af_intelligence::model_router::{self, ProviderKind};
use af_intelligence::{calculate_cost, Providers};

#[test]
fn test_llm_message_constructors() {
    assert_eq!(LlmMessage::system("s").role, LlmRole::System);
    assert_eq!(LlmMessage::user("u").role, LlmRole::User);
    assert_eq!(LlmMessage::assistant("a").role, LlmRole::Assistant);
    assert_eq!(LlmRole::Assistant.to_string(), "assistant");
}

#[test]
fn test_llm_config_defaults() {
    let cfg = LlmConfig::default();
    assert!(cfg.system_prompt.is_none());
    assert!(!cfg.cache_system_prompt);
    assert!(cfg.thinking_budget.is_none());
    assert!(cfg.tools.is_empty());
}

#[tokio::test]
async fn test_mock_as_trait_object_captures_requests() {
    let mock = MockProvider::new();
    let provider: Box<dyn LlmProvider> = Box::new(mock.clone());
    let cfg = LlmConfig {
        model: "claude-haiku-4-5-20251001".into(),
        ..LlmConfig::default()
    };
    let resp = provider.complete(&[LlmMessage::user("ping")], &cfg).await.unwrap();
    assert_eq!(resp.model, "claude-haiku-4-5-20251001");
    assert_eq!(provider.name(), "mock");

    let captured = mock.captured_requests();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].0[0].content, "ping");
}

#[tokio::test]
async fn test_mock_queue_then_default() {
    let mock = MockProvider::new().with_error(LlmError::Timeout);
    let cfg = LlmConfig::default();
    assert!(matches!(
        mock.complete(&[LlmMessage::user("a")], &cfg).await,
        Err(LlmError::Timeout)
    ));
    assert!(mock.complete(&[LlmMessage::user("b")], &cfg).await.is_ok());
}

#[tokio::test]
async fn test_mock_reply_usage_is_reported() {
    let mock = MockProvider::new().with_route(
        "qa",
        MockReply::Text("ok".into(), TokenUsage::new(1_000_000, 0)),
    );
    let cfg = LlmConfig {
        system_prompt: Some("you are qa".into()),
        ..LlmConfig::default()
    };
    let resp = mock.complete(&[LlmMessage::user("x")], &cfg).await.unwrap();
    assert_eq!(resp.usage.input, 1_000_000);
    let cost = calculate_cost(ModelTier::Haiku, &resp.usage);
    assert!((cost.total - 0.25).abs() < 1e-9);
}

#[test]
fn test_providers_pick_by_route() {
    let providers = Providers::mock(MockProvider::new());
    let decision = model_router::route(AgentRole::Orchestrator, Complexity::Medium, 0.0);
    assert_eq!(decision.provider, ProviderKind::Secondary);
    assert_eq!(providers.for_kind(decision.provider).name(), "mock");
}
