//! Model access for the agent pipeline: provider clients, pricing, and
//! budget-aware tier routing.

pub mod cost_model;
pub mod llm;
pub mod model_router;

use std::sync::Arc;
use std::time::Duration;

use af_core::config::{Credentials, ProvidersConfig};

pub use cost_model::{calculate_cost, estimate_feature_cost, CostEstimate, EstimateInput};
pub use llm::{
    AnthropicProvider, GeminiProvider, LlmConfig, LlmError, LlmMessage, LlmProvider, LlmResponse,
    LlmRole, MockProvider, MockReply,
};
pub use model_router::{route, ProviderKind, RouteDecision};

/// The two model backends a dispatch can be routed to.
#[derive(Clone)]
pub struct Providers {
    pub primary: Arc<dyn LlmProvider>,
    pub secondary: Arc<dyn LlmProvider>,
}

impl Providers {
    pub fn new(primary: Arc<dyn LlmProvider>, secondary: Arc<dyn LlmProvider>) -> Self {
        Self { primary, secondary }
    }

    /// Real HTTP clients built from configuration and resolved credentials.
    pub fn from_config(cfg: &ProvidersConfig, creds: &Credentials) -> Self {
        let timeout = Duration::from_secs(cfg.request_timeout_secs);
        let primary = AnthropicProvider::new(creds.anthropic_api_key.clone())
            .with_base_url(cfg.anthropic_base_url.clone())
            .with_timeout(timeout);
        let secondary = GeminiProvider::new(creds.google_api_key.clone())
            .with_base_url(cfg.gemini_base_url.clone())
            .with_timeout(timeout);
        Self::new(Arc::new(primary), Arc::new(secondary))
    }

    /// Both backends answered by the same mock.
    pub fn mock(mock: MockProvider) -> Self {
        let shared: Arc<dyn LlmProvider> = Arc::new(mock);
        Self::new(shared.clone(), shared)
    }

    pub fn for_kind(&self, kind: ProviderKind) -> &Arc<dyn LlmProvider> {
        match kind {
            ProviderKind::Primary => &self.primary,
            ProviderKind::Secondary => &self.secondary,
        }
    }
}
