//! Budget-aware model selection.
//!
//! Each dispatch starts from the role's complexity tier and is stepped down
//! as the month's spend approaches the ceiling:
//! - ratio > 0.90: opus becomes sonnet
//! - ratio > 0.95: opus and sonnet both become haiku
//!
//! The coordination role never touches the primary provider; it goes to the
//! secondary high-context model and is billed at the sonnet rate.

use af_core::registry;
use af_core::types::{AgentRole, Complexity, ModelTier};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SOFT_DOWNGRADE_RATIO: f64 = 0.90;
pub const HARD_DOWNGRADE_RATIO: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Claude models.
    Primary,
    /// Gemini, used for the large-context coordination role.
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    pub provider: ProviderKind,
    /// Tier the call is billed at.
    pub tier: ModelTier,
    /// Tier before any budget downgrade.
    pub requested: ModelTier,
}

impl RouteDecision {
    pub fn downgraded(&self) -> bool {
        self.tier != self.requested
    }
}

/// API model identifier for a primary-provider tier.
pub fn model_id(tier: ModelTier) -> &'static str {
    match tier {
        ModelTier::Haiku => "claude-haiku-4-5-20251001",
        ModelTier::Sonnet => "claude-sonnet-4-5-20250929",
        ModelTier::Opus => "claude-opus-4-6",
        ModelTier::GeminiFlash => "gemini-2.0-flash",
        ModelTier::GeminiPro => "gemini-2.0-pro",
    }
}

/// Apply the budget downgrade rules to `tier` at the given spend ratio.
pub fn downgrade_for_budget(tier: ModelTier, spend_ratio: f64) -> ModelTier {
    if spend_ratio > HARD_DOWNGRADE_RATIO {
        match tier {
            ModelTier::Opus | ModelTier::Sonnet => ModelTier::Haiku,
            other => other,
        }
    } else if spend_ratio > SOFT_DOWNGRADE_RATIO {
        match tier {
            ModelTier::Opus => ModelTier::Sonnet,
            other => other,
        }
    } else {
        tier
    }
}

/// Pick provider and billing tier for one dispatch.
pub fn route(role: AgentRole, complexity: Complexity, spend_ratio: f64) -> RouteDecision {
    let profile = registry::profile(role);
    if profile.secondary_provider {
        return RouteDecision {
            provider: ProviderKind::Secondary,
            tier: ModelTier::Sonnet,
            requested: ModelTier::Sonnet,
        };
    }

    let requested = profile.tier_for(complexity);
    let tier = downgrade_for_budget(requested, spend_ratio);
    if tier != requested {
        debug!(
            agent = %role,
            from = %requested,
            to = %tier,
            spend_ratio,
            "budget downgrade"
        );
    }
    RouteDecision {
        provider: ProviderKind::Primary,
        tier,
        requested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_downgrade_at_or_below_ninety_percent() {
        assert_eq!(downgrade_for_budget(ModelTier::Opus, 0.0), ModelTier::Opus);
        assert_eq!(downgrade_for_budget(ModelTier::Opus, 0.90), ModelTier::Opus);
    }

    #[test]
    fn soft_downgrade_only_touches_opus() {
        assert_eq!(downgrade_for_budget(ModelTier::Opus, 0.91), ModelTier::Sonnet);
        assert_eq!(downgrade_for_budget(ModelTier::Sonnet, 0.93), ModelTier::Sonnet);
        assert_eq!(downgrade_for_budget(ModelTier::Haiku, 0.93), ModelTier::Haiku);
    }

    #[test]
    fn hard_downgrade_two_steps() {
        assert_eq!(downgrade_for_budget(ModelTier::Opus, 0.96), ModelTier::Haiku);
        assert_eq!(downgrade_for_budget(ModelTier::Sonnet, 0.99), ModelTier::Haiku);
        assert_eq!(downgrade_for_budget(ModelTier::Opus, 0.95), ModelTier::Sonnet);
    }

    #[test]
    fn orchestrator_goes_to_secondary_at_sonnet_price() {
        let d = route(AgentRole::Orchestrator, Complexity::Complex, 0.99);
        assert_eq!(d.provider, ProviderKind::Secondary);
        assert_eq!(d.tier, ModelTier::Sonnet);
        assert!(!d.downgraded());
    }

    #[test]
    fn architect_complex_routes_to_opus_until_budget_pressure() {
        let d = route(AgentRole::Architect, Complexity::Complex, 0.5);
        assert_eq!(d.tier, ModelTier::Opus);
        assert_eq!(model_id(d.tier), "claude-opus-4-6");

        let d = route(AgentRole::Architect, Complexity::Complex, 0.92);
        assert_eq!(d.tier, ModelTier::Sonnet);
        assert!(d.downgraded());
    }
}
