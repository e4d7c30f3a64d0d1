//! Token pricing and pre-flight feature cost estimation.
//!
//! Everything here is a pure function of its inputs: no clocks, no shared
//! state. Prices are USD per 1M tokens.

use af_core::registry;
use af_core::types::{AgentRole, Complexity, CostBreakdown, ModelTier, TokenUsage};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Model Pricing
// ---------------------------------------------------------------------------

/// Per-tier pricing in USD per 1M tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub tier: ModelTier,
    pub input_per_1m: f64,
    pub output_per_1m: f64,
    pub cache_read_per_1m: f64,
    pub cache_write_per_1m: f64,
}

/// Price table entry for a tier.
pub fn pricing(tier: ModelTier) -> ModelPricing {
    let (input, output, cache_read, cache_write) = match tier {
        ModelTier::Haiku => (0.25, 1.25, 0.025, 0.30),
        ModelTier::Sonnet => (3.00, 15.00, 0.30, 3.75),
        ModelTier::Opus => (15.00, 75.00, 1.50, 18.75),
        ModelTier::GeminiFlash => (0.075, 0.30, 0.0, 0.0),
        ModelTier::GeminiPro => (1.25, 5.00, 0.0, 0.0),
    };
    ModelPricing {
        tier,
        input_per_1m: input,
        output_per_1m: output,
        cache_read_per_1m: cache_read,
        cache_write_per_1m: cache_write,
    }
}

fn per_million(tokens: u64, price: f64) -> f64 {
    tokens as f64 / 1_000_000.0 * price
}

/// Cost of one call. Thinking tokens are billed at the output rate.
pub fn calculate_cost(tier: ModelTier, tokens: &TokenUsage) -> CostBreakdown {
    let p = pricing(tier);
    let input_cost = per_million(tokens.input, p.input_per_1m);
    let output_cost = per_million(tokens.output, p.output_per_1m);
    let cache_cost = per_million(tokens.cache_read, p.cache_read_per_1m);
    let thinking_cost = per_million(tokens.thinking, p.output_per_1m);
    CostBreakdown {
        input_cost,
        output_cost,
        cache_cost,
        thinking_cost,
        total: input_cost + output_cost + cache_cost + thinking_cost,
    }
}

// ---------------------------------------------------------------------------
// Feature Estimate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestingScope {
    #[serde(rename = "unit")]
    Unit,
    #[serde(rename = "unit+e2e")]
    UnitAndE2e,
    #[serde(rename = "comprehensive")]
    Comprehensive,
}

impl TestingScope {
    fn qa_multiplier(&self) -> f64 {
        match self {
            TestingScope::Unit => 1.0,
            TestingScope::UnitAndE2e => 1.2,
            TestingScope::Comprehensive => 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateInput {
    pub complexity: Complexity,
    pub needs_database: bool,
    pub testing_scope: TestingScope,
}

impl EstimateInput {
    /// The estimate parameters the pipeline derives from a feature's complexity.
    pub fn for_complexity(complexity: Complexity) -> Self {
        let simple = complexity == Complexity::Simple;
        Self {
            complexity,
            needs_database: !simple,
            testing_scope: if simple {
                TestingScope::Unit
            } else {
                TestingScope::UnitAndE2e
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateLine {
    pub role: AgentRole,
    pub tier: ModelTier,
    pub tokens: TokenUsage,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub lines: Vec<EstimateLine>,
    pub total: f64,
}

/// Expected (input, output) tokens per role at a given complexity.
fn token_table(complexity: Complexity, role: AgentRole) -> Option<(u64, u64)> {
    use AgentRole::*;
    use Complexity::*;
    let tokens = match (complexity, role) {
        (Simple, Architect) => (2_000, 1_500),
        (Simple, FrontendUi) => (3_000, 5_000),
        (Simple, FrontendBizlogic) => (2_000, 3_000),
        (Simple, BackendApi) => (4_000, 6_000),
        (Simple, BackendDatabase) => (2_000, 3_000),
        (Simple, QaTesting) => (3_000, 5_000),

        (Medium, Architect) => (3_000, 2_500),
        (Medium, FrontendUi) => (5_000, 10_000),
        (Medium, FrontendBizlogic) => (3_000, 5_000),
        (Medium, BackendApi) => (6_000, 12_000),
        (Medium, BackendDatabase) => (4_000, 8_000),
        (Medium, QaTesting) => (5_000, 10_000),

        (Complex, Architect) => (5_000, 3_500),
        (Complex, FrontendUi) => (8_000, 16_000),
        (Complex, FrontendBizlogic) => (5_000, 8_000),
        (Complex, BackendApi) => (10_000, 20_000),
        (Complex, BackendDatabase) => (6_000, 12_000),
        (Complex, QaTesting) => (8_000, 16_000),

        _ => return None,
    };
    Some(tokens)
}

const ESTIMATED_ROLES: [AgentRole; 6] = [
    AgentRole::Architect,
    AgentRole::FrontendUi,
    AgentRole::FrontendBizlogic,
    AgentRole::BackendApi,
    AgentRole::BackendDatabase,
    AgentRole::QaTesting,
];

/// Pre-flight estimate of what a feature run will cost.
pub fn estimate_feature_cost(input: &EstimateInput) -> CostEstimate {
    let mut lines = Vec::new();
    for role in ESTIMATED_ROLES {
        if role == AgentRole::BackendDatabase && !input.needs_database {
            continue;
        }
        let Some((mut tokens_in, mut tokens_out)) = token_table(input.complexity, role) else {
            continue;
        };
        if role == AgentRole::QaTesting {
            let m = input.testing_scope.qa_multiplier();
            tokens_in = (tokens_in as f64 * m).round() as u64;
            tokens_out = (tokens_out as f64 * m).round() as u64;
        }
        let tier = registry::profile(role).tier_for(input.complexity);
        let tokens = TokenUsage::new(tokens_in, tokens_out);
        let cost = calculate_cost(tier, &tokens).total;
        lines.push(EstimateLine {
            role,
            tier,
            tokens,
            cost,
        });
    }
    let total = lines.iter().map(|l| l.cost).sum();
    CostEstimate { lines, total }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
