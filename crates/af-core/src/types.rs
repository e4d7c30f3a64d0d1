use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Complexity / Priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Queue priority level. Lower numbers are served first.
    pub fn queue_rank(&self) -> i64 {
        match self {
            Priority::Critical => 1,
            Priority::High => 2,
            Priority::Medium => 3,
            Priority::Low => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FeatureRequest
// ---------------------------------------------------------------------------

/// A unit of product work submitted to the swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRequest {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    pub complexity: Complexity,
    pub priority: Priority,
    #[serde(default)]
    pub business_value: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_group: Option<String>,
}

impl FeatureRequest {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        complexity: Complexity,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            complexity,
            priority,
            business_value: String::new(),
            tags: Vec::new(),
            batch_group: None,
        }
    }

    /// Free text used for similarity lookups against past features.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

// ---------------------------------------------------------------------------
// QueuedFeature
// ---------------------------------------------------------------------------

/// Envelope stored in the durable queue for one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedFeature {
    pub feature: FeatureRequest,
    pub retry_on_fail: bool,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl QueuedFeature {
    pub fn new(feature: FeatureRequest) -> Self {
        Self {
            feature,
            retry_on_fail: true,
            max_retries: 3,
            scheduled_at: None,
        }
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

// ---------------------------------------------------------------------------
// Agent roles, model tiers, tool groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    FrontendUi,
    FrontendBizlogic,
    BackendApi,
    BackendDatabase,
    QaTesting,
    Architect,
    Orchestrator,
    ContextManager,
}

impl AgentRole {
    pub const ALL: [AgentRole; 8] = [
        AgentRole::FrontendUi,
        AgentRole::FrontendBizlogic,
        AgentRole::BackendApi,
        AgentRole::BackendDatabase,
        AgentRole::QaTesting,
        AgentRole::Architect,
        AgentRole::Orchestrator,
        AgentRole::ContextManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::FrontendUi => "frontend-ui",
            AgentRole::FrontendBizlogic => "frontend-bizlogic",
            AgentRole::BackendApi => "backend-api",
            AgentRole::BackendDatabase => "backend-database",
            AgentRole::QaTesting => "qa-testing",
            AgentRole::Architect => "architect",
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::ContextManager => "context-manager",
        }
    }

    /// Suffix appended to the feature id to form a task id.
    pub fn task_suffix(&self) -> &'static str {
        match self {
            AgentRole::FrontendUi => "FRONTEND-UI",
            AgentRole::FrontendBizlogic => "FRONTEND-BIZLOGIC",
            AgentRole::BackendApi => "BACKEND-API",
            AgentRole::BackendDatabase => "BACKEND-DATABASE",
            AgentRole::QaTesting => "QA",
            AgentRole::Architect => "ARCH",
            AgentRole::Orchestrator => "ORCH",
            AgentRole::ContextManager => "CONTEXT",
        }
    }

    pub fn task_id(&self, feature_id: &str) -> String {
        format!("{feature_id}-{}", self.task_suffix())
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTier {
    Haiku,
    Sonnet,
    Opus,
    GeminiFlash,
    GeminiPro,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Haiku => "haiku",
            ModelTier::Sonnet => "sonnet",
            ModelTier::Opus => "opus",
            ModelTier::GeminiFlash => "gemini-flash",
            ModelTier::GeminiPro => "gemini-pro",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named bundle of remote tools an agent may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolGroup {
    Filesystem,
    Postgres,
    Playwright,
    Shadcn,
    Git,
}

impl ToolGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolGroup::Filesystem => "filesystem",
            ToolGroup::Postgres => "postgres",
            ToolGroup::Playwright => "playwright",
            ToolGroup::Shadcn => "shadcn",
            ToolGroup::Git => "git",
        }
    }
}

// ---------------------------------------------------------------------------
// Tokens and cost
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub thinking: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            ..Self::default()
        }
    }

    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.thinking
    }
}

/// Monetary cost of one or more calls, in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_cost: f64,
    pub thinking_cost: f64,
    pub total: f64,
}

impl CostBreakdown {
    pub fn accumulate(&mut self, other: &CostBreakdown) {
        self.input_cost += other.input_cost;
        self.output_cost += other.output_cost;
        self.cache_cost += other.cache_cost;
        self.thinking_cost += other.thinking_cost;
        self.total += other.total;
    }
}

// ---------------------------------------------------------------------------
// Agent output
// ---------------------------------------------------------------------------

/// The JSON payload an agent embedded in its answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutput {
    /// Explicit `approved` flag, when the payload carried one.
    pub approved: Option<bool>,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl StructuredOutput {
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.get(key)
    }
}

/// What an agent produced. `structured` is `None` when the answer carried no
/// parseable payload; the raw text is kept either way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub code: Option<String>,
    pub approval_note: Option<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    pub structured: Option<StructuredOutput>,
}

impl AgentOutput {
    pub fn text(raw: impl Into<String>) -> Self {
        Self {
            code: Some(raw.into()),
            ..Self::default()
        }
    }

    /// Output of a dispatch that never succeeded: the error is the only risk.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            risks: vec![error.into()],
            ..Self::default()
        }
    }

    /// True when the payload explicitly said `approved: false`.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self.structured,
            Some(StructuredOutput {
                approved: Some(false),
                ..
            })
        )
    }
}

// ---------------------------------------------------------------------------
// AgentTask / AgentResult
// ---------------------------------------------------------------------------

/// Ordered key/value context handed to an agent alongside its prompt.
pub type TaskContext = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone)]
pub struct AgentTask {
    pub role: AgentRole,
    pub task_id: String,
    pub feature: Arc<FeatureRequest>,
    pub prompt: String,
    pub context: TaskContext,
    pub use_extended_thinking: bool,
    pub thinking_budget: u32,
    pub created_at: DateTime<Utc>,
}

impl AgentTask {
    pub fn new(role: AgentRole, feature: Arc<FeatureRequest>, prompt: impl Into<String>) -> Self {
        Self {
            role,
            task_id: role.task_id(&feature.id),
            feature,
            prompt: prompt.into(),
            context: TaskContext::new(),
            use_extended_thinking: false,
            thinking_budget: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_thinking(mut self, budget: u32) -> Self {
        self.use_extended_thinking = budget > 0;
        self.thinking_budget = budget;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Failed,
    Blocked,
    Retrying,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub role: AgentRole,
    pub task_id: String,
    pub status: AgentStatus,
    pub output: AgentOutput,
    pub tokens: TokenUsage,
    pub cost: f64,
    pub cost_breakdown: CostBreakdown,
    /// Tier actually billed; `None` when no call succeeded.
    pub tier: Option<ModelTier>,
    pub duration_ms: u64,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl AgentResult {
    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

// ---------------------------------------------------------------------------
// ExecutionMetrics
// ---------------------------------------------------------------------------

/// Aggregate over one feature run. Totals are always recomputed from
/// `agent_results`, so `total_cost` equals the sum of result costs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub feature_id: String,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub cost_breakdown: CostBreakdown,
    pub total_time_ms: u64,
    pub agent_results: Vec<AgentResult>,
    pub success_rate: f64,
    pub regression_detected: bool,
    pub ready_for_production: bool,
    pub estimated_cost: f64,
    #[serde(default)]
    pub checkpoint_ids: Vec<String>,
}

impl ExecutionMetrics {
    pub fn new(feature_id: impl Into<String>, estimated_cost: f64) -> Self {
        Self {
            feature_id: feature_id.into(),
            total_tokens: 0,
            total_cost: 0.0,
            cost_breakdown: CostBreakdown::default(),
            total_time_ms: 0,
            agent_results: Vec::new(),
            success_rate: 0.0,
            regression_detected: false,
            ready_for_production: false,
            estimated_cost,
            checkpoint_ids: Vec::new(),
        }
    }

    pub fn record(&mut self, result: AgentResult) {
        self.agent_results.push(result);
        self.recompute_totals();
    }

    pub fn success_count(&self) -> usize {
        self.agent_results.iter().filter(|r| r.is_success()).count()
    }

    /// Compute the success rate and production readiness.
    pub fn finalize(&mut self, elapsed_ms: u64) {
        self.total_time_ms = elapsed_ms;
        self.recompute_totals();
        self.success_rate = if self.agent_results.is_empty() {
            0.0
        } else {
            self.success_count() as f64 / self.agent_results.len() as f64
        };
        self.ready_for_production = self.success_rate >= 0.8 && !self.regression_detected;
    }

    fn recompute_totals(&mut self) {
        let mut breakdown = CostBreakdown::default();
        for r in &self.agent_results {
            breakdown.accumulate(&r.cost_breakdown);
        }
        self.cost_breakdown = breakdown;
        self.total_cost = self.agent_results.iter().map(|r| r.cost).sum();
        self.total_tokens = self.agent_results.iter().map(|r| r.tokens.total()).sum();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
