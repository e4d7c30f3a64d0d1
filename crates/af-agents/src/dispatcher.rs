//! Executes one [`AgentTask`] against a model provider.
//!
//! Per dispatch: wait out an open circuit, then up to `max_retries + 1`
//! attempts with exponential backoff. Each attempt re-evaluates the model
//! tier against current spend. A dispatch never returns an error; exhausted
//! retries produce a `failed` result and an `agent_failure` notification.

use std::sync::Arc;
use std::time::Instant;

use af_core::notification::{Notification, NotificationKind};
use af_core::registry::{self, AgentProfile};
use af_core::types::{
    AgentOutput, AgentResult, AgentStatus, AgentTask, CostBreakdown, Priority, TokenUsage,
};
use af_harness::circuit_breaker::CircuitBreaker;
use af_harness::retry::RetryPolicy;
use af_harness::tools::{ToolCatalog, ToolDefinition};
use af_intelligence::cost_model::calculate_cost;
use af_intelligence::llm::{LlmConfig, LlmError, LlmMessage, LlmResponse};
use af_intelligence::model_router::{self, ProviderKind, RouteDecision};
use af_intelligence::Providers;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::governor::BudgetGovernor;
use crate::notifier::Notifier;
use crate::output::parse_output;
use crate::prompts;

pub struct Dispatcher {
    providers: Providers,
    tools: Arc<dyn ToolCatalog>,
    breaker: CircuitBreaker,
    governor: BudgetGovernor,
    retry: RetryPolicy,
    notifier: Notifier,
    secondary_model: String,
}

impl Dispatcher {
    pub fn new(
        providers: Providers,
        tools: Arc<dyn ToolCatalog>,
        breaker: CircuitBreaker,
        governor: BudgetGovernor,
        retry: RetryPolicy,
        notifier: Notifier,
    ) -> Self {
        Self {
            providers,
            tools,
            breaker,
            governor,
            retry,
            notifier,
            secondary_model: "gemini-2.0-flash".to_string(),
        }
    }

    pub fn with_secondary_model(mut self, model: impl Into<String>) -> Self {
        self.secondary_model = model.into();
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn governor(&self) -> &BudgetGovernor {
        &self.governor
    }

    /// Run `task` to a terminal result.
    pub async fn dispatch(&self, task: &AgentTask) -> AgentResult {
        let profile = registry::profile(task.role);

        let waited = self.breaker.wait_if_open().await;
        if !waited.is_zero() {
            info!(agent = %task.role, waited_ms = waited.as_millis() as u64, "circuit closed after cool-down");
        }

        let max_attempts = self.retry.max_attempts();
        let mut last_error: Option<LlmError> = None;

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            match self.attempt(task, profile).await {
                Ok((response, route)) => {
                    self.breaker.record_success().await;
                    let duration_ms = started.elapsed().as_millis() as u64;
                    return self
                        .finish(task, response, route, attempt - 1, duration_ms)
                        .await;
                }
                Err(e) => {
                    let state = self.breaker.record_failure().await;
                    if attempt < max_attempts {
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            agent = %task.role,
                            task_id = %task.task_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            circuit = ?state,
                            error = %e,
                            "agent call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(agent = %task.role, attempt, error = %e, "agent call failed");
                    }
                    last_error = Some(e);
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        error!(
            agent = %task.role,
            task_id = %task.task_id,
            retries = self.retry.max_retries,
            error = %message,
            "agent failed after all retries"
        );
        self.notifier.send(
            Notification::new(
                NotificationKind::AgentFailure,
                Priority::Critical,
                "Agent Failed",
                format!(
                    "Agent {} failed after {} retries: {}",
                    task.role, self.retry.max_retries, message
                ),
            )
            .detail("feature", &task.feature.id)
            .detail("task", &task.task_id),
        );

        AgentResult {
            role: task.role,
            task_id: task.task_id.clone(),
            status: AgentStatus::Failed,
            output: AgentOutput::failure(message),
            tokens: TokenUsage::default(),
            cost: 0.0,
            cost_breakdown: CostBreakdown::default(),
            tier: None,
            duration_ms: 0,
            retry_count: self.retry.max_retries,
            timestamp: Utc::now(),
        }
    }

    async fn attempt(
        &self,
        task: &AgentTask,
        profile: &AgentProfile,
    ) -> Result<(LlmResponse, RouteDecision), LlmError> {
        let ratio = self.governor.spend_ratio().await;
        let route = model_router::route(task.role, task.feature.complexity, ratio);
        let config = self.request_config(task, profile, &route).await;
        let messages = [LlmMessage::user(prompts::user_content(
            &task.prompt,
            &task.context,
        ))];
        let provider = self.providers.for_kind(route.provider);
        let response = provider.complete(&messages, &config).await?;
        Ok((response, route))
    }

    async fn request_config(
        &self,
        task: &AgentTask,
        profile: &AgentProfile,
        route: &RouteDecision,
    ) -> LlmConfig {
        let primary = route.provider == ProviderKind::Primary;
        let model = if primary {
            model_router::model_id(route.tier).to_string()
        } else {
            self.secondary_model.clone()
        };

        let thinking_budget = (primary && task.use_extended_thinking && task.thinking_budget > 0)
            .then_some(task.thinking_budget);
        let max_tokens = profile.max_output_tokens + thinking_budget.unwrap_or(0);

        let tools = if primary {
            self.resolve_tools(task, profile).await
        } else {
            Vec::new()
        };

        LlmConfig {
            model,
            max_tokens,
            system_prompt: Some(profile.system_prompt.to_string()),
            cache_system_prompt: primary && profile.cache_system_prompt,
            thinking_budget,
            tools,
            ..LlmConfig::default()
        }
    }

    /// Tool lookup failures degrade to no tools.
    async fn resolve_tools(&self, task: &AgentTask, profile: &AgentProfile) -> Vec<ToolDefinition> {
        if profile.tool_groups.is_empty() {
            return Vec::new();
        }
        match self.tools.tool_definitions(profile.tool_groups).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(agent = %task.role, error = %e, "tool discovery failed, continuing without tools");
                Vec::new()
            }
        }
    }

    async fn finish(
        &self,
        task: &AgentTask,
        response: LlmResponse,
        route: RouteDecision,
        retry_count: u32,
        duration_ms: u64,
    ) -> AgentResult {
        let breakdown = calculate_cost(route.tier, &response.usage);
        let output = parse_output(&response.content);
        let status = if output.is_blocked() {
            AgentStatus::Blocked
        } else {
            AgentStatus::Success
        };

        info!(
            agent = %task.role,
            task_id = %task.task_id,
            tier = %route.tier,
            downgraded = route.downgraded(),
            input_tokens = response.usage.input,
            output_tokens = response.usage.output,
            cache_read_tokens = response.usage.cache_read,
            cost = breakdown.total,
            duration_ms,
            status = ?status,
            "agent completed"
        );

        let update = self.governor.record_spend(breakdown.total).await;
        if update.crossed_alert {
            self.notifier.send(
                Notification::new(
                    NotificationKind::CostAlert,
                    Priority::High,
                    "Budget Alert",
                    format!(
                        "Monthly spend: ${:.2} / ${:.2}",
                        update.monthly_spend,
                        self.governor.monthly_limit()
                    ),
                )
                .detail("threshold", format!("${:.2}", self.governor.alert_threshold())),
            );
        }

        AgentResult {
            role: task.role,
            task_id: task.task_id.clone(),
            status,
            output,
            tokens: response.usage,
            cost: breakdown.total,
            cost_breakdown: breakdown,
            tier: Some(route.tier),
            duration_ms,
            retry_count,
            timestamp: Utc::now(),
        }
    }
}
