//! The feature pipeline: gate, briefing, parallel build, verification.
//!
//! ```text
//!   architect ──blocked──▶ stop
//!       │
//!   context-manager (briefing, may fail)
//!       │
//!   ┌───┴──────────┬──────────────┬────────────────┐
//!   frontend-ui  frontend-biz   backend-api   backend-database   (concurrent)
//!   └───┬──────────┴──────────────┴────────────────┘
//!       │
//!   qa-testing
//! ```

use std::sync::Arc;
use std::time::Instant;

use af_core::notification::{Notification, NotificationKind};
use af_core::pattern_store::{Checkpoint, PatternStore};
use af_core::registry;
use af_core::types::{
    AgentResult, AgentRole, AgentStatus, AgentTask, ExecutionMetrics, FeatureRequest, Priority,
};
use af_intelligence::cost_model::{estimate_feature_cost, EstimateInput};
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::governor::BudgetGovernor;
use crate::handoff::{build_handoff_context, merge_context};
use crate::notifier::Notifier;
use crate::prompts::{self, truncate_chars};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Monthly spend reached the ceiling. Not retryable.
    #[error("monthly budget exhausted: ${spent:.2} of ${limit:.2}")]
    BudgetExhausted { spent: f64, limit: f64 },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

pub const PARALLEL_ROLES: [AgentRole; 4] = [
    AgentRole::FrontendUi,
    AgentRole::FrontendBizlogic,
    AgentRole::BackendApi,
    AgentRole::BackendDatabase,
];

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Past features shown to the architect.
    pub similar_count: usize,
    /// Key under which governor totals are persisted.
    pub session_id: String,
    pub checkpoint_max_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similar_count: 3,
            session_id: "agent-foundry".to_string(),
            checkpoint_max_chars: 8000,
        }
    }
}

// ---------------------------------------------------------------------------
// FeaturePipeline
// ---------------------------------------------------------------------------

pub struct FeaturePipeline {
    dispatcher: Dispatcher,
    patterns: Arc<dyn PatternStore>,
    notifier: Notifier,
    config: PipelineConfig,
}

impl FeaturePipeline {
    pub fn new(
        dispatcher: Dispatcher,
        patterns: Arc<dyn PatternStore>,
        notifier: Notifier,
        config: PipelineConfig,
    ) -> Self {
        Self {
            dispatcher,
            patterns,
            notifier,
            config,
        }
    }

    pub fn governor(&self) -> &BudgetGovernor {
        self.dispatcher.governor()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Restore governor totals from the pattern store, if a snapshot exists.
    pub async fn restore_session(&self) {
        match self.patterns.load_session(&self.config.session_id).await {
            Ok(Some(state)) => self.governor().restore(&state).await,
            Ok(None) => info!("no saved session, starting fresh"),
            Err(e) => warn!(error = %e, "session restore failed, starting fresh"),
        }
    }

    pub async fn save_session(&self) {
        let snapshot = self.governor().snapshot().await;
        if let Err(e) = self
            .patterns
            .save_session(&self.config.session_id, &snapshot)
            .await
        {
            warn!(error = %e, "session save failed");
        }
    }

    /// Run one feature through every phase.
    ///
    /// Fails only when the budget is already exhausted. Every other outcome,
    /// including a blocked gate, is reported through the returned metrics.
    pub async fn process_feature(&self, feature: FeatureRequest) -> Result<ExecutionMetrics> {
        let started = Instant::now();
        let governor = self.governor();

        if governor.is_exhausted().await {
            let spent = governor.monthly_spend().await;
            let limit = governor.monthly_limit();
            warn!(feature_id = %feature.id, spent, limit, "budget exhausted, refusing feature");
            self.notifier.send(Notification::new(
                NotificationKind::CostAlert,
                Priority::Critical,
                "Budget Exhausted",
                format!("Monthly spend ${spent:.2} >= limit ${limit:.2}"),
            ));
            return Err(PipelineError::BudgetExhausted { spent, limit });
        }

        let feature = Arc::new(feature);
        let estimate = estimate_feature_cost(&EstimateInput::for_complexity(feature.complexity));
        info!(
            feature_id = %feature.id,
            title = %feature.title,
            complexity = %feature.complexity,
            estimate = estimate.total,
            "processing feature"
        );
        self.notifier.send(
            Notification::new(
                NotificationKind::FeatureStarted,
                Priority::Medium,
                "Feature Started",
                feature.title.clone(),
            )
            .detail("complexity", feature.complexity)
            .detail("estimate", format!("${:.3}", estimate.total)),
        );

        let mut metrics = ExecutionMetrics::new(feature.id.clone(), estimate.total);

        // Gate
        let gate = self.run_gate(&feature).await;
        metrics.record(gate.clone());
        if gate.status == AgentStatus::Blocked {
            metrics.finalize(started.elapsed().as_millis() as u64);
            warn!(feature_id = %feature.id, risks = ?gate.output.risks, "architect blocked feature");
            self.notifier.send(
                Notification::new(
                    NotificationKind::FeatureBlocked,
                    Priority::High,
                    "Feature Blocked",
                    format!(
                        "{}\n{}",
                        feature.title,
                        gate.output.approval_note.as_deref().unwrap_or_default()
                    ),
                )
                .detail("risks", gate.output.risks.join("; ")),
            );
            self.save_session().await;
            return Ok(metrics);
        }

        // Briefing
        let briefing_task = AgentTask::new(
            AgentRole::ContextManager,
            feature.clone(),
            prompts::briefing_prompt(&feature),
        )
        .with_context(prompts::briefing_context(&gate));
        let briefing = self.dispatcher.dispatch(&briefing_task).await;
        if !briefing.is_success() {
            warn!(feature_id = %feature.id, "briefing unavailable, continuing without it");
        }
        metrics.record(briefing.clone());

        // Parallel build
        let tasks: Vec<AgentTask> = PARALLEL_ROLES
            .iter()
            .map(|&role| {
                AgentTask::new(role, feature.clone(), prompts::agent_prompt(role, &feature))
                    .with_context(build_handoff_context(
                        AgentRole::Architect,
                        role,
                        &gate,
                        Some(&briefing),
                    ))
                    .with_thinking(registry::profile(role).effective_thinking_budget())
            })
            .collect();
        let parallel: Vec<AgentResult> =
            join_all(tasks.iter().map(|t| self.dispatcher.dispatch(t))).await;
        for result in &parallel {
            metrics.record(result.clone());
        }

        // Verify
        let mut qa_context = prompts::qa_context(&parallel);
        merge_context(
            &mut qa_context,
            build_handoff_context(AgentRole::Architect, AgentRole::QaTesting, &gate, None),
        );
        let qa_task = AgentTask::new(
            AgentRole::QaTesting,
            feature.clone(),
            prompts::qa_prompt(&feature, &parallel),
        )
        .with_context(qa_context);
        let qa = self.dispatcher.dispatch(&qa_task).await;
        metrics.regression_detected = detects_regression(&qa);
        metrics.record(qa.clone());

        metrics.finalize(started.elapsed().as_millis() as u64);
        self.persist(&feature, &mut metrics).await;
        governor.record_feature().await;
        self.save_session().await;

        let monthly_spend = governor.monthly_spend().await;
        info!(
            feature_id = %feature.id,
            cost = metrics.total_cost,
            elapsed_ms = metrics.total_time_ms,
            success_rate = metrics.success_rate,
            ready = metrics.ready_for_production,
            monthly_spend,
            "feature metrics"
        );
        self.notifier.send(completion_notification(&feature, &metrics, &qa));

        Ok(metrics)
    }

    async fn run_gate(&self, feature: &Arc<FeatureRequest>) -> AgentResult {
        let similar = match self
            .patterns
            .find_similar(&feature.search_text(), self.config.similar_count)
            .await
        {
            Ok(similar) => similar,
            Err(e) => {
                warn!(feature_id = %feature.id, error = %e, "similar-feature lookup failed");
                Vec::new()
            }
        };

        let budget = registry::profile(AgentRole::Architect).effective_thinking_budget();
        let task = AgentTask::new(
            AgentRole::Architect,
            feature.clone(),
            prompts::architect_prompt(feature, &similar),
        )
        .with_context(prompts::gate_context(feature))
        .with_thinking(budget);
        self.dispatcher.dispatch(&task).await
    }

    /// Checkpoints for every successful output plus the feature summary.
    async fn persist(&self, feature: &FeatureRequest, metrics: &mut ExecutionMetrics) {
        for result in metrics.agent_results.iter().filter(|r| r.is_success()) {
            let Some(code) = result.output.code.as_deref().filter(|c| !c.is_empty()) else {
                continue;
            };
            let checkpoint = Checkpoint {
                feature_id: feature.id.clone(),
                role: result.role,
                task_id: result.task_id.clone(),
                content: truncate_chars(code, self.config.checkpoint_max_chars).to_string(),
                metadata: json!({
                    "title": feature.title,
                    "complexity": feature.complexity,
                }),
                created_at: Utc::now(),
            };
            match self.patterns.save_checkpoint(&checkpoint).await {
                Ok(id) => metrics.checkpoint_ids.push(id),
                Err(e) => warn!(agent = %result.role, error = %e, "checkpoint save failed"),
            }
        }

        let summary = json!({
            "description": feature.description,
            "complexity": feature.complexity,
            "cost": format!("{:.4}", metrics.total_cost),
            "success_rate": format!("{:.2}", metrics.success_rate),
            "ready_for_production": metrics.ready_for_production,
        });
        if let Err(e) = self
            .patterns
            .record_feature(&feature.id, &feature.title, &summary)
            .await
        {
            warn!(feature_id = %feature.id, error = %e, "feature record failed");
        }
    }
}

fn detects_regression(qa: &AgentResult) -> bool {
    qa.output
        .risks
        .iter()
        .any(|r| r.to_lowercase().contains("regression"))
}

fn completion_notification(
    feature: &FeatureRequest,
    metrics: &ExecutionMetrics,
    qa: &AgentResult,
) -> Notification {
    let priority = if metrics.ready_for_production {
        Priority::Medium
    } else {
        Priority::High
    };
    let mut n = Notification::new(
        NotificationKind::FeatureCompleted,
        priority,
        "Feature Completed",
        feature.title.clone(),
    )
    .detail("cost", format!("${:.4}", metrics.total_cost))
    .detail(
        "time",
        format!("{:.1}m", metrics.total_time_ms as f64 / 60_000.0),
    )
    .detail("success", format!("{:.0}%", metrics.success_rate * 100.0))
    .detail(
        "prod_ready",
        if metrics.ready_for_production { "YES" } else { "NO" },
    )
    .detail("regression", metrics.regression_detected);
    if !qa.output.risks.is_empty() {
        n = n.detail("qa_risks", qa.output.risks.join("; "));
    }
    n
}
