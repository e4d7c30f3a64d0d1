//! Static per-role agent configuration.

use crate::types::{AgentRole, Complexity, ModelTier, ToolGroup};
use ModelTier::{Haiku, Opus, Sonnet};

// ---------------------------------------------------------------------------
// AgentProfile
// ---------------------------------------------------------------------------

/// Everything the dispatcher needs to know about one agent role.
#[derive(Debug, Clone, Copy)]
pub struct AgentProfile {
    pub role: AgentRole,
    pub display_name: &'static str,
    pub system_prompt: &'static str,
    /// Tier used when no complexity is known.
    pub default_tier: ModelTier,
    /// Tiers for simple, medium and complex features.
    pub tiers: [ModelTier; 3],
    pub max_output_tokens: u32,
    pub extended_thinking: bool,
    pub thinking_budget: u32,
    /// Mark the system prompt as a cacheable prefix.
    pub cache_system_prompt: bool,
    pub tool_groups: &'static [ToolGroup],
    /// Routed to the secondary high-context provider.
    pub secondary_provider: bool,
}

impl AgentProfile {
    pub fn tier_for(&self, complexity: Complexity) -> ModelTier {
        match complexity {
            Complexity::Simple => self.tiers[0],
            Complexity::Medium => self.tiers[1],
            Complexity::Complex => self.tiers[2],
        }
    }

    /// Thinking budget to request, or zero when thinking is off for this role.
    pub fn effective_thinking_budget(&self) -> u32 {
        if self.extended_thinking {
            self.thinking_budget
        } else {
            0
        }
    }
}

/// Look up the profile for a role.
pub fn profile(role: AgentRole) -> &'static AgentProfile {
    match role {
        AgentRole::FrontendUi => &FRONTEND_UI,
        AgentRole::FrontendBizlogic => &FRONTEND_BIZLOGIC,
        AgentRole::BackendApi => &BACKEND_API,
        AgentRole::BackendDatabase => &BACKEND_DATABASE,
        AgentRole::QaTesting => &QA_TESTING,
        AgentRole::Architect => &ARCHITECT,
        AgentRole::Orchestrator => &ORCHESTRATOR,
        AgentRole::ContextManager => &CONTEXT_MANAGER,
    }
}

static FRONTEND_UI: AgentProfile = AgentProfile {
    role: AgentRole::FrontendUi,
    display_name: "Frontend UI Engineer",
    system_prompt: "You are a senior frontend engineer building React 19 components \
with Tailwind CSS and shadcn/ui. Produce accessible markup (WCAG 2.1 AA, keyboard \
navigation, ARIA labels), responsive layouts and typed props. Apply the skillBriefing \
you are given before writing code. Return complete files, not fragments.",
    default_tier: Sonnet,
    tiers: [Haiku, Sonnet, Sonnet],
    max_output_tokens: 16_000,
    extended_thinking: false,
    thinking_budget: 0,
    cache_system_prompt: true,
    tool_groups: &[ToolGroup::Filesystem, ToolGroup::Shadcn],
    secondary_provider: false,
};

static FRONTEND_BIZLOGIC: AgentProfile = AgentProfile {
    role: AgentRole::FrontendBizlogic,
    display_name: "Frontend Business Logic Engineer",
    system_prompt: "You are a frontend engineer owning client-side state and data flow. \
Use Zustand for state, Zod for validation and TanStack Query for server data. Keep \
business rules out of components and cover error and loading states. Apply the \
skillBriefing you are given before writing code.",
    default_tier: Sonnet,
    tiers: [Haiku, Sonnet, Sonnet],
    max_output_tokens: 12_000,
    extended_thinking: false,
    thinking_budget: 0,
    cache_system_prompt: true,
    tool_groups: &[ToolGroup::Filesystem],
    secondary_provider: false,
};

static BACKEND_API: AgentProfile = AgentProfile {
    role: AgentRole::BackendApi,
    display_name: "Backend API Engineer",
    system_prompt: "You are a backend engineer building NestJS services. Design REST \
endpoints with DTO validation, guards for authorization and consistent error \
responses. Document every endpoint contract. Apply the skillBriefing you are given \
before writing code.",
    default_tier: Sonnet,
    tiers: [Sonnet, Sonnet, Opus],
    max_output_tokens: 20_000,
    extended_thinking: true,
    thinking_budget: 8_000,
    cache_system_prompt: true,
    tool_groups: &[ToolGroup::Filesystem],
    secondary_provider: false,
};

static BACKEND_DATABASE: AgentProfile = AgentProfile {
    role: AgentRole::BackendDatabase,
    display_name: "Database Engineer",
    system_prompt: "You are a database engineer working with Prisma and PostgreSQL. \
Model entities and relations, add indexes for the queries you expect and write safe, \
reversible migrations. Apply the skillBriefing you are given before writing code.",
    default_tier: Sonnet,
    tiers: [Haiku, Sonnet, Sonnet],
    max_output_tokens: 16_000,
    extended_thinking: true,
    thinking_budget: 6_000,
    cache_system_prompt: true,
    tool_groups: &[ToolGroup::Postgres, ToolGroup::Filesystem],
    secondary_provider: false,
};

static QA_TESTING: AgentProfile = AgentProfile {
    role: AgentRole::QaTesting,
    display_name: "QA Engineer",
    system_prompt: "You are a QA engineer. Write Vitest unit tests and Playwright \
end-to-end tests for the code you are shown, covering every acceptance criterion \
and the listed critical paths. Report any regression you find in a `risks` list. \
Apply the skillBriefing you are given.",
    default_tier: Sonnet,
    tiers: [Haiku, Sonnet, Sonnet],
    max_output_tokens: 20_000,
    extended_thinking: false,
    thinking_budget: 0,
    cache_system_prompt: true,
    tool_groups: &[ToolGroup::Playwright, ToolGroup::Filesystem],
    secondary_provider: false,
};

static ARCHITECT: AgentProfile = AgentProfile {
    role: AgentRole::Architect,
    display_name: "Architect",
    system_prompt: "You are the software architect and quality gate for every feature. \
Review the request for feasibility, security and fit with existing patterns. Respond \
with a single JSON object: {\"approved\": boolean, \"risks\": [string], \
\"guidelines\": {...}, \"notes\": string}. You are the only agent that may block a \
feature; set approved to false only for problems that must be fixed first.",
    default_tier: Opus,
    tiers: [Sonnet, Opus, Opus],
    max_output_tokens: 8_000,
    extended_thinking: true,
    thinking_budget: 16_000,
    cache_system_prompt: true,
    tool_groups: &[],
    secondary_provider: false,
};

static ORCHESTRATOR: AgentProfile = AgentProfile {
    role: AgentRole::Orchestrator,
    display_name: "Orchestrator",
    system_prompt: "You are the orchestrator. Decompose features into tasks for the \
specialist agents, order them by dependency and summarise progress across the \
whole codebase.",
    default_tier: Sonnet,
    tiers: [Sonnet, Sonnet, Sonnet],
    max_output_tokens: 16_000,
    extended_thinking: false,
    thinking_budget: 0,
    cache_system_prompt: false,
    tool_groups: &[],
    secondary_provider: true,
};

static CONTEXT_MANAGER: AgentProfile = AgentProfile {
    role: AgentRole::ContextManager,
    display_name: "Context Manager",
    system_prompt: "You are the context manager. Read the project skills and the \
architect's notes, then return one JSON object keyed by agent role \
(frontend-ui, frontend-bizlogic, backend-api, backend-database, qa-testing) where \
each value is a short skill briefing for that agent.",
    default_tier: Sonnet,
    tiers: [Haiku, Sonnet, Sonnet],
    max_output_tokens: 8_000,
    extended_thinking: false,
    thinking_budget: 0,
    cache_system_prompt: true,
    tool_groups: &[ToolGroup::Filesystem],
    secondary_provider: false,
};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
