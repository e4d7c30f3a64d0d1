use std::collections::HashMap;

use af_core::types::ToolGroup;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

/// A tool the model may call, as advertised in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for input parameters.
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool server `{0}` is unavailable")]
    Unavailable(String),
    #[error("tool discovery failed: {0}")]
    Discovery(String),
}

/// Resolves tool groups to concrete tool definitions.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    async fn tool_definitions(&self, groups: &[ToolGroup])
        -> Result<Vec<ToolDefinition>, ToolError>;
}

// ---------------------------------------------------------------------------
// ToolRegistry
// ---------------------------------------------------------------------------

/// In-process catalog keyed by tool group.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    groups: HashMap<ToolGroup, Vec<ToolDefinition>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with the definitions for every known group.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(ToolGroup::Filesystem, filesystem_tools());
        reg.register(ToolGroup::Postgres, postgres_tools());
        reg.register(ToolGroup::Playwright, playwright_tools());
        reg.register(ToolGroup::Shadcn, shadcn_tools());
        reg.register(ToolGroup::Git, git_tools());
        reg
    }

    pub fn register(&mut self, group: ToolGroup, tools: Vec<ToolDefinition>) {
        debug!(group = group.as_str(), count = tools.len(), "registering tools");
        self.groups.entry(group).or_default().extend(tools);
    }

    pub fn tool_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ToolCatalog for ToolRegistry {
    async fn tool_definitions(
        &self,
        groups: &[ToolGroup],
    ) -> Result<Vec<ToolDefinition>, ToolError> {
        let mut out: Vec<ToolDefinition> = Vec::new();
        for group in groups {
            let Some(tools) = self.groups.get(group) else {
                return Err(ToolError::Unavailable(group.as_str().to_string()));
            };
            for tool in tools {
                if !out.iter().any(|t| t.name == tool.name) {
                    out.push(tool.clone());
                }
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Group contents
// ---------------------------------------------------------------------------

fn path_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": { "path": { "type": "string" } },
        "required": ["path"]
    })
}

fn filesystem_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new("read_file", "Read a file from the project workspace.", path_schema()),
        ToolDefinition::new(
            "write_file",
            "Create or overwrite a file in the project workspace.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        ),
        ToolDefinition::new("list_directory", "List the entries of a directory.", path_schema()),
    ]
}

fn postgres_tools() -> Vec<ToolDefinition> {
    vec![ToolDefinition::new(
        "query",
        "Run a read-only SQL query against the development database.",
        json!({
            "type": "object",
            "properties": { "sql": { "type": "string" } },
            "required": ["sql"]
        }),
    )]
}

fn playwright_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "browser_navigate",
            "Open a URL in the test browser.",
            json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"]
            }),
        ),
        ToolDefinition::new(
            "browser_snapshot",
            "Capture the accessibility snapshot of the current page.",
            json!({ "type": "object", "properties": {} }),
        ),
    ]
}

fn shadcn_tools() -> Vec<ToolDefinition> {
    vec![ToolDefinition::new(
        "get_component",
        "Fetch the source and usage notes of a shadcn/ui component.",
        json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        }),
    )]
}

fn git_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "git_status",
            "Show the working tree status.",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolDefinition::new(
            "git_diff",
            "Show unstaged changes, optionally for one path.",
            json!({
                "type": "object",
                "properties": { "path": { "type": "string" } }
            }),
        ),
    ]
}
