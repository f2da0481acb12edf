//! Core domain models for the workflow IR.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. They serialise to/from JSON or YAML and round-trip through the
//! `definition` column the `db` crate persists.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// IR format versions this engine understands.
pub const SUPPORTED_IR_VERSIONS: &[&str] = &["0.1", "0.2"];

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a workflow is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Triggered by an incoming HTTP request to `/webhook/{path}`.
    Webhook {
        /// URL path segment that identifies this workflow.
        path: String,
    },
    /// Triggered manually via the REST API or CLI.
    Manual,
    /// Triggered on a cron schedule.
    Cron {
        /// Standard cron expression (5 fields).
        expression: String,
    },
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// The coercion target type for a workflow input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl FromStr for InputType {
    type Err = String;

    /// Accepts both the canonical names and the Python-style aliases
    /// (`str`/`int`/`float`/`bool`/`dict`/`list`) named in the IR spec.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" | "str" => Ok(Self::String),
            "integer" | "int" => Ok(Self::Integer),
            "number" | "float" => Ok(Self::Number),
            "boolean" | "bool" => Ok(Self::Boolean),
            "object" | "dict" => Ok(Self::Object),
            "array" | "list" => Ok(Self::Array),
            other => Err(format!("unknown input type: {other}")),
        }
    }
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        };
        write!(f, "{s}")
    }
}

fn deserialize_input_type<'de, D>(deserializer: D) -> Result<InputType, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    InputType::from_str(&raw).map_err(serde::de::Error::custom)
}

/// Declared shape of one workflow input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type", deserialize_with = "deserialize_input_type")]
    pub ty: InputType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
}

// ---------------------------------------------------------------------------
// NodeSpec
// ---------------------------------------------------------------------------

/// A single step ("node") in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Maps to a registered node type in the `NodeRegistry`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Arbitrary configuration passed to the node at execution time. May
    /// contain `${...}` template expressions.
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
}

// ---------------------------------------------------------------------------
// EdgeSpec
// ---------------------------------------------------------------------------

fn default_action() -> String {
    "default".to_string()
}

/// Directed edge from one node to another, keyed by the routing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
    #[serde(default = "default_action")]
    pub action: String,
}

// ---------------------------------------------------------------------------
// WorkflowIr
// ---------------------------------------------------------------------------

/// A complete workflow IR document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowIr {
    pub ir_version: String,
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub start_node: Option<String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl WorkflowIr {
    /// Convenience constructor for tests and callers building IR in-process.
    pub fn new(nodes: Vec<NodeSpec>, edges: Vec<EdgeSpec>) -> Self {
        Self {
            ir_version: "0.2".to_string(),
            id: Some(Uuid::new_v4()),
            name: None,
            trigger: None,
            inputs: BTreeMap::new(),
            nodes,
            edges,
            start_node: None,
            outputs: BTreeMap::new(),
        }
    }

    /// Parse a workflow IR document from JSON text.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Parse a workflow IR document from YAML text.
    pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    /// The effective start node id: the explicit `start_node`, or the first
    /// entry in `nodes` if unset.
    pub fn effective_start_node(&self) -> Option<&str> {
        self.start_node
            .as_deref()
            .or_else(|| self.nodes.first().map(|n| n.id.as_str()))
    }
}
