//! Step domain model

use crate::registry::schema::{Schema, SchemaValidationError};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Keys under which a step may declare its prerequisites
pub const DEPENDS_KEYS: [&str; 3] = ["depends", "depends_on", "dependsOn"];

/// What a step kind actually executes
pub trait StepAction: Send + Sync + fmt::Debug {
    /// The command line an environment should run for this step
    fn command(&self) -> String;
}

/// Runs a command line straight from the configuration file
#[derive(Debug, Clone)]
pub struct CommandLineStep {
    command: String,
}

impl CommandLineStep {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl StepAction for CommandLineStep {
    fn command(&self) -> String {
        self.command.clone()
    }
}

/// Position of a step within a running pipeline (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionIndex {
    pub current: usize,
    pub total: usize,
}

impl fmt::Display for ExecutionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.current, self.total)
    }
}

/// A single step of a build
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step key within the configuration
    pub key: String,

    /// Component identifier the step was built from
    pub class: String,

    /// Normalized configuration block
    pub config: Map<String, Value>,

    /// Keys of the steps that must run before this one
    pub depends_on: Vec<String>,

    /// Set when the step is scheduled for execution
    pub index: Option<ExecutionIndex>,

    /// Tri-state outcome: unknown until the step has run
    pub success: Option<bool>,

    action: Arc<dyn StepAction>,
    schema: Arc<Schema>,
}

impl Step {
    pub fn new(
        key: impl Into<String>,
        class: impl Into<String>,
        config: Map<String, Value>,
        action: Arc<dyn StepAction>,
        schema: Arc<Schema>,
    ) -> Self {
        let depends_on = parse_depends(&config);

        Self {
            key: key.into(),
            class: class.into(),
            config,
            depends_on,
            index: None,
            success: None,
            action,
            schema,
        }
    }

    /// The command line to hand to the environment
    pub fn command(&self) -> String {
        self.action.command()
    }

    /// Re-check the configuration block against the step kind's schema
    pub fn validate(&self) -> Result<(), SchemaValidationError> {
        self.schema.validate(&Value::Object(self.config.clone()))
    }

    /// Record where this step sits in the running pipeline
    pub fn set_index(&mut self, current: usize, total: usize) {
        self.index = Some(ExecutionIndex { current, total });
    }

    /// Label used in log lines: `key (i/n)` once scheduled, `key` before
    pub fn log_key(&self) -> String {
        match self.index {
            Some(index) => format!("{} ({})", self.key, index),
            None => self.key.clone(),
        }
    }
}

/// Accepts a single key or a list of keys under any of [`DEPENDS_KEYS`]
fn parse_depends(config: &Map<String, Value>) -> Vec<String> {
    let Some(value) = DEPENDS_KEYS.iter().find_map(|key| config.get(*key)) else {
        return Vec::new();
    };

    match value {
        Value::String(key) => vec![key.clone()],
        Value::Array(keys) => keys
            .iter()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
