//! Persisted build and agent records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Pipeline run when a request does not name one
pub const DEFAULT_PIPELINE: &str = "build";

/// Environment used when a request does not name one
pub const DEFAULT_ENV: &str = "local";

/// One execution attempt of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    /// Assigned by the store on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Agent that executed (or is executing) the build
    #[serde(default)]
    pub agent: Option<String>,

    /// Configuration snapshot the build runs with
    pub config: Value,

    /// Human-readable version determined during setup
    #[serde(default)]
    pub version: Option<String>,

    /// Live progress marker, e.g. `3/7: compile`
    #[serde(default)]
    pub status: Option<String>,

    /// Tri-state verdict: unknown until the build has finished
    #[serde(default)]
    pub success: Option<bool>,

    /// Set when the build was aborted by an error rather than a failing step
    #[serde(default)]
    pub crashed: bool,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub started: Option<DateTime<Utc>>,

    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl Build {
    /// Create an unsaved build for a configuration snapshot
    pub fn new(config: Value) -> Self {
        Self {
            id: None,
            agent: None,
            config,
            version: None,
            status: None,
            success: None,
            crashed: false,
            created: Some(Utc::now()),
            started: None,
            ended: None,
            updated: None,
        }
    }

    /// Pipeline selected by the embedded config
    pub fn pipeline_name(&self) -> &str {
        self.config
            .get("pipeline")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PIPELINE)
    }

    /// Environment selected by the embedded config
    pub fn env_name(&self) -> &str {
        self.config
            .get("env")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ENV)
    }

    /// Whether the embedded config carries a `started` timestamp
    pub fn config_started(&self) -> bool {
        self.config
            .get("started")
            .is_some_and(|started| !started.is_null())
    }

    /// Whether some agent already picked this build up
    pub fn is_claimed(&self) -> bool {
        self.config_started() || self.started.is_some()
    }

    /// Agents allowed to run this build, if the request restricts them
    pub fn eligible_agents(&self) -> Option<Vec<String>> {
        self.config
            .get("eligible_agents")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
    }

    /// Short id for log lines
    pub fn short_id(&self) -> &str {
        match &self.id {
            Some(id) => id
                .char_indices()
                .nth(7)
                .map_or(id.as_str(), |(end, _)| &id[..end]),
            None => "",
        }
    }

    pub fn is_finished(&self) -> bool {
        self.ended.is_some()
    }
}

/// One change event from the build feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildChange {
    pub old_value: Option<Build>,

    /// `None` when the record was deleted
    pub new_value: Option<Build>,
}

/// A distributed worker identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,

    pub fqdn: String,

    /// Eligible for scheduling
    #[serde(default = "default_active")]
    pub active: bool,

    /// Id of the build currently holding this agent
    #[serde(default)]
    pub building: Option<String>,

    /// Flattened host facts
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl AgentRecord {
    pub fn new(id: impl Into<String>, fqdn: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fqdn: fqdn.into(),
            active: true,
            building: None,
            properties: BTreeMap::new(),
            created: Some(Utc::now()),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.building.is_some()
    }
}
