//! Build configuration from YAML (`piper.yml`)

use crate::registry::schema::{Schema, SchemaType, SchemaValidationError};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "piper.yml";

/// Errors raised while loading a configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Schema(#[from] SchemaValidationError),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where builds and agents are persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Connection string, e.g. `sqlite://piper.db`; unset means in-memory
    #[serde(default)]
    pub host: Option<String>,
}

/// Identity of the agent running on this host
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentSettings {
    pub id: String,

    #[serde(default)]
    pub fqdn: Option<String>,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Collect host properties with `facter` instead of the built-in probe
    #[serde(default)]
    pub facter: bool,
}

fn default_true() -> bool {
    true
}

/// A fully validated and normalized configuration document
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// The normalized document, as embedded into build records
    raw: Value,

    /// Version provider block
    pub version: Value,

    /// Environment blocks keyed by env name
    pub envs: BTreeMap<String, Value>,

    /// Step blocks keyed by step key
    pub steps: BTreeMap<String, Value>,

    /// Ordered step keys keyed by pipeline name
    pub pipelines: BTreeMap<String, Vec<String>>,

    pub db: StoreConfig,

    pub agent: Option<AgentSettings>,
}

impl BuildConfig {
    /// Schema every configuration document must satisfy
    pub fn schema() -> Schema {
        let pipelines = Schema::object()
            .describe("Runnable collections of steps.")
            .additional(Schema::array_of(Schema::string()));

        Schema::object()
            .property(
                "version",
                Schema::object().describe("Versioning setup for this project."),
            )
            .property(
                "envs",
                Schema::object()
                    .describe("Environment configurations for this build.")
                    .additional(Schema::object()),
            )
            .property(
                "steps",
                Schema::object()
                    .describe("Definitions of executable build steps.")
                    .additional(Schema::object()),
            )
            .property("pipelines", pipelines.clone())
            .property("jobs", pipelines)
            .property(
                "db",
                Schema::object()
                    .property("host", Schema::string())
                    .deny_additional(),
            )
            .property(
                "agent",
                Schema::object()
                    .property("id", Schema::string())
                    .property("fqdn", Schema::string())
                    .property("active", Schema::boolean().default_value(json!(true)))
                    .property("facter", Schema::boolean().default_value(json!(false)))
                    .require("id")
                    .deny_additional(),
            )
            .property("pipeline", Schema::string())
            .property("env", Schema::string())
            .property("eligible_agents", Schema::array_of(Schema::string()))
            .property(
                "started",
                Schema::one_of_types(&[SchemaType::String, SchemaType::Null]),
            )
            .require("version")
            .require("envs")
            .require("steps")
            .deny_additional()
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Validate and normalize a configuration document
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let schema = Self::schema();
        let raw = Value::Object(schema.normalize(&value)?);

        let pipelines_value = raw
            .get("pipelines")
            .or_else(|| raw.get("jobs"))
            .cloned()
            .ok_or_else(|| SchemaValidationError {
                path: "pipelines".to_string(),
                constraint: "required property is missing (or use `jobs`)".to_string(),
            })?;

        let version = raw.get("version").cloned().unwrap_or(Value::Null);
        let envs = serde_json::from_value(raw.get("envs").cloned().unwrap_or_default())?;
        let steps = serde_json::from_value(raw.get("steps").cloned().unwrap_or_default())?;
        let pipelines = serde_json::from_value(pipelines_value)?;
        let db = match raw.get("db") {
            Some(db) => serde_json::from_value(db.clone())?,
            None => StoreConfig::default(),
        };
        let agent = match raw.get("agent") {
            Some(agent) => Some(serde_json::from_value(agent.clone())?),
            None => None,
        };

        Ok(Self {
            raw,
            version,
            envs,
            steps,
            pipelines,
            db,
            agent,
        })
    }

    /// The normalized document
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Snapshot for a build request selecting a pipeline and an environment
    pub fn request(&self, pipeline: &str, env: &str, eligible_agents: &[String]) -> Value {
        let mut snapshot = match &self.raw {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        // Agent identity and store location belong to the submitting host
        snapshot.remove("agent");
        snapshot.remove("db");
        snapshot.remove("started");

        snapshot.insert("pipeline".to_string(), json!(pipeline));
        snapshot.insert("env".to_string(), json!(env));
        if eligible_agents.is_empty() {
            snapshot.remove("eligible_agents");
        } else {
            snapshot.insert("eligible_agents".to_string(), json!(eligible_agents));
        }

        Value::Object(snapshot)
    }
}
