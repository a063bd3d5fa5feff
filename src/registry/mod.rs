//! Component registry
//!
//! Maps the `class` identifier of a configuration block to a constructor and
//! the schema the block must satisfy. Built-in kinds are registered by
//! [`ComponentRegistry::with_builtins`]; library users may register more
//! before loading a configuration.

pub mod schema;

use crate::core::step::{CommandLineStep, Step, StepAction, DEPENDS_KEYS};
use crate::environment::{Environment, LocalEnv, TempDirEnv};
use crate::version::{GitVersion, StaticVersion, VersionProvider};
use schema::{Schema, SchemaType, SchemaValidationError};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while turning a configuration block into a component
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("component '{identifier}' is not registered")]
    ComponentNotFound { identifier: String },

    #[error("configuration block '{path}' has no `class`")]
    MissingClass { path: String },

    #[error(transparent)]
    Schema(#[from] SchemaValidationError),
}

/// Builds a step action from a normalized configuration block
pub type StepConstructor = fn(&Map<String, Value>) -> Arc<dyn StepAction>;

/// Builds an environment from a normalized configuration block
pub type EnvironmentConstructor = fn(&Map<String, Value>) -> Box<dyn Environment>;

/// Builds a version provider from a normalized configuration block
pub type VersionConstructor = fn(&Map<String, Value>) -> Box<dyn VersionProvider>;

/// A registered implementation: its constructor plus the schema of its block
#[derive(Clone)]
pub struct Component<C> {
    pub schema: Arc<Schema>,
    pub construct: C,
}

/// Catalog of every constructible step, environment and version kind
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    steps: HashMap<String, Component<StepConstructor>>,
    environments: HashMap<String, Component<EnvironmentConstructor>>,
    versions: HashMap<String, Component<VersionConstructor>>,
}

fn lookup<'a, C>(
    catalog: &'a HashMap<String, Component<C>>,
    identifier: &str,
) -> Result<&'a Component<C>, RegistryError> {
    catalog
        .get(identifier)
        .ok_or_else(|| RegistryError::ComponentNotFound {
            identifier: identifier.to_string(),
        })
}

impl ComponentRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in kind
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_step(
            "piper.step.CommandLineStep",
            command_line_step_schema(),
            |config| Arc::new(CommandLineStep::new(string_field(config, "command"))),
        );

        registry.register_environment(
            "piper.env.LocalEnv",
            Schema::component().property(
                "cwd",
                Schema::string().describe("Working directory for every step."),
            ),
            |config| {
                let cwd = config.get("cwd").and_then(Value::as_str).map(PathBuf::from);
                Box::new(LocalEnv::new(cwd))
            },
        );

        registry.register_environment(
            "piper.env.TempDirEnv",
            Schema::component().property(
                "delete_when_done",
                Schema::boolean()
                    .describe("Remove the temporary directory on teardown.")
                    .default_value(json!(true)),
            ),
            |config| {
                let delete = config
                    .get("delete_when_done")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                Box::new(TempDirEnv::new(delete))
            },
        );

        registry.register_version(
            "piper.version.StaticVersion",
            Schema::component()
                .property(
                    "version",
                    Schema::string().describe("Static version number."),
                )
                .require("version"),
            |config| Box::new(StaticVersion::new(string_field(config, "version"))),
        );

        registry.register_version(
            "piper.version.GitVersion",
            Schema::component().property(
                "arguments",
                Schema::string()
                    .describe("Arguments for `git describe`.")
                    .default_value(json!("--tags")),
            ),
            |config| Box::new(GitVersion::new(string_field(config, "arguments"))),
        );

        registry
    }

    pub fn register_step(&mut self, identifier: &str, schema: Schema, construct: StepConstructor) {
        self.steps.insert(
            identifier.to_string(),
            Component {
                schema: Arc::new(schema),
                construct,
            },
        );
    }

    pub fn register_environment(
        &mut self,
        identifier: &str,
        schema: Schema,
        construct: EnvironmentConstructor,
    ) {
        self.environments.insert(
            identifier.to_string(),
            Component {
                schema: Arc::new(schema),
                construct,
            },
        );
    }

    pub fn register_version(
        &mut self,
        identifier: &str,
        schema: Schema,
        construct: VersionConstructor,
    ) {
        self.versions.insert(
            identifier.to_string(),
            Component {
                schema: Arc::new(schema),
                construct,
            },
        );
    }

    /// Resolve `identifier` to the schema of whichever kind registered it
    pub fn load(&self, identifier: &str) -> Result<Arc<Schema>, RegistryError> {
        self.steps
            .get(identifier)
            .map(|c| c.schema.clone())
            .or_else(|| self.environments.get(identifier).map(|c| c.schema.clone()))
            .or_else(|| self.versions.get(identifier).map(|c| c.schema.clone()))
            .ok_or_else(|| RegistryError::ComponentNotFound {
                identifier: identifier.to_string(),
            })
    }

    /// Check `config` against `schema`
    pub fn validate(config: &Value, schema: &Schema) -> Result<(), RegistryError> {
        schema.validate(config).map_err(RegistryError::from)
    }

    /// Construct the step `key` from its configuration block
    pub fn build_step(&self, key: &str, block: &Value) -> Result<Step, RegistryError> {
        let class = class_of(block, &format!("steps.{}", key))?;
        let component = lookup(&self.steps, class)?;
        let config = component.schema.normalize(block).map_err(|e| prefix(e, "steps", key))?;
        let action = (component.construct)(&config);

        Ok(Step::new(
            key,
            class,
            config,
            action,
            component.schema.clone(),
        ))
    }

    /// Construct the environment `name` from its configuration block
    pub fn build_environment(
        &self,
        name: &str,
        block: &Value,
    ) -> Result<Box<dyn Environment>, RegistryError> {
        let class = class_of(block, &format!("envs.{}", name))?;
        let component = lookup(&self.environments, class)?;
        let config = component.schema.normalize(block).map_err(|e| prefix(e, "envs", name))?;
        Ok((component.construct)(&config))
    }

    /// Construct the version provider from the `version` block
    pub fn build_version(&self, block: &Value) -> Result<Box<dyn VersionProvider>, RegistryError> {
        let class = class_of(block, "version")?;
        let component = lookup(&self.versions, class)?;
        let config = component.schema.normalize(block).map_err(|e| {
            SchemaValidationError {
                path: scoped("version", &e.path),
                constraint: e.constraint,
            }
        })?;
        Ok((component.construct)(&config))
    }
}

/// Schema of `piper.step.CommandLineStep`
fn command_line_step_schema() -> Schema {
    let depends = Schema::one_of_types(&[SchemaType::String, SchemaType::Array, SchemaType::Null])
        .describe("Step key or list of step keys that must run first.");

    let mut schema = Schema::component()
        .property(
            "command",
            Schema::string().describe("Command line to execute."),
        )
        .require("command")
        .property(
            "requirements",
            // Optional, unlike `command`: a step with no requirements runs anywhere
            Schema::one_of_types(&[SchemaType::Object, SchemaType::Null])
                .describe("Agent properties this step needs."),
        );

    for key in DEPENDS_KEYS {
        schema = schema.property(key, depends.clone());
    }
    schema
}

fn class_of<'a>(block: &'a Value, path: &str) -> Result<&'a str, RegistryError> {
    block
        .get("class")
        .and_then(Value::as_str)
        .ok_or_else(|| RegistryError::MissingClass {
            path: path.to_string(),
        })
}

fn string_field(config: &Map<String, Value>, name: &str) -> String {
    config
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn scoped(scope: &str, path: &str) -> String {
    if path == "$" {
        scope.to_string()
    } else {
        format!("{}.{}", scope, path)
    }
}

fn prefix(error: SchemaValidationError, section: &str, name: &str) -> SchemaValidationError {
    SchemaValidationError {
        path: scoped(&format!("{}.{}", section, name), &error.path),
        constraint: error.constraint,
    }
}
