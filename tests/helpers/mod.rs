//! Test utility functions for piper

#![allow(dead_code)]

use async_trait::async_trait;
use piper::core::config::BuildConfig;
use piper::core::state::{AgentRecord, Build};
use piper::core::step::Step;
use piper::environment::{Environment, EnvironmentError, ProcessResult};
use piper::execution::BuildError;
use piper::persistence::{BuildFeed, InMemoryStore, Store, StoreError};
use piper::agent::properties::{Properties, PropertySource};
use piper::{AgentError, BuildHandler};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Builds configuration documents step by step
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    version: Value,
    envs: Map<String, Value>,
    steps: Map<String, Value>,
    pipelines: Map<String, Value>,
}

impl ConfigBuilder {
    /// A static version and a `local` environment, no steps
    pub fn new() -> Self {
        let mut envs = Map::new();
        envs.insert("local".to_string(), json!({"class": "piper.env.LocalEnv"}));

        Self {
            version: json!({"class": "piper.version.StaticVersion", "version": "1.0.0-test"}),
            envs,
            steps: Map::new(),
            pipelines: Map::new(),
        }
    }

    pub fn step(mut self, key: &str, command: &str, depends: &[&str]) -> Self {
        let mut block = json!({"class": "piper.step.CommandLineStep", "command": command});
        if !depends.is_empty() {
            block["depends"] = json!(depends);
        }
        self.steps.insert(key.to_string(), block);
        self
    }

    pub fn raw_step(mut self, key: &str, block: Value) -> Self {
        self.steps.insert(key.to_string(), block);
        self
    }

    pub fn env(mut self, name: &str, block: Value) -> Self {
        self.envs.insert(name.to_string(), block);
        self
    }

    pub fn version(mut self, block: Value) -> Self {
        self.version = block;
        self
    }

    pub fn pipeline(mut self, name: &str, keys: &[&str]) -> Self {
        self.pipelines.insert(name.to_string(), json!(keys));
        self
    }

    pub fn value(&self) -> Value {
        json!({
            "version": self.version,
            "envs": self.envs,
            "steps": self.steps,
            "pipelines": self.pipelines,
        })
    }

    pub fn build(&self) -> BuildConfig {
        BuildConfig::from_value(self.value()).unwrap()
    }

    /// An unsaved build request for `pipeline` in `env`
    pub fn request(&self, pipeline: &str, env: &str) -> Build {
        Build::new(self.build().request(pipeline, env, &[]))
    }
}

/// Shared log of environment calls
#[derive(Debug, Clone, Default)]
pub struct EnvLog(Arc<Mutex<Vec<String>>>);

impl EnvLog {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Log keys of the executed steps, in order
    pub fn executed(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix("execute ").map(str::to_string))
            .collect()
    }

    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }
}

/// Mock environment that records every call and never spawns a process
pub struct RecordingEnv {
    log: EnvLog,
    fail_on: Option<String>,
    error_on: Option<String>,
    fail_setup: bool,
}

impl RecordingEnv {
    pub fn new(log: &EnvLog) -> Self {
        Self {
            log: log.clone(),
            fail_on: None,
            error_on: None,
            fail_setup: false,
        }
    }

    /// Report the step `key` as unsuccessful
    pub fn failing_on(mut self, key: &str) -> Self {
        self.fail_on = Some(key.to_string());
        self
    }

    /// Return an environment error for the step `key`
    pub fn erroring_on(mut self, key: &str) -> Self {
        self.error_on = Some(key.to_string());
        self
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }
}

#[async_trait]
impl Environment for RecordingEnv {
    async fn setup(&mut self) -> Result<(), EnvironmentError> {
        self.log.push("setup");
        if self.fail_setup {
            return Err(EnvironmentError::Setup("refusing to set up".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, step: &Step) -> Result<ProcessResult, EnvironmentError> {
        self.log.push(format!("execute {}", step.log_key()));

        if self.error_on.as_deref() == Some(step.key.as_str()) {
            return Err(EnvironmentError::Setup(format!("{} exploded", step.key)));
        }
        if self.fail_on.as_deref() == Some(step.key.as_str()) {
            return Ok(ProcessResult::failed(1));
        }
        Ok(ProcessResult::ok())
    }

    async fn teardown(&mut self) -> Result<(), EnvironmentError> {
        self.log.push("teardown");
        Ok(())
    }
}

/// Store wrapper that records every agent write
pub struct RecordingStore {
    inner: InMemoryStore,
    agent_writes: Mutex<Vec<AgentRecord>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            agent_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// The `building` value of every agent update, in order
    pub fn building_writes(&self) -> Vec<Option<String>> {
        self.agent_writes
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.building.clone())
            .collect()
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn add_build(&self, build: &Build) -> Result<String, StoreError> {
        self.inner.add_build(build).await
    }

    async fn update_build(&self, build: &Build) -> Result<(), StoreError> {
        self.inner.update_build(build).await
    }

    async fn get_build(&self, id: &str) -> Result<Option<Build>, StoreError> {
        self.inner.get_build(id).await
    }

    async fn build_feed(&self) -> Result<BuildFeed, StoreError> {
        self.inner.build_feed().await
    }

    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>, StoreError> {
        self.inner.get_agent(id).await
    }

    async fn add_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        self.inner.add_agent(agent).await
    }

    async fn update_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        self.agent_writes.lock().unwrap().push(agent.clone());
        self.inner.update_agent(agent).await
    }
}

/// Build handler whose behavior is picked by the build's pipeline name:
/// `fail` fails, `error` returns an error, `panic` panics, `slow` takes half
/// a second, anything else succeeds. Records the agent's busy flag as seen during each run.
pub struct ScriptedHandler {
    store: Arc<dyn Store>,
    agent_id: String,
    runs: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedHandler {
    pub fn new(store: Arc<dyn Store>, agent_id: &str) -> Self {
        Self {
            store,
            agent_id: agent_id.to_string(),
            runs: Mutex::new(Vec::new()),
        }
    }

    /// `(build id, agent.building while running)` per run
    pub fn runs(&self) -> Vec<(String, Option<String>)> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildHandler for ScriptedHandler {
    async fn run(&self, mut build: Build) -> Result<bool, BuildError> {
        let id = build.id.clone().unwrap_or_default();
        let busy = self
            .store
            .get_agent(&self.agent_id)
            .await?
            .and_then(|agent| agent.building);
        self.runs.lock().unwrap().push((id, busy));

        build.started = Some(chrono::Utc::now());
        self.store.update_build(&build).await?;

        if build.pipeline_name() == "slow" {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        match build.pipeline_name() {
            "panic" => panic!("step runner blew up"),
            "error" => Err(BuildError::UnknownEnvironment {
                name: "nowhere".to_string(),
            }),
            "fail" => Ok(false),
            _ => Ok(true),
        }
    }
}

/// Fixed host facts, so registering never shells out
pub struct StaticProperties(pub Properties);

#[async_trait]
impl PropertySource for StaticProperties {
    async fn collect(&self) -> Result<Properties, AgentError> {
        Ok(self.0.clone())
    }
}

/// Poll `check` until it holds, failing the test after about two seconds
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
