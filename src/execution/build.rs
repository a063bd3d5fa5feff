//! Build runner - one build from setup to verdict
//!
//! `run()` is setup → execute → teardown → finish. Configuration and
//! environment errors mark the build as crashed; a failing step only marks
//! it unsuccessful.

use crate::core::config::BuildConfig;
use crate::core::pipeline::{DependencyResolver, Pipeline};
use crate::core::state::Build;
use crate::core::step::Step;
use crate::environment::Environment;
use crate::execution::executor::{EventHandler, PipelineExecutor};
use crate::execution::BuildError;
use crate::persistence::Store;
use crate::registry::ComponentRegistry;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Runs a single build record against the store it lives in
pub struct BuildRunner {
    build: Build,
    store: Arc<dyn Store>,
    registry: Arc<ComponentRegistry>,
    environment: Option<Box<dyn Environment>>,
    event_handlers: Vec<EventHandler>,
}

impl BuildRunner {
    pub fn new(build: Build, store: Arc<dyn Store>, registry: Arc<ComponentRegistry>) -> Self {
        Self {
            build,
            store,
            registry,
            environment: None,
            event_handlers: Vec::new(),
        }
    }

    /// Use `env` instead of constructing the configured environment
    pub fn with_environment(mut self, env: Box<dyn Environment>) -> Self {
        self.environment = Some(env);
        self
    }

    pub fn with_event_handler(mut self, handler: EventHandler) -> Self {
        self.event_handlers.push(handler);
        self
    }

    pub fn build(&self) -> &Build {
        &self.build
    }

    pub fn into_build(self) -> Build {
        self.build
    }

    /// Run the build to completion
    ///
    /// Returns the verdict. On error the build has been persisted as
    /// crashed before the error is returned.
    pub async fn run(&mut self) -> Result<bool, BuildError> {
        let started = Instant::now();

        match self.run_phases().await {
            Ok(success) => {
                self.finish(started.elapsed()).await?;
                Ok(success)
            }
            Err(e) => {
                error!(build = %self.build.short_id(), "Build crashed: {}", e);
                self.crash().await;
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self) -> Result<bool, BuildError> {
        let (mut env, mut steps) = self.setup().await?;

        let outcome = self.execute(env.as_ref(), &mut steps).await;

        // Teardown runs whether or not the steps did
        let teardown = env.teardown().await;
        match (outcome, teardown) {
            (Ok(success), Ok(())) => Ok(success),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_error)) => {
                warn!(build = %self.build.short_id(), "Teardown failed too: {}", teardown_error);
                Err(e)
            }
        }
    }

    async fn setup(&mut self) -> Result<(Box<dyn Environment>, Vec<Step>), BuildError> {
        self.build.started = Some(Utc::now());
        self.persist().await?;

        let config = BuildConfig::from_value(self.build.config.clone())?;

        let version = self.registry.build_version(&config.version)?.resolve().await?;
        info!(build = %self.build.short_id(), "Building version {}", version);
        self.build.version = Some(version);

        let env_name = self.build.env_name().to_string();
        let mut env = match self.environment.take() {
            Some(env) => env,
            None => {
                let block = config
                    .envs
                    .get(&env_name)
                    .ok_or_else(|| BuildError::UnknownEnvironment {
                        name: env_name.clone(),
                    })?;
                self.registry.build_environment(&env_name, block)?
            }
        };

        let mut table = BTreeMap::new();
        for (key, block) in &config.steps {
            table.insert(key.clone(), self.registry.build_step(key, block)?);
        }

        let pipeline = Pipeline::from_declared(self.build.pipeline_name(), &config.pipelines)?;
        let steps = DependencyResolver::new(&table).resolve(&pipeline)?;
        debug!(
            build = %self.build.short_id(),
            "Execution order: {}",
            steps.iter().map(|s| s.key.as_str()).collect::<Vec<_>>().join(", ")
        );

        env.setup().await?;
        Ok((env, steps))
    }

    async fn execute(&mut self, env: &dyn Environment, steps: &mut [Step]) -> Result<bool, BuildError> {
        let mut executor = PipelineExecutor::new(self.store.clone());
        for handler in &self.event_handlers {
            executor.add_event_handler(handler.clone());
        }
        executor.execute(&mut self.build, steps, env).await
    }

    async fn finish(&mut self, elapsed: Duration) -> Result<(), BuildError> {
        self.build.ended = Some(Utc::now());
        self.persist().await?;

        let label = self.label();
        if self.build.success == Some(true) {
            info!(build = %self.build.short_id(), "{} finished successfully in {}", label, format_duration(elapsed));
        } else {
            warn!(build = %self.build.short_id(), "{} failed after {}", label, format_duration(elapsed));
        }
        Ok(())
    }

    async fn crash(&mut self) {
        self.build.crashed = true;
        self.build.success = Some(false);
        self.build.ended = Some(Utc::now());

        if self.build.id.is_some() {
            if let Err(e) = self.store.update_build(&self.build).await {
                warn!(build = %self.build.short_id(), "Could not record crash: {}", e);
            }
        }
    }

    /// Add the build on first write, update it afterwards
    async fn persist(&mut self) -> Result<(), BuildError> {
        if self.build.id.is_some() {
            self.store.update_build(&self.build).await?;
        } else {
            let id = self.store.add_build(&self.build).await?;
            self.build.id = Some(id);
        }
        Ok(())
    }

    fn label(&self) -> String {
        match &self.build.version {
            Some(version) => version.clone(),
            None => format!("Build {}", self.build.short_id()),
        }
    }
}

/// Human-readable duration: `42s`, `1m 3s`, `2h 0m 5s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
