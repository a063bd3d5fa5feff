//! Build agent - claims queued builds from the store and runs them
//!
//! An agent registers itself, then consumes the store's build feed. For each
//! change it decides whether the build is for it, locks itself with a
//! [`BusyGuard`], runs the build, and unlocks itself on every exit path. A
//! build that errors or panics is logged and the agent keeps listening.

pub mod lock;
pub mod properties;

pub use lock::BusyGuard;
pub use properties::{CachedProperties, FacterProperties, HostProperties, PropertySource};

use crate::core::config::AgentSettings;
use crate::core::state::{AgentRecord, Build, BuildChange};
use crate::execution::{BuildError, BuildRunner};
use crate::persistence::{Store, StoreError};
use crate::registry::ComponentRegistry;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to collect host properties: {0}")]
    Properties(String),
}

/// What the agent delegates a claimed build to
#[async_trait]
pub trait BuildHandler: Send + Sync {
    /// Run `build` to completion and return its verdict
    async fn run(&self, build: Build) -> Result<bool, BuildError>;
}

/// Runs claimed builds with a [`BuildRunner`]
pub struct RunnerHandler {
    store: Arc<dyn Store>,
    registry: Arc<ComponentRegistry>,
}

impl RunnerHandler {
    pub fn new(store: Arc<dyn Store>, registry: Arc<ComponentRegistry>) -> Self {
        Self { store, registry }
    }
}

#[async_trait]
impl BuildHandler for RunnerHandler {
    async fn run(&self, build: Build) -> Result<bool, BuildError> {
        BuildRunner::new(build, self.store.clone(), self.registry.clone())
            .run()
            .await
    }
}

/// The agent's verdict on one feed event
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The build is waiting and this agent may run it
    Claim(Build),
    /// The record was deleted
    Deleted,
    /// Some agent already started the build
    AlreadyStarted,
    /// The build names other agents
    NotEligible,
}

/// How a claimed build ended, as seen from the claiming boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Succeeded,
    Failed,
    Crashed,
}

pub struct Agent {
    record: AgentRecord,
    store: Arc<dyn Store>,
    handler: Arc<dyn BuildHandler>,
    properties: CachedProperties,
}

impl Agent {
    pub fn new(record: AgentRecord, store: Arc<dyn Store>, handler: Arc<dyn BuildHandler>) -> Self {
        Self {
            record,
            store,
            handler,
            properties: CachedProperties::new(Box::new(HostProperties)),
        }
    }

    /// Build an agent from the `agent` section of a configuration
    pub async fn from_settings(
        settings: &AgentSettings,
        store: Arc<dyn Store>,
        handler: Arc<dyn BuildHandler>,
    ) -> Self {
        let fqdn = match &settings.fqdn {
            Some(fqdn) => fqdn.clone(),
            None => properties::discover_fqdn().await,
        };

        let mut record = AgentRecord::new(&settings.id, fqdn);
        record.active = settings.active;

        let agent = Self::new(record, store, handler);
        if settings.facter {
            agent.with_property_source(Box::new(FacterProperties))
        } else {
            agent
        }
    }

    pub fn with_property_source(mut self, source: Box<dyn PropertySource>) -> Self {
        self.properties = CachedProperties::new(source);
        self
    }

    pub fn record(&self) -> &AgentRecord {
        &self.record
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Host facts, collected on first access and cached for the process
    pub async fn properties(&self) -> properties::Properties {
        self.properties.get().await
    }

    /// Make sure the store knows this agent
    ///
    /// An existing record keeps its creation time but takes this process's
    /// `fqdn`, `active` flag and host properties. A `building` value left by a
    /// previous process is cleared.
    pub async fn register(&mut self) -> Result<(), AgentError> {
        let properties = self.properties().await;

        match self.store.get_agent(&self.record.id).await? {
            Some(existing) => {
                if let Some(stale) = &existing.building {
                    warn!(agent = %existing.id, "Clearing stale lock on build {}", stale);
                }

                self.record.created = existing.created;
                self.record.building = None;
                self.record.properties = properties;
                self.store.update_agent(&self.record).await?;
                debug!(agent = %self.record.id, "Agent already registered, record refreshed");
            }
            None => {
                self.record.properties = properties;
                self.store.add_agent(&self.record).await?;
                info!(agent = %self.record.id, fqdn = %self.record.fqdn, "Agent registered");
            }
        }
        Ok(())
    }

    /// Register, then handle build changes until the feed closes
    pub async fn start(&mut self) -> Result<(), AgentError> {
        self.register().await?;
        self.listen().await
    }

    /// Handle build changes until the feed closes
    ///
    /// # Errors
    /// Only store failures end the loop; builds that fail or crash do not.
    pub async fn listen(&mut self) -> Result<(), AgentError> {
        let mut feed = self.store.build_feed().await?;
        info!(agent = %self.record.id, "Listening for builds");

        while let Some(change) = feed.next().await {
            self.handle(change).await?;
        }

        info!(agent = %self.record.id, "Build feed closed");
        Ok(())
    }

    /// Decide on one change and run the build if it is ours to take
    ///
    /// The feed may deliver a change long after it was written, for example
    /// while this agent was busy. The build is re-read so the eligibility
    /// checks see its current state.
    pub async fn handle(&mut self, change: BuildChange) -> Result<Option<ClaimOutcome>, AgentError> {
        let change = self.refresh(change).await?;
        match self.decide(change) {
            Decision::Claim(build) => self.claim(build).await.map(Some),
            Decision::Deleted => {
                warn!(agent = %self.record.id, "Build was deleted, skipping");
                Ok(None)
            }
            Decision::AlreadyStarted | Decision::NotEligible => Ok(None),
        }
    }

    /// Replace the carried value with the stored one; a build that is gone
    /// from the store counts as deleted
    async fn refresh(&self, change: BuildChange) -> Result<BuildChange, AgentError> {
        let Some(id) = change.new_value.as_ref().and_then(|build| build.id.clone()) else {
            return Ok(change);
        };

        let current = self.store.get_build(&id).await?;
        Ok(BuildChange {
            old_value: change.old_value,
            new_value: current,
        })
    }

    /// Eligibility filter, applied in order
    pub fn decide(&self, change: BuildChange) -> Decision {
        let Some(build) = change.new_value else {
            return Decision::Deleted;
        };

        if build.is_claimed() {
            debug!(build = %build.short_id(), "Build already started, skipping");
            return Decision::AlreadyStarted;
        }

        if let Some(eligible) = build.eligible_agents() {
            if !eligible.iter().any(|id| *id == self.record.id) {
                debug!(build = %build.short_id(), "Build is for other agents, skipping");
                return Decision::NotEligible;
            }
        }

        Decision::Claim(build)
    }

    /// Lock this agent, run `build`, and unlock again
    ///
    /// The build runs on its own task so that a panic surfaces as a crash
    /// instead of unwinding through the agent.
    pub async fn claim(&mut self, mut build: Build) -> Result<ClaimOutcome, AgentError> {
        let build_id = build.id.clone().ok_or(StoreError::MissingId)?;
        let guard = BusyGuard::acquire(self.store.clone(), self.record.clone(), &build_id).await?;
        info!(agent = %self.record.id, build = %build.short_id(), "Claimed build");

        build.agent = Some(self.record.id.clone());
        let handler = self.handler.clone();
        let joined = tokio::spawn(async move { handler.run(build).await }).await;

        let outcome = match joined {
            Ok(Ok(true)) => ClaimOutcome::Succeeded,
            Ok(Ok(false)) => ClaimOutcome::Failed,
            Ok(Err(e)) => {
                error!(build = %build_id, "Build threw internal exception: {}", e);
                ClaimOutcome::Crashed
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(build = %build_id, "Build panicked: {}", message);
                ClaimOutcome::Crashed
            }
            Err(e) => {
                error!(build = %build_id, "Build task was cancelled: {}", e);
                ClaimOutcome::Crashed
            }
        };

        self.record = guard.release().await?;
        Ok(outcome)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
