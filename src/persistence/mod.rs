//! Persistence layer for builds and agents
//!
//! The [`Store`] trait is the only contract the executor and the agent rely
//! on. [`InMemoryStore`] serves tests and single-process use; `SqliteStore`
//! lets agents in separate processes share a job queue.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use crate::core::config::StoreConfig;
use crate::core::state::{AgentRecord, Build, BuildChange};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' does not exist")]
    NotFound { kind: &'static str, id: String },

    #[error("build has not been added to the store yet")]
    MissingId,

    #[error("unsupported store host '{0}'")]
    UnsupportedHost(String),

    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Live, ordered stream of build changes
///
/// `next` waits for the following event and yields `None` once the store
/// stops publishing.
pub struct BuildFeed {
    rx: mpsc::UnboundedReceiver<BuildChange>,
}

impl BuildFeed {
    pub fn new(rx: mpsc::UnboundedReceiver<BuildChange>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<BuildChange> {
        self.rx.recv().await
    }
}

/// Storage the core needs for builds and agents
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new build and return its assigned id
    async fn add_build(&self, build: &Build) -> Result<String, StoreError>;

    /// Persist the current state of an existing build
    async fn update_build(&self, build: &Build) -> Result<(), StoreError>;

    async fn get_build(&self, id: &str) -> Result<Option<Build>, StoreError>;

    /// Subscribe to every build write made from now on
    async fn build_feed(&self) -> Result<BuildFeed, StoreError>;

    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>, StoreError>;

    async fn add_agent(&self, agent: &AgentRecord) -> Result<(), StoreError>;

    async fn update_agent(&self, agent: &AgentRecord) -> Result<(), StoreError>;
}

/// Open the store a configuration points at
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.host.as_deref() {
        None => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "sqlite")]
        Some(host) if host.starts_with("sqlite:") => Ok(Arc::new(SqliteStore::connect(host).await?)),
        Some(host) => Err(StoreError::UnsupportedHost(host.to_string())),
    }
}

/// In-memory store (for testing or ephemeral use)
pub struct InMemoryStore {
    builds: RwLock<HashMap<String, Build>>,
    agents: RwLock<HashMap<String, AgentRecord>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BuildChange>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            builds: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Remove a build, announcing it as a change without a new value
    pub async fn delete_build(&self, id: &str) -> Result<(), StoreError> {
        let mut builds = self.builds.write().await;
        let old = builds.remove(id).ok_or_else(|| StoreError::NotFound {
            kind: "build",
            id: id.to_string(),
        })?;

        self.publish(BuildChange {
            old_value: Some(old),
            new_value: None,
        })
        .await;
        Ok(())
    }

    /// Number of open feeds
    pub async fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Hang up on every feed subscriber
    pub async fn close_feeds(&self) {
        self.subscribers.lock().await.clear();
    }

    async fn publish(&self, change: BuildChange) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn add_build(&self, build: &Build) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut record = build.clone();
        record.id = Some(id.clone());
        record.updated = Some(Utc::now());

        // Publishing under the write lock keeps feed order equal to write order
        let mut builds = self.builds.write().await;
        builds.insert(id.clone(), record.clone());
        self.publish(BuildChange {
            old_value: None,
            new_value: Some(record),
        })
        .await;

        Ok(id)
    }

    async fn update_build(&self, build: &Build) -> Result<(), StoreError> {
        let id = build.id.clone().ok_or(StoreError::MissingId)?;
        let mut record = build.clone();
        record.updated = Some(Utc::now());

        let mut builds = self.builds.write().await;
        let old = builds
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { kind: "build", id: id.clone() })?;
        builds.insert(id, record.clone());
        self.publish(BuildChange {
            old_value: Some(old),
            new_value: Some(record),
        })
        .await;

        Ok(())
    }

    async fn get_build(&self, id: &str) -> Result<Option<Build>, StoreError> {
        Ok(self.builds.read().await.get(id).cloned())
    }

    async fn build_feed(&self) -> Result<BuildFeed, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        Ok(BuildFeed::new(rx))
    }

    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>, StoreError> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn add_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        self.agents
            .write()
            .await
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn update_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        let mut agents = self.agents.write().await;
        if !agents.contains_key(&agent.id) {
            return Err(StoreError::NotFound {
                kind: "agent",
                id: agent.id.clone(),
            });
        }
        agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }
}
