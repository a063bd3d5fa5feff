//! piper - build pipelines run by a fleet of agents

pub mod agent;
pub mod cli;
pub mod core;
pub mod environment;
pub mod execution;
pub mod persistence;
pub mod registry;
pub mod version;

// Re-export commonly used types
pub use agent::{Agent, AgentError, BuildHandler, ClaimOutcome, Decision, RunnerHandler};
pub use crate::core::{AgentRecord, Build, BuildChange, BuildConfig, DependencyResolver, Pipeline, Step};
pub use environment::{Environment, EnvironmentError, LocalEnv, ProcessResult, TempDirEnv};
pub use execution::{BuildError, BuildRunner, ExecutionEvent, PipelineExecutor};
pub use persistence::{open_store, BuildFeed, InMemoryStore, Store, StoreError};
pub use registry::{ComponentRegistry, RegistryError};
