//! Core domain models
//!
//! Configuration, steps, build and agent records, and the dependency
//! resolver that turns a pipeline into an execution order.

pub mod config;
pub mod pipeline;
pub mod state;
pub mod step;

pub use config::{AgentSettings, BuildConfig, ConfigError, StoreConfig};
pub use pipeline::{DependencyResolver, Pipeline, ResolveError};
pub use state::{AgentRecord, Build, BuildChange};
pub use step::{CommandLineStep, ExecutionIndex, Step, StepAction};
