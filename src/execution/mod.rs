//! Pipeline execution

pub mod build;
pub mod executor;

pub use build::{format_duration, BuildRunner};
pub use executor::{EventHandler, ExecutionEvent, ExecutionState, PipelineExecutor};

use crate::core::config::ConfigError;
use crate::core::pipeline::ResolveError;
use crate::environment::EnvironmentError;
use crate::persistence::StoreError;
use crate::registry::RegistryError;
use crate::version::VersionError;
use thiserror::Error;

/// Anything that aborts a build before it reaches a verdict
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("environment '{name}' is not configured")]
    UnknownEnvironment { name: String },

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BuildError {
    /// Whether the configuration itself is at fault
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BuildError::Config(_)
                | BuildError::Registry(_)
                | BuildError::Resolve(_)
                | BuildError::UnknownEnvironment { .. }
        )
    }
}
