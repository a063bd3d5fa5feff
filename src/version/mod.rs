//! Version providers
//!
//! A build's human-readable version is resolved once during setup and used
//! for log lines and the persisted record.

use crate::environment::{process, EnvironmentError};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("failed to determine version: {0}")]
    Command(#[from] EnvironmentError),

    #[error("version command produced no output")]
    Empty,
}

/// Determines the version string of the project being built
#[async_trait]
pub trait VersionProvider: Send + Sync {
    async fn resolve(&self) -> Result<String, VersionError>;
}

/// A version number written straight into the configuration
#[derive(Debug, Clone)]
pub struct StaticVersion {
    version: String,
}

impl StaticVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

#[async_trait]
impl VersionProvider for StaticVersion {
    async fn resolve(&self) -> Result<String, VersionError> {
        Ok(self.version.clone())
    }
}

/// The output of `git describe <arguments>`
#[derive(Debug, Clone)]
pub struct GitVersion {
    arguments: String,
}

impl GitVersion {
    pub fn new(arguments: impl Into<String>) -> Self {
        Self {
            arguments: arguments.into(),
        }
    }

    pub fn command(&self) -> String {
        format!("git describe {}", self.arguments).trim_end().to_string()
    }
}

#[async_trait]
impl VersionProvider for GitVersion {
    async fn resolve(&self) -> Result<String, VersionError> {
        let version = process::oneshot(&self.command()).await?;
        if version.is_empty() {
            return Err(VersionError::Empty);
        }
        Ok(version)
    }
}
