//! Execution environments
//!
//! An environment owns the process isolation for one build: it is set up
//! once, runs every step, and is torn down at the end regardless of outcome.

pub mod process;

use crate::core::step::Step;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by an environment's lifecycle
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {exit_code:?}: {stderr}")]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("environment setup failed: {0}")]
    Setup(String),

    #[error("environment teardown failed: {0}")]
    Teardown(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of running one step's command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessResult {
    pub success: bool,

    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl ProcessResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
        }
    }

    pub fn failed(exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
        }
    }
}

/// The execution context steps run inside
#[async_trait]
pub trait Environment: Send + Sync {
    /// Prepare the environment; called once before the first step
    async fn setup(&mut self) -> Result<(), EnvironmentError>;

    /// Run one step to completion
    async fn execute(&self, step: &Step) -> Result<ProcessResult, EnvironmentError>;

    /// Release everything `setup` acquired; called once after the last step
    async fn teardown(&mut self) -> Result<(), EnvironmentError>;
}

/// Runs steps directly in a working directory on this host
#[derive(Debug, Clone, Default)]
pub struct LocalEnv {
    cwd: Option<PathBuf>,
}

impl LocalEnv {
    pub fn new(cwd: Option<PathBuf>) -> Self {
        Self { cwd }
    }
}

#[async_trait]
impl Environment for LocalEnv {
    async fn setup(&mut self) -> Result<(), EnvironmentError> {
        if let Some(cwd) = &self.cwd {
            if !cwd.is_dir() {
                return Err(EnvironmentError::Setup(format!(
                    "{} is not a directory",
                    cwd.display()
                )));
            }
        }
        Ok(())
    }

    async fn execute(&self, step: &Step) -> Result<ProcessResult, EnvironmentError> {
        process::run(&step.command(), self.cwd.as_deref(), &step.log_key()).await
    }

    async fn teardown(&mut self) -> Result<(), EnvironmentError> {
        Ok(())
    }
}

/// Runs every step inside a fresh `piper-` temporary directory
#[derive(Debug)]
pub struct TempDirEnv {
    delete_when_done: bool,
    dir: Option<TempDir>,
    kept: Option<PathBuf>,
}

impl TempDirEnv {
    pub fn new(delete_when_done: bool) -> Self {
        Self {
            delete_when_done,
            dir: None,
            kept: None,
        }
    }

    /// The working directory, once set up
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Where the directory was left behind when `delete_when_done` is false
    pub fn kept_path(&self) -> Option<&Path> {
        self.kept.as_deref()
    }
}

#[async_trait]
impl Environment for TempDirEnv {
    async fn setup(&mut self) -> Result<(), EnvironmentError> {
        let dir = tempfile::Builder::new()
            .prefix("piper-")
            .tempdir()
            .map_err(|e| EnvironmentError::Setup(format!("cannot create temp dir: {}", e)))?;

        debug!("Working directory: {}", dir.path().display());
        self.dir = Some(dir);
        Ok(())
    }

    async fn execute(&self, step: &Step) -> Result<ProcessResult, EnvironmentError> {
        let dir = self
            .path()
            .ok_or_else(|| EnvironmentError::Setup("temp dir was not set up".to_string()))?;
        process::run(&step.command(), Some(dir), &step.log_key()).await
    }

    async fn teardown(&mut self) -> Result<(), EnvironmentError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        if self.delete_when_done {
            debug!("Removing {}", dir.path().display());
            dir.close()
                .map_err(|e| EnvironmentError::Teardown(e.to_string()))?;
        } else {
            let path = dir.keep();
            info!("Leaving working directory in place: {}", path.display());
            self.kept = Some(path);
        }
        Ok(())
    }
}
