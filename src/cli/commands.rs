//! CLI command definitions

use crate::core::state::{DEFAULT_ENV, DEFAULT_PIPELINE};
use clap::{Args, Subcommand};

/// Run a pipeline once
#[derive(Debug, Args, Clone)]
pub struct ExecCommand {
    /// Pipeline to run
    #[arg(default_value = DEFAULT_PIPELINE)]
    pub pipeline: String,

    /// Environment to run it in
    #[arg(default_value = DEFAULT_ENV)]
    pub env: String,
}

/// Agent subcommands
#[derive(Debug, Subcommand, Clone)]
pub enum AgentCommand {
    /// Register this host and start taking builds
    Start,
}

/// Queue a build request
#[derive(Debug, Args, Clone)]
pub struct SubmitCommand {
    /// Pipeline to run
    #[arg(default_value = DEFAULT_PIPELINE)]
    pub pipeline: String,

    /// Environment to run it in
    #[arg(default_value = DEFAULT_ENV)]
    pub env: String,

    /// Restrict the build to these agent ids
    #[arg(long = "agent", value_name = "ID")]
    pub agents: Vec<String>,
}

/// Show a stored build
#[derive(Debug, Args, Clone)]
pub struct ShowCommand {
    /// Build id
    pub id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Validate the configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
