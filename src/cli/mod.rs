//! Command-line interface

pub mod commands;
pub mod output;

use crate::core::config::CONFIG_FILE;
use clap::{Parser, Subcommand};
use commands::{AgentCommand, ExecCommand, ShowCommand, SubmitCommand, ValidateCommand};
use std::ffi::OsString;

/// Build pipelines run locally or by a fleet of agents
#[derive(Debug, Parser, Clone)]
#[command(name = "piper")]
#[command(version)]
#[command(about = "Run build pipelines locally or through agents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    pub config: String,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline once, here and now
    Exec(ExecCommand),

    /// Manage the agent on this host
    #[command(subcommand)]
    Agent(AgentCommand),

    /// Queue a build for the agents
    Submit(SubmitCommand),

    /// Show a stored build
    Show(ShowCommand),

    /// Validate the configuration
    Validate(ValidateCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
