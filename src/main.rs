use anyhow::{bail, Context, Result};
use piper::agent::{Agent, RunnerHandler};
use piper::cli::commands::{ExecCommand, ShowCommand, SubmitCommand, ValidateCommand};
use piper::cli::output::*;
use piper::cli::{Cli, Command};
use piper::core::{Build, BuildConfig, DependencyResolver, Pipeline};
use piper::execution::{format_duration, BuildRunner, ExecutionEvent};
use piper::persistence::open_store;
use piper::registry::ComponentRegistry;
use piper::AgentError;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG overrides the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Exec(cmd) => exec_pipeline(&cli, cmd).await?,
        Command::Agent(_) => start_agent(&cli).await?,
        Command::Submit(cmd) => submit_build(&cli, cmd).await?,
        Command::Show(cmd) => show_build(&cli, cmd).await?,
        Command::Validate(cmd) => validate_config(&cli, cmd)?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<BuildConfig> {
    BuildConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))
}

async fn exec_pipeline(cli: &Cli, cmd: &ExecCommand) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(&config.db)
        .await
        .context("Failed to open store")?;
    let registry = Arc::new(ComponentRegistry::with_builtins());

    println!(
        "{} Running pipeline {} in {}",
        INFO,
        style(&cmd.pipeline).bold(),
        style(&cmd.env).cyan()
    );

    let build = Build::new(config.request(&cmd.pipeline, &cmd.env, &[]));
    let mut runner = BuildRunner::new(build, store, registry).with_event_handler(Arc::new(
        |event: ExecutionEvent| println!("{}", format_execution_event(&event)),
    ));

    let started = Instant::now();
    let result = runner.run().await;
    let build = runner.into_build();

    match result {
        Ok(true) => {
            println!(
                "\n{} {} completed {} in {}",
                CHECK,
                style(build.version.as_deref().unwrap_or(&cmd.pipeline)).bold(),
                style("successfully").green(),
                format_duration(started.elapsed())
            );
            Ok(())
        }
        Ok(false) => {
            println!(
                "\n{} {} {} after {}",
                CROSS,
                style(build.version.as_deref().unwrap_or(&cmd.pipeline)).bold(),
                style("failed").red(),
                format_duration(started.elapsed())
            );
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::Error::new(e).context("Build crashed")),
    }
}

async fn start_agent(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let Some(settings) = &config.agent else {
        bail!("{} has no `agent` section", cli.config);
    };
    if config.db.host.is_none() {
        warn!("No `db.host` configured; the agent only sees builds from this process");
    }

    let store = open_store(&config.db)
        .await
        .context("Failed to open store")?;
    let registry = Arc::new(ComponentRegistry::with_builtins());
    let handler = Arc::new(RunnerHandler::new(store.clone(), registry));
    let mut agent = Agent::from_settings(settings, store, handler).await;

    println!(
        "{} Agent {} ({}) waiting for builds",
        ROCKET,
        style(agent.id()).bold(),
        style(&agent.record().fqdn).dim()
    );

    let result: Result<(), AgentError> = tokio::select! {
        result = agent.start() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Agent stopped: {}", e);
        return Err(e.into());
    }
    Ok(())
}

async fn submit_build(cli: &Cli, cmd: &SubmitCommand) -> Result<()> {
    let config = load_config(cli)?;
    Pipeline::from_declared(&cmd.pipeline, &config.pipelines)?;
    if !config.envs.contains_key(&cmd.env) {
        bail!("environment '{}' is not configured", cmd.env);
    }

    let store = open_store(&config.db)
        .await
        .context("Failed to open store")?;
    let build = Build::new(config.request(&cmd.pipeline, &cmd.env, &cmd.agents));
    let id = store.add_build(&build).await.context("Failed to submit build")?;

    println!(
        "{} Submitted {} in {}: {}",
        CHECK,
        style(&cmd.pipeline).bold(),
        style(&cmd.env).cyan(),
        id
    );
    Ok(())
}

async fn show_build(cli: &Cli, cmd: &ShowCommand) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(&config.db)
        .await
        .context("Failed to open store")?;

    let Some(build) = store.get_build(&cmd.id).await? else {
        bail!("build '{}' not found", cmd.id);
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&build)?);
    } else {
        println!("{}", format_build(&build));
    }
    Ok(())
}

fn validate_config(cli: &Cli, cmd: &ValidateCommand) -> Result<()> {
    if !cmd.json {
        println!("{} Validating {}...", INFO, cli.config);
    }

    let config = load_config(cli)?;
    let registry = ComponentRegistry::with_builtins();

    registry.build_version(&config.version)?;
    for (name, block) in &config.envs {
        registry.build_environment(name, block)?;
    }

    let mut table = BTreeMap::new();
    for (key, block) in &config.steps {
        table.insert(key.clone(), registry.build_step(key, block)?);
    }

    let resolver = DependencyResolver::new(&table);
    let mut orders = BTreeMap::new();
    for (name, keys) in &config.pipelines {
        let order = resolver.resolve(&Pipeline::new(name, keys.clone()))?;
        let keys: Vec<String> = order.into_iter().map(|step| step.key).collect();
        orders.insert(name.clone(), keys);
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&orders)?);
        return Ok(());
    }

    println!("{} Configuration is valid", CHECK);
    println!("  Steps: {}", config.steps.len());
    println!("  Environments: {}", config.envs.keys().cloned().collect::<Vec<_>>().join(", "));
    for (name, keys) in &orders {
        println!("  {} {}", style(name).bold(), style(keys.join(" → ")).dim());
    }
    Ok(())
}
