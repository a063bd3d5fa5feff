//! Test: Local Commands - steps run through a real shell

use crate::helpers::*;
use piper::execution::BuildRunner;
use piper::persistence::InMemoryStore;
use piper::registry::ComponentRegistry;
use serde_json::json;
use std::sync::Arc;

async fn run(config: ConfigBuilder, env: &str) -> bool {
    let mut runner = BuildRunner::new(
        config.request("build", env),
        Arc::new(InMemoryStore::new()),
        Arc::new(ComponentRegistry::with_builtins()),
    );
    runner.run().await.unwrap()
}

#[tokio::test]
async fn test_local_env_runs_in_configured_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigBuilder::new()
        .env(
            "workspace",
            json!({"class": "piper.env.LocalEnv", "cwd": dir.path().to_str().unwrap()}),
        )
        .step("write", "echo built > artifact.txt", &[])
        .step("check", "grep -q built artifact.txt", &["write"])
        .pipeline("build", &["check"]);

    assert!(run(config, "workspace").await);
    let artifact = std::fs::read_to_string(dir.path().join("artifact.txt")).unwrap();
    assert_eq!(artifact.trim(), "built");
}

#[tokio::test]
async fn test_non_zero_exit_fails_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigBuilder::new()
        .env(
            "workspace",
            json!({"class": "piper.env.LocalEnv", "cwd": dir.path().to_str().unwrap()}),
        )
        .step("lint", "exit 3", &[])
        .step("package", "touch package.tar", &["lint"])
        .pipeline("build", &["package"]);

    assert!(!run(config, "workspace").await);
    assert!(!dir.path().join("package.tar").exists());
}

#[tokio::test]
async fn test_temp_dir_env_isolates_steps() {
    let config = ConfigBuilder::new()
        .env("scratch", json!({"class": "piper.env.TempDirEnv"}))
        .step("write", "echo data > shared.txt", &[])
        .step("read", "test -f shared.txt", &["write"])
        .pipeline("build", &["read"]);

    assert!(run(config, "scratch").await);
}
