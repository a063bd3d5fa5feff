//! Test: Fail Fast - a failing step stops the pipeline, teardown still runs

use crate::helpers::*;
use piper::execution::BuildRunner;
use piper::persistence::{InMemoryStore, Store};
use piper::registry::ComponentRegistry;
use std::sync::Arc;

fn three_steps() -> ConfigBuilder {
    ConfigBuilder::new()
        .step("fetch", "true", &[])
        .step("compile", "true", &[])
        .step("test", "true", &[])
        .pipeline("build", &["fetch", "compile", "test"])
}

#[tokio::test]
async fn test_all_steps_succeed() {
    let store = Arc::new(InMemoryStore::new());
    let log = EnvLog::default();

    let mut runner = BuildRunner::new(
        three_steps().request("build", "local"),
        store.clone(),
        Arc::new(ComponentRegistry::with_builtins()),
    )
    .with_environment(Box::new(RecordingEnv::new(&log)));

    assert!(runner.run().await.unwrap());
    assert_eq!(
        log.entries(),
        vec![
            "setup",
            "execute fetch (1/3)",
            "execute compile (2/3)",
            "execute test (3/3)",
            "teardown",
        ]
    );

    let build = runner.into_build();
    let stored = store.get_build(build.id.as_deref().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.success, Some(true));
    assert_eq!(stored.version.as_deref(), Some("1.0.0-test"));
    assert_eq!(stored.status.as_deref(), Some(""));
    assert!(!stored.crashed);
    assert!(stored.started.is_some());
    assert!(stored.ended.is_some());
}

#[tokio::test]
async fn test_second_step_fails() {
    let store = Arc::new(InMemoryStore::new());
    let log = EnvLog::default();

    let mut runner = BuildRunner::new(
        three_steps().request("build", "local"),
        store.clone(),
        Arc::new(ComponentRegistry::with_builtins()),
    )
    .with_environment(Box::new(RecordingEnv::new(&log).failing_on("compile")));

    assert!(!runner.run().await.unwrap());

    // Step 3 never reaches the environment, teardown does
    assert_eq!(
        log.entries(),
        vec![
            "setup",
            "execute fetch (1/3)",
            "execute compile (2/3)",
            "teardown",
        ]
    );

    let build = runner.into_build();
    assert_eq!(build.success, Some(false));
    assert!(!build.crashed);
}

#[tokio::test]
async fn test_status_is_published_before_each_step() {
    let store = Arc::new(InMemoryStore::new());
    let log = EnvLog::default();

    let mut build = three_steps().request("build", "local");
    let id = store.add_build(&build).await.unwrap();
    build.id = Some(id);

    let mut feed = store.build_feed().await.unwrap();
    let mut runner = BuildRunner::new(
        build,
        store.clone(),
        Arc::new(ComponentRegistry::with_builtins()),
    )
    .with_environment(Box::new(RecordingEnv::new(&log).failing_on("test")));
    runner.run().await.unwrap();
    store.close_feeds().await;

    let mut statuses = Vec::new();
    while let Some(change) = feed.next().await {
        if let Some(status) = change.new_value.and_then(|b| b.status) {
            if statuses.last() != Some(&status) {
                statuses.push(status);
            }
        }
    }

    assert_eq!(
        statuses,
        vec!["1/3: fetch", "2/3: compile", "3/3: test", ""]
    );
}
