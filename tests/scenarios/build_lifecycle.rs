//! Test: Build Lifecycle - crashes are recorded, teardown follows setup

use crate::helpers::*;
use piper::core::pipeline::ResolveError;
use piper::execution::{BuildError, BuildRunner, ExecutionEvent};
use piper::persistence::{InMemoryStore, Store};
use piper::registry::{ComponentRegistry, RegistryError};
use piper::Build;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn runner(store: &Arc<InMemoryStore>, build: Build) -> BuildRunner {
    BuildRunner::new(
        build,
        store.clone(),
        Arc::new(ComponentRegistry::with_builtins()),
    )
}

async fn stored(store: &InMemoryStore, runner: BuildRunner) -> Build {
    let id = runner.into_build().id.expect("build was persisted");
    store.get_build(&id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_unknown_step_crashes_before_setup() {
    let store = Arc::new(InMemoryStore::new());
    let log = EnvLog::default();
    let config = ConfigBuilder::new()
        .step("build", "true", &["compile"])
        .pipeline("build", &["build"]);

    let mut runner = runner(&store, config.request("build", "local"))
        .with_environment(Box::new(RecordingEnv::new(&log)));

    let err = runner.run().await.unwrap_err();
    assert!(matches!(
        err,
        BuildError::Resolve(ResolveError::UnknownStep { ref key, .. }) if key == "compile"
    ));
    assert!(err.is_configuration());

    // Nothing was set up, so nothing is torn down
    assert!(log.entries().is_empty());

    let build = stored(&store, runner).await;
    assert!(build.crashed);
    assert_eq!(build.success, Some(false));
    assert!(build.ended.is_some());
}

#[tokio::test]
async fn test_unknown_environment() {
    let store = Arc::new(InMemoryStore::new());
    let config = ConfigBuilder::new()
        .step("a", "true", &[])
        .pipeline("build", &["a"]);

    let mut runner = runner(&store, config.request("build", "staging"));
    let err = runner.run().await.unwrap_err();

    assert!(matches!(err, BuildError::UnknownEnvironment { ref name } if name == "staging"));
    assert!(stored(&store, runner).await.crashed);
}

#[tokio::test]
async fn test_unregistered_component_class() {
    let store = Arc::new(InMemoryStore::new());
    let config = ConfigBuilder::new()
        .raw_step("deploy", json!({"class": "piper.step.Teleport"}))
        .pipeline("build", &["deploy"]);

    let mut runner = runner(&store, config.request("build", "local"))
        .with_environment(Box::new(RecordingEnv::new(&EnvLog::default())));
    let err = runner.run().await.unwrap_err();

    assert!(matches!(
        err,
        BuildError::Registry(RegistryError::ComponentNotFound { ref identifier })
            if identifier == "piper.step.Teleport"
    ));
}

#[tokio::test]
async fn test_invalid_step_block() {
    let store = Arc::new(InMemoryStore::new());
    let config = ConfigBuilder::new()
        .raw_step("test", json!({"class": "piper.step.CommandLineStep"}))
        .pipeline("build", &["test"]);

    let mut runner = runner(&store, config.request("build", "local"))
        .with_environment(Box::new(RecordingEnv::new(&EnvLog::default())));

    match runner.run().await.unwrap_err() {
        BuildError::Registry(RegistryError::Schema(e)) => {
            assert_eq!(e.path, "steps.test.command");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_setup_failure_skips_teardown() {
    let store = Arc::new(InMemoryStore::new());
    let log = EnvLog::default();
    let config = ConfigBuilder::new()
        .step("a", "true", &[])
        .pipeline("build", &["a"]);

    let mut runner = runner(&store, config.request("build", "local"))
        .with_environment(Box::new(RecordingEnv::new(&log).failing_setup()));

    assert!(matches!(
        runner.run().await.unwrap_err(),
        BuildError::Environment(_)
    ));
    assert_eq!(log.entries(), vec!["setup"]);
    assert!(stored(&store, runner).await.crashed);
}

#[tokio::test]
async fn test_environment_error_mid_pipeline() {
    let store = Arc::new(InMemoryStore::new());
    let log = EnvLog::default();
    let config = ConfigBuilder::new()
        .step("a", "true", &[])
        .step("b", "true", &["a"])
        .step("c", "true", &["b"])
        .pipeline("build", &["c"]);

    let mut runner = runner(&store, config.request("build", "local"))
        .with_environment(Box::new(RecordingEnv::new(&log).erroring_on("b")));

    assert!(runner.run().await.is_err());
    assert_eq!(
        log.entries(),
        vec!["setup", "execute a (1/3)", "execute b (2/3)", "teardown"]
    );

    let build = stored(&store, runner).await;
    assert!(build.crashed);
    assert_eq!(build.success, Some(false));
    assert_eq!(build.version.as_deref(), Some("1.0.0-test"));
}

#[tokio::test]
async fn test_events_follow_the_run() {
    let store = Arc::new(InMemoryStore::new());
    let config = ConfigBuilder::new()
        .step("a", "true", &[])
        .step("b", "true", &["a"])
        .pipeline("build", &["b"]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let mut runner = runner(&store, config.request("build", "local"))
        .with_environment(Box::new(RecordingEnv::new(&EnvLog::default()).failing_on("b")))
        .with_event_handler(Arc::new(move |event: ExecutionEvent| {
            sink.lock().unwrap().push(event);
        }));

    assert!(!runner.run().await.unwrap());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    assert!(matches!(&seen[0], ExecutionEvent::StepStarted { key, .. } if key == "a"));
    assert!(matches!(&seen[1], ExecutionEvent::StepCompleted { key, success: true } if key == "a"));
    assert!(matches!(&seen[3], ExecutionEvent::StepCompleted { key, success: false } if key == "b"));
    assert!(matches!(seen[4], ExecutionEvent::PipelineCompleted { success: false }));
}

#[tokio::test]
async fn test_existing_record_is_updated_not_duplicated() {
    let store = Arc::new(InMemoryStore::new());
    let config = ConfigBuilder::new()
        .step("a", "true", &[])
        .pipeline("build", &["a"]);

    let id = store.add_build(&config.request("build", "local")).await.unwrap();
    let build = store.get_build(&id).await.unwrap().unwrap();

    let mut runner = runner(&store, build)
        .with_environment(Box::new(RecordingEnv::new(&EnvLog::default())));
    assert!(runner.run().await.unwrap());

    assert_eq!(runner.build().id.as_deref(), Some(id.as_str()));
    assert_eq!(stored(&store, runner).await.success, Some(true));
}
