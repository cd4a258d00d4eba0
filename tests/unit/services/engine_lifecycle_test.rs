use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;
use wiremock::MockServer;

use testprobe::errors::AppError;
use testprobe::models::report::TestExecutionResult;
use testprobe::services::registry::TestRegistry;
use testprobe::services::scenario::{ScenarioContext, ScenarioRunner};
use testprobe::services::storage::FsStorage;
use testprobe::services::vault::ConfigVault;

use crate::common::test_utils::{bundle_manifest, fast_config, write_bundle};

struct InstantPassRunner;

#[async_trait]
impl ScenarioRunner for InstantPassRunner {
    async fn run(&self, _ctx: &ScenarioContext) -> Result<TestExecutionResult, AppError> {
        let mut result = TestExecutionResult::empty();
        result.scenario_count = 1;
        result.scenarios_passed = 1;
        result.step_count = 2;
        result.steps_passed = 2;
        Ok(result)
    }
}

struct SlowRunner;

#[async_trait]
impl ScenarioRunner for SlowRunner {
    async fn run(&self, _ctx: &ScenarioContext) -> Result<TestExecutionResult, AppError> {
        tokio::time::sleep(Duration::from_secs(20)).await;
        Ok(TestExecutionResult::empty())
    }
}

async fn registry_with_runner(
    store_root: &std::path::Path,
    registry_url: &str,
    runner: Arc<dyn ScenarioRunner>,
) -> Arc<TestRegistry> {
    let config = fast_config(store_root, registry_url);
    TestRegistry::with_collaborators(
        config,
        Arc::new(FsStorage::new(store_root.to_path_buf())),
        Arc::new(ConfigVault::new(vec![])),
        runner,
    )
}

/// Poll the registry until the status predicate holds or the deadline
/// passes.
async fn await_state<F>(registry: &TestRegistry, test_id: Uuid, deadline: Duration, predicate: F)
where
    F: Fn(&testprobe::models::test::TestStatusResponse) -> bool,
{
    let started = std::time::Instant::now();
    loop {
        if let Ok(status) = registry.status(test_id) {
            if predicate(&status) {
                return;
            }
            if started.elapsed() > deadline {
                panic!("timed out waiting for state; last seen: {:?}", status);
            }
        } else if started.elapsed() > deadline {
            panic!("timed out waiting for state; record is gone");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn happy_path_reaches_completed_and_uploads_evidence() {
    let store = tempfile::tempdir().unwrap();
    let registry_server = MockServer::start().await;
    let registry = registry_with_runner(
        store.path(),
        &registry_server.uri(),
        Arc::new(InstantPassRunner),
    )
    .await;

    let test_id = registry.initialize();
    write_bundle(
        store.path(),
        "bundles",
        test_id,
        &bundle_manifest("bundles", "test-events-json", None),
        &[],
    );

    registry.start(test_id, "bundles", "kafka-json").await.unwrap();
    await_state(&registry, test_id, Duration::from_secs(15), |status| {
        status.state == "Completed"
    })
    .await;

    let status = registry.status(test_id).unwrap();
    assert_eq!(status.result, Some(true));
    assert!(status.error.is_none());
    assert!(status.start_time.is_some());
    assert!(status.end_time.is_some());

    let report = store
        .path()
        .join("bundles/tests")
        .join(test_id.to_string())
        .join("evidence/cucumber.json");
    assert!(report.is_file(), "evidence drop must contain cucumber.json");
}

#[tokio::test]
async fn completed_records_are_retired_after_the_retention_window() {
    let store = tempfile::tempdir().unwrap();
    let registry_server = MockServer::start().await;
    let registry = registry_with_runner(
        store.path(),
        &registry_server.uri(),
        Arc::new(InstantPassRunner),
    )
    .await;

    let test_id = registry.initialize();
    write_bundle(
        store.path(),
        "bundles",
        test_id,
        &bundle_manifest("bundles", "test-events-json", None),
        &[],
    );
    registry.start(test_id, "bundles", "kafka-json").await.unwrap();

    await_state(&registry, test_id, Duration::from_secs(15), |status| {
        status.state == "Completed"
    })
    .await;

    // completed_state_timeout in the fast config is five seconds.
    let started = std::time::Instant::now();
    loop {
        if registry.status(test_id).is_err() {
            break;
        }
        if started.elapsed() > Duration::from_secs(10) {
            panic!("record was not retired after the completed-state timer");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[tokio::test]
async fn delete_during_execution_fails_with_cancelled_within_the_exception_window() {
    let store = tempfile::tempdir().unwrap();
    let registry_server = MockServer::start().await;
    let registry =
        registry_with_runner(store.path(), &registry_server.uri(), Arc::new(SlowRunner)).await;

    let test_id = registry.initialize();
    write_bundle(
        store.path(),
        "bundles",
        test_id,
        &bundle_manifest("bundles", "test-events-json", None),
        &[],
    );
    registry.start(test_id, "bundles", "kafka-json").await.unwrap();

    await_state(&registry, test_id, Duration::from_secs(15), |status| {
        status.current_phase == "Executing"
    })
    .await;

    registry.delete(test_id).await.unwrap();
    await_state(&registry, test_id, Duration::from_secs(5), |status| {
        status.state == "Failed" && status.error.as_deref() == Some("cancelled")
    })
    .await;

    // Stream routes for the test disappear with its workers.
    let router = registry.router();
    let started = std::time::Instant::now();
    while router.has_streams(test_id) {
        if started.elapsed() > Duration::from_secs(5) {
            panic!("stream routes survived cancellation");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn duplicate_topics_fail_validation_before_any_worker_spawns() {
    let store = tempfile::tempdir().unwrap();
    let registry_server = MockServer::start().await;
    let registry = registry_with_runner(
        store.path(),
        &registry_server.uri(),
        Arc::new(InstantPassRunner),
    )
    .await;

    let test_id = registry.initialize();
    let manifest = concat!(
        "object_storage_location: \"s3://bundles/tests\"\n",
        "evidence_dir: evidence\n",
        "bucket: bundles\n",
        "topic_directives:\n",
        "  - topic: o\n",
        "    role: producer\n",
        "    client_principal: probe\n",
        "  - topic: p\n",
        "    role: producer\n",
        "    client_principal: probe\n",
        "  - topic: o\n",
        "    role: producer\n",
        "    client_principal: probe\n",
        "user_glue_packages: []\n",
        "tags: []\n",
    );
    write_bundle(store.path(), "bundles", test_id, manifest, &[]);

    registry.start(test_id, "bundles", "kafka-json").await.unwrap();
    await_state(&registry, test_id, Duration::from_secs(10), |status| {
        status.state == "Failed" && status.error.as_deref() == Some("validation")
    })
    .await;

    assert!(!registry.router().has_streams(test_id));
}

#[tokio::test]
async fn starting_an_unknown_test_is_rejected() {
    let store = tempfile::tempdir().unwrap();
    let registry_server = MockServer::start().await;
    let registry = registry_with_runner(
        store.path(),
        &registry_server.uri(),
        Arc::new(InstantPassRunner),
    )
    .await;

    let err = registry
        .start(Uuid::new_v4(), "bundles", "kafka-json")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn a_started_test_cannot_be_started_twice() {
    let store = tempfile::tempdir().unwrap();
    let registry_server = MockServer::start().await;
    let registry =
        registry_with_runner(store.path(), &registry_server.uri(), Arc::new(SlowRunner)).await;

    let test_id = registry.initialize();
    write_bundle(
        store.path(),
        "bundles",
        test_id,
        &bundle_manifest("bundles", "test-events-json", None),
        &[],
    );
    registry.start(test_id, "bundles", "kafka-json").await.unwrap();

    let err = registry
        .start(test_id, "bundles", "kafka-json")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    registry.delete(test_id).await.unwrap();
}
