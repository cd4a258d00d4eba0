use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use testprobe::errors::AppError;
use testprobe::models::directive::{BlockStorageDirective, TopicDirective, TopicRole};
use testprobe::models::report::TestExecutionResult;
use testprobe::services::scenario::{
    ScenarioContext, ScenarioExecutor, ScenarioRunner, ScriptScenarioRunner,
};
use testprobe::services::streams::StreamRouter;

fn directive(bucket: &str) -> BlockStorageDirective {
    BlockStorageDirective {
        object_storage_location: format!("s3://{}/tests", bucket),
        evidence_dir: "evidence".to_string(),
        bucket: bucket.to_string(),
        topic_directives: vec![TopicDirective {
            topic: "orders".to_string(),
            role: TopicRole::Producer,
            client_principal: "probe".to_string(),
            event_filters: vec![],
            metadata: HashMap::new(),
            bootstrap_servers: None,
        }],
        user_glue_packages: vec![],
        tags: vec![],
    }
}

fn context(bundle_dir: &std::path::Path) -> ScenarioContext {
    ScenarioContext {
        test_id: Uuid::new_v4(),
        router: Arc::new(StreamRouter::new(Duration::from_millis(200))),
        bundle_dir: bundle_dir.to_path_buf(),
        evidence_dir: bundle_dir.join("evidence"),
        directive: directive("bundles"),
        glue_packages: vec![],
    }
}

struct PassingRunner;

#[async_trait]
impl ScenarioRunner for PassingRunner {
    async fn run(&self, _ctx: &ScenarioContext) -> Result<TestExecutionResult, AppError> {
        let mut result = TestExecutionResult::empty();
        result.scenario_count = 2;
        result.scenarios_passed = 2;
        result.step_count = 5;
        result.steps_passed = 5;
        Ok(result)
    }
}

struct ExplodingRunner;

#[async_trait]
impl ScenarioRunner for ExplodingRunner {
    async fn run(&self, _ctx: &ScenarioContext) -> Result<TestExecutionResult, AppError> {
        Err(AppError::Scenario("glue package missing".to_string()))
    }
}

#[tokio::test]
async fn executor_writes_the_report_into_the_evidence_directory() {
    let bundle = tempfile::tempdir().unwrap();
    let ctx = context(bundle.path());
    let executor = ScenarioExecutor::new(Arc::new(PassingRunner));

    let result = executor.execute(&ctx).await;
    assert!(result.passed);

    let report_path = ctx.evidence_dir.join("cucumber.json");
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(report["passed"], true);
    assert_eq!(report["scenario_count"], 2);
    assert_eq!(report["success_rate"], 100.0);
}

#[tokio::test]
async fn runner_errors_become_a_failed_result_with_a_report() {
    let bundle = tempfile::tempdir().unwrap();
    let ctx = context(bundle.path());
    let executor = ScenarioExecutor::new(Arc::new(ExplodingRunner));

    let result = executor.execute(&ctx).await;
    assert!(!result.passed);
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("glue package missing"));
    assert!(ctx.evidence_dir.join("cucumber.json").is_file());
}

#[tokio::test]
async fn script_runner_marks_scenarios_failed_and_skips_remaining_steps() {
    let bundle = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(bundle.path().join("features")).unwrap();
    std::fs::write(
        bundle.path().join("features/happy.yaml"),
        concat!(
            "scenario: happy-path\n",
            "steps:\n",
            "  - produce:\n",
            "      topic: orders\n",
            "      event-type: TestEvent\n",
            "      correlation-id: c-1\n",
            "      payload:\n",
            "        orderId: o-1\n",
            "  - expect-event:\n",
            "      topic: orders\n",
            "      event-type: TestEvent\n",
            "      correlation-id: c-1\n",
        ),
    )
    .unwrap();

    let ctx = context(bundle.path());
    // No streams are registered for this test id, so the produce step
    // fails fast and the expect step is skipped.
    let result = ScriptScenarioRunner.run(&ctx).await.unwrap();

    assert_eq!(result.scenario_count, 1);
    assert_eq!(result.scenarios_failed, 1);
    assert_eq!(result.steps_failed, 1);
    assert_eq!(result.steps_skipped, 1);
    assert_eq!(result.failed_scenarios, vec!["happy-path".to_string()]);
    assert!(!result.compute_passed());
}

#[tokio::test]
async fn script_runner_requires_scenario_scripts() {
    let bundle = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(bundle.path().join("features")).unwrap();
    let ctx = context(bundle.path());
    let err = ScriptScenarioRunner.run(&ctx).await.unwrap_err();
    assert!(matches!(err, AppError::Scenario(_)));
}
