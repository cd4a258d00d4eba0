#![cfg(feature = "integration-tests")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use testcontainers::clients::Cli;
use testcontainers_modules::kafka::{Kafka, KAFKA_PORT};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use testprobe::services::registry::TestRegistry;
use testprobe::services::scenario::ScriptScenarioRunner;
use testprobe::services::storage::FsStorage;
use testprobe::services::vault::ConfigVault;

use crate::common::test_utils::{bundle_manifest, fast_config, write_bundle};

/// Schema Registry stub: every subject auto-registers, ids are minted per
/// subject by the order of registration.
async fn stub_schema_registry() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/subjects/.+/versions/latest$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/subjects/[^/]*CloudEvent/versions$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/subjects/.+/versions$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 2})))
        .mount(&server)
        .await;
    // Decode-side lookups for records produced by this very process are
    // served from the shared cache, but a fresh consumer may still ask.
    Mock::given(method("GET"))
        .and(path_regex(r"^/schemas/ids/1$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schemaType": "JSON",
            "schema": "{\"type\":\"object\"}"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/schemas/ids/2$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schemaType": "JSON",
            "schema": "{\"type\":\"object\"}"
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn happy_path_json_scenario_produces_consumes_and_uploads_evidence() {
    let docker = Cli::default();
    let kafka = docker.run(Kafka::default());
    let bootstrap = format!("127.0.0.1:{}", kafka.get_host_port_ipv4(KAFKA_PORT));

    let registry_server = stub_schema_registry().await;
    let store = tempfile::tempdir().unwrap();

    let mut config = (*fast_config(store.path(), &registry_server.uri())).clone();
    config.kafka.bootstrap_servers = vec![bootstrap];
    config.runtime.max_execution_time_ms = 120_000;
    config.engine.setup_state_timeout_ms = 60_000;
    config.dsl.ask_timeout_ms = 20_000;
    config.dsl.fetch_wait_ms = 15_000;
    config.services.timeout_ms = 20_000;
    let config = Arc::new(config);

    let registry = TestRegistry::with_collaborators(
        config,
        Arc::new(FsStorage::new(store.path().to_path_buf())),
        Arc::new(ConfigVault::new(vec![])),
        Arc::new(ScriptScenarioRunner),
    );

    let test_id = registry.initialize();
    let scenario = concat!(
        "scenario: happy-path-json\n",
        "steps:\n",
        "  - produce:\n",
        "      topic: test-events-json\n",
        "      event-type: TestEvent\n",
        "      correlation-id: c-1\n",
        "      payload:\n",
        "        orderId: o-1\n",
        "        amount: 1.0\n",
        "        currency: USD\n",
        "  - expect-event:\n",
        "      topic: test-events-json\n",
        "      event-type: TestEvent\n",
        "      correlation-id: c-1\n",
    );
    write_bundle(
        store.path(),
        "bundles",
        test_id,
        &bundle_manifest("bundles", "test-events-json", None),
        &[("happy.yaml", scenario)],
    );

    registry
        .start(test_id, "bundles", "kafka-json")
        .await
        .unwrap();

    let started = std::time::Instant::now();
    loop {
        let status = registry.status(test_id).unwrap();
        if status.state == "Completed" {
            assert_eq!(status.result, Some(true));
            break;
        }
        assert_ne!(
            status.state, "Failed",
            "test failed: {:?}",
            status.error
        );
        if started.elapsed() > Duration::from_secs(120) {
            panic!("test did not complete; last status: {:?}", status);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let report_path = store
        .path()
        .join("bundles/tests")
        .join(test_id.to_string())
        .join("evidence/cucumber.json");
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(report["passed"], true);
    assert_eq!(report["scenario_count"], 1);
    assert_eq!(report["scenarios_passed"], 1);
    assert_eq!(report["scenarios_failed"], 0);
}
