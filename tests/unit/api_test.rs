use std::sync::Arc;

use actix_web::{test, web, App};
use serde_json::Value;
use uuid::Uuid;

use testprobe::api::routes;
use testprobe::controllers::test_run::TestRunController;
use testprobe::services::registry::TestRegistry;
use testprobe::services::scenario::ScriptScenarioRunner;
use testprobe::services::storage::FsStorage;
use testprobe::services::vault::ConfigVault;

use crate::common::test_utils::fast_config;

fn app_data(
    store_root: &std::path::Path,
) -> (
    Arc<TestRegistry>,
    web::Data<TestRunController>,
    web::Data<Arc<TestRegistry>>,
) {
    let config = fast_config(store_root, "http://localhost:8081");
    let registry = TestRegistry::with_collaborators(
        config,
        Arc::new(FsStorage::new(store_root.to_path_buf())),
        Arc::new(ConfigVault::new(vec![])),
        Arc::new(ScriptScenarioRunner),
    );
    let controller = web::Data::new(TestRunController::new(registry.clone()));
    let registry_data = web::Data::new(registry.clone());
    (registry, controller, registry_data)
}

macro_rules! spawn_app {
    ($store:expr) => {{
        let (registry, controller, registry_data) = app_data($store);
        let app = test::init_service(
            App::new()
                .app_data(controller)
                .app_data(registry_data)
                .configure(routes::configure),
        )
        .await;
        (registry, app)
    }};
}

#[actix_rt::test]
async fn initialize_returns_a_fresh_test_id() {
    let store = tempfile::tempdir().unwrap();
    let (_registry, app) = spawn_app!(store.path());

    let request = test::TestRequest::post()
        .uri("/api/v1/test/initialize")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, request).await;

    let id = body["test-id"].as_str().expect("test-id present");
    Uuid::parse_str(id).expect("test-id is a UUID");
}

#[actix_rt::test]
async fn status_of_an_uninitialized_test_reports_zero_progress() {
    let store = tempfile::tempdir().unwrap();
    let (registry, app) = spawn_app!(store.path());
    let test_id = registry.initialize();

    let request = test::TestRequest::get()
        .uri(&format!("/api/v1/test/{}/status", test_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, request).await;

    assert_eq!(body["state"], "Uninitialized");
    assert_eq!(body["current-phase"], "Uninitialized");
    assert_eq!(body["progress-percent"], 0);
}

#[actix_rt::test]
async fn status_of_an_unknown_test_is_not_found() {
    let store = tempfile::tempdir().unwrap();
    let (_registry, app) = spawn_app!(store.path());

    let request = test::TestRequest::get()
        .uri(&format!("/api/v1/test/{}/status", Uuid::new_v4()))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), actix_web::http::StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn starting_an_unknown_test_reports_rejection() {
    let store = tempfile::tempdir().unwrap();
    let (_registry, app) = spawn_app!(store.path());

    let request = test::TestRequest::post()
        .uri("/api/v1/test/start")
        .set_json(serde_json::json!({
            "test-id": Uuid::new_v4(),
            "block-storage-path": "s3://bundles/tests",
            "test-type": "kafka-json"
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, request).await;

    assert_eq!(body["accepted"], false);
    assert!(body["error"].as_str().unwrap().contains("Unknown test id"));
}

#[actix_rt::test]
async fn delete_of_a_never_started_test_removes_the_record() {
    let store = tempfile::tempdir().unwrap();
    let (registry, app) = spawn_app!(store.path());
    let test_id = registry.initialize();

    let request = test::TestRequest::delete()
        .uri(&format!("/api/v1/test/{}", test_id))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), actix_web::http::StatusCode::NO_CONTENT);

    assert!(registry.status(test_id).is_err());
}

#[actix_rt::test]
async fn health_reports_active_test_count() {
    let store = tempfile::tempdir().unwrap();
    let (registry, app) = spawn_app!(store.path());
    registry.initialize();

    let request = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, request).await;

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_tests"], 1);
}

#[actix_rt::test]
async fn list_active_contains_initialized_tests() {
    let store = tempfile::tempdir().unwrap();
    let (registry, app) = spawn_app!(store.path());
    let test_id = registry.initialize();

    let request = test::TestRequest::get().uri("/api/v1/test").to_request();
    let body: Value = test::call_and_read_body_json(&app, request).await;

    let active: Vec<String> = body["active"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(active.contains(&test_id.to_string()));
}
