use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use testprobe::errors::AppError;
use testprobe::services::schema::{SchemaFormat, SchemaRegistryClient};

fn latest_version_body(subject: &str, id: u32) -> serde_json::Value {
    json!({
        "subject": subject,
        "version": 1,
        "id": id,
        "schemaType": "JSON",
        "schema": "{\"type\":\"object\"}"
    })
}

#[tokio::test]
async fn first_lookup_hits_the_registry_and_second_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/subjects/orders-TestEvent/versions/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(latest_version_body(
            "orders-TestEvent",
            7,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = SchemaRegistryClient::new(&server.uri(), false, 1);

    let first = client
        .latest_for_subject("orders-TestEvent")
        .await
        .unwrap()
        .expect("schema should be registered");
    let second = client
        .latest_for_subject("orders-TestEvent")
        .await
        .unwrap()
        .expect("schema should be cached");

    assert_eq!(first.schema_id, 7);
    assert_eq!(second.schema_id, 7);
    assert_eq!(first.format, SchemaFormat::Json);
    // MockServer verifies expect(1) on drop.
}

#[tokio::test]
async fn schema_by_id_is_cached_after_one_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/schemas/ids/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schemaType": "JSON",
            "schema": "{\"type\":\"object\"}"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = SchemaRegistryClient::new(&server.uri(), false, 1);
    let first = client.schema_by_id(42, "orders-TestEvent").await.unwrap();
    let second = client.schema_by_id(42, "orders-TestEvent").await.unwrap();

    assert_eq!(first.schema_id, 42);
    assert_eq!(second.schema_id, 42);
}

#[tokio::test]
async fn unknown_subject_is_auto_registered_in_development_mode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/subjects/orders-TestEvent/versions/latest"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/subjects/orders-TestEvent/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9})))
        .expect(1)
        .mount(&server)
        .await;

    let client = SchemaRegistryClient::new(&server.uri(), true, 1);
    let payload = json!({"orderId": "o-1", "amount": 1.0});

    let schema = client
        .resolve_for_produce("orders-TestEvent", SchemaFormat::Json, Some(&payload))
        .await
        .unwrap();
    assert_eq!(schema.schema_id, 9);

    // The freshly minted id is cached; a second produce resolves without
    // any further HTTP traffic.
    let again = client
        .resolve_for_produce("orders-TestEvent", SchemaFormat::Json, Some(&payload))
        .await
        .unwrap();
    assert_eq!(again.schema_id, 9);
}

#[tokio::test]
async fn strict_mode_refuses_unregistered_subjects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/subjects/orders-TestEvent/versions/latest"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = SchemaRegistryClient::new(&server.uri(), false, 1);
    let err = client
        .resolve_for_produce(
            "orders-TestEvent",
            SchemaFormat::Json,
            Some(&json!({"a": 1})),
        )
        .await
        .unwrap_err();

    match err {
        AppError::Serialization { subject, message } => {
            assert_eq!(subject, "orders-TestEvent");
            assert!(message.contains("auto-registration is disabled"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn cache_reset_forces_a_new_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/subjects/orders-TestEvent/versions/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(latest_version_body(
            "orders-TestEvent",
            7,
        )))
        .expect(2)
        .mount(&server)
        .await;

    let client = SchemaRegistryClient::new(&server.uri(), false, 1);
    client.latest_for_subject("orders-TestEvent").await.unwrap();
    assert!(client.cached_entries() > 0);

    client.reset_cache();
    assert_eq!(client.cached_entries(), 0);
    client.latest_for_subject("orders-TestEvent").await.unwrap();
}
