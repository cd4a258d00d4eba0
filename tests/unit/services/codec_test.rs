use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use testprobe::models::cloud_event::CloudEvent;
use testprobe::services::schema::{
    encode_frame, read_frame_header, DecodedPayload, EventPayload, SchemaRegistryClient,
    WireCodec,
};

async fn codec_with_registered_subject(
    server: &MockServer,
    subject: &str,
    schema_id: u32,
) -> WireCodec {
    Mock::given(method("GET"))
        .and(path(format!("/subjects/{}/versions/latest", subject)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subject": subject,
            "version": 1,
            "id": schema_id,
            "schemaType": "JSON",
            "schema": "{\"type\":\"object\"}"
        })))
        .mount(server)
        .await;
    WireCodec::new(Arc::new(SchemaRegistryClient::new(&server.uri(), false, 1)))
}

#[tokio::test]
async fn json_payload_round_trips_structurally() {
    let server = MockServer::start().await;
    let codec =
        codec_with_registered_subject(&server, "test-events-json-TestEvent", 11).await;

    let value = json!({"orderId": "o-1", "amount": 1.0, "currency": "USD"});
    let payload = EventPayload::Json {
        record_name: "TestEvent".to_string(),
        value: value.clone(),
    };

    let bytes = codec.serialize(&payload, "test-events-json").await.unwrap();
    assert_eq!(bytes[0], 0x00);
    assert!(bytes.len() >= 5);
    assert_eq!(
        u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        11
    );

    // The subject fetch already cached (id -> schema); decoding makes no
    // further registry round-trips.
    match codec.deserialize(&bytes, "test-events-json").await.unwrap() {
        DecodedPayload::Json {
            schema_id,
            value: decoded,
        } => {
            assert_eq!(schema_id, 11);
            assert_eq!(decoded, value);
        }
        other => panic!("unexpected decode result: {other:?}"),
    }
}

#[tokio::test]
async fn cloud_event_key_round_trips() {
    let server = MockServer::start().await;
    let codec = codec_with_registered_subject(&server, "orders-CloudEvent", 3).await;

    let key = CloudEvent::new("TestEvent", "c-1", "testprobe/e2e");
    let bytes = codec.serialize_key(&key, "orders").await.unwrap();
    let decoded = codec.deserialize_key(&bytes, "orders").await.unwrap();

    assert_eq!(decoded, key);
    assert_eq!(decoded.correlationid, "c-1");
    assert_eq!(decoded.specversion, "1.0");
}

#[tokio::test]
async fn key_without_required_attributes_is_rejected_before_the_wire() {
    let server = MockServer::start().await;
    let codec = codec_with_registered_subject(&server, "orders-CloudEvent", 3).await;

    let mut key = CloudEvent::new("TestEvent", "c-1", "testprobe/e2e");
    key.correlationid = String::new();
    assert!(codec.serialize_key(&key, "orders").await.is_err());
}

#[tokio::test]
async fn format_mismatch_fails_serialization() {
    let server = MockServer::start().await;
    // Registry says JSON, payload claims pre-encoded Avro bytes.
    let codec = codec_with_registered_subject(&server, "orders-Payment", 5).await;

    let payload = EventPayload::Avro {
        record_name: "Payment".to_string(),
        encoded: vec![1, 2, 3],
    };
    let err = codec.serialize(&payload, "orders").await.unwrap_err();
    assert!(err.to_string().contains("does not match"));
}

proptest! {
    #[test]
    fn every_frame_starts_with_magic_and_positive_id(
        schema_id in 1u32..=u32::MAX,
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let frame = encode_frame(schema_id, None, &payload);
        prop_assert!(frame.len() >= 5);
        prop_assert_eq!(frame[0], 0x00);
        prop_assert_eq!(read_frame_header(&frame).unwrap(), schema_id);
        prop_assert_eq!(&frame[5..], payload.as_slice());
    }

    #[test]
    fn protobuf_frames_carry_their_index_array(
        schema_id in 1u32..=u32::MAX,
        indexes in proptest::collection::vec(0i32..64, 1..4),
    ) {
        let frame = encode_frame(schema_id, Some(&indexes), b"body");
        prop_assert_eq!(read_frame_header(&frame).unwrap(), schema_id);
        prop_assert!(frame.len() > 5);
    }
}
