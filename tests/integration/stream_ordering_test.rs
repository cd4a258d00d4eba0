#![cfg(feature = "integration-tests")]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use testcontainers::clients::Cli;
use testcontainers_modules::kafka::{Kafka, KAFKA_PORT};
use tokio::sync::oneshot;
use uuid::Uuid;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use testprobe::models::cloud_event::CloudEvent;
use testprobe::models::directive::{
    EventFilter, KafkaSecurityDirective, TopicDirective, TopicRole,
};
use testprobe::services::schema::{EventPayload, SchemaRegistryClient, WireCodec};
use testprobe::services::streams::{
    ConsumedResult, ConsumerWorker, FetchRequest, ProduceRequest, ProduceResult,
    ProducerWorker,
};

fn topic_directive(topic: &str, role: TopicRole) -> TopicDirective {
    TopicDirective {
        topic: topic.to_string(),
        role,
        client_principal: "probe".to_string(),
        event_filters: vec![EventFilter {
            event_type: "TestEvent".to_string(),
            version: "v1".to_string(),
        }],
        metadata: HashMap::new(),
        bootstrap_servers: None,
    }
}

async fn auto_registering_stub() -> MockServer {
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
    server
}

#[tokio::test]
async fn three_rapid_produces_are_acked_and_consumed_in_order() {
    let docker = Cli::default();
    let kafka = docker.run(Kafka::default());
    let bootstrap = vec![format!(
        "127.0.0.1:{}",
        kafka.get_host_port_ipv4(KAFKA_PORT)
    )];

    let registry_server = auto_registering_stub().await;
    let codec = WireCodec::new(Arc::new(SchemaRegistryClient::new(
        &registry_server.uri(),
        true,
        2,
    )));

    let test_id = Uuid::new_v4();
    let topic = "fifo-events";

    let (consumer, consumer_join) = ConsumerWorker::spawn(
        test_id,
        &topic_directive(topic, TopicRole::Consumer),
        &KafkaSecurityDirective::plaintext(topic, TopicRole::Consumer),
        &bootstrap,
        codec.clone(),
        16,
        Duration::from_secs(20),
    )
    .unwrap();

    let (producer, producer_join) = ProducerWorker::spawn(
        test_id,
        &topic_directive(topic, TopicRole::Producer),
        &KafkaSecurityDirective::plaintext(topic, TopicRole::Producer),
        &bootstrap,
        codec.clone(),
        16,
        Duration::from_secs(20),
    )
    .unwrap();

    // Enqueue all three before awaiting any reply: FIFO means the worker
    // answers them in submission order.
    let mut replies = Vec::new();
    for n in 1..=3 {
        let (reply_tx, reply_rx) = oneshot::channel();
        let correlation = format!("c-{:03}", n);
        producer
            .try_enqueue(ProduceRequest {
                key: CloudEvent::new("TestEvent", &correlation, "testprobe/fifo"),
                payload: EventPayload::Json {
                    record_name: "TestEvent".to_string(),
                    value: json!({"sequence": n}),
                },
                headers: vec![],
                reply: reply_tx,
            })
            .expect("enqueue within bounds");
        replies.push(reply_rx);
    }

    let mut offsets = Vec::new();
    for reply in replies {
        match reply.await.unwrap() {
            ProduceResult::Ack { offset, .. } => offsets.push(offset),
            ProduceResult::Nack(cause) => panic!("produce was nacked: {:?}", cause),
        }
    }
    assert!(
        offsets.windows(2).all(|pair| pair[0] < pair[1]),
        "Kafka offsets must be appended in submission order: {:?}",
        offsets
    );

    // Fetch the three events back; correlation ids arrive in produce
    // order and their times are non-decreasing.
    let mut times = Vec::new();
    for n in 1..=3 {
        let (reply_tx, reply_rx) = oneshot::channel();
        consumer
            .try_enqueue(FetchRequest {
                correlation_id: format!("c-{:03}", n),
                expected_type: "TestEvent".to_string(),
                reply: reply_tx,
            })
            .expect("enqueue fetch");
        match reply_rx.await.unwrap() {
            ConsumedResult::Success(event) => {
                assert_eq!(event.key.correlationid, format!("c-{:03}", n));
                times.push(event.key.time.expect("produced events carry time"));
            }
            ConsumedResult::NotAvailable(reason) => {
                panic!("event c-{:03} not available: {:?}", n, reason)
            }
        }
    }
    assert!(
        times.windows(2).all(|pair| pair[0] <= pair[1]),
        "event times must be non-decreasing: {:?}",
        times
    );

    producer.stop();
    consumer.stop();
    let _ = tokio::time::timeout(Duration::from_secs(10), producer_join).await;
    let _ = tokio::time::timeout(Duration::from_secs(10), consumer_join).await;
}
