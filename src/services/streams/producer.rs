use std::time::Duration;

use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::directive::{KafkaSecurityDirective, TopicDirective};
use crate::services::schema::WireCodec;

use super::messages::{NackCause, ProduceRequest, ProduceResult};
use super::{build_stream_client_config, effective_bootstrap_servers};

/// Handle to a running producer stream worker. Cheap to clone; dropping it
/// does not stop the worker — the owning supervisor does that through the
/// cancellation token.
#[derive(Debug, Clone)]
pub struct ProducerStream {
    pub test_id: Uuid,
    pub topic: String,
    pub(crate) tx: mpsc::Sender<ProduceRequest>,
    cancel: CancellationToken,
}

impl ProducerStream {
    /// Fail-fast enqueue. A full inbox never blocks the caller.
    pub fn try_enqueue(&self, request: ProduceRequest) -> Result<(), ProduceResult> {
        match self.tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(request)) => {
                let _ = request.reply.send(ProduceResult::Nack(NackCause::Overflow));
                Err(ProduceResult::Nack(NackCause::Overflow))
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                let _ = request.reply.send(ProduceResult::Nack(NackCause::Cancelled));
                Err(ProduceResult::Nack(NackCause::Cancelled))
            }
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// One producer stream worker per (test, topic) in role `producer`.
///
/// The worker is strictly FIFO: it does not pick up request N+1 until it
/// has replied to request N, which yields per-stream ordering without any
/// global lock.
pub struct ProducerWorker {
    test_id: Uuid,
    topic: String,
    producer: FutureProducer,
    codec: WireCodec,
    send_timeout: Duration,
    rx: mpsc::Receiver<ProduceRequest>,
    cancel: CancellationToken,
}

impl ProducerWorker {
    /// Build the Kafka client and spawn the worker task. Returns the stream
    /// handle and a join handle the supervisor keeps for teardown.
    pub fn spawn(
        test_id: Uuid,
        directive: &TopicDirective,
        security: &KafkaSecurityDirective,
        default_bootstrap: &[String],
        codec: WireCodec,
        buffer_size: usize,
        send_timeout: Duration,
    ) -> Result<(ProducerStream, tokio::task::JoinHandle<()>), AppError> {
        let bootstrap = effective_bootstrap_servers(directive, default_bootstrap);
        let mut client_config = build_stream_client_config(&bootstrap, security)?;
        client_config.set(
            "client.id",
            format!("testprobe-producer-{}-{}", test_id, directive.topic),
        );
        client_config.set("message.timeout.ms", "300000");

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| AppError::Kafka(format!("Failed to create Kafka producer: {}", e)))?;

        let (tx, rx) = mpsc::channel(buffer_size);
        let cancel = CancellationToken::new();
        let worker = ProducerWorker {
            test_id,
            topic: directive.topic.clone(),
            producer,
            codec,
            send_timeout,
            rx,
            cancel: cancel.clone(),
        };

        info!(
            test_id = %test_id,
            topic = %directive.topic,
            bootstrap = %bootstrap,
            "Spawning producer stream worker"
        );
        let handle = tokio::spawn(worker.run());

        Ok((
            ProducerStream {
                test_id,
                topic: directive.topic.clone(),
                tx,
                cancel,
            },
            handle,
        ))
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
            }
        }

        // Teardown: anything still queued gets a terminal reply before the
        // Kafka client is drained.
        self.rx.close();
        while let Ok(request) = self.rx.try_recv() {
            let _ = request.reply.send(ProduceResult::Nack(NackCause::Cancelled));
        }
        if let Err(e) = self.producer.flush(self.send_timeout) {
            error!(
                test_id = %self.test_id,
                topic = %self.topic,
                "Failed to flush producer on stop: {}",
                e
            );
        }
        debug!(test_id = %self.test_id, topic = %self.topic, "Producer stream worker stopped");
    }

    async fn handle(&self, request: ProduceRequest) {
        let result = self.produce(&request).await;
        if let ProduceResult::Nack(cause) = &result {
            error!(
                test_id = %self.test_id,
                topic = %self.topic,
                correlation_id = %request.key.correlationid,
                "Produce failed: {:?}",
                cause
            );
        }
        let _ = request.reply.send(result);
    }

    async fn produce(&self, request: &ProduceRequest) -> ProduceResult {
        let key_bytes = match self.codec.serialize_key(&request.key, &self.topic).await {
            Ok(bytes) => bytes,
            Err(e) => return ProduceResult::Nack(NackCause::Serialization(e.to_string())),
        };
        let value_bytes = match self.codec.serialize(&request.payload, &self.topic).await {
            Ok(bytes) => bytes,
            Err(e) => return ProduceResult::Nack(NackCause::Serialization(e.to_string())),
        };

        let mut record = FutureRecord::to(&self.topic)
            .key(&key_bytes)
            .payload(&value_bytes);
        if !request.headers.is_empty() {
            let mut owned_headers = OwnedHeaders::new();
            for (header_key, header_value) in &request.headers {
                owned_headers = owned_headers.insert(Header {
                    key: header_key,
                    value: Some(header_value.as_bytes()),
                });
            }
            record = record.headers(owned_headers);
        }

        match self.producer.send(record, self.send_timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    test_id = %self.test_id,
                    topic = %self.topic,
                    correlation_id = %request.key.correlationid,
                    partition,
                    offset,
                    "Produced record"
                );
                ProduceResult::Ack { partition, offset }
            }
            Err((e, _)) => ProduceResult::Nack(NackCause::Kafka(e.to_string())),
        }
    }
}
