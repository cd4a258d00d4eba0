use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::directive::{KafkaSecurityDirective, TopicDirective};
use crate::services::schema::WireCodec;

use super::messages::{
    ConsumedEvent, ConsumedResult, FetchRequest, NotAvailableReason,
};
use super::{build_stream_client_config, effective_bootstrap_servers};

/// Handle to a running consumer stream worker.
#[derive(Debug, Clone)]
pub struct ConsumerStream {
    pub test_id: Uuid,
    pub topic: String,
    pub(crate) tx: mpsc::Sender<FetchRequest>,
    cancel: CancellationToken,
}

impl ConsumerStream {
    pub fn try_enqueue(&self, request: FetchRequest) -> Result<(), ConsumedResult> {
        match self.tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(request)) => {
                let _ = request
                    .reply
                    .send(ConsumedResult::NotAvailable(NotAvailableReason::TimedOut));
                Err(ConsumedResult::NotAvailable(NotAvailableReason::TimedOut))
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                let _ = request
                    .reply
                    .send(ConsumedResult::NotAvailable(NotAvailableReason::Cancelled));
                Err(ConsumedResult::NotAvailable(NotAvailableReason::Cancelled))
            }
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

struct PendingFetch {
    correlation_id: String,
    expected_type: String,
    reply: tokio::sync::oneshot::Sender<ConsumedResult>,
    deadline: Instant,
}

/// One consumer stream worker per (test, topic) in role `consumer`. Owns a
/// long-lived Kafka subscription, keeps records that pass the event filter
/// buffered by correlation id, and answers fetches in partition arrival
/// order per key.
pub struct ConsumerWorker {
    test_id: Uuid,
    directive: TopicDirective,
    consumer: StreamConsumer,
    codec: WireCodec,
    fetch_wait: Duration,
    rx: mpsc::Receiver<FetchRequest>,
    cancel: CancellationToken,
    events: HashMap<String, VecDeque<ConsumedEvent>>,
    pending: Vec<PendingFetch>,
}

impl ConsumerWorker {
    pub fn spawn(
        test_id: Uuid,
        directive: &TopicDirective,
        security: &KafkaSecurityDirective,
        default_bootstrap: &[String],
        codec: WireCodec,
        buffer_size: usize,
        fetch_wait: Duration,
    ) -> Result<(ConsumerStream, tokio::task::JoinHandle<()>), AppError> {
        let bootstrap = effective_bootstrap_servers(directive, default_bootstrap);
        let mut client_config = build_stream_client_config(&bootstrap, security)?;
        client_config.set(
            "group.id",
            format!("testprobe-{}-{}", test_id, directive.topic),
        );
        client_config.set(
            "client.id",
            format!("testprobe-consumer-{}-{}", test_id, directive.topic),
        );
        client_config.set("enable.auto.commit", "false");
        client_config.set("auto.offset.reset", "earliest");

        let consumer: StreamConsumer = client_config
            .create()
            .map_err(|e| AppError::Kafka(format!("Failed to create Kafka consumer: {}", e)))?;
        consumer
            .subscribe(&[directive.topic.as_str()])
            .map_err(|e| AppError::Kafka(format!("Failed to subscribe to topic: {}", e)))?;

        let (tx, rx) = mpsc::channel(buffer_size);
        let cancel = CancellationToken::new();
        let worker = ConsumerWorker {
            test_id,
            directive: directive.clone(),
            consumer,
            codec,
            fetch_wait,
            rx,
            cancel: cancel.clone(),
            events: HashMap::new(),
            pending: Vec::new(),
        };

        info!(
            test_id = %test_id,
            topic = %directive.topic,
            bootstrap = %bootstrap,
            filters = directive.event_filters.len(),
            "Spawning consumer stream worker"
        );
        let topic = directive.topic.clone();
        let handle = tokio::spawn(worker.run());

        Ok((
            ConsumerStream {
                test_id,
                topic,
                tx,
                cancel,
            },
            handle,
        ))
    }

    async fn run(mut self) {
        loop {
            let next_deadline = self
                .pending
                .iter()
                .map(|p| p.deadline)
                .min()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => self.handle_fetch(request),
                    None => break,
                },
                record = self.consumer.recv() => match record {
                    Ok(message) => {
                        // The offset advances even for records the filter
                        // discards or the codec rejects; accepted records
                        // are buffered in-memory instead.
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(
                                test_id = %self.test_id,
                                topic = %self.directive.topic,
                                "Failed to commit offset: {}",
                                e
                            );
                        }
                        let owned = message.detach();
                        drop(message);
                        self.handle_record(owned).await;
                    }
                    Err(e) => {
                        error!(
                            test_id = %self.test_id,
                            topic = %self.directive.topic,
                            "Error while consuming: {}",
                            e
                        );
                    }
                },
                _ = tokio::time::sleep_until(next_deadline) => self.expire_pending(),
            }
        }

        // Teardown: nobody is left waiting, offsets are committed, the
        // subscription closes with the worker.
        self.rx.close();
        while let Ok(request) = self.rx.try_recv() {
            let _ = request
                .reply
                .send(ConsumedResult::NotAvailable(NotAvailableReason::Cancelled));
        }
        for pending in self.pending.drain(..) {
            let _ = pending
                .reply
                .send(ConsumedResult::NotAvailable(NotAvailableReason::Cancelled));
        }
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            // A brand-new subscription with no consumed records has no
            // state to commit; that is not worth surfacing.
            debug!(
                test_id = %self.test_id,
                topic = %self.directive.topic,
                "Offset commit on stop: {}",
                e
            );
        }
        self.consumer.unsubscribe();
        debug!(test_id = %self.test_id, topic = %self.directive.topic, "Consumer stream worker stopped");
    }

    async fn handle_record(&mut self, message: rdkafka::message::OwnedMessage) {
        let Some(key_bytes) = message.key() else {
            debug!(topic = %self.directive.topic, "Discarding record without a key");
            return;
        };
        let key = match self.codec.deserialize_key(key_bytes, &self.directive.topic).await {
            Ok(key) => key,
            Err(e) => {
                warn!(
                    topic = %self.directive.topic,
                    "Discarding record with undecodable key: {}",
                    e
                );
                return;
            }
        };

        if !self.filter_accepts(&key) {
            debug!(
                topic = %self.directive.topic,
                event_type = %key.event_type,
                "Record rejected by event filter"
            );
            return;
        }

        let value = match message.payload() {
            Some(bytes) => match self.codec.deserialize(bytes, &self.directive.topic).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        topic = %self.directive.topic,
                        correlation_id = %key.correlationid,
                        "Discarding record with undecodable value: {}",
                        e
                    );
                    return;
                }
            },
            None => {
                warn!(
                    topic = %self.directive.topic,
                    correlation_id = %key.correlationid,
                    "Discarding tombstone record"
                );
                return;
            }
        };

        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| {
                        (
                            h.key.to_string(),
                            h.value
                                .map(|v| String::from_utf8_lossy(v).to_string())
                                .unwrap_or_default(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let event = ConsumedEvent {
            key: key.clone(),
            value,
            headers,
            partition: message.partition(),
            offset: message.offset(),
        };
        debug!(
            test_id = %self.test_id,
            topic = %self.directive.topic,
            correlation_id = %key.correlationid,
            event_type = %key.event_type,
            "Buffered consumed event"
        );
        self.events
            .entry(key.correlationid.clone())
            .or_default()
            .push_back(event);

        self.satisfy_pending();
    }

    /// A record survives iff its (type, payloadversion) matches some entry
    /// in the directive's event filters.
    fn filter_accepts(&self, key: &crate::models::cloud_event::CloudEvent) -> bool {
        let version = key.payloadversion.as_deref().unwrap_or_default();
        self.directive
            .event_filters
            .iter()
            .any(|f| f.event_type == key.event_type && f.version == version)
    }

    fn handle_fetch(&mut self, request: FetchRequest) {
        if let Some(event) =
            self.take_stored(&request.correlation_id, &request.expected_type)
        {
            let _ = request.reply.send(ConsumedResult::Success(Box::new(event)));
            return;
        }
        self.pending.push(PendingFetch {
            correlation_id: request.correlation_id,
            expected_type: request.expected_type,
            reply: request.reply,
            deadline: Instant::now() + self.fetch_wait,
        });
    }

    /// First stored record matching (correlation id, expected type), in
    /// partition arrival order; removes it from the buffer.
    fn take_stored(&mut self, correlation_id: &str, expected_type: &str) -> Option<ConsumedEvent> {
        let queue = self.events.get_mut(correlation_id)?;
        let index = queue
            .iter()
            .position(|event| event.key.event_type == expected_type)?;
        let event = queue.remove(index);
        if queue.is_empty() {
            self.events.remove(correlation_id);
        }
        event
    }

    fn satisfy_pending(&mut self) {
        let mut index = 0;
        while index < self.pending.len() {
            let matched = {
                let pending = &self.pending[index];
                self.events
                    .get(&pending.correlation_id)
                    .map(|queue| {
                        queue
                            .iter()
                            .any(|event| event.key.event_type == pending.expected_type)
                    })
                    .unwrap_or(false)
            };
            if matched {
                let pending = self.pending.remove(index);
                if let Some(event) =
                    self.take_stored(&pending.correlation_id, &pending.expected_type)
                {
                    let _ = pending.reply.send(ConsumedResult::Success(Box::new(event)));
                }
            } else {
                index += 1;
            }
        }
    }

    fn expire_pending(&mut self) {
        let now = Instant::now();
        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].deadline <= now {
                let pending = self.pending.remove(index);
                let _ = pending
                    .reply
                    .send(ConsumedResult::NotAvailable(NotAvailableReason::TimedOut));
            } else {
                index += 1;
            }
        }
    }
}
