// Copyright (c) 2025 Rajan Panneer Selvam
//
// Licensed under the Business Source License 1.1 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.mariadb.com/bsl11
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use crate::models::cloud_event::CloudEvent;
use crate::services::schema::EventPayload;

use super::consumer::ConsumerStream;
use super::messages::{
    ConsumedResult, FetchRequest, NackCause, NotAvailableReason, ProduceRequest, ProduceResult,
};
use super::producer::ProducerStream;

/// The in-process API scenario code talks to. Routes every call to the
/// stream worker owning the addressed (test, topic); holds only handles,
/// never keeps workers alive.
#[derive(Debug)]
pub struct StreamRouter {
    producers: DashMap<(Uuid, String), ProducerStream>,
    consumers: DashMap<(Uuid, String), ConsumerStream>,
    ask_timeout_ms: std::sync::atomic::AtomicU64,
}

impl StreamRouter {
    pub fn new(ask_timeout: Duration) -> Self {
        Self {
            producers: DashMap::new(),
            consumers: DashMap::new(),
            ask_timeout_ms: std::sync::atomic::AtomicU64::new(ask_timeout.as_millis() as u64),
        }
    }

    fn ask_timeout(&self) -> Duration {
        Duration::from_millis(
            self.ask_timeout_ms
                .load(std::sync::atomic::Ordering::Relaxed),
        )
    }

    pub fn register_producer(&self, stream: ProducerStream) {
        debug!(test_id = %stream.test_id, topic = %stream.topic, "Registering producer stream");
        self.producers
            .insert((stream.test_id, stream.topic.clone()), stream);
    }

    pub fn register_consumer(&self, stream: ConsumerStream) {
        debug!(test_id = %stream.test_id, topic = %stream.topic, "Registering consumer stream");
        self.consumers
            .insert((stream.test_id, stream.topic.clone()), stream);
    }

    /// Drop every route owned by a test; called as its workers die.
    pub fn deregister_test(&self, test_id: Uuid) {
        self.producers.retain(|(id, _), _| *id != test_id);
        self.consumers.retain(|(id, _), _| *id != test_id);
    }

    pub fn has_streams(&self, test_id: Uuid) -> bool {
        self.producers.iter().any(|entry| entry.key().0 == test_id)
            || self.consumers.iter().any(|entry| entry.key().0 == test_id)
    }

    /// Produce one record and block the scenario step until the worker
    /// replies or the ask timeout expires.
    pub async fn produce(
        &self,
        test_id: Uuid,
        topic: &str,
        key: CloudEvent,
        payload: EventPayload,
        headers: Vec<(String, String)>,
    ) -> ProduceResult {
        let Some(stream) = self
            .producers
            .get(&(test_id, topic.to_string()))
            .map(|entry| entry.clone())
        else {
            return ProduceResult::Nack(NackCause::NoSuchStream);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ProduceRequest {
            key,
            payload,
            headers,
            reply: reply_tx,
        };
        if let Err(result) = stream.try_enqueue(request) {
            return result;
        }

        match timeout(self.ask_timeout(), reply_rx).await {
            Ok(Ok(result)) => result,
            // Worker dropped the reply without answering; it is going away.
            Ok(Err(_)) => ProduceResult::Nack(NackCause::Cancelled),
            Err(_) => ProduceResult::Nack(NackCause::Timeout),
        }
    }

    /// N serial produces, preserving order; the result list lines up with
    /// the input list.
    pub async fn produce_batch(
        &self,
        test_id: Uuid,
        topic: &str,
        records: Vec<(CloudEvent, EventPayload)>,
    ) -> Vec<ProduceResult> {
        let mut results = Vec::with_capacity(records.len());
        for (key, payload) in records {
            results.push(self.produce(test_id, topic, key, payload, vec![]).await);
        }
        results
    }

    /// Fetch the first stored record matching (correlation id, expected
    /// type) from the consumer stream for (test, topic).
    pub async fn fetch_by_correlation(
        &self,
        test_id: Uuid,
        topic: &str,
        correlation_id: &str,
        expected_type: &str,
    ) -> ConsumedResult {
        let Some(stream) = self
            .consumers
            .get(&(test_id, topic.to_string()))
            .map(|entry| entry.clone())
        else {
            return ConsumedResult::NotAvailable(NotAvailableReason::NoSuchStream);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = FetchRequest {
            correlation_id: correlation_id.to_string(),
            expected_type: expected_type.to_string(),
            reply: reply_tx,
        };
        if let Err(result) = stream.try_enqueue(request) {
            return result;
        }

        match timeout(self.ask_timeout(), reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => ConsumedResult::NotAvailable(NotAvailableReason::Cancelled),
            Err(_) => ConsumedResult::NotAvailable(NotAvailableReason::TimedOut),
        }
    }
}
