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


use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::directive::{
    BlockStorageDirective, KafkaSecurityDirective, TopicDirective, TopicRole,
};
use crate::services::schema::WireCodec;
use crate::services::streams::{
    ConsumerStream, ConsumerWorker, ProducerStream, ProducerWorker, StreamRouter,
};

use super::{ChildId, EngineEvent, EngineMsg};

#[derive(Debug)]
pub enum SupervisorCommand {
    Initialize {
        directive: BlockStorageDirective,
        security: Vec<KafkaSecurityDirective>,
    },
    StartTest,
    Stop,
}

/// Engine-side handle to the Kafka child supervisor.
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
    pub join: JoinHandle<()>,
}

impl SupervisorHandle {
    pub async fn send(&self, command: SupervisorCommand) {
        if self.tx.send(command).await.is_err() {
            warn!("Kafka supervisor is gone; command dropped");
        }
    }
}

/// Kafka child supervisor: spawns one stream worker per topic directive,
/// paired with the security directive for its (topic, role), reports
/// readiness once every worker is up, and fans out stop on teardown.
pub struct KafkaSupervisor {
    test_id: Uuid,
    config: Arc<Config>,
    codec: WireCodec,
    router: Arc<StreamRouter>,
    events: mpsc::Sender<EngineMsg>,
    rx: mpsc::Receiver<SupervisorCommand>,
    producers: Vec<ProducerStream>,
    consumers: Vec<ConsumerStream>,
    worker_joins: Vec<JoinHandle<()>>,
    initialized_topics: Option<Vec<(String, TopicRole)>>,
}

impl KafkaSupervisor {
    pub fn spawn(
        test_id: Uuid,
        config: Arc<Config>,
        codec: WireCodec,
        router: Arc<StreamRouter>,
        events: mpsc::Sender<EngineMsg>,
    ) -> SupervisorHandle {
        let (tx, rx) = mpsc::channel(16);
        let supervisor = KafkaSupervisor {
            test_id,
            config,
            codec,
            router,
            events,
            rx,
            producers: Vec::new(),
            consumers: Vec::new(),
            worker_joins: Vec::new(),
            initialized_topics: None,
        };
        let join = tokio::spawn(supervisor.run());
        SupervisorHandle { tx, join }
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                SupervisorCommand::Initialize {
                    directive,
                    security,
                } => self.handle_initialize(directive, security).await,
                SupervisorCommand::StartTest => {
                    debug!(test_id = %self.test_id, "Stream workers released for traffic");
                }
                SupervisorCommand::Stop => break,
            }
        }
        self.teardown().await;
        let _ = self
            .events
            .send(EngineMsg::Event(EngineEvent::ChildStopped(ChildId::Kafka)))
            .await;
    }

    async fn handle_initialize(
        &mut self,
        directive: BlockStorageDirective,
        security: Vec<KafkaSecurityDirective>,
    ) {
        let topics: Vec<(String, TopicRole)> = directive
            .topic_directives
            .iter()
            .map(|d| (d.topic.clone(), d.role))
            .collect();

        // A second Initialize with identical directives is a no-op.
        if let Some(existing) = &self.initialized_topics {
            if *existing == topics {
                debug!(test_id = %self.test_id, "Duplicate Initialize ignored");
                let _ = self
                    .events
                    .send(EngineMsg::Event(EngineEvent::ChildReady(ChildId::Kafka)))
                    .await;
                return;
            }
            warn!(test_id = %self.test_id, "Re-Initialize with different directives; restarting workers");
            self.teardown().await;
        }

        match self.spawn_workers(&directive.topic_directives, &security) {
            Ok(()) => {
                self.initialized_topics = Some(topics);
                info!(
                    test_id = %self.test_id,
                    producers = self.producers.len(),
                    consumers = self.consumers.len(),
                    "All stream workers ready"
                );
                let _ = self
                    .events
                    .send(EngineMsg::Event(EngineEvent::ChildReady(ChildId::Kafka)))
                    .await;
            }
            Err(e) => {
                error!(test_id = %self.test_id, "Failed to spawn stream workers: {}", e);
                self.teardown().await;
                let _ = self
                    .events
                    .send(EngineMsg::Event(EngineEvent::ChildFailed {
                        child: ChildId::Kafka,
                        error: e,
                    }))
                    .await;
            }
        }
    }

    fn spawn_workers(
        &mut self,
        directives: &[TopicDirective],
        security: &[KafkaSecurityDirective],
    ) -> Result<(), AppError> {
        let default_bootstrap = &self.config.kafka.bootstrap_servers;
        for directive in directives {
            let paired = security
                .iter()
                .find(|s| s.topic == directive.topic && s.role == directive.role)
                .ok_or_else(|| {
                    AppError::Vault(format!(
                        "No security directive for ({}, {})",
                        directive.topic, directive.role
                    ))
                })?;

            match directive.role {
                TopicRole::Producer => {
                    let (stream, join) = ProducerWorker::spawn(
                        self.test_id,
                        directive,
                        paired,
                        default_bootstrap,
                        self.codec.clone(),
                        self.config.dsl.stream_buffer_size,
                        self.config.services.timeout(),
                    )?;
                    self.router.register_producer(stream.clone());
                    self.producers.push(stream);
                    self.worker_joins.push(join);
                }
                TopicRole::Consumer => {
                    let (stream, join) = ConsumerWorker::spawn(
                        self.test_id,
                        directive,
                        paired,
                        default_bootstrap,
                        self.codec.clone(),
                        self.config.dsl.stream_buffer_size,
                        self.config.dsl.fetch_wait(),
                    )?;
                    self.router.register_consumer(stream.clone());
                    self.consumers.push(stream);
                    self.worker_joins.push(join);
                }
            }
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        for stream in &self.producers {
            stream.stop();
        }
        for stream in &self.consumers {
            stream.stop();
        }
        for join in self.worker_joins.drain(..) {
            if let Err(e) = tokio::time::timeout(self.config.services.timeout(), join).await {
                warn!(test_id = %self.test_id, "Stream worker did not stop in time: {}", e);
            }
        }
        self.producers.clear();
        self.consumers.clear();
        self.router.deregister_test(self.test_id);
        self.initialized_topics = None;
        debug!(test_id = %self.test_id, "Kafka supervisor torn down");
    }
}
