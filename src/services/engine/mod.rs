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


pub mod supervisor;

pub use supervisor::{KafkaSupervisor, SupervisorCommand, SupervisorHandle};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::directive::KafkaSecurityDirective;
use crate::models::report::TestExecutionResult;
use crate::models::test::{EnginePhase, EngineStatus, FailureCause};
use crate::services::scenario::{ScenarioContext, ScenarioExecutor};
use crate::services::schema::WireCodec;
use crate::services::storage::{LoadedBundle, StorageChild};
use crate::services::streams::StreamRouter;
use crate::services::vault::VaultChild;

/// The four cooperating children an engine owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildId {
    Storage,
    Vault,
    Kafka,
    Scenario,
}

const ALL_CHILDREN: [ChildId; 4] = [
    ChildId::Storage,
    ChildId::Vault,
    ChildId::Kafka,
    ChildId::Scenario,
];

#[derive(Debug)]
pub enum EngineCommand {
    Initialize { bucket: String },
    StartTest,
    Delete,
}

#[derive(Debug)]
pub enum EngineEvent {
    BundleLoaded(LoadedBundle),
    SecurityResolved(Vec<KafkaSecurityDirective>),
    ChildReady(ChildId),
    ChildStopped(ChildId),
    ChildFailed { child: ChildId, error: AppError },
    ScenarioFinished(Box<TestExecutionResult>),
    EvidenceStored,
}

#[derive(Debug)]
pub enum EngineMsg {
    Command(EngineCommand),
    Event(EngineEvent),
}

/// External collaborators and shared infrastructure an engine instance
/// works with. One value per process, shared by every engine.
pub struct EngineDeps {
    pub storage: Arc<StorageChild>,
    pub vault: Arc<VaultChild>,
    pub scenario: Arc<ScenarioExecutor>,
    pub router: Arc<StreamRouter>,
    pub codec: WireCodec,
}

/// Handle the registry keeps per running engine.
#[derive(Clone)]
pub struct EngineHandle {
    pub test_id: Uuid,
    tx: mpsc::Sender<EngineMsg>,
    status_rx: watch::Receiver<EngineStatus>,
}

impl EngineHandle {
    pub async fn initialize(&self, bucket: &str) -> Result<(), AppError> {
        self.send(EngineCommand::Initialize {
            bucket: bucket.to_string(),
        })
        .await
    }

    pub async fn start_test(&self) -> Result<(), AppError> {
        self.send(EngineCommand::StartTest).await
    }

    pub async fn delete(&self) -> Result<(), AppError> {
        self.send(EngineCommand::Delete).await
    }

    pub fn status(&self) -> EngineStatus {
        self.status_rx.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<EngineStatus> {
        self.status_rx.clone()
    }

    async fn send(&self, command: EngineCommand) -> Result<(), AppError> {
        self.tx
            .send(EngineMsg::Command(command))
            .await
            .map_err(|_| AppError::Conflict("Test engine is no longer running".to_string()))
    }
}

/// The per-test state machine. Single-writer: every mutation happens in
/// its own message loop; children talk to it only through typed messages.
pub struct TestEngine {
    test_id: Uuid,
    config: Arc<Config>,
    deps: Arc<EngineDeps>,
    rx: mpsc::Receiver<EngineMsg>,
    self_tx: mpsc::Sender<EngineMsg>,
    status_tx: watch::Sender<EngineStatus>,

    phase: EnginePhase,
    status: EngineStatus,
    deadline: Option<Instant>,
    hard_deadline: Option<Instant>,

    bucket: Option<String>,
    bundle: Option<LoadedBundle>,
    security: Option<Vec<KafkaSecurityDirective>>,
    ready: HashSet<ChildId>,
    stopped: HashSet<ChildId>,
    stash: VecDeque<EngineCommand>,
    result: Option<TestExecutionResult>,
    supervisor: Option<SupervisorHandle>,
    crashes: HashMap<ChildId, VecDeque<Instant>>,
}

impl TestEngine {
    pub fn spawn(
        test_id: Uuid,
        config: Arc<Config>,
        deps: Arc<EngineDeps>,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(EngineStatus::uninitialized());

        let engine = TestEngine {
            test_id,
            config,
            deps,
            rx,
            self_tx: tx.clone(),
            status_tx,
            phase: EnginePhase::Uninitialized,
            status: EngineStatus::uninitialized(),
            deadline: None,
            hard_deadline: None,
            bucket: None,
            bundle: None,
            security: None,
            ready: HashSet::new(),
            stopped: HashSet::new(),
            stash: VecDeque::new(),
            result: None,
            supervisor: None,
            crashes: HashMap::new(),
        };
        let join = tokio::spawn(engine.run());

        (
            EngineHandle {
                test_id,
                tx,
                status_rx,
            },
            join,
        )
    }

    async fn run(mut self) {
        info!(test_id = %self.test_id, "Test engine started");
        while self.phase != EnginePhase::Deleted {
            let next_deadline = [self.deadline, self.hard_deadline]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(message) => self.dispatch(message).await,
                    None => {
                        // Every handle is gone; nobody can drive or observe
                        // this test any more.
                        if !self.phase.is_terminal() {
                            self.fail(FailureCause::Cancelled).await;
                        }
                        self.transition(EnginePhase::Deleted);
                        break;
                    }
                },
                _ = tokio::time::sleep_until(next_deadline) => self.on_deadline().await,
            }
        }
        self.teardown().await;
        info!(test_id = %self.test_id, "Test engine terminated");
    }

    async fn dispatch(&mut self, message: EngineMsg) {
        match message {
            EngineMsg::Command(command) => self.handle_command(command).await,
            EngineMsg::Event(event) => self.handle_event(event).await,
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match (self.phase, command) {
            (EnginePhase::Uninitialized, EngineCommand::Initialize { bucket }) => {
                self.bucket = Some(bucket);
                self.status.start_time = Some(Utc::now());
                self.transition(EnginePhase::Setup);
                self.deadline =
                    Some(Instant::now() + self.config.engine.setup_state_timeout());
                self.hard_deadline =
                    Some(Instant::now() + self.config.runtime.max_execution_time());
                self.spawn_storage_load();
            }
            (_, EngineCommand::Initialize { .. }) => {
                debug!(test_id = %self.test_id, "Duplicate Initialize ignored");
            }
            (EnginePhase::Loaded, EngineCommand::StartTest) => {
                self.begin_executing().await;
            }
            (EnginePhase::Setup, EngineCommand::StartTest) => {
                self.stash_command(EngineCommand::StartTest).await;
            }
            (_, EngineCommand::StartTest) => {
                warn!(test_id = %self.test_id, phase = ?self.phase, "StartTest ignored");
            }
            (phase, EngineCommand::Delete) if phase.is_terminal() => {
                self.transition(EnginePhase::Deleted);
            }
            (_, EngineCommand::Delete) => {
                info!(test_id = %self.test_id, "Cancellation requested");
                self.fail(FailureCause::Cancelled).await;
            }
        }
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::BundleLoaded(bundle) => {
                if self.phase != EnginePhase::Setup || self.bundle.is_some() {
                    return;
                }
                debug!(test_id = %self.test_id, "Bundle loaded");
                self.bundle = Some(bundle);
                self.mark_ready(ChildId::Storage).await;
                // The scenario executor only needs the loaded bundle.
                self.mark_ready(ChildId::Scenario).await;
                self.spawn_vault_resolve();
            }
            EngineEvent::SecurityResolved(security) => {
                if self.phase != EnginePhase::Setup || self.security.is_some() {
                    return;
                }
                self.security = Some(security);
                self.mark_ready(ChildId::Vault).await;
                self.spawn_kafka_supervisor().await;
            }
            EngineEvent::ChildReady(child) => {
                self.mark_ready(child).await;
            }
            EngineEvent::ChildStopped(child) => {
                self.mark_stopped(child).await;
            }
            EngineEvent::ChildFailed { child, error } => {
                self.on_child_failed(child, error).await;
            }
            EngineEvent::ScenarioFinished(result) => {
                if self.phase != EnginePhase::Executing {
                    debug!(test_id = %self.test_id, phase = ?self.phase, "Late scenario result ignored");
                    return;
                }
                self.result = Some(*result);
                self.begin_completing().await;
            }
            EngineEvent::EvidenceStored => {
                self.mark_stopped(ChildId::Storage).await;
            }
        }
    }

    /// One increment per unique child; duplicates are ignored.
    async fn mark_ready(&mut self, child: ChildId) {
        if self.phase != EnginePhase::Setup || !self.ready.insert(child) {
            return;
        }
        debug!(
            test_id = %self.test_id,
            child = ?child,
            ready = self.ready.len(),
            "Child ready"
        );
        if ALL_CHILDREN.iter().all(|c| self.ready.contains(c)) {
            self.transition(EnginePhase::Loaded);
            self.deadline =
                Some(Instant::now() + self.config.engine.loading_state_timeout());
            self.drain_stash().await;
        }
    }

    async fn mark_stopped(&mut self, child: ChildId) {
        if !self.stopped.insert(child) {
            return;
        }
        debug!(
            test_id = %self.test_id,
            child = ?child,
            stopped = self.stopped.len(),
            "Child stopped"
        );
        if self.phase == EnginePhase::Completing
            && ALL_CHILDREN.iter().all(|c| self.stopped.contains(c))
        {
            let passed = self
                .result
                .as_ref()
                .map(|r| r.passed)
                .unwrap_or(false);
            self.status.end_time = Some(Utc::now());
            self.status.success = Some(passed);
            self.transition(EnginePhase::Completed);
            self.deadline =
                Some(Instant::now() + self.config.engine.completed_state_timeout());
            self.hard_deadline = None;
        }
    }

    async fn begin_executing(&mut self) {
        self.transition(EnginePhase::Executing);
        // The hard per-test deadline keeps running; no shorter state timer
        // applies while the scenario owns the clock.
        self.deadline = None;
        self.spawn_scenario();
        if let Some(supervisor) = &self.supervisor {
            supervisor.send(SupervisorCommand::StartTest).await;
        }
    }

    async fn begin_completing(&mut self) {
        self.transition(EnginePhase::Completing);
        // Children coming down get the same grace children coming up did.
        self.deadline = Some(Instant::now() + self.config.engine.setup_state_timeout());
        // The scenario child finished by producing the result; the vault
        // child holds no resources.
        self.stopped.insert(ChildId::Scenario);
        self.stopped.insert(ChildId::Vault);
        self.spawn_evidence_upload();
        if let Some(supervisor) = &self.supervisor {
            supervisor.send(SupervisorCommand::Stop).await;
        }
    }

    /// Exactly one terminal failure transition; later failures only log.
    async fn fail(&mut self, cause: FailureCause) {
        if self.phase.is_terminal() {
            debug!(test_id = %self.test_id, cause = cause.tag(), "Failure after terminal state ignored");
            return;
        }
        error!(
            test_id = %self.test_id,
            phase = ?self.phase,
            cause = cause.tag(),
            detail = cause.detail().unwrap_or_default(),
            "Test failed"
        );
        self.status.end_time = Some(Utc::now());
        self.status.success = Some(false);
        self.status.failure = Some(cause);
        self.transition(EnginePhase::Failed);
        self.deadline = Some(Instant::now() + self.config.engine.exception_state_timeout());
        self.hard_deadline = None;
        if let Some(supervisor) = &self.supervisor {
            supervisor.send(SupervisorCommand::Stop).await;
        }
    }

    async fn on_deadline(&mut self) {
        match self.phase {
            EnginePhase::Setup => self.fail(FailureCause::SetupTimeout).await,
            EnginePhase::Loaded => self.fail(FailureCause::LoadingTimeout).await,
            EnginePhase::Executing | EnginePhase::Completing => {
                self.fail(FailureCause::StateTimeout).await
            }
            EnginePhase::Completed | EnginePhase::Failed => {
                self.transition(EnginePhase::Deleted);
            }
            EnginePhase::Uninitialized | EnginePhase::Deleted => {}
        }
    }

    async fn on_child_failed(&mut self, child: ChildId, error: AppError) {
        if self.phase.is_terminal() {
            debug!(test_id = %self.test_id, child = ?child, "Child failure after terminal state: {}", error);
            return;
        }
        // Directive validation failures are a property of the bundle, not
        // a transient fault; no restart will fix them.
        if let AppError::Validation(message) = &error {
            self.fail(FailureCause::Validation(message.clone())).await;
            return;
        }
        if child == ChildId::Scenario {
            self.fail(FailureCause::ChildFailure(error.to_string())).await;
            return;
        }

        let now = Instant::now();
        let window = self.config.runtime.restart_time_range();
        let ledger = self.crashes.entry(child).or_default();
        ledger.push_back(now);
        while let Some(front) = ledger.front() {
            if now.duration_since(*front) > window {
                ledger.pop_front();
            } else {
                break;
            }
        }
        let crash_count = ledger.len();
        if crash_count as u32 > self.config.runtime.max_restarts {
            self.fail(FailureCause::ChildCrashLoop(format!(
                "{:?} failed {} times within the restart window: {}",
                child, crash_count, error
            )))
            .await;
            return;
        }

        warn!(
            test_id = %self.test_id,
            child = ?child,
            attempt = crash_count,
            "Child failed, restarting: {}",
            error
        );
        match child {
            ChildId::Storage => {
                if self.phase == EnginePhase::Setup && self.bundle.is_none() {
                    self.spawn_storage_load();
                } else if self.phase == EnginePhase::Completing {
                    self.spawn_evidence_upload();
                } else {
                    self.fail(FailureCause::ChildFailure(error.to_string())).await;
                }
            }
            ChildId::Vault => {
                if self.phase == EnginePhase::Setup && self.security.is_none() {
                    self.spawn_vault_resolve();
                } else {
                    self.fail(FailureCause::ChildFailure(error.to_string())).await;
                }
            }
            ChildId::Kafka => {
                if self.phase == EnginePhase::Setup {
                    self.spawn_kafka_supervisor().await;
                } else {
                    self.fail(FailureCause::ChildFailure(error.to_string())).await;
                }
            }
            ChildId::Scenario => unreachable!("scenario failures are terminal"),
        }
    }

    /// Out-of-order commands wait in a bounded stash until the transition
    /// that makes them valid; overflow fails the test.
    async fn stash_command(&mut self, command: EngineCommand) {
        if self.stash.len() >= self.config.runtime.stash_buffer_size as usize {
            self.fail(FailureCause::StashOverflow).await;
            return;
        }
        debug!(test_id = %self.test_id, "Stashing out-of-order command");
        self.stash.push_back(command);
    }

    async fn drain_stash(&mut self) {
        while let Some(command) = self.stash.pop_front() {
            Box::pin(self.handle_command(command)).await;
        }
    }

    fn transition(&mut self, phase: EnginePhase) {
        debug!(test_id = %self.test_id, from = ?self.phase, to = ?phase, "Transition");
        self.phase = phase;
        self.status.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        let _ = self.status_tx.send(self.status.clone());
    }

    fn spawn_storage_load(&self) {
        let storage = self.deps.storage.clone();
        let tx = self.self_tx.clone();
        let test_id = self.test_id;
        let bucket = self.bucket.clone().unwrap_or_default();
        tokio::spawn(async move {
            let event = match storage.load(test_id, &bucket).await {
                Ok(bundle) => EngineEvent::BundleLoaded(bundle),
                Err(error) => EngineEvent::ChildFailed {
                    child: ChildId::Storage,
                    error,
                },
            };
            let _ = tx.send(EngineMsg::Event(event)).await;
        });
    }

    fn spawn_vault_resolve(&self) {
        let Some(bundle) = &self.bundle else {
            return;
        };
        let vault = self.deps.vault.clone();
        let directive = bundle.directive.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let event = match vault.resolve(&directive).await {
                Ok(security) => EngineEvent::SecurityResolved(security),
                Err(error) => EngineEvent::ChildFailed {
                    child: ChildId::Vault,
                    error,
                },
            };
            let _ = tx.send(EngineMsg::Event(event)).await;
        });
    }

    async fn spawn_kafka_supervisor(&mut self) {
        let (Some(bundle), Some(security)) = (&self.bundle, &self.security) else {
            return;
        };
        if let Some(previous) = self.supervisor.take() {
            previous.send(SupervisorCommand::Stop).await;
        }
        let handle = KafkaSupervisor::spawn(
            self.test_id,
            self.config.clone(),
            self.deps.codec.clone(),
            self.deps.router.clone(),
            self.self_tx.clone(),
        );
        handle
            .send(SupervisorCommand::Initialize {
                directive: bundle.directive.clone(),
                security: security.clone(),
            })
            .await;
        self.supervisor = Some(handle);
    }

    fn spawn_scenario(&self) {
        let Some(bundle) = &self.bundle else {
            return;
        };
        let executor = self.deps.scenario.clone();
        let tx = self.self_tx.clone();
        let mut glue_packages = self.config.cucumber.glue_packages.clone();
        glue_packages.extend(bundle.directive.user_glue_packages.clone());
        let ctx = ScenarioContext {
            test_id: self.test_id,
            router: self.deps.router.clone(),
            bundle_dir: bundle.path().to_path_buf(),
            evidence_dir: bundle.evidence_dir(),
            directive: bundle.directive.clone(),
            glue_packages,
        };
        // The bundle clone keeps the staging directory alive for the run.
        let bundle = bundle.clone();
        tokio::spawn(async move {
            let result = executor.execute(&ctx).await;
            drop(bundle);
            let _ = tx
                .send(EngineMsg::Event(EngineEvent::ScenarioFinished(Box::new(
                    result,
                ))))
                .await;
        });
    }

    fn spawn_evidence_upload(&self) {
        let Some(bundle) = &self.bundle else {
            return;
        };
        let storage = self.deps.storage.clone();
        let tx = self.self_tx.clone();
        let test_id = self.test_id;
        let bucket = bundle.directive.bucket.clone();
        let evidence_dir = bundle.evidence_dir();
        let bundle = bundle.clone();
        tokio::spawn(async move {
            let event = match storage
                .store_evidence(test_id, &bucket, &evidence_dir)
                .await
            {
                Ok(()) => EngineEvent::EvidenceStored,
                Err(error) => EngineEvent::ChildFailed {
                    child: ChildId::Storage,
                    error,
                },
            };
            drop(bundle);
            let _ = tx.send(EngineMsg::Event(event)).await;
        });
    }

    async fn teardown(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.send(SupervisorCommand::Stop).await;
            let timeout = self.config.runtime.shutdown_timeout();
            if tokio::time::timeout(timeout, supervisor.join).await.is_err() {
                warn!(test_id = %self.test_id, "Kafka supervisor did not stop in time");
            }
        }
        self.deps.router.deregister_test(self.test_id);
        self.bundle = None;
        self.publish();
    }
}
