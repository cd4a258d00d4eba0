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

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::test::{EnginePhase, EngineStatus, TestRecord, TestStatusResponse};
use crate::services::engine::{EngineDeps, EngineHandle, TestEngine};
use crate::services::scenario::{ScenarioExecutor, ScenarioRunner};
use crate::services::schema::{SchemaRegistryClient, WireCodec};
use crate::services::storage::{StorageChild, StorageFunctions};
use crate::services::streams::StreamRouter;
use crate::services::vault::{VaultChild, VaultFunctions};

struct RegistryEntry {
    record: TestRecord,
    handle: Option<EngineHandle>,
    join: Option<JoinHandle<()>>,
}

/// Process-wide directory of live tests: the facade between the REST
/// surface and every engine instance. The registry never performs I/O for
/// a test itself; all per-test work is sharded onto the owning engine.
pub struct TestRegistry {
    config: Arc<Config>,
    deps: Arc<EngineDeps>,
    tests: Arc<DashMap<Uuid, RegistryEntry>>,
}

impl TestRegistry {
    pub fn new(config: Arc<Config>, deps: Arc<EngineDeps>) -> Arc<Self> {
        Arc::new(Self {
            config,
            deps,
            tests: Arc::new(DashMap::new()),
        })
    }

    /// Wire the shared infrastructure (schema cache, codec, router) and
    /// the injected collaborators into one dependency bundle.
    pub fn with_collaborators(
        config: Arc<Config>,
        storage: Arc<dyn StorageFunctions>,
        vault: Arc<dyn VaultFunctions>,
        runner: Arc<dyn ScenarioRunner>,
    ) -> Arc<Self> {
        let schema_registry = Arc::new(
            SchemaRegistryClient::new(
                &config.kafka.schema_registry_url,
                config.kafka.schema_auto_register,
                config.runtime.max_retries,
            )
            .with_cache_limit(config.kafka.schema_cache_max_entries),
        );
        let deps = Arc::new(EngineDeps {
            storage: Arc::new(StorageChild::new(storage)),
            vault: Arc::new(VaultChild::new(vault)),
            scenario: Arc::new(ScenarioExecutor::new(runner)),
            router: Arc::new(StreamRouter::new(config.dsl.ask_timeout())),
            codec: WireCodec::new(schema_registry),
        });
        Self::new(config, deps)
    }

    pub fn router(&self) -> Arc<StreamRouter> {
        self.deps.router.clone()
    }

    /// Mint a fresh test id with an Uninitialized record.
    pub fn initialize(&self) -> Uuid {
        let test_id = Uuid::new_v4();
        self.tests.insert(
            test_id,
            RegistryEntry {
                record: TestRecord {
                    test_id,
                    test_type: None,
                    bucket: None,
                    created_at: Utc::now(),
                },
                handle: None,
                join: None,
            },
        );
        info!(test_id = %test_id, "Test initialized");
        test_id
    }

    /// Spawn the engine for a known, not-yet-started test and hand it the
    /// bundle location. Returns before execution finishes.
    pub async fn start(
        &self,
        test_id: Uuid,
        bucket: &str,
        test_type: &str,
    ) -> Result<(), AppError> {
        let handle = {
            let mut entry = self.tests.get_mut(&test_id).ok_or_else(|| {
                AppError::NotFound(format!("Unknown test id {}", test_id))
            })?;
            if let Some(existing) = &entry.handle {
                let phase = existing.status().phase;
                return Err(AppError::Conflict(if phase.is_terminal() {
                    format!("Test {} already finished ({:?})", test_id, phase)
                } else {
                    format!("Test {} is already started", test_id)
                }));
            }

            let (handle, join) =
                TestEngine::spawn(test_id, self.config.clone(), self.deps.clone());
            entry.record.bucket = Some(bucket.to_string());
            entry.record.test_type = Some(test_type.to_string());
            entry.handle = Some(handle.clone());
            entry.join = Some(join);
            handle
        };

        let init_timeout =
            std::time::Duration::from_millis(self.config.runtime.initialization_timeout_ms);
        tokio::time::timeout(init_timeout, async {
            handle.initialize(bucket).await?;
            // StartTest rides behind Initialize; the engine stashes it
            // until every child reported ready.
            handle.start_test().await
        })
        .await
        .map_err(|_| {
            AppError::Timeout(format!("Engine for {} did not accept commands", test_id))
        })??;
        self.spawn_retirement_watch(test_id, &handle);
        info!(test_id = %test_id, bucket = bucket, test_type = test_type, "Test accepted");
        Ok(())
    }

    pub fn record(&self, test_id: Uuid) -> Option<TestRecord> {
        self.tests.get(&test_id).map(|entry| entry.record.clone())
    }

    pub fn status(&self, test_id: Uuid) -> Result<TestStatusResponse, AppError> {
        let entry = self
            .tests
            .get(&test_id)
            .ok_or_else(|| AppError::NotFound(format!("Unknown test id {}", test_id)))?;
        let status = entry
            .handle
            .as_ref()
            .map(|handle| handle.status())
            .unwrap_or_else(EngineStatus::uninitialized);
        Ok(TestStatusResponse::from_status(test_id, &status))
    }

    /// Forward cancellation; the record disappears once the engine
    /// acknowledges the terminal state.
    pub async fn delete(&self, test_id: Uuid) -> Result<(), AppError> {
        let handle = {
            let entry = self
                .tests
                .get(&test_id)
                .ok_or_else(|| AppError::NotFound(format!("Unknown test id {}", test_id)))?;
            entry.handle.clone()
        };
        match handle {
            Some(handle) => {
                handle.delete().await.ok();
            }
            None => {
                // Never started; there is nothing to cancel.
                self.tests.remove(&test_id);
            }
        }
        info!(test_id = %test_id, "Test deletion requested");
        Ok(())
    }

    /// Diagnostic: every test not yet in a terminal state.
    pub fn list_active(&self) -> Vec<Uuid> {
        self.tests
            .iter()
            .filter(|entry| {
                entry
                    .handle
                    .as_ref()
                    .map(|handle| !handle.status().phase.is_terminal())
                    .unwrap_or(true)
            })
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.list_active().len()
    }

    /// Fan out cancellation to every live engine and wait for clean
    /// termination, bounded by the configured shutdown timeout.
    pub async fn shutdown(&self) {
        info!("Shutting down test registry");
        let handles: Vec<EngineHandle> = self
            .tests
            .iter()
            .filter_map(|entry| entry.handle.clone())
            .collect();
        for handle in &handles {
            handle.delete().await.ok();
        }

        let joins: Vec<(Uuid, JoinHandle<()>)> = self
            .tests
            .iter_mut()
            .filter_map(|mut entry| entry.join.take().map(|join| (*entry.key(), join)))
            .collect();
        let deadline = self.config.runtime.shutdown_timeout();
        let outcomes = futures::future::join_all(joins.into_iter().map(
            |(test_id, join)| async move { (test_id, tokio::time::timeout(deadline, join).await) },
        ))
        .await;
        for (test_id, outcome) in outcomes {
            if outcome.is_err() {
                warn!(test_id = %test_id, "Engine did not terminate within the shutdown timeout");
            }
        }
        self.tests.clear();
    }

    /// Retire the record once its engine reports `Deleted`; completed and
    /// failed tests stay queryable for their retention window first.
    fn spawn_retirement_watch(&self, test_id: Uuid, handle: &EngineHandle) {
        let tests = self.tests.clone();
        let cleanup_delay =
            std::time::Duration::from_millis(self.config.runtime.cleanup_delay_ms);
        let mut status_rx = handle.status_receiver();
        tokio::spawn(async move {
            loop {
                if status_rx.borrow_and_update().phase == EnginePhase::Deleted {
                    break;
                }
                if status_rx.changed().await.is_err() {
                    break;
                }
            }
            // Grace period for any status poll already in flight.
            tokio::time::sleep(cleanup_delay).await;
            tests.remove(&test_id);
            info!(test_id = %test_id, "Test record retired");
        });
    }
}
