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


use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::cloud_event::CloudEvent;
use crate::models::directive::BlockStorageDirective;
use crate::models::report::TestExecutionResult;
use crate::services::schema::EventPayload;
use crate::services::streams::StreamRouter;

/// Everything a scenario run needs, threaded into every step explicitly:
/// the stream routes are addressed by test id, never discovered through
/// process-global state.
pub struct ScenarioContext {
    pub test_id: Uuid,
    pub router: Arc<StreamRouter>,
    pub bundle_dir: PathBuf,
    pub evidence_dir: PathBuf,
    pub directive: BlockStorageDirective,
    pub glue_packages: Vec<String>,
}

/// The pluggable scenario engine. The Gherkin step-definition layer lives
/// outside this crate; it drives traffic through the context's router.
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    async fn run(&self, ctx: &ScenarioContext) -> Result<TestExecutionResult, AppError>;
}

/// Scenario executor child: one per engine. Runs the injected runner,
/// finalizes the summary and writes the report into the evidence
/// directory.
pub struct ScenarioExecutor {
    runner: Arc<dyn ScenarioRunner>,
}

impl ScenarioExecutor {
    pub fn new(runner: Arc<dyn ScenarioRunner>) -> Self {
        Self { runner }
    }

    pub async fn execute(&self, ctx: &ScenarioContext) -> TestExecutionResult {
        let started = Instant::now();
        let mut result = match self.runner.run(ctx).await {
            Ok(result) => result,
            Err(e) => {
                error!(test_id = %ctx.test_id, "Scenario runner failed: {}", e);
                TestExecutionResult::failed(&e.to_string())
            }
        };
        if result.duration_millis == 0 {
            result.duration_millis = started.elapsed().as_millis() as u64;
        }
        result.passed = result.compute_passed();

        if let Err(e) = self.write_report(ctx, &result) {
            error!(test_id = %ctx.test_id, "Failed to write scenario report: {}", e);
            result.error_message = Some(format!("report not written: {}", e));
            result.passed = false;
        }

        info!(
            test_id = %ctx.test_id,
            passed = result.passed,
            scenarios = result.scenario_count,
            failed = result.scenarios_failed,
            success_rate = result.success_rate(),
            "Scenario execution finished"
        );
        result
    }

    fn write_report(
        &self,
        ctx: &ScenarioContext,
        result: &TestExecutionResult,
    ) -> Result<(), AppError> {
        std::fs::create_dir_all(&ctx.evidence_dir)?;
        let report_path = ctx.evidence_dir.join("cucumber.json");
        let mut report = serde_json::to_value(result)?;
        report["success_rate"] = serde_json::json!(result.success_rate());
        std::fs::write(&report_path, serde_json::to_vec_pretty(&report)?)?;
        Ok(())
    }
}

/// One step of a declarative scenario script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptStep {
    /// Produce one record with a fresh CloudEvent key.
    #[serde(rename_all = "kebab-case")]
    Produce {
        topic: String,
        event_type: String,
        correlation_id: String,
        #[serde(default)]
        record_name: Option<String>,
        payload: serde_json::Value,
    },
    /// Fetch a buffered consumed event by correlation id.
    #[serde(rename_all = "kebab-case")]
    ExpectEvent {
        topic: String,
        event_type: String,
        correlation_id: String,
    },
}

/// A single named scenario: steps run in order, a failed step skips the
/// rest of its scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioScript {
    pub scenario: String,
    pub steps: Vec<ScriptStep>,
}

/// Built-in declarative runner over the bundle's `features/` directory
/// (`*.yaml`/`*.yml` scenario scripts). Scenarios run sequentially; a
/// failure marks the scenario failed and execution continues with the
/// next one.
pub struct ScriptScenarioRunner;

impl ScriptScenarioRunner {
    fn load_scripts(&self, ctx: &ScenarioContext) -> Result<Vec<ScenarioScript>, AppError> {
        let features_dir = ctx.bundle_dir.join("features");
        if !features_dir.is_dir() {
            return Err(AppError::Scenario(format!(
                "Bundle has no features directory at {}",
                features_dir.display()
            )));
        }

        let mut scripts = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(&features_dir)?
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.file_name());
        for entry in entries {
            let path = entry.path();
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            if !matches!(extension, "yaml" | "yml") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            let script: ScenarioScript = serde_yaml::from_str(&raw)?;
            scripts.push(script);
        }

        if scripts.is_empty() {
            return Err(AppError::Scenario(
                "Bundle contains no scenario scripts".to_string(),
            ));
        }
        Ok(scripts)
    }

    async fn run_step(&self, ctx: &ScenarioContext, step: &ScriptStep) -> Result<(), String> {
        match step {
            ScriptStep::Produce {
                topic,
                event_type,
                correlation_id,
                record_name,
                payload,
            } => {
                let key = CloudEvent::new(
                    event_type,
                    correlation_id,
                    &format!("testprobe/{}", ctx.test_id),
                );
                let value = EventPayload::Json {
                    record_name: record_name.clone().unwrap_or_else(|| event_type.clone()),
                    value: payload.clone(),
                };
                let result = ctx
                    .router
                    .produce(ctx.test_id, topic, key, value, vec![])
                    .await;
                if result.is_ack() {
                    Ok(())
                } else {
                    Err(format!("produce to '{}' was not acknowledged: {:?}", topic, result))
                }
            }
            ScriptStep::ExpectEvent {
                topic,
                event_type,
                correlation_id,
            } => {
                let result = ctx
                    .router
                    .fetch_by_correlation(ctx.test_id, topic, correlation_id, event_type)
                    .await;
                if result.is_success() {
                    Ok(())
                } else {
                    Err(format!(
                        "no '{}' event stored under correlation id '{}' on '{}': {:?}",
                        event_type, correlation_id, topic, result
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl ScenarioRunner for ScriptScenarioRunner {
    async fn run(&self, ctx: &ScenarioContext) -> Result<TestExecutionResult, AppError> {
        let scripts = self.load_scripts(ctx)?;
        let started = Instant::now();
        let mut result = TestExecutionResult::empty();
        result.scenario_count = scripts.len() as u32;

        for script in &scripts {
            info!(test_id = %ctx.test_id, scenario = %script.scenario, "Running scenario");
            let mut scenario_failed = false;
            for step in &script.steps {
                result.step_count += 1;
                if scenario_failed {
                    result.steps_skipped += 1;
                    continue;
                }
                match self.run_step(ctx, step).await {
                    Ok(()) => result.steps_passed += 1,
                    Err(message) => {
                        warn!(
                            test_id = %ctx.test_id,
                            scenario = %script.scenario,
                            "Step failed: {}",
                            message
                        );
                        result.steps_failed += 1;
                        scenario_failed = true;
                    }
                }
            }
            if scenario_failed {
                result.scenarios_failed += 1;
                result.failed_scenarios.push(script.scenario.clone());
            } else {
                result.scenarios_passed += 1;
            }
        }

        result.duration_millis = started.elapsed().as_millis() as u64;
        result.passed = result.compute_passed();
        Ok(result)
    }
}
