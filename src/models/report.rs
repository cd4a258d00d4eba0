use serde::{Deserialize, Serialize};

/// Summary emitted by the scenario executor and serialized into
/// `evidence/cucumber.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecutionResult {
    pub passed: bool,
    pub scenario_count: u32,
    pub scenarios_passed: u32,
    pub scenarios_failed: u32,
    pub scenarios_skipped: u32,
    pub step_count: u32,
    pub steps_passed: u32,
    pub steps_failed: u32,
    pub steps_skipped: u32,
    pub steps_undefined: u32,
    pub duration_millis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub failed_scenarios: Vec<String>,
}

impl TestExecutionResult {
    pub fn empty() -> Self {
        Self {
            passed: false,
            scenario_count: 0,
            scenarios_passed: 0,
            scenarios_failed: 0,
            scenarios_skipped: 0,
            step_count: 0,
            steps_passed: 0,
            steps_failed: 0,
            steps_skipped: 0,
            steps_undefined: 0,
            duration_millis: 0,
            error_message: None,
            failed_scenarios: Vec::new(),
        }
    }

    pub fn failed(message: &str) -> Self {
        let mut result = Self::empty();
        result.error_message = Some(message.to_string());
        result
    }

    /// A run passes only when nothing failed and no executor-level error
    /// was recorded.
    pub fn compute_passed(&self) -> bool {
        self.failed_scenarios.is_empty()
            && self.scenarios_failed == 0
            && self.error_message.is_none()
    }

    /// Percentage of scenarios that passed, rounded to one decimal.
    pub fn success_rate(&self) -> f64 {
        if self.scenario_count == 0 {
            return 0.0;
        }
        let rate = f64::from(self.scenarios_passed) / f64::from(self.scenario_count) * 100.0;
        (rate * 10.0).round() / 10.0
    }
}
