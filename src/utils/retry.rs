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
use tokio::time::sleep;

/// Backoff applied to Schema Registry calls, the one external dependency
/// the probe retries at all: a registry blip fails every produce and fetch
/// on every stream at once. Kafka I/O is never retried here — stream
/// workers surface those failures to the scenario as Nack/NotAvailable.
const REGISTRY_BASE_DELAY: Duration = Duration::from_millis(500);
const REGISTRY_DELAY_CAP: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub delay_cap: Duration,
}

impl RetryPolicy {
    /// Policy for registry HTTP round-trips; `max_attempts` comes from the
    /// runtime `max_retries` setting.
    pub fn schema_registry(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: REGISTRY_BASE_DELAY,
            delay_cap: REGISTRY_DELAY_CAP,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (1-based): base doubled per attempt, capped.
    fn delay_after(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << doublings)
            .min(self.delay_cap)
    }
}

/// Drive a fallible operation under a policy. The final error is returned
/// to the caller, who maps it into its own failure surface (for the codec
/// that is `SerializationError`).
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if attempt >= attempts {
            tracing::error!(attempts, "Giving up after {} attempts: {:?}", attempt, error);
            return Err(error);
        }
        let delay = policy.delay_after(attempt);
        tracing::warn!(
            attempt,
            remaining = attempts - attempt,
            delay_ms = delay.as_millis() as u64,
            "Attempt failed, backing off: {:?}",
            error
        );
        sleep(delay).await;
    }
}
