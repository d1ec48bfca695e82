//! Sequential redeploys of the target while the workers run

use super::signal::CompletionSetter;
use super::HarnessError;
use crate::platform::RolloutRestarter;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Default number of rollout restarts per scenario
pub const DEFAULT_RESTARTS: u32 = 5;

/// Issues a fixed number of rollout restarts, one after another
pub struct DeploymentDriver {
    restarter: Arc<dyn RolloutRestarter>,
    name: String,
    namespace: String,
    restarts: u32,
}

impl DeploymentDriver {
    pub fn new(
        restarter: Arc<dyn RolloutRestarter>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        restarts: u32,
    ) -> Self {
        Self {
            restarter,
            name: name.into(),
            namespace: namespace.into(),
            restarts,
        }
    }

    /// Perform every restart, then signal completion
    ///
    /// Each restart blocks until the rollout is reported complete before the
    /// next one starts. The completion flag is set on every exit path; on
    /// failure the remaining restarts are skipped.
    pub async fn run(self, completion: CompletionSetter) -> Result<u32, HarnessError> {
        for attempt in 1..=self.restarts {
            let started = Instant::now();
            info!(
                deployment = %self.name,
                namespace = %self.namespace,
                attempt,
                total = self.restarts,
                "Triggering rollout restart"
            );

            if let Err(source) = self
                .restarter
                .restart_rollout(&self.name, &self.namespace)
                .await
            {
                error!(
                    deployment = %self.name,
                    namespace = %self.namespace,
                    attempt,
                    error = %source,
                    "Rollout restart failed"
                );
                completion.set();
                return Err(HarnessError::Rollout {
                    name: self.name,
                    namespace: self.namespace,
                    attempt,
                    total: self.restarts,
                    source,
                });
            }

            info!(
                deployment = %self.name,
                attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Rollout restart completed"
            );
        }

        completion.set();
        Ok(self.restarts)
    }
}
