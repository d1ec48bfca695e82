//! Availability probe harness
//!
//! Request workers keep a target service busy while a deployment driver
//! restarts it; the tally of outcomes tells whether the redeploys were
//! visible to clients.
//!
//! - [`OutcomeCounter`]: shared tally of response outcomes
//! - [`CompletionSignal`]: one-shot flag that stops the workers
//! - [`RequestWorkerPool`]: N busy request loops
//! - [`DeploymentDriver`]: sequential rollout restarts
//! - [`ProbeScenario`]: one complete, self-cleaning run

pub mod counter;
pub mod driver;
pub mod scenario;
pub mod signal;
pub mod worker;

pub use counter::{Outcome, OutcomeCounter, OutcomeSnapshot};
pub use driver::{DeploymentDriver, DEFAULT_RESTARTS};
pub use scenario::{
    provision_target, DeploymentTarget, ExpectedShape, ProbeScenario, ScenarioConfig,
    ScenarioKind, ScenarioReport, ShapeMismatch, DEFAULT_AVAILABILITY_TIMEOUT,
    DEFAULT_DEPLOYMENT_NAME, DEFAULT_WORKERS,
};
pub use signal::{completion_channel, CompletionSetter, CompletionSignal};
pub use worker::{
    build_client, PoolSummary, RequestSettings, RequestWorker, RequestWorkerPool,
    DEFAULT_REQUEST_PATH, DEFAULT_RESPONSE_TIMEOUT,
};

use crate::platform::PlatformError;
use std::path::PathBuf;
use thiserror::Error;

/// Orchestration-level failures; any of these ends the scenario
///
/// Failed requests are not errors: they are recorded as
/// [`Outcome::TransportError`].
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Invalid target URL {url}: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("Provisioning {} in namespace {namespace} failed: {source}", .manifest.display())]
    Provisioning {
        manifest: PathBuf,
        namespace: String,
        #[source]
        source: PlatformError,
    },

    #[error("Rollout restart {attempt}/{total} of {name} in {namespace} failed: {source}")]
    Rollout {
        name: String,
        namespace: String,
        attempt: u32,
        total: u32,
        #[source]
        source: PlatformError,
    },

    #[error("Request worker {index} aborted: {reason}")]
    WorkerAborted { index: usize, reason: String },

    #[error("Deployment driver aborted: {0}")]
    DriverAborted(String),

    #[error("Scenario probe aborted: {0}")]
    ScenarioAborted(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[cfg(test)]
#[path = "signal_test.rs"]
mod signal_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "worker_test.rs"]
mod worker_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "driver_test.rs"]
mod driver_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "scenario_test.rs"]
mod scenario_tests;
