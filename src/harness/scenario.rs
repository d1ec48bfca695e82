//! End-to-end probe scenarios
//!
//! A scenario provisions a fresh copy of the probed service, hammers it with
//! request workers while the deployment driver restarts it a fixed number of
//! times, and checks the final outcome tally against the shape expected for
//! that deployment configuration.

use super::counter::{Outcome, OutcomeCounter, OutcomeSnapshot};
use super::driver::{DeploymentDriver, DEFAULT_RESTARTS};
use super::signal::completion_channel;
use super::worker::{build_client, RequestSettings, RequestWorkerPool};
use super::HarnessError;
use crate::platform::{PlatformError, Provisioner, RolloutRestarter};
use clap::ValueEnum;
use reqwest::Url;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Deployment and Service name used by every manifest variant
pub const DEFAULT_DEPLOYMENT_NAME: &str = "probed-service";

/// Concurrent request workers per scenario
pub const DEFAULT_WORKERS: usize = 10;

/// How long a freshly applied target may take to become reachable
pub const DEFAULT_AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(200);

/// Successful responses a zero-downtime run must exceed
pub const MIN_SUCCESSFUL_RESPONSES: u64 = 100;

/// Deployment configurations the harness knows how to compare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Readiness probe and pre-stop delay enabled
    NoDowntime,
    /// Readiness probe and in-process graceful shutdown enabled
    NoDowntimeGraceful,
    /// Pre-stop delay but no readiness probe
    NoReadiness,
    /// Readiness probe but no pre-stop delay
    NoPodStop,
    /// Graceful shutdown disabled, with neither a readiness probe nor a
    /// pre-stop delay to mask the immediate exit
    NoGraceful,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 5] = [
        ScenarioKind::NoDowntime,
        ScenarioKind::NoDowntimeGraceful,
        ScenarioKind::NoReadiness,
        ScenarioKind::NoPodStop,
        ScenarioKind::NoGraceful,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::NoDowntime => "no-downtime",
            ScenarioKind::NoDowntimeGraceful => "no-downtime-graceful",
            ScenarioKind::NoReadiness => "no-readiness",
            ScenarioKind::NoPodStop => "no-pod-stop",
            ScenarioKind::NoGraceful => "no-graceful",
        }
    }

    /// Manifest file name inside the manifest directory
    pub fn manifest_file(&self) -> &'static str {
        match self {
            ScenarioKind::NoDowntime => "deployment_no_downtime.yaml",
            ScenarioKind::NoDowntimeGraceful => "deployment_no_downtime_graceful.yaml",
            ScenarioKind::NoReadiness => "deployment_no_readiness.yaml",
            ScenarioKind::NoPodStop => "deployment_no_pod_stop.yaml",
            ScenarioKind::NoGraceful => "deployment_no_graceful.yaml",
        }
    }

    pub fn expected_shape(&self) -> ExpectedShape {
        match self {
            ScenarioKind::NoDowntime | ScenarioKind::NoDowntimeGraceful => {
                ExpectedShape::OnlyStatus {
                    status: 200,
                    min_count: MIN_SUCCESSFUL_RESPONSES,
                }
            }
            ScenarioKind::NoReadiness | ScenarioKind::NoPodStop | ScenarioKind::NoGraceful => {
                ExpectedShape::StatusAndTransportErrors { status: 200 }
            }
        }
    }
}

/// Shape the final outcome tally must have for a scenario to pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExpectedShape {
    /// Exactly one outcome kind, `status`, seen more than `min_count` times
    #[serde(rename_all = "camelCase")]
    OnlyStatus { status: u16, min_count: u64 },
    /// Exactly two outcome kinds, `status` and transport errors, both present
    StatusAndTransportErrors { status: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ShapeMismatch(String);

impl ExpectedShape {
    /// Compare a final snapshot against this shape
    pub fn check(&self, snapshot: &OutcomeSnapshot) -> Result<(), ShapeMismatch> {
        match *self {
            ExpectedShape::OnlyStatus { status, min_count } => {
                if snapshot.kinds() != 1 {
                    return Err(ShapeMismatch(format!(
                        "expected exactly one outcome kind, got {}: {snapshot}",
                        snapshot.kinds()
                    )));
                }
                let seen = snapshot.count(Outcome::Status(status));
                if seen <= min_count {
                    return Err(ShapeMismatch(format!(
                        "expected more than {min_count} responses with status {status}, got {seen}: {snapshot}"
                    )));
                }
                Ok(())
            }
            ExpectedShape::StatusAndTransportErrors { status } => {
                if snapshot.kinds() != 2 {
                    return Err(ShapeMismatch(format!(
                        "expected exactly two outcome kinds, got {}: {snapshot}",
                        snapshot.kinds()
                    )));
                }
                if snapshot.count(Outcome::Status(status)) == 0 {
                    return Err(ShapeMismatch(format!(
                        "expected some responses with status {status}: {snapshot}"
                    )));
                }
                if snapshot.count(Outcome::TransportError) == 0 {
                    return Err(ShapeMismatch(format!(
                        "expected some transport errors: {snapshot}"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Everything one scenario run needs; fixed once the run starts
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Scenario name, also the namespace prefix
    pub name: String,
    /// Deployment/Service name inside the manifest
    pub deployment: String,
    pub manifest: PathBuf,
    pub expected: ExpectedShape,
    pub workers: usize,
    pub restarts: u32,
    pub request: RequestSettings,
    pub availability_timeout: Duration,
}

impl ScenarioConfig {
    /// Default configuration for a known scenario kind
    pub fn preset(kind: ScenarioKind, manifest_dir: &Path) -> Self {
        Self {
            name: kind.name().to_string(),
            deployment: DEFAULT_DEPLOYMENT_NAME.to_string(),
            manifest: manifest_dir.join(kind.manifest_file()),
            expected: kind.expected_shape(),
            workers: DEFAULT_WORKERS,
            restarts: DEFAULT_RESTARTS,
            request: RequestSettings::default(),
            availability_timeout: DEFAULT_AVAILABILITY_TIMEOUT,
        }
    }
}

/// A provisioned, reachable service under test
#[derive(Debug, Clone)]
pub struct DeploymentTarget {
    pub name: String,
    pub namespace: String,
    pub manifest: PathBuf,
    pub url: Url,
}

/// Apply the manifest, wait for the service, and resolve its URL
pub async fn provision_target(
    provisioner: &dyn Provisioner,
    name: &str,
    namespace: &str,
    manifest: &Path,
    timeout: Duration,
) -> Result<DeploymentTarget, PlatformError> {
    provisioner.apply_manifest(manifest, namespace).await?;
    provisioner
        .wait_until_available(name, namespace, timeout)
        .await?;
    let url = provisioner.service_url(name, namespace).await?;

    Ok(DeploymentTarget {
        name: name.to_string(),
        namespace: namespace.to_string(),
        manifest: manifest.to_path_buf(),
        url,
    })
}

/// Result of one scenario run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub scenario: String,
    pub namespace: String,
    pub url: String,
    pub restarts: u32,
    pub attempts: u64,
    pub outcomes: OutcomeSnapshot,
    pub expected: ExpectedShape,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<String>,
}

/// One end-to-end run of a scenario configuration
#[derive(Clone)]
pub struct ProbeScenario {
    config: ScenarioConfig,
    provisioner: Arc<dyn Provisioner>,
    restarter: Arc<dyn RolloutRestarter>,
}

impl ProbeScenario {
    pub fn new(
        config: ScenarioConfig,
        provisioner: Arc<dyn Provisioner>,
        restarter: Arc<dyn RolloutRestarter>,
    ) -> Self {
        Self {
            config,
            provisioner,
            restarter,
        }
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Run the scenario in a freshly created namespace
    ///
    /// The namespace is deleted on every exit path once it was created. A
    /// panic in the probe is re-raised after teardown.
    pub async fn run(&self) -> Result<ScenarioReport, HarnessError> {
        let namespace = format!("{}-{}", self.config.name, Uuid::new_v4());
        info!(
            scenario = %self.config.name,
            namespace = %namespace,
            manifest = %self.config.manifest.display(),
            "Starting scenario"
        );

        self.provisioner
            .create_namespace(&namespace)
            .await
            .map_err(|source| self.provisioning_error(&namespace, source))?;

        // The probe runs in its own task so a panic still reaches teardown
        let probe = {
            let scenario = self.clone();
            let namespace = namespace.clone();
            tokio::spawn(async move { scenario.probe(&namespace).await })
        };

        let result = match probe.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                self.teardown(&namespace).await;
                std::panic::resume_unwind(e.into_panic());
            }
            Err(e) => Err(HarnessError::ScenarioAborted(e.to_string())),
        };
        self.teardown(&namespace).await;
        result
    }

    async fn probe(&self, namespace: &str) -> Result<ScenarioReport, HarnessError> {
        let config = &self.config;

        let target = provision_target(
            self.provisioner.as_ref(),
            &config.deployment,
            namespace,
            &config.manifest,
            config.availability_timeout,
        )
        .await
        .map_err(|source| self.provisioning_error(namespace, source))?;

        let client = build_client()?;
        let counter = OutcomeCounter::new();
        let (completion, signal) = completion_channel();

        let pool = RequestWorkerPool::start(
            config.workers,
            &target.url,
            &config.request,
            &client,
            &counter,
            &signal,
        )?;

        let driver = DeploymentDriver::new(
            self.restarter.clone(),
            target.name.clone(),
            target.namespace.clone(),
            config.restarts,
        );
        let driver_handle = tokio::spawn(driver.run(completion));

        signal.wait().await;
        let summary = pool.join().await?;
        let restarts = driver_handle
            .await
            .map_err(|e| HarnessError::DriverAborted(e.to_string()))??;

        let snapshot = counter.snapshot();
        // Every recorded attempt is counted exactly once; anything else means
        // the harness itself cannot be trusted.
        assert_eq!(
            snapshot.total(),
            summary.attempts,
            "outcome counter total does not match request attempts"
        );

        let mismatch = config.expected.check(&snapshot).err().map(|e| e.to_string());
        match &mismatch {
            None => info!(
                scenario = %config.name,
                attempts = summary.attempts,
                outcomes = %snapshot,
                "Scenario passed"
            ),
            Some(reason) => warn!(
                scenario = %config.name,
                attempts = summary.attempts,
                outcomes = %snapshot,
                reason = %reason,
                "Scenario failed"
            ),
        }

        Ok(ScenarioReport {
            scenario: config.name.clone(),
            namespace: namespace.to_string(),
            url: target.url.to_string(),
            restarts,
            attempts: summary.attempts,
            outcomes: snapshot,
            expected: config.expected.clone(),
            passed: mismatch.is_none(),
            mismatch,
        })
    }

    async fn teardown(&self, namespace: &str) {
        match self.provisioner.delete_namespace(namespace).await {
            Ok(()) => info!(namespace = %namespace, "Scenario namespace torn down"),
            Err(e) => warn!(
                namespace = %namespace,
                error = %e,
                "Failed to tear down scenario namespace"
            ),
        }
    }

    fn provisioning_error(&self, namespace: &str, source: PlatformError) -> HarnessError {
        HarnessError::Provisioning {
            manifest: self.config.manifest.clone(),
            namespace: namespace.to_string(),
            source,
        }
    }
}
