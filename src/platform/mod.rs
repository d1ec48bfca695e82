//! Platform collaborators used by the probe harness
//!
//! The harness only talks to the cluster through two narrow seams:
//! - [`Provisioner`]: namespace lifecycle, manifest application, service discovery
//! - [`RolloutRestarter`]: trigger a rollout restart and block until it completes
//!
//! [`KubePlatform`] implements both against a real cluster. Tests substitute
//! in-memory mocks.

pub mod manifest;
pub mod rollout;
pub mod service;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use manifest::{parse_manifest, FIELD_MANAGER};
pub use rollout::{restart_patch, rollout_progress, RolloutProgress, RESTARTED_AT_ANNOTATION};
pub use service::{availability_blocker, endpoints_ready, service_endpoint};

/// Interval between availability polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Upper bound for a single rollout restart to settle
pub const DEFAULT_ROLLOUT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Waiting on Kubernetes object failed: {0}")]
    WaitError(#[from] kube::runtime::wait::Error),

    #[error("Failed to read manifest {}: {source}", .path.display())]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(#[from] serde_yaml::Error),

    #[error("Manifest object {0} has no usable apiVersion/kind")]
    MissingTypeMeta(String),

    #[error("Service {name} in {namespace} not available after {waited:?}: {reason}")]
    Unavailable {
        name: String,
        namespace: String,
        waited: Duration,
        reason: String,
    },

    #[error("Service {name} has no reachable endpoint: {reason}")]
    NoEndpoint { name: String, reason: String },

    #[error("Invalid service URL {0}")]
    InvalidUrl(String),

    #[error("Rollout of {name} failed: {reason}")]
    RolloutFailed { name: String, reason: String },

    #[error("Rollout of {name} did not complete within {timeout:?}")]
    RolloutTimeout { name: String, timeout: Duration },
}

/// Provisioning interface: everything needed to stand up and tear down a
/// deployment target
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create an isolated namespace for one scenario run
    async fn create_namespace(&self, namespace: &str) -> Result<(), PlatformError>;

    /// Apply every object in the manifest at `path` into `namespace`
    async fn apply_manifest(&self, path: &Path, namespace: &str) -> Result<(), PlatformError>;

    /// Block until the named service has at least one ready endpoint
    async fn wait_until_available(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<(), PlatformError>;

    /// Resolve a reachable base URL for the named service
    async fn service_url(&self, name: &str, namespace: &str) -> Result<Url, PlatformError>;

    /// Delete the namespace and everything in it
    ///
    /// Deleting a namespace that does not exist is not an error.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), PlatformError>;
}

/// Rollout interface: one redeploy of the target without changing its image
#[async_trait]
pub trait RolloutRestarter: Send + Sync {
    /// Restart the rollout and return once the platform reports it complete
    async fn restart_rollout(&self, name: &str, namespace: &str) -> Result<(), PlatformError>;
}

/// Kubernetes-backed implementation of both platform seams
#[derive(Clone)]
pub struct KubePlatform {
    client: kube::Client,
    poll_interval: Duration,
    rollout_timeout: Duration,
}

impl KubePlatform {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            rollout_timeout: DEFAULT_ROLLOUT_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_rollout_timeout(mut self, timeout: Duration) -> Self {
        self.rollout_timeout = timeout;
        self
    }
}

#[async_trait]
impl Provisioner for KubePlatform {
    async fn create_namespace(&self, namespace: &str) -> Result<(), PlatformError> {
        manifest::create_namespace(&self.client, namespace).await
    }

    async fn apply_manifest(&self, path: &Path, namespace: &str) -> Result<(), PlatformError> {
        manifest::apply_manifest(&self.client, path, namespace)
            .await
            .map(|_| ())
    }

    async fn wait_until_available(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<(), PlatformError> {
        service::wait_until_available(&self.client, name, namespace, timeout, self.poll_interval)
            .await
    }

    async fn service_url(&self, name: &str, namespace: &str) -> Result<Url, PlatformError> {
        service::service_url(&self.client, name, namespace).await
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), PlatformError> {
        manifest::delete_namespace(&self.client, namespace).await
    }
}

#[async_trait]
impl RolloutRestarter for KubePlatform {
    async fn restart_rollout(&self, name: &str, namespace: &str) -> Result<(), PlatformError> {
        rollout::restart_rollout(&self.client, name, namespace, self.rollout_timeout).await
    }
}
