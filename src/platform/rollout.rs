//! Rollout restart of a Deployment
//!
//! A restart bumps the `restartedAt` annotation on the pod template (the same
//! thing `kubectl rollout restart` does), which makes the Deployment replace
//! every pod without changing the image. Completion is judged the way
//! `kubectl rollout status` judges it.

use super::PlatformError;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::wait::await_condition;
use kube::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pod template annotation whose change triggers a restart
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Where a Deployment rollout currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutProgress {
    Complete,
    Waiting(String),
    Failed(String),
}

/// Merge patch that restarts every pod of a Deployment
pub fn restart_patch(now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        RESTARTED_AT_ANNOTATION: now.to_rfc3339()
                    }
                }
            }
        }
    })
}

/// Evaluate a Deployment's rollout state
///
/// Complete only when the controller has observed the latest spec, every
/// desired replica is updated, no old replicas are left terminating, and all
/// updated replicas are available.
pub fn rollout_progress(deployment: &Deployment) -> RolloutProgress {
    let generation = deployment.metadata.generation.unwrap_or(0);
    let Some(status) = deployment.status.as_ref() else {
        return RolloutProgress::Waiting("waiting for deployment status".to_string());
    };

    if status.observed_generation.unwrap_or(0) < generation {
        return RolloutProgress::Waiting(
            "waiting for deployment spec update to be observed".to_string(),
        );
    }

    let deadline_exceeded = status.conditions.as_ref().is_some_and(|conditions| {
        conditions.iter().any(|c| {
            c.type_ == "Progressing" && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
        })
    });
    if deadline_exceeded {
        return RolloutProgress::Failed("deployment exceeded its progress deadline".to_string());
    }

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let updated = status.updated_replicas.unwrap_or(0);
    let replicas = status.replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    if updated < desired {
        return RolloutProgress::Waiting(format!(
            "{updated} out of {desired} new replicas have been updated"
        ));
    }
    if replicas > updated {
        return RolloutProgress::Waiting(format!(
            "{} old replicas are pending termination",
            replicas - updated
        ));
    }
    if available < updated {
        return RolloutProgress::Waiting(format!(
            "{available} of {updated} updated replicas are available"
        ));
    }

    RolloutProgress::Complete
}

/// Restart the named Deployment and wait for the rollout to finish
pub async fn restart_rollout(
    client: &Client,
    name: &str,
    namespace: &str,
    timeout: Duration,
) -> Result<(), PlatformError> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);

    let patched = api
        .patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(&restart_patch(Utc::now())),
        )
        .await?;
    info!(
        deployment = %name,
        namespace = %namespace,
        generation = patched.metadata.generation,
        "Rollout restart triggered"
    );

    let settled = |object: Option<&Deployment>| {
        object.is_some_and(|d| !matches!(rollout_progress(d), RolloutProgress::Waiting(_)))
    };

    let deployment = tokio::time::timeout(timeout, await_condition(api, name, settled))
        .await
        .map_err(|_| PlatformError::RolloutTimeout {
            name: name.to_string(),
            timeout,
        })??;

    match deployment.as_ref().map(rollout_progress) {
        Some(RolloutProgress::Complete) => {
            debug!(deployment = %name, namespace = %namespace, "Rollout complete");
            Ok(())
        }
        Some(RolloutProgress::Failed(reason)) => {
            warn!(deployment = %name, namespace = %namespace, reason = %reason, "Rollout failed");
            Err(PlatformError::RolloutFailed {
                name: name.to_string(),
                reason,
            })
        }
        Some(RolloutProgress::Waiting(reason)) => Err(PlatformError::RolloutFailed {
            name: name.to_string(),
            reason,
        }),
        None => Err(PlatformError::RolloutFailed {
            name: name.to_string(),
            reason: "deployment was deleted during the rollout".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentSpec, DeploymentStatus};
    use kube::api::ObjectMeta;

    fn deployment(generation: i64, desired: i32, status: Option<DeploymentStatus>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("probed-service".to_string()),
                generation: Some(generation),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(desired),
                ..Default::default()
            }),
            status,
        }
    }

    fn status(observed: i64, replicas: i32, updated: i32, available: i32) -> DeploymentStatus {
        DeploymentStatus {
            observed_generation: Some(observed),
            replicas: Some(replicas),
            updated_replicas: Some(updated),
            available_replicas: Some(available),
            ..Default::default()
        }
    }

    #[test]
    fn test_restart_patch_sets_restarted_at() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let patch = restart_patch(now);

        assert_eq!(
            patch["spec"]["template"]["metadata"]["annotations"][RESTARTED_AT_ANNOTATION],
            "2024-03-01T12:30:00+00:00"
        );
    }

    #[test]
    fn test_progress_without_status_is_waiting() {
        let d = deployment(2, 3, None);
        assert!(matches!(rollout_progress(&d), RolloutProgress::Waiting(_)));
    }

    #[test]
    fn test_progress_waits_for_observed_generation() {
        // Old generation fully rolled out, new spec not yet seen by the controller
        let d = deployment(3, 3, Some(status(2, 3, 3, 3)));
        assert_eq!(
            rollout_progress(&d),
            RolloutProgress::Waiting("waiting for deployment spec update to be observed".into())
        );
    }

    #[test]
    fn test_progress_waits_for_updated_replicas() {
        let d = deployment(3, 3, Some(status(3, 4, 1, 3)));
        assert_eq!(
            rollout_progress(&d),
            RolloutProgress::Waiting("1 out of 3 new replicas have been updated".into())
        );
    }

    #[test]
    fn test_progress_waits_for_old_replicas_to_terminate() {
        let d = deployment(3, 3, Some(status(3, 4, 3, 3)));
        assert_eq!(
            rollout_progress(&d),
            RolloutProgress::Waiting("1 old replicas are pending termination".into())
        );
    }

    #[test]
    fn test_progress_waits_for_availability() {
        let d = deployment(3, 3, Some(status(3, 3, 3, 2)));
        assert_eq!(
            rollout_progress(&d),
            RolloutProgress::Waiting("2 of 3 updated replicas are available".into())
        );
    }

    #[test]
    fn test_progress_complete() {
        let d = deployment(3, 3, Some(status(3, 3, 3, 3)));
        assert_eq!(rollout_progress(&d), RolloutProgress::Complete);
    }

    #[test]
    fn test_progress_deadline_exceeded_fails() {
        let mut st = status(3, 4, 1, 3);
        st.conditions = Some(vec![DeploymentCondition {
            type_: "Progressing".to_string(),
            status: "False".to_string(),
            reason: Some("ProgressDeadlineExceeded".to_string()),
            ..Default::default()
        }]);
        let d = deployment(3, 3, Some(st));

        assert!(matches!(rollout_progress(&d), RolloutProgress::Failed(_)));
    }
}
