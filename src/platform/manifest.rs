//! Namespace lifecycle and manifest application
//!
//! Manifests are multi-document YAML files. Every document is server-side
//! applied as a `DynamicObject`, so any kind the cluster knows about works
//! without compiled-in types.

use super::PlatformError;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, ObjectMeta, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{self, Scope};
use kube::{Client, ResourceExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "rollprobe";

/// Label marking namespaces created by the harness
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Parse a multi-document YAML manifest
///
/// Empty documents (e.g. a trailing `---`) are skipped.
pub fn parse_manifest(yaml: &str) -> Result<Vec<DynamicObject>, PlatformError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value::<DynamicObject>(value)?);
    }
    Ok(objects)
}

fn group_version_kind(object: &DynamicObject) -> Result<GroupVersionKind, PlatformError> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| PlatformError::MissingTypeMeta(object.name_any()))?;

    GroupVersionKind::try_from(types)
        .map_err(|e| PlatformError::MissingTypeMeta(format!("{} ({})", object.name_any(), e)))
}

/// Server-side apply every object in the manifest at `path`
///
/// Namespaced objects are forced into `namespace`. Returns the number of
/// objects applied.
pub async fn apply_manifest(
    client: &Client,
    path: &Path,
    namespace: &str,
) -> Result<usize, PlatformError> {
    let yaml = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| PlatformError::ManifestRead {
            path: path.to_path_buf(),
            source,
        })?;
    let objects = parse_manifest(&yaml)?;
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for mut object in objects.iter().cloned() {
        let gvk = group_version_kind(&object)?;
        let (resource, capabilities) = discovery::pinned_kind(client, &gvk).await?;

        let api: Api<DynamicObject> = if capabilities.scope == Scope::Namespaced {
            object.metadata.namespace = Some(namespace.to_string());
            Api::namespaced_with(client.clone(), namespace, &resource)
        } else {
            Api::all_with(client.clone(), &resource)
        };

        let name = object.name_any();
        api.patch(&name, &params, &Patch::Apply(&object)).await?;

        info!(
            kind = %gvk.kind,
            name = %name,
            namespace = %namespace,
            "Applied manifest object"
        );
    }

    Ok(objects.len())
}

/// Create a namespace for one scenario run
///
/// An already existing namespace is reused.
pub async fn create_namespace(client: &Client, namespace: &str) -> Result<(), PlatformError> {
    let api: Api<Namespace> = Api::all(client.clone());
    let object = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                FIELD_MANAGER.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    };

    match api.create(&PostParams::default(), &object).await {
        Ok(_) => {
            info!(namespace = %namespace, "Namespace created");
            Ok(())
        }
        Err(kube::Error::Api(err)) if err.code == 409 => {
            debug!(namespace = %namespace, "Namespace already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete a namespace; a missing namespace counts as deleted
pub async fn delete_namespace(client: &Client, namespace: &str) -> Result<(), PlatformError> {
    let api: Api<Namespace> = Api::all(client.clone());

    match api.delete(namespace, &DeleteParams::default()).await {
        Ok(_) => {
            info!(namespace = %namespace, "Namespace deletion requested");
            Ok(())
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            debug!(namespace = %namespace, "Namespace already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
