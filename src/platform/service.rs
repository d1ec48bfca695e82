//! Service availability and endpoint discovery

use super::PlatformError;
use k8s_openapi::api::core::v1::{Endpoints, Node, Service, ServicePort};
use kube::api::{Api, ListParams};
use kube::Client;
use reqwest::Url;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Port the probed service is exposed on inside every manifest variant
pub const SERVICE_PORT: i32 = 80;

/// Check whether an Endpoints object lists at least one ready address
pub fn endpoints_ready(endpoints: &Endpoints) -> bool {
    endpoints.subsets.as_ref().is_some_and(|subsets| {
        subsets
            .iter()
            .any(|subset| subset.addresses.as_ref().is_some_and(|a| !a.is_empty()))
    })
}

fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == "LoadBalancer")
}

fn load_balancer_host(service: &Service) -> Option<String> {
    service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .iter()
        .find_map(|ingress| ingress.ip.clone().or_else(|| ingress.hostname.clone()))
}

/// Describe what still blocks a service from taking traffic
///
/// Returns `None` once the service exists, any load balancer has an ingress,
/// and the endpoints carry a ready address.
pub fn availability_blocker(
    service: Option<&Service>,
    endpoints: Option<&Endpoints>,
) -> Option<String> {
    let Some(service) = service else {
        return Some("service not found".to_string());
    };

    if is_load_balancer(service) && load_balancer_host(service).is_none() {
        return Some("load balancer ingress pending".to_string());
    }

    match endpoints {
        Some(endpoints) if endpoints_ready(endpoints) => None,
        Some(_) => Some("no ready endpoints".to_string()),
        None => Some("endpoints not found".to_string()),
    }
}

/// Poll the service until it is available or `timeout` elapses
pub async fn wait_until_available(
    client: &Client,
    name: &str,
    namespace: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), PlatformError> {
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let endpoints: Api<Endpoints> = Api::namespaced(client.clone(), namespace);
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let service = services.get_opt(name).await?;
        let current = endpoints.get_opt(name).await?;

        let reason = match availability_blocker(service.as_ref(), current.as_ref()) {
            None => {
                info!(
                    service = %name,
                    namespace = %namespace,
                    attempt,
                    "Service available"
                );
                return Ok(());
            }
            Some(reason) => reason,
        };

        let waited = started.elapsed();
        if waited + poll_interval > timeout {
            return Err(PlatformError::Unavailable {
                name: name.to_string(),
                namespace: namespace.to_string(),
                waited,
                reason,
            });
        }

        debug!(
            service = %name,
            namespace = %namespace,
            attempt,
            reason = %reason,
            "Service not yet available"
        );
        tokio::time::sleep(poll_interval).await;
    }
}

fn matching_port(service: &Service, port: i32) -> Option<&ServicePort> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.port == port)
}

fn node_address(node: &Node) -> Option<String> {
    let addresses = node.status.as_ref()?.addresses.as_ref()?;
    addresses
        .iter()
        .find(|a| a.type_ == "ExternalIP")
        .or_else(|| addresses.iter().find(|a| a.type_ == "InternalIP"))
        .map(|a| a.address.clone())
}

/// Resolve `host:port` for reaching `port` of a service from outside
///
/// - LoadBalancer: first ingress IP (or hostname) and the service port
/// - NodePort: the node's ExternalIP (else InternalIP) and the node port
/// - anything else: the cluster IP and the service port
pub fn service_endpoint(
    service: &Service,
    port: i32,
    node: Option<&Node>,
) -> Result<String, PlatformError> {
    let name = service.metadata.name.clone().unwrap_or_default();
    let no_endpoint = |reason: &str| PlatformError::NoEndpoint {
        name: name.clone(),
        reason: reason.to_string(),
    };

    let service_port =
        matching_port(service, port).ok_or_else(|| no_endpoint("service does not expose the port"))?;
    let spec = service
        .spec
        .as_ref()
        .ok_or_else(|| no_endpoint("service has no spec"))?;

    match spec.type_.as_deref() {
        Some("LoadBalancer") => {
            let host =
                load_balancer_host(service).ok_or_else(|| no_endpoint("load balancer has no ingress"))?;
            Ok(format!("{host}:{port}"))
        }
        Some("NodePort") => {
            let node_port = service_port
                .node_port
                .ok_or_else(|| no_endpoint("node port not allocated"))?;
            let host = node
                .and_then(node_address)
                .ok_or_else(|| no_endpoint("no node address available"))?;
            Ok(format!("{host}:{node_port}"))
        }
        _ => {
            let host = spec
                .cluster_ip
                .clone()
                .filter(|ip| !ip.is_empty() && ip != "None")
                .ok_or_else(|| no_endpoint("service has no cluster IP"))?;
            Ok(format!("{host}:{port}"))
        }
    }
}

/// Look up the service and build its base URL
pub async fn service_url(
    client: &Client,
    name: &str,
    namespace: &str,
) -> Result<Url, PlatformError> {
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let service = services.get(name).await?;

    let node = if service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == "NodePort")
    {
        let nodes: Api<Node> = Api::all(client.clone());
        nodes
            .list(&ListParams::default().limit(1))
            .await?
            .items
            .into_iter()
            .next()
    } else {
        None
    };

    let endpoint = service_endpoint(&service, SERVICE_PORT, node.as_ref())?;
    let raw = format!("http://{endpoint}");
    let url = Url::parse(&raw).map_err(|e| PlatformError::InvalidUrl(format!("{raw}: {e}")))?;

    info!(service = %name, namespace = %namespace, url = %url, "Resolved service URL");
    Ok(url)
}
