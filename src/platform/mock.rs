//! In-memory platform for tests
//!
//! Records every call so tests can assert on ordering, and can be told to
//! fail a specific operation.

use super::{PlatformError, Provisioner, RolloutRestarter};
use async_trait::async_trait;
use reqwest::Url;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MockPlatform {
    url: Url,
    restart_delay: Duration,
    fail_restart_at: Option<u32>,
    fail_apply: bool,
    calls: Arc<Mutex<Vec<String>>>,
    restarts: AtomicU32,
    restart_in_flight: AtomicBool,
    overlapping_restarts: AtomicBool,
}

#[allow(clippy::unwrap_used)]
impl MockPlatform {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            restart_delay: Duration::from_millis(20),
            fail_restart_at: None,
            fail_apply: false,
            calls: Arc::new(Mutex::new(Vec::new())),
            restarts: AtomicU32::new(0),
            restart_in_flight: AtomicBool::new(false),
            overlapping_restarts: AtomicBool::new(false),
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Fail the n-th (1-based) restart
    pub fn failing_restart(mut self, attempt: u32) -> Self {
        self.fail_restart_at = Some(attempt);
        self
    }

    pub fn failing_apply(mut self) -> Self {
        self.fail_apply = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose name starts with `prefix`
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Whether two restarts were ever in progress at the same time
    pub fn saw_overlapping_restarts(&self) -> bool {
        self.overlapping_restarts.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Provisioner for MockPlatform {
    async fn create_namespace(&self, namespace: &str) -> Result<(), PlatformError> {
        self.record(format!("create_namespace {namespace}"));
        Ok(())
    }

    async fn apply_manifest(&self, path: &Path, namespace: &str) -> Result<(), PlatformError> {
        self.record(format!("apply_manifest {} {namespace}", path.display()));
        if self.fail_apply {
            return Err(PlatformError::MissingTypeMeta("mock-object".to_string()));
        }
        Ok(())
    }

    async fn wait_until_available(
        &self,
        name: &str,
        namespace: &str,
        _timeout: Duration,
    ) -> Result<(), PlatformError> {
        self.record(format!("wait_until_available {name} {namespace}"));
        Ok(())
    }

    async fn service_url(&self, name: &str, namespace: &str) -> Result<Url, PlatformError> {
        self.record(format!("service_url {name} {namespace}"));
        Ok(self.url.clone())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), PlatformError> {
        self.record(format!("delete_namespace {namespace}"));
        Ok(())
    }
}

#[async_trait]
impl RolloutRestarter for MockPlatform {
    async fn restart_rollout(&self, name: &str, namespace: &str) -> Result<(), PlatformError> {
        if self.restart_in_flight.swap(true, Ordering::SeqCst) {
            self.overlapping_restarts.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(self.restart_delay).await;
        self.restart_in_flight.store(false, Ordering::SeqCst);

        let attempt = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(format!("restart_rollout {name} {namespace} #{attempt}"));

        if self.fail_restart_at == Some(attempt) {
            return Err(PlatformError::RolloutFailed {
                name: name.to_string(),
                reason: "deployment exceeded its progress deadline".to_string(),
            });
        }
        Ok(())
    }
}

/// A probed service running in-process on an ephemeral port
///
/// The service keeps serving until this is dropped.
pub struct LocalService {
    pub url: Url,
    _stop: tokio::sync::oneshot::Sender<()>,
}

#[allow(clippy::unwrap_used)]
pub async fn spawn_local_service() -> LocalService {
    use crate::service::{serve, GracefulShutdown, ShutdownPolicy};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(serve(
        listener,
        GracefulShutdown::new(ShutdownPolicy::immediate()),
        async move {
            let _ = stopped.await;
            "TEST"
        },
    ));

    LocalService {
        url: Url::parse(&format!("http://{addr}/")).unwrap(),
        _stop: stop,
    }
}

/// URL of a port nothing listens on
#[allow(clippy::unwrap_used)]
pub async fn closed_port_url() -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("http://{addr}/")).unwrap()
}

/// Time a restarted local rollout keeps serving before it reports complete
const LOCAL_ROLLOUT_SETTLE: Duration = Duration::from_millis(100);

struct LocalInstance {
    addr: std::net::SocketAddr,
    stop: tokio::sync::oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<std::io::Result<crate::service::ShutdownPhase>>,
}

#[allow(clippy::unwrap_used)]
async fn start_local_instance(policy: crate::service::ShutdownPolicy) -> LocalInstance {
    use crate::service::{serve, GracefulShutdown};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(serve(listener, GracefulShutdown::new(policy), async move {
        let _ = stopped.await;
        "SIGTERM"
    }));

    LocalInstance { addr, stop, handle }
}

/// Forward every connection on `front` to whichever instance `backend`
/// currently points at; a backend that refuses drops the client connection
async fn forward_connections(
    front: tokio::net::TcpListener,
    backend: tokio::sync::watch::Receiver<std::net::SocketAddr>,
) {
    while let Ok((mut inbound, _)) = front.accept().await {
        let target = *backend.borrow();
        tokio::spawn(async move {
            if let Ok(mut outbound) = tokio::net::TcpStream::connect(target).await {
                let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
            }
        });
    }
}

/// In-process rolling restart of the probed service
///
/// Clients use a stable front address that stands in for the Service; a
/// restart starts a replacement instance, stops the old one with the
/// configured shutdown policy, and moves the front over to the replacement.
/// With a `cutover_lag` the old instance is stopped first and traffic keeps
/// going to it for that long, like a pod killed before its endpoint is
/// removed. Without one, traffic moves before the old instance is signalled.
pub struct LocalRollout {
    url: Url,
    policy: crate::service::ShutdownPolicy,
    cutover_lag: Option<Duration>,
    backend: tokio::sync::watch::Sender<std::net::SocketAddr>,
    current: tokio::sync::Mutex<Option<LocalInstance>>,
    forwarder: tokio::task::JoinHandle<()>,
    restarts: AtomicU32,
}

#[allow(clippy::unwrap_used)]
impl LocalRollout {
    pub async fn start(policy: crate::service::ShutdownPolicy, cutover_lag: Option<Duration>) -> Self {
        let first = start_local_instance(policy).await;
        let (backend, targets) = tokio::sync::watch::channel(first.addr);

        let front = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/", front.local_addr().unwrap())).unwrap();
        let forwarder = tokio::spawn(forward_connections(front, targets));

        Self {
            url,
            policy,
            cutover_lag,
            backend,
            current: tokio::sync::Mutex::new(Some(first)),
            forwarder,
            restarts: AtomicU32::new(0),
        }
    }

    pub fn url(&self) -> Url {
        self.url.clone()
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl Drop for LocalRollout {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

#[async_trait]
impl RolloutRestarter for LocalRollout {
    async fn restart_rollout(&self, _name: &str, _namespace: &str) -> Result<(), PlatformError> {
        let mut current = self.current.lock().await;
        let replacement = start_local_instance(self.policy).await;
        let replacement_addr = replacement.addr;

        if self.cutover_lag.is_none() {
            self.backend.send_replace(replacement_addr);
        }
        let old = current.replace(replacement);

        if let Some(old) = old {
            let _ = old.stop.send(());
            if let Some(lag) = self.cutover_lag {
                tokio::time::sleep(lag).await;
                self.backend.send_replace(replacement_addr);
            }
            let _ = old.handle.await;
        }

        tokio::time::sleep(LOCAL_ROLLOUT_SETTLE).await;
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
