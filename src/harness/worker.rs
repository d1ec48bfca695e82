//! Request workers that keep the target under constant pressure
//!
//! Each worker loops without any pause: check the completion flag, send one
//! request, record its outcome. Back-off would hide exactly the availability
//! gaps the harness is trying to catch.

use super::counter::{Outcome, OutcomeCounter};
use super::signal::CompletionSignal;
use super::HarnessError;
use futures::future::join_all;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Response-header timeout applied to every request
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Path requested on the target unless configured otherwise
pub const DEFAULT_REQUEST_PATH: &str = "/content";

/// Per-request settings shared by every worker in a pool
#[derive(Debug, Clone)]
pub struct RequestSettings {
    /// Path joined onto the target base URL
    pub path: String,
    /// Requests without response headers by then count as transport errors
    pub response_timeout: Duration,
    /// Informational body check; mismatches are only logged
    pub expected_body: Option<String>,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_REQUEST_PATH.to_string(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            expected_body: None,
        }
    }
}

impl RequestSettings {
    /// Full URL the workers hit
    pub fn request_url(&self, base: &Url) -> Result<Url, HarnessError> {
        base.join(&self.path)
            .map_err(|e| HarnessError::InvalidTarget {
                url: base.to_string(),
                reason: e.to_string(),
            })
    }
}

/// One request loop
pub struct RequestWorker {
    index: usize,
    client: Client,
    url: Url,
    response_timeout: Duration,
    expected_body: Option<Arc<str>>,
    counter: OutcomeCounter,
    signal: CompletionSignal,
}

impl RequestWorker {
    /// Run until the completion flag is observed; returns the number of
    /// attempts this worker recorded
    pub async fn run(self) -> u64 {
        let mut attempts = 0u64;

        while !self.signal.is_done() {
            let outcome = self.probe_once().await;
            self.counter.increment(outcome);
            attempts += 1;
        }

        debug!(worker = self.index, attempts, "Request worker stopped");
        attempts
    }

    async fn probe_once(&self) -> Outcome {
        let send = self.client.get(self.url.clone()).send();

        let response = match tokio::time::timeout(self.response_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                trace!(worker = self.index, error = %e, "Request failed");
                return Outcome::TransportError;
            }
            Err(_) => {
                trace!(worker = self.index, "Response headers timed out");
                return Outcome::TransportError;
            }
        };

        let status = response.status().as_u16();

        // Drain the body so the connection can go back to the pool
        match (response.text().await, self.expected_body.as_deref()) {
            (Ok(body), Some(expected)) if body.trim_end() != expected => {
                debug!(worker = self.index, status, body = %body.trim_end(), "Unexpected response body");
            }
            (Ok(body), Some(_)) => {
                trace!(worker = self.index, body = %body.trim_end(), "Response body matched");
            }
            (Err(e), _) => {
                debug!(worker = self.index, status, error = %e, "Failed to read response body");
            }
            (Ok(_), None) => {}
        }

        Outcome::Status(status)
    }
}

/// Totals reported once every worker has stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub workers: usize,
    pub attempts: u64,
}

/// Owns N request workers and their join
pub struct RequestWorkerPool {
    handles: Vec<JoinHandle<u64>>,
}

impl RequestWorkerPool {
    /// Spawn `workers` independent request loops against `target`
    pub fn start(
        workers: usize,
        target: &Url,
        settings: &RequestSettings,
        client: &Client,
        counter: &OutcomeCounter,
        signal: &CompletionSignal,
    ) -> Result<Self, HarnessError> {
        let url = settings.request_url(target)?;
        let expected_body: Option<Arc<str>> = settings.expected_body.as_deref().map(Arc::from);

        let handles = (0..workers)
            .map(|index| {
                let worker = RequestWorker {
                    index,
                    client: client.clone(),
                    url: url.clone(),
                    response_timeout: settings.response_timeout,
                    expected_body: expected_body.clone(),
                    counter: counter.clone(),
                    signal: signal.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers, url = %url, "Request workers started");
        Ok(Self { handles })
    }

    /// Wait for every worker to observe completion and exit
    ///
    /// After this returns no further increments reach the counter.
    pub async fn join(self) -> Result<PoolSummary, HarnessError> {
        let workers = self.handles.len();
        let mut attempts = 0u64;
        let mut failure = None;

        // Join every handle even after a failure so no worker outlives the pool
        let results = join_all(self.handles).await;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(count) => attempts += count,
                Err(e) => {
                    failure.get_or_insert(HarnessError::WorkerAborted {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        info!(workers, attempts, "Request workers joined");
        Ok(PoolSummary { workers, attempts })
    }
}

/// HTTP client used by the request workers
///
/// Connection pooling stays on: reusing keep-alive connections is part of
/// what a graceful shutdown has to cope with.
pub fn build_client() -> Result<Client, HarnessError> {
    Client::builder()
        .user_agent(concat!("rollprobe/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(HarnessError::Client)
}
