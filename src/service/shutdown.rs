//! Staged shutdown of the probed service
//!
//! With graceful shutdown enabled a termination signal walks the service
//! through `Serving → Draining → KeepAliveDisabled → Terminated`:
//! - Draining: keep serving normally while the platform cuts traffic over
//! - KeepAliveDisabled: still serving, but every connection closes after
//!   its current exchange
//! - Terminated: the listener closes, open connections are shut down after
//!   their in-flight response, and the process exits
//!
//! Without it the service goes straight from `Serving` to `Terminated`.
//!
//! Keep-alive is switched off per response (`Connection: close`), so a
//! connection only closes in `KeepAliveDisabled` once it carries another
//! request. Connections sitting idle for the whole grace window stay open
//! until `Terminated` closes them.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Default time spent in `Draining`
pub const DEFAULT_DRAIN_DELAY: Duration = Duration::from_secs(10);

/// Default time spent in `KeepAliveDisabled`
pub const DEFAULT_KEEP_ALIVE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Serving,
    Draining,
    KeepAliveDisabled,
    Terminated,
}

impl ShutdownPhase {
    /// Phase that follows this one, or `None` once terminated
    pub fn next(self, graceful: bool) -> Option<ShutdownPhase> {
        match self {
            ShutdownPhase::Terminated => None,
            _ if !graceful => Some(ShutdownPhase::Terminated),
            ShutdownPhase::Serving => Some(ShutdownPhase::Draining),
            ShutdownPhase::Draining => Some(ShutdownPhase::KeepAliveDisabled),
            ShutdownPhase::KeepAliveDisabled => Some(ShutdownPhase::Terminated),
        }
    }

    /// Whether connections may stay open after a response
    pub fn keep_alive_enabled(self) -> bool {
        matches!(self, ShutdownPhase::Serving | ShutdownPhase::Draining)
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownPhase::Serving => "serving",
            ShutdownPhase::Draining => "draining",
            ShutdownPhase::KeepAliveDisabled => "keep-alive-disabled",
            ShutdownPhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Timing of the shutdown sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    pub graceful: bool,
    pub drain_delay: Duration,
    pub keep_alive_grace: Duration,
}

impl ShutdownPolicy {
    pub fn immediate() -> Self {
        Self {
            graceful: false,
            drain_delay: Duration::ZERO,
            keep_alive_grace: Duration::ZERO,
        }
    }

    pub fn graceful(drain_delay: Duration, keep_alive_grace: Duration) -> Self {
        Self {
            graceful: true,
            drain_delay,
            keep_alive_grace,
        }
    }

    /// Time to wait before entering `phase`
    fn delay_before(&self, phase: ShutdownPhase) -> Duration {
        match phase {
            ShutdownPhase::KeepAliveDisabled => self.drain_delay,
            ShutdownPhase::Terminated if self.graceful => self.keep_alive_grace,
            _ => Duration::ZERO,
        }
    }
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self::graceful(DEFAULT_DRAIN_DELAY, DEFAULT_KEEP_ALIVE_GRACE)
    }
}

/// Read-only view of the current phase
#[derive(Debug, Clone)]
pub struct PhaseWatch {
    receiver: watch::Receiver<ShutdownPhase>,
}

impl PhaseWatch {
    pub fn current(&self) -> ShutdownPhase {
        *self.receiver.borrow()
    }

    /// Wait until the machine has reached `phase` (or a later one)
    pub async fn reached(&self, phase: ShutdownPhase) {
        let mut receiver = self.receiver.clone();
        let _ = receiver.wait_for(|current| *current >= phase).await;
    }
}

/// The shutdown state machine
pub struct GracefulShutdown {
    policy: ShutdownPolicy,
    sender: watch::Sender<ShutdownPhase>,
}

impl GracefulShutdown {
    pub fn new(policy: ShutdownPolicy) -> Self {
        let (sender, _) = watch::channel(ShutdownPhase::Serving);
        Self { policy, sender }
    }

    pub fn policy(&self) -> ShutdownPolicy {
        self.policy
    }

    pub fn phases(&self) -> PhaseWatch {
        PhaseWatch {
            receiver: self.sender.subscribe(),
        }
    }

    /// Wait for `termination`, then step through the phases
    ///
    /// Resolves once `Terminated` is reached.
    pub async fn run<F>(self, termination: F) -> ShutdownPhase
    where
        F: Future<Output = &'static str>,
    {
        let signal = termination.await;
        info!(
            signal = signal,
            graceful = self.policy.graceful,
            "Termination signal received"
        );

        let mut phase = *self.sender.borrow();
        while let Some(next) = phase.next(self.policy.graceful) {
            let delay = self.policy.delay_before(next);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            phase = next;
            self.sender.send_replace(phase);
            info!(phase = %phase, "Shutdown phase changed");
        }

        phase
    }
}
