//! The probed service
//!
//! A deliberately trivial HTTP server whose only interesting behaviour is how
//! it shuts down. See [`shutdown`] for the state machine the harness exercises.

pub mod routes;
pub mod shutdown;

pub use routes::{build_router, CONTENT_BODY, HEALTHZ_BODY};
pub use shutdown::{
    GracefulShutdown, PhaseWatch, ShutdownPhase, ShutdownPolicy, DEFAULT_DRAIN_DELAY,
    DEFAULT_KEEP_ALIVE_GRACE,
};

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Default simulated start-up time before the service starts listening
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(10);

/// Runtime settings of the probed service
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub port: u16,
    pub startup_delay: Duration,
    pub shutdown: ShutdownPolicy,
}

/// Wait out the start-up delay, bind the port and serve until terminated
pub async fn run_service<F>(
    settings: ServiceSettings,
    termination: F,
) -> std::io::Result<ShutdownPhase>
where
    F: Future<Output = &'static str>,
{
    if !settings.startup_delay.is_zero() {
        info!(
            delay_secs = settings.startup_delay.as_secs_f64(),
            "Simulating start-up time"
        );
        tokio::time::sleep(settings.startup_delay).await;
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr).await?;

    serve(listener, GracefulShutdown::new(settings.shutdown), termination).await
}

/// Serve on an already bound listener until the machine reaches `Terminated`
///
/// On `Terminated` the listener is closed and every open connection is shut
/// down once its in-flight response is written, idle ones straight away.
pub async fn serve<F>(
    listener: TcpListener,
    machine: GracefulShutdown,
    termination: F,
) -> std::io::Result<ShutdownPhase>
where
    F: Future<Output = &'static str>,
{
    let phases = machine.phases();
    let app = build_router(phases.clone());
    let addr = listener.local_addr()?;
    // Log after successful bind - server is actually listening
    info!(
        addr = %addr,
        graceful = machine.policy().graceful,
        "Probed service listening"
    );

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { phases.reached(ShutdownPhase::Terminated).await });

    let (served, phase) = tokio::join!(server.into_future(), machine.run(termination));
    served?;

    info!("Probed service exiting");
    Ok(phase)
}

/// Resolve on SIGTERM or SIGINT
///
/// Handlers are installed when this is called, so a signal arriving before
/// the future is first polled is not lost.
#[cfg(unix)]
pub fn termination_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

/// Resolve on Ctrl+C (Windows)
#[cfg(not(unix))]
pub fn termination_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    use tracing::error;

    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to wait for Ctrl+C");
        }
        "CTRL_C"
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "service_test.rs"]
mod tests;
