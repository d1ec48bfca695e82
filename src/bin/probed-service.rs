use clap::Parser;
use rollprobe::service::{
    run_service, termination_signal, ServiceSettings, ShutdownPolicy, DEFAULT_DRAIN_DELAY,
    DEFAULT_KEEP_ALIVE_GRACE, DEFAULT_STARTUP_DELAY,
};
use std::time::Duration;
use tracing::info;

/// HTTP service whose shutdown behaviour is under test
#[derive(Debug, Parser)]
#[command(name = "probed-service", version)]
struct Settings {
    /// Port to listen on
    #[arg(long, env = "PORT")]
    port: u16,

    /// Drain and close keep-alive connections before exiting on SIGTERM
    #[arg(long, env = "GRACEFUL")]
    graceful: bool,

    /// Simulated start-up time before the port is opened
    #[arg(long, default_value_t = DEFAULT_STARTUP_DELAY.as_secs())]
    startup_delay_secs: u64,

    /// Time spent serving normally after SIGTERM
    #[arg(long, default_value_t = DEFAULT_DRAIN_DELAY.as_secs())]
    drain_secs: u64,

    /// Time spent serving with keep-alive disabled before exiting
    #[arg(long, default_value_t = DEFAULT_KEEP_ALIVE_GRACE.as_secs())]
    keepalive_secs: u64,
}

impl Settings {
    fn service_settings(&self) -> ServiceSettings {
        let shutdown = if self.graceful {
            ShutdownPolicy::graceful(
                Duration::from_secs(self.drain_secs),
                Duration::from_secs(self.keepalive_secs),
            )
        } else {
            ShutdownPolicy::immediate()
        };

        ServiceSettings {
            port: self.port,
            startup_delay: Duration::from_secs(self.startup_delay_secs),
            shutdown,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::parse();
    info!(
        port = settings.port,
        graceful = settings.graceful,
        "Starting probed service"
    );

    // Register handlers before the start-up delay so an early SIGTERM is seen
    let termination = termination_signal()?;
    let phase = run_service(settings.service_settings(), termination).await?;

    info!(phase = %phase, "Probed service stopped");
    Ok(())
}
