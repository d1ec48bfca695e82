use clap::Parser;
use kube::Client;
use rollprobe::harness::{
    ProbeScenario, ScenarioConfig, ScenarioKind, ScenarioReport, DEFAULT_AVAILABILITY_TIMEOUT,
    DEFAULT_REQUEST_PATH, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_RESTARTS, DEFAULT_WORKERS,
};
use rollprobe::platform::{KubePlatform, DEFAULT_ROLLOUT_TIMEOUT};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Checks whether rolling restarts of a Kubernetes deployment are visible
/// to clients
#[derive(Debug, Parser)]
#[command(name = "rollprobe", version)]
struct Args {
    /// Scenarios to run (default: all)
    #[arg(long = "scenario", value_enum, env = "ROLLPROBE_SCENARIOS", value_delimiter = ',')]
    scenarios: Vec<ScenarioKind>,

    /// Directory holding the deployment manifests
    #[arg(long, env = "ROLLPROBE_MANIFEST_DIR", default_value = "deploy")]
    manifest_dir: PathBuf,

    /// Concurrent request workers per scenario
    #[arg(long, env = "ROLLPROBE_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Rollout restarts per scenario
    #[arg(long, env = "ROLLPROBE_RESTARTS", default_value_t = DEFAULT_RESTARTS)]
    restarts: u32,

    /// How many times to run each scenario
    #[arg(long, env = "ROLLPROBE_REPEAT", default_value_t = 1)]
    repeat: u32,

    /// Response-header timeout per request, in milliseconds
    #[arg(long, env = "ROLLPROBE_RESPONSE_TIMEOUT_MS", default_value_t = DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64)]
    response_timeout_ms: u64,

    /// Path requested on the target
    #[arg(long, env = "ROLLPROBE_REQUEST_PATH", default_value = DEFAULT_REQUEST_PATH)]
    request_path: String,

    /// Expected response body; mismatches are logged, not counted
    #[arg(long, env = "ROLLPROBE_EXPECT_BODY")]
    expect_body: Option<String>,

    /// How long a freshly applied deployment may take to become reachable
    #[arg(long, env = "ROLLPROBE_AVAILABILITY_TIMEOUT_SECS", default_value_t = DEFAULT_AVAILABILITY_TIMEOUT.as_secs())]
    availability_timeout_secs: u64,

    /// How long a single rollout restart may take to complete
    #[arg(long, env = "ROLLPROBE_ROLLOUT_TIMEOUT_SECS", default_value_t = DEFAULT_ROLLOUT_TIMEOUT.as_secs())]
    rollout_timeout_secs: u64,
}

impl Args {
    fn scenario_kinds(&self) -> Vec<ScenarioKind> {
        if self.scenarios.is_empty() {
            ScenarioKind::ALL.to_vec()
        } else {
            self.scenarios.clone()
        }
    }

    fn scenario_config(&self, kind: ScenarioKind) -> ScenarioConfig {
        let mut config = ScenarioConfig::preset(kind, &self.manifest_dir);
        config.workers = self.workers;
        config.restarts = self.restarts;
        config.request.path = self.request_path.clone();
        config.request.response_timeout = Duration::from_millis(self.response_timeout_ms);
        config.request.expected_body = self.expect_body.clone();
        config.availability_timeout = Duration::from_secs(self.availability_timeout_secs);
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install the ring crypto provider before any TLS client is built
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let kinds = args.scenario_kinds();
    info!(
        scenarios = ?kinds.iter().map(|k| k.name()).collect::<Vec<_>>(),
        repeat = args.repeat,
        workers = args.workers,
        restarts = args.restarts,
        "Starting rollprobe"
    );

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let platform = Arc::new(
        KubePlatform::new(client)
            .with_rollout_timeout(Duration::from_secs(args.rollout_timeout_secs)),
    );

    let mut reports: Vec<ScenarioReport> = Vec::new();
    let mut failures = 0usize;

    for kind in kinds {
        let scenario = ProbeScenario::new(
            args.scenario_config(kind),
            platform.clone(),
            platform.clone(),
        );

        for run in 1..=args.repeat {
            match scenario.run().await {
                Ok(report) => {
                    if !report.passed {
                        failures += 1;
                    }
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    reports.push(report);
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        scenario = kind.name(),
                        run,
                        error = %e,
                        "Scenario aborted"
                    );
                }
            }
        }
    }

    let passed = reports.iter().filter(|r| r.passed).count();
    if failures > 0 {
        warn!(passed, failed = failures, "Some scenarios failed");
        anyhow::bail!("{failures} scenario run(s) failed");
    }

    info!(passed, "All scenarios passed");
    Ok(())
}
