//! Flotilla CLI - Fleet simulation runner
//!
//! Runs one fleet simulation against the in-memory registry and hub
//! transport. Whatever happens, the process ends with the terminal
//! completion marker and a non-crashing exit.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use flotilla_core::{
    DispatchPlan, FleetConfig, FleetRunReport, FlotillaConfig, HubConfig, Orchestrator,
    PoolingPolicy, shutdown_channel,
};
use flotilla_sim::{InMemoryRegistry, SimulatedTransport};
use tracing::error;

/// Terminal marker printed on every exit path.
const COMPLETION_MARKER: &str = "Finished!";

#[derive(Parser)]
#[command(name = "flotilla")]
#[command(about = "Simulates a device fleet with pooled hub connections")]
#[command(version)]
struct Cli {
    /// Prefix for each device id
    #[arg(long, default_value = "tdevice")]
    id_prefix: String,

    /// Number of devices to simulate
    #[arg(short = 'n', long, default_value = "1000")]
    fleet_size: u32,

    /// Disable connection pooling (dedicated connection per device)
    #[arg(long)]
    no_pooling: bool,

    /// Maximum sessions per physical connection when pooling
    #[arg(long, default_value = "2")]
    max_pool_size: u32,

    /// Number of send iterations
    #[arg(short = 'i', long, default_value = "10")]
    iterations: u32,

    /// Delay between send iterations, in milliseconds
    #[arg(long, default_value = "10000")]
    iteration_delay_ms: u64,

    /// Await every send in an iteration before the pacing delay
    #[arg(long)]
    await_sends: bool,

    /// Drain wait after the last iteration, in milliseconds
    #[arg(long, default_value = "5000")]
    drain_delay_ms: u64,

    /// Hub owner connection string
    #[arg(
        long,
        default_value = "HostName=sim.hub.local;SharedAccessKeyName=owner;SharedAccessKey=simulated"
    )]
    connection_string: String,

    /// Seed for the simulated registry's credential generation
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    for line in execute(cli).await {
        println!("{line}");
    }
}

/// Runs the simulation and returns every output line, in print order.
///
/// Fatal errors become a status line; the completion marker is always the
/// last line, success or failure.
async fn execute(cli: Cli) -> Vec<String> {
    let mut lines = match run(cli).await {
        Ok(report_lines) => report_lines,
        Err(error) => {
            error!(%error, "simulation run failed");
            vec![error.to_string()]
        }
    };
    lines.push(COMPLETION_MARKER.to_string());
    lines
}

async fn run(cli: Cli) -> anyhow::Result<Vec<String>> {
    let config = FlotillaConfig {
        fleet: FleetConfig {
            id_prefix: cli.id_prefix,
            fleet_size: cli.fleet_size,
        },
        pooling: PoolingPolicy {
            enabled: !cli.no_pooling,
            max_pool_size: cli.max_pool_size,
        },
        dispatch: DispatchPlan {
            iteration_count: cli.iterations,
            inter_iteration_delay: Duration::from_millis(cli.iteration_delay_ms),
            await_sends: cli.await_sends,
            drain_delay: Duration::from_millis(cli.drain_delay_ms),
        },
        hub: HubConfig {
            connection_string: cli.connection_string,
        },
    };

    let registry = Arc::new(InMemoryRegistry::builder().with_seed(cli.seed).build());
    let transport = Arc::new(SimulatedTransport::new());
    let orchestrator = Orchestrator::new(config, registry, transport)?;

    // Ctrl-C aborts remaining dispatch iterations; teardown still runs.
    let (handle, signal) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown();
        }
    });

    let report = orchestrator.run_with_shutdown(&signal).await;

    if cli.json {
        Ok(vec![serde_json::to_string_pretty(&report)?])
    } else {
        Ok(render_report(&report))
    }
}

fn render_report(report: &FleetRunReport) -> Vec<String> {
    vec![
        format!(
            "provisioned: {} created, {} recovered, {} failed",
            report.provision.created, report.provision.recovered, report.provision.failed
        ),
        format!(
            "sessions: {} opened, {} failed",
            report.sessions_opened,
            report.session_failures.len()
        ),
        format!(
            "dispatch: {} iterations, {} attempted, {} succeeded, {} failed{}",
            report.dispatch.iterations_run,
            report.dispatch.attempted,
            report.dispatch.succeeded,
            report.dispatch.failures.len(),
            if report.dispatch.cancelled {
                " (cancelled)"
            } else {
                ""
            }
        ),
        format!(
            "teardown: {} batches, {} failed, {} identities deleted",
            report.teardown.batches_attempted,
            report.teardown.batches_failed,
            report.teardown.identities_deleted
        ),
    ]
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    fn cli(connection_string: &str) -> Cli {
        Cli {
            id_prefix: "dev".to_string(),
            fleet_size: 2,
            no_pooling: false,
            max_pool_size: 2,
            iterations: 1,
            iteration_delay_ms: 1,
            await_sends: true,
            drain_delay_ms: 1,
            connection_string: connection_string.to_string(),
            seed: 42,
            json: false,
            verbose: false,
        }
    }

    #[tokio::test]
    async fn test_success_path_ends_with_completion_marker() {
        let lines = execute(cli("HostName=sim.hub.local;SharedAccessKey=k")).await;
        assert_eq!(lines.last().map(String::as_str), Some(COMPLETION_MARKER));
        assert!(lines[0].starts_with("provisioned: 2 created"));
    }

    #[tokio::test]
    async fn test_fatal_connection_string_still_ends_with_completion_marker() {
        let lines = execute(cli("not a connection string")).await;
        assert_eq!(lines.last().map(String::as_str), Some(COMPLETION_MARKER));
        assert!(
            lines
                .iter()
                .any(|l| l.contains("Invalid hub connection string")),
            "fatal error is reported before the marker: {lines:?}"
        );
    }
}
