use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use queuetrace_harness::behavior::PayloadSource;
use queuetrace_harness::config::{SystemConfig, TraceConfig};
use queuetrace_harness::messaging::MemoryBroker;
use queuetrace_harness::orchestrator::{
    BrokerReset, CommandReset, IterationReset, PopulationPlan, TraceOrchestrator,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Load generator and trace orchestrator for queue-based messaging services
#[derive(Parser)]
#[command(name = "queuetrace")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every iteration of a trace
    Run {
        /// INI trace configuration
        config: PathBuf,

        /// Write the JSON report here instead of stdout
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write Prometheus metrics here once the trace finishes
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },

    /// Print the population of every iteration without connecting
    Plan {
        /// INI trace configuration
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "queuetrace=info,queuetrace_harness=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Run {
            config,
            report,
            metrics_out,
        } => run(&config, report.as_deref(), metrics_out.as_deref()).await,
        Command::Plan { config } => plan(&config),
    }
}

async fn run(
    config_path: &Path,
    report_path: Option<&Path>,
    metrics_out: Option<&Path>,
) -> anyhow::Result<()> {
    // Must be installed before any metric is recorded
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let config = TraceConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    info!(
        "Loaded configuration: {} servers, {} queues, {} iterations",
        config.system.servers.len(),
        config.system.queue_count,
        config.iterations()
    );

    let queues = config.queue_names();
    let broker = Arc::new(build_broker(&config.system));
    broker.create_queues(queues.iter().cloned()).await;

    let reset: Arc<dyn IterationReset> = match &config.trace.reset_command {
        Some(command) => Arc::new(CommandReset::new(command.clone())),
        None => Arc::new(BrokerReset::new(Arc::clone(&broker), queues)),
    };
    let payloads = match &config.trace.filler_text {
        Some(path) => PayloadSource::from_file(path)
            .with_context(|| format!("failed to read filler text {}", path.display()))?,
        None => PayloadSource::builtin(),
    };

    let orchestrator = TraceOrchestrator::new(config, Arc::new(broker.connector()))
        .with_reset(reset)
        .with_payloads(payloads);
    let report = orchestrator.run().await?;

    let json = report.to_json()?;
    match report_path {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write report {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }

    if let Some(path) = metrics_out {
        std::fs::write(path, prometheus.render())
            .with_context(|| format!("failed to write metrics {}", path.display()))?;
        info!("Metrics written to {}", path.display());
    }

    // Client failures stay in the report and the client logs
    Ok(())
}

fn plan(config_path: &Path) -> anyhow::Result<()> {
    let config = TraceConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    for iteration in 0..config.iterations() {
        let plan = PopulationPlan::build(&config, iteration)?;
        println!("{plan}");
    }
    Ok(())
}

fn build_broker(system: &SystemConfig) -> MemoryBroker {
    let mut broker =
        MemoryBroker::new(system.max_message_size).with_latency(system.simulated_latency);
    if let Some(capacity) = system.queue_capacity {
        broker = broker.with_queue_capacity(capacity);
    }
    for endpoint in &system.servers {
        broker.register_endpoint(endpoint.clone());
    }
    broker
}
