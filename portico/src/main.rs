use clap::Parser;
use metrics_exporter_statsd::StatsdBuilder;
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser)]
#[command(name = "portico", about = "Aggregating API gateway")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "portico.yaml")]
    config: PathBuf,
}

fn init_logging(logging: Option<&config::LoggingConfig>) {
    let filter = logging
        .and_then(|l| l.filter.clone())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

fn init_metrics(metrics: &config::MetricsConfig) -> Result<(), Box<dyn Error>> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some("portico"))?;
    metrics::set_global_recorder(recorder)
        .map_err(|e| format!("failed to install metrics recorder: {e}"))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = config::Config::from_file(&cli.config)?;

    init_logging(config.logging.as_ref());
    if let Some(metrics_config) = &config.metrics {
        init_metrics(metrics_config)?;
    }

    tracing::info!(
        host = %config.gateway.listener.host,
        port = config.gateway.listener.port,
        "starting gateway"
    );
    gateway::run(config.gateway).await?;
    Ok(())
}
