use anyhow::{anyhow, Context};
use clap::Parser;
use page_archiver::{setup_logging, Cli, CliRunner, Config};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Setup logging
    setup_logging(args.verbose || args.debug)?;

    info!("Starting page-archiver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config(&args).await?;

    let runner = CliRunner::new(config, &args)?;

    // Setup graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx);

    let result = tokio::select! {
        result = runner.run(&args) => result.map_err(anyhow::Error::from),
        _ = shutdown_rx.recv() => {
            info!("Received shutdown signal");
            Err(anyhow!("interrupted before archiving finished"))
        }
    };

    runner.report_metrics();

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            error!("Archiving {} failed: {:#}", args.url, e);
            std::process::exit(1);
        }
    };

    runner.print_summary(&args.url, &result, args.json)?;
    Ok(())
}

async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        let config_content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("reading {}", config_path.display()))?;
        serde_json::from_str(&config_content)
            .with_context(|| format!("parsing {}", config_path.display()))?
    } else {
        Config::default()
    };

    args.apply_overrides(&mut config);

    config.validate().context("invalid configuration")?;

    info!("Configuration loaded successfully");
    info!("Headless browser: {}", config.browser.headless && !args.debug);
    info!(
        "Service retry limit: {}",
        config.orchestrator.max_service_attempts
    );

    Ok(config)
}

fn setup_shutdown_handler(
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let signals = signal::unix::signal(signal::unix::SignalKind::interrupt()).and_then(
            |sigint| {
                signal::unix::signal(signal::unix::SignalKind::terminate())
                    .map(|sigterm| (sigint, sigterm))
            },
        );
        let (mut sigint, mut sigterm) = match signals {
            Ok(signals) => signals,
            Err(e) => {
                warn!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        let _ = shutdown_tx.send(());
    })
}
