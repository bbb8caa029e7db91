use crate::{
    format_duration, install_metrics_recorder, is_archive_url, run_terminal, validate_url,
    ArchiveError, ArchiveOrchestrator, ArchiveRequest, ArchiveResult, BrowserSession,
    ChromeSession, Config, ProgressChannel, RenewalPolicy, ServiceMode, ShortUrlAlias,
};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "page-archiver")]
#[command(about = "Archive a web page on archive.org and archive.today")]
#[command(version)]
pub struct Cli {
    #[arg(help = "URL of the page to archive")]
    pub url: String,

    #[arg(
        long,
        default_value = "auto",
        help = "archive.org capture: auto, none, or an existing capture URL"
    )]
    pub ao_url: String,

    #[arg(
        long,
        default_value = "auto",
        help = "archive.today capture: auto, none, or an existing capture URL"
    )]
    pub at_url: String,

    #[arg(long, help = "Short link alias (5-30 letters, digits or _), or none")]
    pub shorturl: Option<String>,

    #[arg(
        long,
        default_value = "auto",
        help = "Renew stale archive.today captures: auto, manual, never"
    )]
    pub renew: String,

    #[arg(long, help = "Show the browser and log raw errors")]
    pub debug: bool,

    #[arg(short = 'y', long, help = "Answer every question with its default")]
    pub yes: bool,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Show the browser window")]
    pub headful: bool,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Print the result as JSON")]
    pub json: bool,

    #[arg(long, help = "Print Prometheus metrics on exit")]
    pub metrics: bool,
}

impl Cli {
    pub fn to_request(&self) -> Result<ArchiveRequest, ArchiveError> {
        let request = ArchiveRequest {
            url: self.url.clone(),
            archive_org: parse_mode(&self.ao_url),
            archive_today: parse_mode(&self.at_url),
            renew: self.renew.parse::<RenewalPolicy>()?,
            short_url: ShortUrlAlias::parse(self.shorturl.as_deref())?,
            debug: self.debug,
            ..Default::default()
        };
        Ok(request)
    }

    /// Questions go to the terminal unless answered by default.
    pub fn is_interactive(&self) -> bool {
        !self.yes && !self.debug && std::io::stdin().is_terminal()
    }

    /// Apply command-line overrides to a loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(chrome_path) = &self.chrome_path {
            config.browser.chrome_path = Some(chrome_path.clone());
        }
        if self.headful {
            config.browser.headless = false;
        }
    }
}

fn parse_mode(value: &str) -> ServiceMode {
    match value.parse::<ServiceMode>() {
        Ok(mode) => mode,
        Err(never) => match never {},
    }
}

/// Printed result of a run
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub url: &'a str,
    #[serde(flatten)]
    pub result: &'a ArchiveResult,
}

impl RunSummary<'_> {
    pub fn to_text(&self) -> String {
        let mut lines = vec![format!("URL: {}", self.url)];

        if let Some(archive_org) = &self.result.archive_org_url {
            match &self.result.archive_org_short_url {
                Some(short) => lines.push(format!("archive.org: {archive_org} ({short})")),
                None => lines.push(format!("archive.org: {archive_org}")),
            }
        }
        if let Some(archive_today) = &self.result.archive_today_url {
            lines.push(format!("archive.today: {archive_today}"));
        }

        lines.join("\n")
    }
}

pub struct CliRunner {
    pub config: Config,
    pub orchestrator: ArchiveOrchestrator,
    metrics: Option<PrometheusHandle>,
}

impl CliRunner {
    pub fn new(config: Config, args: &Cli) -> Result<Self, ArchiveError> {
        // Metric handles bind to the recorder present when they are created
        let metrics = if args.metrics {
            Some(install_metrics_recorder()?)
        } else {
            None
        };
        let orchestrator = ArchiveOrchestrator::new(&config)?;

        Ok(Self {
            config,
            orchestrator,
            metrics,
        })
    }

    pub async fn run(&self, args: &Cli) -> Result<ArchiveResult, ArchiveError> {
        let request = args.to_request()?;
        validate_url(&request.url)?;
        if is_archive_url(&request.url) {
            warn!("{} is already an archive link", request.url);
        }

        let session = Arc::new(ChromeSession::new(
            self.config.browser.clone(),
            request.debug,
        ));
        let (progress, events) = ProgressChannel::new(args.is_interactive());
        let terminal = tokio::spawn(run_terminal(events));

        let started = Instant::now();
        let result = self
            .orchestrator
            .run(request, session.clone(), &progress)
            .await;

        drop(progress);
        if let Err(e) = terminal.await {
            warn!("Progress display task failed: {}", e);
        }
        if let Err(e) = session.close().await {
            warn!("Failed to close browser: {}", e);
        }

        let result = result?;
        info!("Archiving finished in {}", format_duration(started.elapsed()));
        Ok(result)
    }

    pub fn print_summary(&self, url: &str, result: &ArchiveResult, json: bool) -> Result<(), ArchiveError> {
        let summary = RunSummary { url, result };
        if json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            println!("{}", summary.to_text());
        }
        Ok(())
    }

    /// Write the Prometheus exposition to stderr when metrics are enabled.
    pub fn report_metrics(&self) {
        if let Some(handle) = &self.metrics {
            eprintln!("{}", handle.render());
        }
    }
}

pub fn setup_logging(verbose: bool) -> Result<(), ArchiveError> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| ArchiveError::Configuration(format!("logging: {e}")))
}
