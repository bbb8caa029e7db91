//! Archival task orchestration
//!
//! This module provides the [`ArchiveOrchestrator`], which runs every
//! registered [`Archiver`] concurrently against one browser session and
//! merges what they return into a single [`ArchiveResult`].

use crate::{
    validate_url, ArchiveError, ArchiveMetrics, ArchiveOrgArchiver, ArchiveRequest,
    ArchiveResult, ArchiveTodayArchiver, BrowserSession, Config, ErrorSeverity,
    OrchestratorSettings, ProgressChannel, ProgressReporter, Service, ShortLinkGenerator,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything an archiver may use during one run
pub struct ArchiveContext {
    pub request: Arc<ArchiveRequest>,
    pub session: Arc<dyn BrowserSession>,
    pub progress: ProgressReporter,
}

/// Drives one external archival service to completion for one URL
///
/// An archiver fills only its own fields of the [`ArchiveResult`] and opens
/// at most one page, which it closes before returning.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Archiver: Send + Sync {
    fn service(&self) -> Service;

    async fn archive(&self, ctx: &ArchiveContext) -> Result<ArchiveResult, ArchiveError>;
}

/// Runs the per-service archivers of a request
///
/// # Examples
///
/// ```rust,no_run
/// use page_archiver::{
///     ArchiveOrchestrator, ArchiveRequest, ChromeSession, Config, ProgressChannel,
/// };
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let orchestrator = ArchiveOrchestrator::new(&config)?;
///     let session = Arc::new(ChromeSession::launch(&config.browser, false).await?);
///     let (progress, _events) = ProgressChannel::new(false);
///
///     let request = ArchiveRequest::new("https://example.com");
///     let result = orchestrator.run(request, session, &progress).await?;
///     println!("{:?}", result.archive_org_url);
///     Ok(())
/// }
/// ```
pub struct ArchiveOrchestrator {
    archivers: Vec<Arc<dyn Archiver>>,
    settings: OrchestratorSettings,
    metrics: Arc<ArchiveMetrics>,
}

impl ArchiveOrchestrator {
    /// Orchestrator with the archive.org and archive.today archivers.
    pub fn new(config: &Config) -> Result<Self, ArchiveError> {
        let archive_org = ArchiveOrgArchiver::new(
            config.archive_org.clone(),
            ShortLinkGenerator::new(&config.short_link)?,
        );
        let archive_today = ArchiveTodayArchiver::new(config.archive_today.clone());

        Ok(Self::with_archivers(
            vec![Arc::new(archive_org), Arc::new(archive_today)],
            config.orchestrator.clone(),
            Arc::new(ArchiveMetrics::new()),
        ))
    }

    pub fn with_archivers(
        archivers: Vec<Arc<dyn Archiver>>,
        settings: OrchestratorSettings,
        metrics: Arc<ArchiveMetrics>,
    ) -> Self {
        Self {
            archivers,
            settings,
            metrics,
        }
    }

    /// Archive `request.url` with every registered service.
    ///
    /// All archivers run to completion before a failure is returned; the
    /// first failure in registration order wins.
    pub async fn run(
        &self,
        request: ArchiveRequest,
        session: Arc<dyn BrowserSession>,
        progress: &ProgressChannel,
    ) -> Result<ArchiveResult, ArchiveError> {
        validate_url(&request.url)?;
        info!("Archiving {} (request {})", request.url, request.id);

        let request = Arc::new(request);
        let runs = self.archivers.iter().map(|archiver| {
            let ctx = ArchiveContext {
                request: request.clone(),
                session: session.clone(),
                progress: progress.reporter(archiver.service()),
            };
            async move { self.run_service(archiver.as_ref(), ctx).await }
        });

        let mut merged = ArchiveResult::default();
        let mut first_error = None;
        for outcome in join_all(runs).await {
            match outcome {
                Ok(result) => merged = merged.merge(result),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(merged),
        }
    }

    /// Run one archiver, offering a retry from scratch after each failure.
    async fn run_service(
        &self,
        archiver: &dyn Archiver,
        ctx: ArchiveContext,
    ) -> Result<ArchiveResult, ArchiveError> {
        let service = archiver.service();
        let metrics = self.metrics.service(service);
        let max_attempts = self.settings.max_service_attempts.max(1);
        let mut attempt = 1;

        loop {
            metrics.record_attempt();
            let started = Instant::now();

            let error = match archiver.archive(&ctx).await {
                Ok(result) => {
                    metrics.record_outcome(started.elapsed(), true);
                    debug!(service = %service, "Finished in {:?}", started.elapsed());
                    return Ok(result);
                }
                Err(e) => {
                    metrics.record_outcome(started.elapsed(), false);
                    e
                }
            };

            log_failure(service, attempt, &error);
            ctx.progress.status(format!("{service} failed: {error}"));

            if attempt >= max_attempts {
                warn!(
                    service = %service,
                    "Giving up after {} attempts", max_attempts
                );
                return Err(ArchiveError::Declined {
                    service,
                    source: Box::new(error),
                });
            }

            metrics.record_retry_prompt();
            let retry = ctx
                .progress
                .confirm(
                    format!("{service} failed to archive {}. Retry?", ctx.request.url),
                    true,
                )
                .await;

            if !retry {
                return Err(ArchiveError::Declined {
                    service,
                    source: Box::new(error),
                });
            }

            attempt += 1;
            info!(service = %service, "Retrying (attempt {}/{})", attempt, max_attempts);
        }
    }
}

fn log_failure(service: Service, attempt: usize, error: &ArchiveError) {
    let retryable = error.is_retryable();
    match error.severity() {
        ErrorSeverity::Low => {
            debug!(service = %service, attempt, retryable, "Archiving failed: {}", error)
        }
        ErrorSeverity::Medium => {
            warn!(service = %service, attempt, retryable, "Archiving failed: {}", error)
        }
        ErrorSeverity::High | ErrorSeverity::Critical => {
            error!(service = %service, attempt, retryable, "Archiving failed: {}", error)
        }
    }
}
