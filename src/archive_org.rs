//! Wayback Machine "Save Page Now" client

use crate::{
    is_archive_org_url, retry_with_hook, ArchiveContext, ArchiveError, ArchiveOrgSettings,
    ArchiveResult, Archiver, PageContext, ProgressReporter, ResourceKind, Service, ServiceMode,
    SessionState, ShortLinkGenerator, ShortUrlAlias, WaitUntil,
};
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const URL_INPUT: &str = r#"input[name="url"]"#;
const CAPTURE_ERRORS_CHECKBOX: &str = "#capture_all";
const SUBMIT_BUTTON: &str = r#"form[action="/save"] input[type="submit"]"#;

enum Step {
    NotStarted,
    Submitting,
    AwaitingCrawlResult,
    Succeeded(String),
}

impl Step {
    fn state(&self) -> SessionState {
        match self {
            Step::NotStarted => SessionState::NotStarted,
            Step::Submitting => SessionState::Submitting,
            Step::AwaitingCrawlResult => SessionState::AwaitingCrawlResult,
            Step::Succeeded(_) => SessionState::Succeeded,
        }
    }
}

pub struct ArchiveOrgArchiver {
    settings: ArchiveOrgSettings,
    short_links: ShortLinkGenerator,
}

impl ArchiveOrgArchiver {
    pub fn new(settings: ArchiveOrgSettings, short_links: ShortLinkGenerator) -> Self {
        Self {
            settings,
            short_links,
        }
    }

    async fn capture(
        &self,
        page: &dyn PageContext,
        url: &str,
        progress: &ProgressReporter,
    ) -> Result<String, ArchiveError> {
        let mut step = Step::NotStarted;

        loop {
            debug!(service = %Service::ArchiveOrg, state = %step.state(), "State transition");

            step = match step {
                Step::NotStarted => {
                    self.load_endpoint(page, progress).await?;
                    Step::Submitting
                }
                Step::Submitting => {
                    self.submit(page, url).await?;
                    progress.status("Waiting for the archive.org capture");
                    Step::AwaitingCrawlResult
                }
                Step::AwaitingCrawlResult => Step::Succeeded(self.await_capture(page).await?),
                Step::Succeeded(archived) => return Ok(archived),
            };
        }
    }

    /// Load the submission form, waiting out non-success responses.
    async fn load_endpoint(
        &self,
        page: &dyn PageContext,
        progress: &ProgressReporter,
    ) -> Result<(), ArchiveError> {
        let endpoint = &self.settings.save_endpoint;
        let mut last_status = 0;

        for attempt in 1..=self.settings.max_endpoint_attempts {
            let navigation = page
                .goto(endpoint, WaitUntil::Load, self.settings.navigation_timeout)
                .await?;

            if navigation.is_success() {
                return Ok(());
            }

            last_status = navigation.status.unwrap_or_default();
            if attempt == 1 {
                progress.status(format!(
                    "archive.org responded with HTTP {last_status}, waiting for it to accept submissions"
                ));
            }
            debug!(
                "{} returned {} (attempt {}/{})",
                endpoint, last_status, attempt, self.settings.max_endpoint_attempts
            );
            sleep(self.settings.endpoint_retry_delay).await;
        }

        Err(ArchiveError::EndpointUnavailable {
            endpoint: endpoint.clone(),
            attempts: self.settings.max_endpoint_attempts,
            status: last_status,
        })
    }

    async fn submit(&self, page: &dyn PageContext, url: &str) -> Result<(), ArchiveError> {
        page.fill(URL_INPUT, url).await?;
        page.set_checked(CAPTURE_ERRORS_CHECKBOX, false).await?;
        page.click_and_wait_for_navigation(
            SUBMIT_BUTTON,
            WaitUntil::Load,
            self.settings.navigation_timeout,
        )
        .await?;
        Ok(())
    }

    /// Poll for the capture link, reloading the page between polls.
    async fn await_capture(&self, page: &dyn PageContext) -> Result<String, ArchiveError> {
        let selector = self.settings.result_selector.as_str();
        let endpoint = self.settings.save_endpoint.trim_end_matches('/');

        retry_with_hook(
            &self.settings.result_retry,
            |_| async move {
                page.wait_for_selector(selector, self.settings.result_wait_timeout)
                    .await?;
                let href = page
                    .href(selector)
                    .await?
                    .ok_or_else(|| ArchiveError::ElementNotFound(selector.to_string()))?;

                if href.trim_end_matches('/') == endpoint {
                    return Err(ArchiveError::NoCapture);
                }
                Ok(href)
            },
            |_, _| async move {
                page.reload(WaitUntil::Load, self.settings.navigation_timeout)
                    .await
                    .map(|_| ())
            },
        )
        .await
    }

    /// Best effort; a failure is reported and leaves the short link empty.
    async fn shorten(
        &self,
        archived: &str,
        alias: &ShortUrlAlias,
        progress: &ProgressReporter,
    ) -> Option<String> {
        if *alias == ShortUrlAlias::Disabled {
            return None;
        }

        progress.status("Creating short link");
        match self.short_links.shorten(archived, alias).await {
            Ok(short) => short,
            Err(e) => {
                warn!("Short link creation failed: {}", e);
                progress.status(format!("Could not create a short link: {e}"));
                None
            }
        }
    }
}

#[async_trait]
impl Archiver for ArchiveOrgArchiver {
    fn service(&self) -> Service {
        Service::ArchiveOrg
    }

    async fn archive(&self, ctx: &ArchiveContext) -> Result<ArchiveResult, ArchiveError> {
        let request = &ctx.request;
        let progress = &ctx.progress;

        let archived = match request.mode(self.service()) {
            ServiceMode::None => return Ok(ArchiveResult::default()),
            ServiceMode::Url(archived) => {
                if !is_archive_org_url(archived) {
                    warn!("{} does not look like an archive.org capture", archived);
                }
                archived.clone()
            }
            ServiceMode::Auto => {
                progress.status("Submitting URL to archive.org");
                let page = ctx.session.new_page().await?;
                let outcome = match page.block_resources(&[ResourceKind::Image]).await {
                    Ok(()) => self.capture(page.as_ref(), &request.url, progress).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &outcome {
                    debug!(service = %Service::ArchiveOrg, state = %SessionState::Failed, "State transition: {}", e);
                }

                if let Err(e) = page.close().await {
                    debug!("Failed to close archive.org page: {}", e);
                }

                let archived = outcome?;
                info!("Archived on archive.org: {}", archived);
                archived
            }
        };

        let short_url = self.shorten(&archived, &request.short_url, progress).await;

        Ok(ArchiveResult {
            archive_org_url: Some(archived),
            archive_org_short_url: short_url,
            ..Default::default()
        })
    }
}
