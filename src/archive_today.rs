//! archive.today client
//!
//! The service answers every submission from one endpoint, and the page it
//! lands on may be a fresh capture, an existing capture, a CAPTCHA, a
//! client-side redirect to a capture in progress, or a crashed navigation.
//! [`ArchiveTodayArchiver`] disambiguates these as explicit steps and asks the
//! operator whenever an existing capture could stand in for a failed one.

use crate::{
    extract_domain, is_archive_today_url, retry, ArchiveContext, ArchiveError, ArchiveResult,
    ArchiveTodaySettings, Archiver, PageContext, ProgressReporter, RenewalPolicy, ResourceKind,
    Service, ServiceMode, SessionState, WaitUntil,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Page title served instead of a capture when a CAPTCHA is required
pub const CAPTCHA_TITLE: &str = "Attention Required!";

const URL_INPUT: &str = "#url";
const SUBMIT_BUTTON: &str = r#"input[type="submit"][value="save"]"#;
const ALREADY_ARCHIVED_MARKER: &str = "#DIVALREADY";
const ARCHIVED_DATE: &str = r#"span[itemprop="description"]"#;
const SUBMISSION_PATH: &str = "/submit";
const WIP_SEGMENT: &str = "wip";

fn redirect_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"document\.location\.replace\("(.*?)"\)"#).expect("valid redirect pattern")
    })
}

/// Whether the page is still the submission endpoint rather than a capture.
pub fn is_submission_page(url: &str) -> bool {
    url.contains(SUBMISSION_PATH)
}

/// Whether the page sits below the mirror root on something other than the
/// submission endpoint, i.e. it can only be a capture.
pub fn is_capture_page(url: &str) -> bool {
    if is_submission_page(url) {
        return false;
    }
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .map(|mut segments| segments.any(|segment| !segment.is_empty()))
        })
        .unwrap_or(false)
}

/// Remove the work-in-progress path segment from a capture URL.
///
/// Only whole `wip` segments are removed, so applying this twice gives the
/// same result as applying it once.
pub fn strip_wip_marker(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url
            .split('/')
            .filter(|segment| *segment != WIP_SEGMENT)
            .collect::<Vec<_>>()
            .join("/");
    };

    let Some(segments) = parsed.path_segments() else {
        return url.to_string();
    };
    let segments: Vec<String> = segments.map(str::to_string).collect();
    if !segments.iter().any(|segment| segment == WIP_SEGMENT) {
        return url.to_string();
    }

    let kept: Vec<&str> = segments
        .iter()
        .map(String::as_str)
        .filter(|segment| *segment != WIP_SEGMENT)
        .collect();
    parsed.set_path(&kept.join("/"));
    parsed.to_string()
}

/// Parse the "archived <date>" text shown next to an existing capture.
pub fn parse_archived_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let text = text.strip_prefix("archived ").unwrap_or(text).trim();

    const DATE_TIME_FORMATS: &[&str] = &[
        "%d %b %Y %H:%M:%S UTC",
        "%d %b %Y %H:%M UTC",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];

    for format in DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(text) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }

    for format in ["%d %b %Y", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }

    None
}

/// Whether a capture taken at `archived` is older than `max_age` at `now`.
pub fn is_stale(archived: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    now.signed_duration_since(archived)
        .to_std()
        .map(|age| age > max_age)
        .unwrap_or(false)
}

/// Target of an in-page `document.location.replace("...")` redirect.
pub fn extract_redirect_target(html: &str) -> Option<String> {
    redirect_pattern()
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|target| target.as_str().to_string())
        .filter(|target| !target.is_empty())
}

enum Step {
    NotStarted,
    Submitting,
    Crashed {
        current_url: String,
        error: ArchiveError,
    },
    CheckingExisting,
    Renewing {
        existing_url: String,
    },
    Resolving {
        existing_url: String,
    },
    CaptchaBlocked {
        existing_url: String,
    },
    Succeeded(String),
}

impl Step {
    fn state(&self) -> SessionState {
        match self {
            Step::NotStarted => SessionState::NotStarted,
            Step::Submitting | Step::CheckingExisting | Step::Resolving { .. } => {
                SessionState::Submitting
            }
            Step::Crashed { .. } => SessionState::CrashedButRecoverable,
            Step::Renewing { .. } => SessionState::AlreadyArchivedStale,
            Step::CaptchaBlocked { .. } => SessionState::CaptchaBlocked,
            Step::Succeeded(_) => SessionState::Succeeded,
        }
    }
}

pub struct ArchiveTodayArchiver {
    settings: ArchiveTodaySettings,
}

impl ArchiveTodayArchiver {
    pub fn new(settings: ArchiveTodaySettings) -> Self {
        Self { settings }
    }

    async fn capture(
        &self,
        page: &dyn PageContext,
        ctx: &ArchiveContext,
    ) -> Result<String, ArchiveError> {
        let progress = &ctx.progress;
        let mut step = Step::NotStarted;

        loop {
            debug!(service = %Service::ArchiveToday, state = %step.state(), "State transition");

            step = match step {
                Step::NotStarted => {
                    self.open_form(page, &ctx.request.url, progress).await?;
                    Step::Submitting
                }
                Step::Submitting => {
                    match page
                        .click_and_wait_for_navigation(
                            SUBMIT_BUTTON,
                            WaitUntil::DomContentLoaded,
                            self.settings.navigation_timeout,
                        )
                        .await
                    {
                        Ok(_) => Step::CheckingExisting,
                        Err(error) => Step::Crashed {
                            current_url: page.url().await?,
                            error,
                        },
                    }
                }
                Step::Crashed { current_url, error } => {
                    if ctx.request.debug {
                        debug!("Submission error: {:?}", error);
                    }
                    if is_submission_page(&current_url) {
                        // The service's own redirect may still land
                        Step::Resolving {
                            existing_url: current_url,
                        }
                    } else if !is_capture_page(&current_url) {
                        return Err(ArchiveError::SubmissionCrashed {
                            service: Service::ArchiveToday,
                            reason: format!("{error} (stopped at {current_url})"),
                        });
                    } else {
                        let use_existing = progress
                            .confirm(
                                format!(
                                    "A crash occurred while loading archive.today, but an archived copy already exists which can be used ({current_url}). Would you like to use it?"
                                ),
                                true,
                            )
                            .await;
                        if !use_existing {
                            return Err(ArchiveError::SubmissionCrashed {
                                service: Service::ArchiveToday,
                                reason: error.to_string(),
                            });
                        }
                        Step::Succeeded(current_url)
                    }
                }
                Step::CheckingExisting => self.check_existing(page, ctx).await?,
                Step::Renewing { existing_url } => {
                    match page
                        .click_and_wait_for_navigation(
                            SUBMIT_BUTTON,
                            WaitUntil::DomContentLoaded,
                            self.settings.renewal_timeout,
                        )
                        .await
                    {
                        Ok(_) => Step::Resolving { existing_url },
                        Err(error) => {
                            if ctx.request.debug {
                                debug!("Renewal error: {:?}", error);
                            }
                            let use_existing = progress
                                .confirm(
                                    format!(
                                        "Could not rearchive on archive.today, but an archived copy already exists ({existing_url}). Would you like to use it?"
                                    ),
                                    true,
                                )
                                .await;
                            if !use_existing {
                                return Err(ArchiveError::RenewalFailed {
                                    service: Service::ArchiveToday,
                                    reason: error.to_string(),
                                });
                            }
                            Step::Succeeded(existing_url)
                        }
                    }
                }
                Step::Resolving { existing_url } => {
                    self.resolve(page, existing_url, ctx.request.debug).await?
                }
                Step::CaptchaBlocked { existing_url } => {
                    if is_submission_page(&existing_url) {
                        return Err(ArchiveError::Captcha(Service::ArchiveToday));
                    }
                    let use_existing = progress
                        .confirm(
                            format!(
                                "archive.today is throwing a CAPTCHA, but an archived copy already exists ({existing_url}). Would you like to use it?"
                            ),
                            true,
                        )
                        .await;
                    if !use_existing {
                        return Err(ArchiveError::Captcha(Service::ArchiveToday));
                    }
                    Step::Succeeded(existing_url)
                }
                Step::Succeeded(archived) => return Ok(strip_wip_marker(&archived)),
            };
        }
    }

    /// Load the home page of the active mirror and fill in the target URL.
    async fn open_form(
        &self,
        page: &dyn PageContext,
        url: &str,
        progress: &ProgressReporter,
    ) -> Result<(), ArchiveError> {
        // Snapshot pages are heavy; images and scripts make the browser crash
        page.block_resources(&[ResourceKind::Image]).await?;
        page.set_javascript_enabled(false).await?;

        let navigation = page
            .goto(
                &self.settings.home_url,
                WaitUntil::DomContentLoaded,
                self.settings.navigation_timeout,
            )
            .await?;

        if let Some(domain) = extract_domain(&navigation.url) {
            progress.set_title(domain.clone());
            progress.status(format!("Submitting URL to {domain}"));
        }

        page.fill(URL_INPUT, url).await
    }

    /// Look for an existing capture and decide whether it needs renewing.
    async fn check_existing(
        &self,
        page: &dyn PageContext,
        ctx: &ArchiveContext,
    ) -> Result<Step, ArchiveError> {
        let existing_url = page.url().await?;

        if !self.has_existing_capture(page).await? {
            return Ok(Step::Resolving { existing_url });
        }

        let archived_text = page.text_content(ARCHIVED_DATE).await?.unwrap_or_default();
        let Some(archived) = parse_archived_timestamp(&archived_text) else {
            warn!("Could not parse archive.today date: {:?}", archived_text);
            ctx.progress.status(format!(
                "Could not parse date on archive.today page: {}",
                archived_text.trim()
            ));
            return Ok(Step::Resolving { existing_url });
        };

        let stale = is_stale(archived, Utc::now(), self.settings.renewal_age);
        match ctx.request.renew {
            RenewalPolicy::Auto if stale => {
                info!("Existing capture from {} is stale, renewing", archived);
                ctx.progress.status("Rearchiving on archive.today");
                Ok(Step::Renewing { existing_url })
            }
            RenewalPolicy::Manual => {
                debug!("Manual renewal is not automated; keeping capture from {}", archived);
                Ok(Step::Resolving { existing_url })
            }
            _ => {
                debug!(state = %SessionState::AlreadyArchivedFresh, "Keeping capture from {}", archived);
                Ok(Step::Resolving { existing_url })
            }
        }
    }

    /// The marker can render after the navigation settles, so it is polled.
    async fn has_existing_capture(&self, page: &dyn PageContext) -> Result<bool, ArchiveError> {
        let found = retry(&self.settings.already_marker_retry, |_| async move {
            if page.exists(ALREADY_ARCHIVED_MARKER).await? {
                Ok(())
            } else {
                Err(ArchiveError::ElementNotFound(
                    ALREADY_ARCHIVED_MARKER.to_string(),
                ))
            }
        })
        .await;

        match found {
            Ok(()) => Ok(true),
            Err(ArchiveError::ElementNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Work out the capture URL from wherever the submission landed.
    async fn resolve(
        &self,
        page: &dyn PageContext,
        existing_url: String,
        debug_mode: bool,
    ) -> Result<Step, ArchiveError> {
        let current = page.url().await?;
        if !is_submission_page(&current) {
            return Ok(Step::Succeeded(current));
        }

        sleep(self.settings.redirect_grace).await;
        let current = page.url().await?;
        if !is_submission_page(&current) {
            return Ok(Step::Succeeded(current));
        }

        let title = retry(&self.settings.dom_retry, |_| page.title()).await?;
        if title == CAPTCHA_TITLE {
            return Ok(Step::CaptchaBlocked { existing_url });
        }

        let html = retry(&self.settings.dom_retry, |_| page.body_html()).await?;
        if let Some(target) = extract_redirect_target(&html) {
            return Ok(Step::Succeeded(target));
        }

        let current = page.url().await?;
        if !is_submission_page(&current) {
            return Ok(Step::Succeeded(current));
        }

        if debug_mode {
            warn!(
                "Submission is stuck on {}, pausing {:?} for inspection",
                current, self.settings.debug_inspection_pause
            );
            sleep(self.settings.debug_inspection_pause).await;
        }

        Err(ArchiveError::RedirectNotFound {
            service: Service::ArchiveToday,
            url: current,
        })
    }
}

#[async_trait]
impl Archiver for ArchiveTodayArchiver {
    fn service(&self) -> Service {
        Service::ArchiveToday
    }

    async fn archive(&self, ctx: &ArchiveContext) -> Result<ArchiveResult, ArchiveError> {
        let archived = match ctx.request.mode(self.service()) {
            ServiceMode::None => return Ok(ArchiveResult::default()),
            ServiceMode::Url(archived) => {
                if !is_archive_today_url(archived) {
                    warn!("{} does not look like an archive.today capture", archived);
                }
                archived.clone()
            }
            ServiceMode::Auto => {
                ctx.progress.status("Submitting URL to archive.today");
                let page = ctx.session.new_page().await?;
                let outcome = self.capture(page.as_ref(), ctx).await;
                if let Err(e) = &outcome {
                    debug!(service = %Service::ArchiveToday, state = %SessionState::Failed, "State transition: {}", e);
                }

                if let Err(e) = page.close().await {
                    debug!("Failed to close archive.today page: {}", e);
                }

                let archived = outcome?;
                info!("Archived on archive.today: {}", archived);
                archived
            }
        };

        Ok(ArchiveResult {
            archive_today_url: Some(archived),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_strip_wip_marker() {
        assert_eq!(
            strip_wip_marker("https://archive.ph/wip/AbCdE"),
            "https://archive.ph/AbCdE"
        );
        assert_eq!(
            strip_wip_marker("https://archive.ph/AbCdE"),
            "https://archive.ph/AbCdE"
        );
        assert_eq!(strip_wip_marker("archive.ph/wip/AbCdE"), "archive.ph/AbCdE");
    }

    #[test]
    fn test_strip_wip_marker_is_idempotent() {
        for url in [
            "https://archive.ph/wip/AbCdE",
            "https://archive.ph/wip/wip/AbCdE",
            "https://archive.ph/AbCdE?wip=1",
            "https://archive.ph/wipe/AbCdE",
            "archive.ph/wip/AbCdE",
            "",
        ] {
            let once = strip_wip_marker(url);
            assert_eq!(strip_wip_marker(&once), once, "not idempotent for {url}");
            assert!(!once.contains("/wip/"), "marker left in {once}");
        }
    }

    #[test]
    fn test_strip_wip_marker_keeps_similar_segments() {
        assert_eq!(
            strip_wip_marker("https://archive.ph/wipe/AbCdE"),
            "https://archive.ph/wipe/AbCdE"
        );
    }

    #[test]
    fn test_parse_archived_timestamp() {
        let date = parse_archived_timestamp("archived 2 Jan 2023 14:03:21 UTC").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2023, 1, 2));

        let date = parse_archived_timestamp("  archived 17 Mar 2019  ").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2019, 3, 17));

        assert!(parse_archived_timestamp("archived 2021-06-01T10:00:00Z").is_some());
        assert!(parse_archived_timestamp("archived recently").is_none());
        assert!(parse_archived_timestamp("").is_none());
    }

    #[test]
    fn test_is_stale() {
        let year = Duration::from_millis(31_556_952_000);
        let now = Utc::now();

        assert!(is_stale(now - chrono::Duration::days(400), now, year));
        assert!(!is_stale(now - chrono::Duration::days(30), now, year));
        assert!(!is_stale(now + chrono::Duration::days(1), now, year));
    }

    #[test]
    fn test_extract_redirect_target() {
        let html = r#"<script>document.location.replace("https://archive.ph/wip/AbCdE")</script>"#;
        assert_eq!(
            extract_redirect_target(html).as_deref(),
            Some("https://archive.ph/wip/AbCdE")
        );
        assert_eq!(extract_redirect_target("<p>Loading...</p>"), None);
        assert_eq!(
            extract_redirect_target(r#"document.location.replace("")"#),
            None
        );
    }

    #[test]
    fn test_is_capture_page() {
        assert!(is_capture_page("https://archive.ph/AbCdE"));
        assert!(is_capture_page("https://archive.ph/wip/AbCdE"));
        assert!(!is_capture_page("https://archive.ph/"));
        assert!(!is_capture_page("https://archive.ph"));
        assert!(!is_capture_page("https://archive.ph/submit/"));
        assert!(!is_capture_page("about:blank"));
    }

    #[test]
    fn test_is_submission_page() {
        assert!(is_submission_page("https://archive.ph/submit/"));
        assert!(is_submission_page("https://archive.ph/submit/?url=x"));
        assert!(!is_submission_page("https://archive.ph/AbCdE"));
    }
}
