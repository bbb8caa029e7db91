//! Configuration management with serde serialization/deserialization
//!
//! This module provides the configuration structures for the archiver, along
//! with the request and result records that flow through the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::ArchiveError;

/// Main configuration structure for the archiver
///
/// Controls browser launch settings, the endpoints and bounded waits of each
/// archival service, the short-link service, and whole-service retry limits.
///
/// # Examples
///
/// ```rust
/// use page_archiver::Config;
///
/// // Use default configuration
/// let config = Config::default();
///
/// // Allow fewer whole-service retries
/// let mut config = Config::default();
/// config.orchestrator.max_service_attempts = 2;
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Browser launch settings
    pub browser: BrowserSettings,

    /// archive.org (Wayback Machine "Save Page Now") settings
    pub archive_org: ArchiveOrgSettings,

    /// archive.today settings
    pub archive_today: ArchiveTodaySettings,

    /// Short-link service settings
    pub short_link: ShortLinkSettings,

    /// Orchestrator settings
    pub orchestrator: OrchestratorSettings,
}

impl Config {
    /// Reject settings that would make a run impossible or unbounded.
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.browser.window_width == 0 || self.browser.window_height == 0 {
            return Err(ArchiveError::Configuration(
                "Browser window dimensions must be greater than 0".to_string(),
            ));
        }

        if self.archive_org.max_endpoint_attempts == 0 {
            return Err(ArchiveError::Configuration(
                "archive.org endpoint attempts must be greater than 0".to_string(),
            ));
        }

        if self.orchestrator.max_service_attempts == 0 {
            return Err(ArchiveError::Configuration(
                "Service attempts must be greater than 0".to_string(),
            ));
        }

        for (name, retry) in [
            ("archive_org.result_retry", &self.archive_org.result_retry),
            ("archive_today.dom_retry", &self.archive_today.dom_retry),
            (
                "archive_today.already_marker_retry",
                &self.archive_today.already_marker_retry,
            ),
        ] {
            if retry.max_attempts == 0 {
                return Err(ArchiveError::Configuration(format!(
                    "{name}: retry attempts must be greater than 0"
                )));
            }
            if retry.min_delay > retry.max_delay {
                return Err(ArchiveError::Configuration(format!(
                    "{name}: min_delay must not exceed max_delay"
                )));
            }
        }

        for (name, endpoint) in [
            ("archive_org.save_endpoint", &self.archive_org.save_endpoint),
            ("archive_today.home_url", &self.archive_today.home_url),
            ("short_link.endpoint", &self.short_link.endpoint),
        ] {
            url::Url::parse(endpoint)
                .map_err(|e| ArchiveError::Configuration(format!("{name}: {e}")))?;
        }

        Ok(())
    }
}

/// Browser launch configuration
///
/// The archivers do not depend on the window size; it only shapes the
/// visible window of headful and debug runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Run without a visible window (default: true, forced off in debug mode)
    pub headless: bool,

    /// Window width in pixels (default: 1400, the "laptop" preset)
    pub window_width: u32,

    /// Window height in pixels (default: 1080)
    pub window_height: u32,

    /// Custom User-Agent string (default: Chrome default)
    pub user_agent: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            window_width: 1400,
            window_height: 1080,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArchiveOrgSettings {
    /// Submission form endpoint
    pub save_endpoint: String,

    /// Pause between attempts to load the submission endpoint
    pub endpoint_retry_delay: Duration,

    /// Ceiling on submission endpoint loads before giving up
    ///
    /// The endpoint rate-limits transiently, so this is deliberately high.
    pub max_endpoint_attempts: usize,

    /// Navigation timeout for the endpoint and the form submission
    pub navigation_timeout: Duration,

    /// Selector of the link to the finished capture
    pub result_selector: String,

    /// How long a single poll waits for the result link
    pub result_wait_timeout: Duration,

    /// Polling policy for the crawl result
    pub result_retry: RetryConfig,
}

impl Default for ArchiveOrgSettings {
    fn default() -> Self {
        Self {
            save_endpoint: "https://web.archive.org/save".to_string(),
            endpoint_retry_delay: Duration::from_secs(1),
            max_endpoint_attempts: 600,
            navigation_timeout: Duration::from_secs(60),
            result_selector: "#spn-result a".to_string(),
            result_wait_timeout: Duration::from_secs(20),
            result_retry: RetryConfig::fixed(16, Duration::from_secs(1)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArchiveTodaySettings {
    /// Home page; redirects to whichever mirror domain is active
    pub home_url: String,

    /// Navigation timeout for the home page and the first submission
    pub navigation_timeout: Duration,

    /// Navigation timeout for a renewal submission
    pub renewal_timeout: Duration,

    /// Captures older than this are renewed under the `auto` policy
    pub renewal_age: Duration,

    /// Pause that lets a client-side redirect away from the submit page land
    pub redirect_grace: Duration,

    /// Pause before failing a stuck submission in debug mode
    pub debug_inspection_pause: Duration,

    /// Retry policy for reading the title and body of the page
    pub dom_retry: RetryConfig,

    /// Polling policy for the "already archived" marker
    pub already_marker_retry: RetryConfig,
}

impl Default for ArchiveTodaySettings {
    fn default() -> Self {
        Self {
            home_url: "https://archive.today".to_string(),
            navigation_timeout: Duration::from_secs(60),
            renewal_timeout: Duration::from_secs(10),
            renewal_age: Duration::from_millis(31_556_952_000),
            redirect_grace: Duration::from_secs(1),
            debug_inspection_pause: Duration::from_secs(10),
            dom_retry: RetryConfig {
                max_attempts: 10,
                min_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(500),
                multiplier: 2.0,
            },
            already_marker_retry: RetryConfig {
                max_attempts: 3,
                min_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(500),
                multiplier: 2.0,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShortLinkSettings {
    /// Base URL of a v.gd-compatible service
    pub endpoint: String,

    /// Request timeout
    pub request_timeout: Duration,
}

impl Default for ShortLinkSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://v.gd".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Upper bound on from-scratch runs of one service's archiver
    pub max_service_attempts: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_service_attempts: 5,
        }
    }
}

/// Bounded retry policy
///
/// Delays start at `min_delay`, grow by `multiplier` and are clamped to
/// `max_delay`. A multiplier of 1.0 gives a fixed delay.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryConfig {
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Delay before the retry that follows the given zero-based attempt.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let delay = self.min_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay as u64);

        delay.clamp(self.min_delay, self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// An external archival service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Service {
    ArchiveOrg,
    ArchiveToday,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::ArchiveOrg => "archive.org",
            Service::ArchiveToday => "archive.today",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How one service takes part in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceMode {
    /// Submit the page and wait for a capture
    Auto,
    /// Skip the service entirely
    None,
    /// Use a known capture verbatim, e.g. a historical snapshot
    Url(String),
}

impl FromStr for ServiceMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "auto" => ServiceMode::Auto,
            "none" => ServiceMode::None,
            other => ServiceMode::Url(other.to_string()),
        })
    }
}

/// Whether an existing archive.today capture gets renewed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalPolicy {
    /// Renew captures older than the configured age
    Auto,
    /// Left to the operator; currently never renews
    Manual,
    /// Always keep the existing capture
    Never,
}

impl FromStr for RenewalPolicy {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(RenewalPolicy::Auto),
            "manual" => Ok(RenewalPolicy::Manual),
            "never" | "no" => Ok(RenewalPolicy::Never),
            other => Err(ArchiveError::Configuration(format!(
                "Unknown renewal policy: {other} (expected auto, manual or never)"
            ))),
        }
    }
}

/// Alias requested from the short-link service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortUrlAlias {
    /// Let the service pick a name
    Generated,
    /// Ask for this exact name
    Named(String),
    /// Do not create a short link
    Disabled,
}

impl ShortUrlAlias {
    /// Parse a CLI value: absent means generated, "none" disables.
    pub fn parse(value: Option<&str>) -> Result<Self, ArchiveError> {
        match value {
            None | Some("") => Ok(ShortUrlAlias::Generated),
            Some("none") => Ok(ShortUrlAlias::Disabled),
            Some(alias) => {
                let valid_len = (5..=30).contains(&alias.chars().count());
                let valid_chars = alias
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
                if valid_len && valid_chars {
                    Ok(ShortUrlAlias::Named(alias.to_string()))
                } else {
                    Err(ArchiveError::Configuration(format!(
                        "Short URL alias must be 5-30 letters, digits or underscores: {alias}"
                    )))
                }
            }
        }
    }
}

/// Immutable input of one run
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub id: String,
    pub url: String,
    pub archive_org: ServiceMode,
    pub archive_today: ServiceMode,
    pub renew: RenewalPolicy,
    pub short_url: ShortUrlAlias,
    pub debug: bool,
}

impl ArchiveRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn mode(&self, service: Service) -> &ServiceMode {
        match service {
            Service::ArchiveOrg => &self.archive_org,
            Service::ArchiveToday => &self.archive_today,
        }
    }
}

impl Default for ArchiveRequest {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: String::new(),
            archive_org: ServiceMode::Auto,
            archive_today: ServiceMode::Auto,
            renew: RenewalPolicy::Auto,
            short_url: ShortUrlAlias::Generated,
            debug: false,
        }
    }
}

/// Archive links gathered for one page
///
/// Each archiver fills only its own fields; results are merged by union.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_org_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_org_short_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_today_url: Option<String>,
}

impl ArchiveResult {
    /// Shallow union; fields already set win.
    pub fn merge(self, other: ArchiveResult) -> ArchiveResult {
        ArchiveResult {
            archive_org_url: self.archive_org_url.or(other.archive_org_url),
            archive_org_short_url: self.archive_org_short_url.or(other.archive_org_short_url),
            archive_today_url: self.archive_today_url.or(other.archive_today_url),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.archive_org_url.is_none()
            && self.archive_org_short_url.is_none()
            && self.archive_today_url.is_none()
    }
}

/// Where an in-progress submission currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Submitting,
    AwaitingCrawlResult,
    AlreadyArchivedFresh,
    AlreadyArchivedStale,
    CaptchaBlocked,
    CrashedButRecoverable,
    Succeeded,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::NotStarted => "not started",
            SessionState::Submitting => "submitting",
            SessionState::AwaitingCrawlResult => "awaiting crawl result",
            SessionState::AlreadyArchivedFresh => "already archived (fresh)",
            SessionState::AlreadyArchivedStale => "already archived (stale, renewing)",
            SessionState::CaptchaBlocked => "captcha blocked",
            SessionState::CrashedButRecoverable => "crashed but recoverable",
            SessionState::Succeeded => "succeeded",
            SessionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Generate Chrome command-line arguments based on configuration
///
/// Headless mode itself is toggled on the chromiumoxide builder.
pub fn get_chrome_args(settings: &BrowserSettings) -> Vec<String> {
    let unique_id = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4());

    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--mute-audio".to_string(),
        format!(
            "--window-size={},{}",
            settings.window_width, settings.window_height
        ),
        format!("--user-data-dir=/tmp/page-archiver-{}", unique_id),
    ];

    if let Some(user_agent) = &settings.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn create_browser_config(
    settings: &BrowserSettings,
    debug: bool,
) -> Result<chromiumoxide::browser::BrowserConfig, ArchiveError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(settings.window_width, settings.window_height)
        .args(get_chrome_args(settings));

    if debug || !settings.headless {
        builder = builder.with_head();
    }

    if let Some(chrome_path) = &settings.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(ArchiveError::BrowserLaunchFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.archive_org.save_endpoint, "https://web.archive.org/save");
        assert_eq!(config.archive_org.result_retry.max_attempts, 16);
        assert_eq!(config.orchestrator.max_service_attempts, 5);
    }

    #[test]
    fn test_config_rejects_zero_attempts() {
        let mut config = Config::default();
        config.orchestrator.max_service_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ArchiveError::Configuration(_))
        ));

        let mut config = Config::default();
        config.archive_today.dom_retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: Config =
            serde_json::from_str(r#"{"short_link": {"endpoint": "https://is.gd"}}"#).unwrap();
        assert_eq!(config.short_link.endpoint, "https://is.gd");
        assert_eq!(config.short_link.request_timeout, Duration::from_secs(15));
        assert_eq!(config.archive_today.home_url, "https://archive.today");
    }

    #[test]
    fn test_retry_delay_is_clamped() {
        let retry = RetryConfig {
            max_attempts: 10,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for(3), Duration::from_millis(500));

        let fixed = RetryConfig::fixed(16, Duration::from_secs(1));
        assert_eq!(fixed.delay_for(9), Duration::from_secs(1));
    }

    #[test]
    fn test_service_mode_parsing() {
        assert_eq!("auto".parse::<ServiceMode>().unwrap(), ServiceMode::Auto);
        assert_eq!("none".parse::<ServiceMode>().unwrap(), ServiceMode::None);
        assert_eq!(
            "https://archive.ph/abcde".parse::<ServiceMode>().unwrap(),
            ServiceMode::Url("https://archive.ph/abcde".to_string())
        );
    }

    #[test]
    fn test_renewal_policy_parsing() {
        assert_eq!("auto".parse::<RenewalPolicy>().unwrap(), RenewalPolicy::Auto);
        assert_eq!("manual".parse::<RenewalPolicy>().unwrap(), RenewalPolicy::Manual);
        assert_eq!("never".parse::<RenewalPolicy>().unwrap(), RenewalPolicy::Never);
        assert_eq!("no".parse::<RenewalPolicy>().unwrap(), RenewalPolicy::Never);
        assert!("sometimes".parse::<RenewalPolicy>().is_err());
    }

    #[test]
    fn test_short_url_alias() {
        assert_eq!(ShortUrlAlias::parse(None).unwrap(), ShortUrlAlias::Generated);
        assert_eq!(ShortUrlAlias::parse(Some("none")).unwrap(), ShortUrlAlias::Disabled);
        assert_eq!(
            ShortUrlAlias::parse(Some("my_page1")).unwrap(),
            ShortUrlAlias::Named("my_page1".to_string())
        );
        assert!(ShortUrlAlias::parse(Some("abc")).is_err());
        assert!(ShortUrlAlias::parse(Some("has space")).is_err());
        assert!(ShortUrlAlias::parse(Some(&"x".repeat(31))).is_err());
    }

    #[test]
    fn test_archive_request_default() {
        let request = ArchiveRequest::new("https://example.com");
        assert!(!request.id.is_empty());
        assert_eq!(request.mode(Service::ArchiveOrg), &ServiceMode::Auto);
        assert_eq!(request.renew, RenewalPolicy::Auto);
        assert!(!request.debug);
    }

    #[test]
    fn test_result_merge_is_union() {
        let ao = ArchiveResult {
            archive_org_url: Some("https://web.archive.org/web/1/x".to_string()),
            archive_org_short_url: Some("https://v.gd/abc".to_string()),
            archive_today_url: None,
        };
        let at = ArchiveResult {
            archive_today_url: Some("https://archive.ph/xyz".to_string()),
            ..Default::default()
        };

        let merged = ao.clone().merge(at.clone());
        assert_eq!(merged, at.merge(ao));
        assert_eq!(merged.archive_today_url.as_deref(), Some("https://archive.ph/xyz"));
        assert_eq!(merged.archive_org_short_url.as_deref(), Some("https://v.gd/abc"));
        assert!(ArchiveResult::default().is_empty());
    }

    #[test]
    fn test_chrome_args_generation() {
        let settings = BrowserSettings::default();
        let args = get_chrome_args(&settings);
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--window-size=1400,1080".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--user-agent")));

        let settings = BrowserSettings {
            user_agent: Some("archiver".to_string()),
            ..Default::default()
        };
        assert!(get_chrome_args(&settings).contains(&"--user-agent=archiver".to_string()));
    }
}
