use std::time::Duration;
use thiserror::Error;

use crate::Service;

#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Page error: {0}")]
    Page(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Could not load {endpoint} after {attempts} attempts (last status {status})")]
    EndpointUnavailable {
        endpoint: String,
        attempts: usize,
        status: u16,
    },

    #[error("archive.org did not produce a capture")]
    NoCapture,

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("{service} crashed while submitting: {reason}")]
    SubmissionCrashed { service: Service, reason: String },

    #[error("Could not rearchive on {service}: {reason}")]
    RenewalFailed { service: Service, reason: String },

    #[error("{0} is throwing a CAPTCHA when archiving links")]
    Captcha(Service),

    #[error("{service} submission is stuck on {url}")]
    RedirectNotFound { service: Service, url: String },

    #[error("Short link error: {0}")]
    ShortLink(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{service} failed and will not be retried: {source}")]
    Declined {
        service: Service,
        #[source]
        source: Box<ArchiveError>,
    },
}

impl ArchiveError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArchiveError::Page(_)
                | ArchiveError::Navigation(_)
                | ArchiveError::Timeout(_)
                | ArchiveError::NoCapture
                | ArchiveError::ElementNotFound(_)
                | ArchiveError::Network(_)
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ArchiveError::ElementNotFound(_) | ArchiveError::NoCapture => ErrorSeverity::Low,
            ArchiveError::ShortLink(_) => ErrorSeverity::Low,
            ArchiveError::InvalidUrl(_)
            | ArchiveError::Configuration(_)
            | ArchiveError::BrowserLaunchFailed(_) => ErrorSeverity::High,
            ArchiveError::Declined { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ArchiveError {
    fn from(err: reqwest::Error) -> Self {
        ArchiveError::Network(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for ArchiveError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ArchiveError::Page(err.to_string())
    }
}

impl From<url::ParseError> for ArchiveError {
    fn from(err: url::ParseError) -> Self {
        ArchiveError::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(ArchiveError::NoCapture.is_retryable());
        assert!(ArchiveError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ArchiveError::ElementNotFound("#spn-result a".to_string()).is_retryable());
        assert!(!ArchiveError::Captcha(Service::ArchiveToday).is_retryable());
        assert!(!ArchiveError::InvalidUrl("nope".to_string()).is_retryable());
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(ArchiveError::NoCapture.severity(), ErrorSeverity::Low);
        assert_eq!(
            ArchiveError::Captcha(Service::ArchiveToday).severity(),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ArchiveError::Configuration("x".to_string()).severity(),
            ErrorSeverity::High
        );

        let declined = ArchiveError::Declined {
            service: Service::ArchiveOrg,
            source: Box::new(ArchiveError::NoCapture),
        };
        assert_eq!(declined.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_error_messages_name_the_service() {
        assert_eq!(
            ArchiveError::Captcha(Service::ArchiveToday).to_string(),
            "archive.today is throwing a CAPTCHA when archiving links"
        );
        let declined = ArchiveError::Declined {
            service: Service::ArchiveOrg,
            source: Box::new(ArchiveError::NoCapture),
        };
        assert!(declined.to_string().starts_with("archive.org failed"));
    }
}
