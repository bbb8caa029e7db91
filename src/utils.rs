use std::time::Duration;
use url::Url;

use crate::ArchiveError;

/// Parse a page URL, accepting only absolute http(s) URLs with a host.
pub fn validate_url(url: &str) -> Result<Url, ArchiveError> {
    let parsed = Url::parse(url).map_err(|e| ArchiveError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        "http" | "https" => Err(ArchiveError::InvalidUrl(format!("{url}: missing host"))),
        scheme => Err(ArchiveError::InvalidUrl(format!(
            "{url}: unsupported scheme {scheme}"
        ))),
    }
}

pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|d| d.to_string()))
}

/// A Wayback Machine link.
pub fn is_archive_org_url(url: &str) -> bool {
    extract_domain(url).is_some_and(|host| host == "web.archive.org")
}

/// A link on one of the archive.today mirrors (archive.today, archive.ph,
/// archive.is, ...), which all share the `archive.<tld>` shape.
pub fn is_archive_today_url(url: &str) -> bool {
    extract_domain(url).is_some_and(|host| {
        let labels: Vec<&str> = host.split('.').collect();
        labels.len() == 2 && labels[0] == "archive" && labels[1] != "org"
    })
}

pub fn is_archive_url(url: &str) -> bool {
    is_archive_org_url(url) || is_archive_today_url(url)
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}
