//! Short links through a v.gd-compatible service

use tracing::debug;

use crate::{ArchiveError, ShortLinkSettings, ShortUrlAlias};

pub struct ShortLinkGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl ShortLinkGenerator {
    pub fn new(settings: &ShortLinkSettings) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Create a short link for `url`.
    ///
    /// Returns `None` when short links are disabled. A rejected request for a
    /// named alias is taken to mean the alias already exists, and yields the
    /// link of that alias.
    pub async fn shorten(
        &self,
        url: &str,
        alias: &ShortUrlAlias,
    ) -> Result<Option<String>, ArchiveError> {
        let name = match alias {
            ShortUrlAlias::Disabled => return Ok(None),
            ShortUrlAlias::Generated => None,
            ShortUrlAlias::Named(name) => Some(name.as_str()),
        };

        let mut query = vec![("format", "simple"), ("url", url)];
        if let Some(name) = name {
            query.push(("shorturl", name));
        }

        let response = self
            .client
            .get(format!("{}/create.php", self.endpoint))
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let body = body.trim();

        if status.is_success() {
            if body.is_empty() {
                return Err(ArchiveError::ShortLink(
                    "service returned an empty response".to_string(),
                ));
            }
            return Ok(Some(body.to_string()));
        }

        match name {
            Some(name) => {
                debug!("Short link alias {} is taken ({}): {}", name, status, body);
                Ok(Some(format!("{}/{}", self.endpoint, name)))
            }
            None => Err(ArchiveError::ShortLink(format!("{status}: {body}"))),
        }
    }
}
