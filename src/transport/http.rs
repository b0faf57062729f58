use anyhow::{anyhow, Context, Result};
use url::Url;

use super::SampleSink;
use crate::aggregate::Sample;
use crate::config::{StatisticKey, UploadSettings};

/// Posts samples as JSON to a remote endpoint.
///
/// Credentials, when configured, travel as HTTP basic auth. Each send is a
/// single request bounded by the configured timeout.
pub struct HttpUploader {
    agent: ureq::Agent,
    /// Endpoint including credentials.
    url: String,
    /// Endpoint safe for logs.
    display_url: String,
    key: StatisticKey,
}

impl HttpUploader {
    pub fn new(settings: &UploadSettings) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("http uploader requires an endpoint"))?;
        let url = with_credentials(
            endpoint,
            settings.username.as_deref(),
            settings.password.as_deref(),
        )?;
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .redirects(0)
            .build();
        log::info!(
            "uploader: posting to {} (timeout {:?}, auth={})",
            endpoint,
            settings.timeout,
            settings.username.is_some()
        );
        Ok(Self {
            agent,
            url: url.to_string(),
            display_url: endpoint.to_string(),
            key: settings.statistic_key,
        })
    }

    fn post(&self, sample: &Sample) -> Result<u16> {
        let body = serde_json::to_string(&sample.to_record(self.key))?;
        match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(response) => Ok(response.status()),
            Err(ureq::Error::Status(status, _)) => Ok(status),
            Err(err) => Err(anyhow::Error::new(err).context("post sample")),
        }
    }
}

impl SampleSink for HttpUploader {
    fn name(&self) -> &'static str {
        "http"
    }

    fn send(&self, sample: &Sample) -> bool {
        match self.post(sample) {
            Ok(status) if (200..300).contains(&status) => {
                log::info!(
                    "sample uploaded: {}={} counts={:?} at {}",
                    self.key.as_str(),
                    sample.statistic,
                    sample.counts,
                    sample.timestamp_string()
                );
                true
            }
            Ok(status) => {
                log::warn!(
                    "could not send data to {}: HTTP {}; sample dropped",
                    self.display_url,
                    status
                );
                false
            }
            Err(err) => {
                log::warn!(
                    "could not send data to {}: {:#}; sample dropped",
                    self.display_url,
                    err
                );
                false
            }
        }
    }
}

fn with_credentials(endpoint: &str, username: Option<&str>, password: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(endpoint).with_context(|| format!("parse endpoint {}", endpoint))?;
    if let Some(username) = username {
        url.set_username(username)
            .map_err(|_| anyhow!("endpoint {} cannot carry credentials", endpoint))?;
        url.set_password(password)
            .map_err(|_| anyhow!("endpoint {} cannot carry credentials", endpoint))?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_embedded_for_basic_auth() {
        let url = with_credentials("https://example.com/admin/pi", Some("pi"), Some("s3cret")).unwrap();
        assert_eq!(url.username(), "pi");
        assert_eq!(url.password(), Some("s3cret"));
        assert_eq!(url.path(), "/admin/pi");
    }

    #[test]
    fn no_credentials_leaves_url_untouched() {
        let url = with_credentials("http://127.0.0.1:8080/pi", None, Some("ignored")).unwrap();
        assert_eq!(url.username(), "");
        assert_eq!(url.password(), None);
    }
}
