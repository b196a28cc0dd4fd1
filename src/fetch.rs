//! Document retrieval over HTTP(S).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::redirect::Policy;
use url::Url;

use crate::config::PipelineConfig;

const MAX_REDIRECTS: usize = 10;

/// HTTP client used for page fetches, with the pipeline's timeouts and
/// user agent applied.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .context("failed to build fetch client")?;
        Ok(Self { client })
    }

    /// Fetch `url` and return its body. Non-2xx responses are errors.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        let parsed = validate_url(url)?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("fetch of {} returned an error status", url))?;

        response
            .text()
            .await
            .with_context(|| format!("failed to read body of {}", url))
    }
}

/// Accept absolute `http`/`https` URLs only.
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim()).with_context(|| format!("invalid URL: {}", url))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => bail!("unsupported URL scheme '{}': {}", other, url),
    }
    if parsed.host_str().is_none() {
        bail!("URL has no host: {}", url);
    }
    Ok(parsed)
}
