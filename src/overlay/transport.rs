//! Retrieval of raw catalog bytes.

use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::header::{DATE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use std::fs;
use std::path::PathBuf;

/// What a fetch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New content, with the server's timestamp when it advertised one
    Fresh {
        body: Vec<u8>,
        timestamp: Option<String>,
    },
    /// The server confirmed the cached copy is current
    NotModified,
}

/// Byte-stream fetch used by the catalog fetcher.
pub trait Transport {
    fn fetch(&self, url: &str, if_modified_since: Option<&str>) -> Result<FetchOutcome>;
}

/// Strip a `file://` scheme or accept a plain path; `None` for remote URLs.
pub fn local_path(location: &str) -> Option<PathBuf> {
    if let Some(rest) = location.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if location.contains("://") {
        return None;
    }
    Some(crate::common::paths::expand_path(location))
}

/// HTTP(S) through `reqwest`, local files straight from disk.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(proxy: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(format!("overlayman/{}", env!("CARGO_PKG_VERSION")));
        if let Some(proxy) = proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy).with_context(|| format!("invalid proxy \"{proxy}\""))?,
            );
        }
        let client = builder.build().context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str, if_modified_since: Option<&str>) -> Result<FetchOutcome> {
        if let Some(path) = local_path(url) {
            let body = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            return Ok(FetchOutcome::Fresh {
                body,
                timestamp: None,
            });
        }

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("unsupported URL scheme in \"{url}\"");
        }

        let mut request = self.client.get(url);
        if let Some(since) = if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, since);
        }
        let response = request
            .send()
            .with_context(|| format!("requesting {url}"))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(anyhow!("server returned {status}"));
        }

        let headers = response.headers();
        let timestamp = headers
            .get(LAST_MODIFIED)
            .or_else(|| headers.get(DATE))
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response
            .bytes()
            .with_context(|| format!("reading response body from {url}"))?
            .to_vec();
        Ok(FetchOutcome::Fresh { body, timestamp })
    }
}
