//! HEAD probe for remote resources.

use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use tracing::debug;

use crate::error::Result;

/// What a HEAD request revealed about a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: String,
    /// Final status after redirects, `None` if the request failed.
    pub status: Option<u16>,
    /// `Content-Length` of the final response.
    pub length: Option<u64>,
    /// Whether the status is in `200..=299`.
    pub ok: bool,
}

impl Response {
    pub fn new(url: impl Into<String>, status: Option<u16>, length: Option<u64>) -> Self {
        Self {
            url: url.into(),
            status,
            length,
            ok: status.is_some_and(|status| (200..=299).contains(&status)),
        }
    }

    /// Fetch the body as text.
    pub async fn body(&self, timeout: Option<Duration>) -> Result<String> {
        let text = client(timeout)?
            .get(&self.url)
            .send()
            .await?
            .text()
            .await?;
        Ok(text)
    }
}

fn client(timeout: Option<Duration>) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Parse the `Content-Length` header.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Probe `url` with a redirect-following HEAD request.
///
/// Never fails: a request that cannot be made yields a response without
/// status or length.
pub async fn fetch(url: &str, timeout: Option<Duration>) -> Response {
    let result = match client(timeout) {
        Ok(client) => client.head(url).send().await,
        Err(err) => Err(err),
    };

    match result {
        Ok(response) => {
            let status = response.status().as_u16();
            let length = content_length(response.headers());
            debug!(url, status, length, "probed url");
            Response::new(url, Some(status), length)
        }
        Err(err) => {
            debug!(url, error = %err, "probe failed");
            Response::new(url, None, None)
        }
    }
}
