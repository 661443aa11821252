//! HTTP page fetching behind a trait so crawls can run against any transport.

use crate::controls::{ConfigError, FetchSettings};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use thiserror::Error;
use url::Url;

/// Raw page bytes plus the response details callers care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final URL after redirects; relative links resolve against it.
    pub url: Url,
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header, if any.
    pub content_type: Option<String>,
    /// Response body, possibly truncated.
    pub body: Vec<u8>,
    /// True when the body hit the configured size cap.
    pub truncated: bool,
}

impl FetchedPage {
    /// Builds a 200 response carrying `body`; handy for non-HTTP sources.
    pub fn ok(url: Url, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url,
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.into(),
            truncated: false,
        }
    }

    /// False only when a Content-Type is present and does not mention html.
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map_or(true, |content_type| {
                content_type.to_ascii_lowercase().contains("html")
            })
    }
}

/// Transport-level failures. All of them are scoped to one URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS, connect, TLS or timeout failure.
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Client error.
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[error("{url} answered with status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
    },
    /// The body stream broke off.
    #[error("reading body of {url} failed: {source}")]
    Body {
        /// Requested URL.
        url: String,
        /// Client error.
        source: reqwest::Error,
    },
    /// Any other transport, used by non-HTTP fetchers.
    #[error("fetching {url} failed: {message}")]
    Other {
        /// Requested URL.
        url: String,
        /// Description of the failure.
        message: String,
    },
}

/// Anything that can turn a URL into page bytes.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches `url`. Implementations must bound the request in time.
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

/// `reqwest`-backed fetcher with a per-request timeout and a body cap.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    /// Builds the shared HTTP client.
    pub fn new(settings: &FetchSettings) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: settings.max_body_bytes,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let mut body = Vec::new();
        let mut truncated = false;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| FetchError::Body {
                url: url.to_string(),
                source,
            })?;
            let room = self.max_body_bytes.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
            truncated,
        })
    }
}
