//! Single-attempt access to the upstream listing endpoint.
//!
//! [`PageSource`] performs exactly one request per call; pacing and retries
//! live in [`super::RateLimitedFetcher`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, Url};

use super::Page;
use crate::error::AttemptError;

/// Anything that can serve one page of the listing.
#[async_trait]
pub trait PageSource: Send + Sync + fmt::Debug {
    /// Fetches page `page_index` holding up to `page_size` records.
    ///
    /// # Errors
    ///
    /// Returns an [`AttemptError`] describing why this single attempt
    /// failed.
    async fn fetch(&self, page_index: usize, page_size: usize) -> Result<Page, AttemptError>;
}

/// `reqwest`-backed listing client.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: Client,
    endpoint: Url,
}

impl HttpPageSource {
    /// Creates a client for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`AttemptError::Malformed`] if `endpoint` is not a valid URL,
    /// or [`AttemptError::Transport`] if the HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration, user_agent: &str) -> Result<Self, AttemptError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| AttemptError::Malformed(format!("endpoint {endpoint:?}: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()?;
        Ok(Self { client, endpoint })
    }

    /// URL for one page: `offset = page_index * page_size`.
    #[must_use]
    pub fn page_url(&self, page_index: usize, page_size: usize) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("offset", &page_index.saturating_mul(page_size).to_string())
            .append_pair("page_size", &page_size.to_string());
        url
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, page_index: usize, page_size: usize) -> Result<Page, AttemptError> {
        let url = self.page_url(page_index, page_size);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(AttemptError::EmptyBody);
        }
        serde_json::from_slice::<Page>(&body).map_err(|e| {
            let preview: String = String::from_utf8_lossy(&body).chars().take(200).collect();
            AttemptError::Malformed(format!("{e}; body starts with {preview:?}"))
        })
    }
}
