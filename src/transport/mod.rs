pub mod api;
pub mod types;

use std::collections::HashSet;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, ResourceType};
use types::parse_error_body;

/// Request/response transport with bounded automatic retries and
/// exponential backoff on transient failures (C1).
///
/// The "injectable HTTP engine" requirement from the spec is satisfied by
/// pointing `base_url` at a `wiremock::MockServer` in tests rather than by
/// abstracting over the HTTP client itself.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
    retry_status_set: HashSet<u16>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-API-Key",
            config
                .api_key
                .parse()
                .expect("API key must be a valid header value"),
        );
        headers.insert(ACCEPT, "application/json".parse().unwrap());
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(Error::network)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            retry_status_set: config.retry_status_set.iter().copied().collect(),
        })
    }

    /// The underlying client, for the SSE strategy to open a long-lived
    /// stream on (which bypasses this transport's retry loop — SSE has its
    /// own reconnect-with-backoff in C4).
    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Perform an authenticated JSON request with bounded retries,
    /// returning the first successful (2xx) response for the caller to
    /// decode. `resource_type` tags any `APIError` this call produces so
    /// 404s (and other resource-scoped statuses) carry precise sentinel
    /// information.
    pub(crate) async fn execute<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        resource_type: Option<ResourceType>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, Error>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        let mut last_error = Error::Cancelled;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_delay * 2u32.pow(attempt - 1);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut builder = self.client.request(method.clone(), &url);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = builder.send() => result,
            };

            match response {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let raw = resp.text().await.unwrap_or_default();
                    let (message, request_id) = parse_error_body(&raw);
                    let error = Error::api(status, message, request_id, resource_type);

                    if self.retry_status_set.contains(&status) && attempt < self.max_retries {
                        tracing::debug!(status, attempt, "retrying after retryable status");
                        last_error = error;
                        continue;
                    }
                    return Err(error);
                }
                Err(err) => {
                    let error = Error::network(err);
                    if attempt < self.max_retries {
                        tracing::debug!(attempt, error = %error, "retrying after transport error");
                        last_error = error;
                        continue;
                    }
                    return Err(error);
                }
            }
        }

        Err(last_error)
    }
}
