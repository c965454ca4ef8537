//! Shared HTTP transport.
//!
//! One connection pool serves every repository. Per-repository credentials
//! and TLS settings are applied per request through a [`RequestScope`], so an
//! override never leaks to requests for another repository.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ETAG, HeaderMap, HeaderName, HeaderValue, LAST_MODIFIED, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, Response};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::status_of;
use crate::io::download::DownloadError;
use crate::io::hashing::sha1_hex;

/// Per-request settings derived from one repository's configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestScope<'a> {
    /// Basic-auth credentials.
    pub auth: Option<(&'a str, &'a str)>,
    /// Skip certificate verification.
    pub insecure: bool,
}

/// Owned form of [`RequestScope`], for work that is queued before it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeOptions {
    /// Basic-auth credentials.
    pub auth: Option<(String, String)>,
    /// Skip certificate verification.
    pub insecure: bool,
}

impl ScopeOptions {
    /// Borrow as a [`RequestScope`].
    pub fn scope(&self) -> RequestScope<'_> {
        RequestScope {
            auth: self.auth.as_ref().map(|(u, p)| (u.as_str(), p.as_str())),
            insecure: self.insecure,
        }
    }
}

/// Result of a lightweight metadata-only probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// 2xx/3xx. Carries the freshness fingerprint.
    Found(String),
    /// 404.
    NotFound,
    /// Any other status or a network failure.
    Failed {
        /// HTTP status, or 600 without a response.
        code: u16,
        /// Human-readable reason.
        message: String,
    },
}

/// HTTP client that fingerprints responses and streams bodies into sinks.
#[derive(Debug, Clone)]
pub struct HashingHttpClient {
    client: Client,
    insecure: Client,
    workers: usize,
}

impl HashingHttpClient {
    /// Build a client whose pool holds at least `workers` idle connections per host.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(workers: usize) -> Result<Self, reqwest::Error> {
        let workers = workers.max(1);
        let builder = || {
            Client::builder()
                .pool_max_idle_per_host(workers)
                .default_headers({
                    let mut headers = HeaderMap::new();
                    headers.insert(USER_AGENT, HeaderValue::from_static(crate::USER_AGENT));
                    headers
                })
        };
        Ok(Self {
            client: builder().build()?,
            insecure: builder().danger_accept_invalid_certs(true).build()?,
            workers,
        })
    }

    /// Number of requests the pool is sized for.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Prepare a request with the scope's credentials and a timeout.
    pub fn request(
        &self,
        method: Method,
        url: &str,
        scope: RequestScope<'_>,
        timeout: Duration,
    ) -> RequestBuilder {
        let client = if scope.insecure {
            &self.insecure
        } else {
            &self.client
        };
        let mut req = client.request(method, url).timeout(timeout);
        if let Some((user, pass)) = scope.auth {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    /// Issue a HEAD request and classify the answer.
    pub async fn probe(&self, url: &str, scope: RequestScope<'_>, timeout: Duration) -> Probe {
        tracing::debug!("HEAD {url}");
        match self.request(Method::HEAD, url, scope, timeout).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() || status.is_redirection() {
                    Probe::Found(fingerprint(resp.headers()))
                } else if status == reqwest::StatusCode::NOT_FOUND {
                    Probe::NotFound
                } else {
                    Probe::Failed {
                        code: status.as_u16(),
                        message: status
                            .canonical_reason()
                            .unwrap_or("unexpected status")
                            .to_string(),
                    }
                }
            }
            Err(e) => {
                let (code, message) = status_of(&e);
                Probe::Failed { code, message }
            }
        }
    }

    /// Issue a GET request; non-2xx statuses become errors.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, timeout, or an error status.
    pub async fn get(
        &self,
        url: &str,
        scope: RequestScope<'_>,
        timeout: Duration,
    ) -> Result<Response, reqwest::Error> {
        tracing::debug!("GET {url}");
        self.request(Method::GET, url, scope, timeout)
            .send()
            .await?
            .error_for_status()
    }
}

/// Stream a response body into `sink`, returning the number of bytes written.
///
/// # Errors
///
/// Returns an error if the body stream fails or the sink rejects a write.
pub async fn stream_body<W: AsyncWrite + Unpin>(
    response: Response,
    sink: &mut W,
) -> Result<u64, DownloadError> {
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    sink.flush().await?;
    Ok(written)
}

/// Freshness fingerprint of a response: SHA-1 over `Last-Modified` + `ETag`.
///
/// A missing header is replaced by the current time, so a server that sends
/// neither yields a new fingerprint on every probe and its index is always
/// treated as changed.
pub fn fingerprint(headers: &HeaderMap) -> String {
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string();
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| now.clone(), str::to_string)
    };
    sha1_hex(&format!("{}{}", header(LAST_MODIFIED), header(ETAG)))
}

const SUFFIXES: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Render a byte count with binary multiples, e.g. `1.5 KB`.
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < SUFFIXES.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    let text = format!("{value:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{text} {}", SUFFIXES[idx])
}
