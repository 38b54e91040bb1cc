//! HTTP client abstraction for external checks.
//!
//! The checker observes every redirect hop itself, so the underlying client
//! is built with redirects disabled. Errors come back as typed variants
//! rather than stringified causes: DNS failures are disambiguated from
//! other connection failures with a resolver probe, and TLS failures are
//! confirmed by the caller's unverified retry.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Head,
    Get,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: FetchMethod,
    pub user_agent: String,
    /// When false, certificate verification is disabled for this request.
    pub verify_certificates: bool,
    /// Read the response body (needed for anchor checks).
    pub want_body: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, method: FetchMethod, user_agent: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            user_agent: user_agent.into(),
            verify_certificates: true,
            want_body: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Canonical reason phrase, e.g. "OK" for 200.
    pub reason: Option<&'static str>,
    /// Raw Location header on 3xx responses.
    pub location: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        self.status < 300
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// Failure modes of a fetch, classified by the client itself.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("The read operation timed out")]
    Timeout,
    #[error("DNS lookup failed for {host}")]
    Dns { host: String },
    #[error("connection failed: {detail}")]
    Connect { detail: String },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl FetchError {
    /// Whether an unverified retry could plausibly succeed: certificate
    /// problems surface as connection-level failures.
    pub fn may_be_certificate_failure(&self) -> bool {
        matches!(self, FetchError::Connect { .. } | FetchError::Other(_))
    }
}

#[async_trait]
pub trait UrlFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// reqwest-backed fetcher with a verified and an unverified client.
pub struct ReqwestFetcher {
    verified: reqwest::Client,
    unverified: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            verified: Self::build_client(config.connect_timeout, true)?,
            unverified: Self::build_client(config.connect_timeout, false)?,
        })
    }

    fn build_client(timeout: Duration, verify: bool) -> anyhow::Result<reqwest::Client> {
        use anyhow::Context;
        reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!verify)
            .build()
            .context("Failed to create HTTP client")
    }

    async fn classify_error(url: &url::Url, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            return FetchError::Timeout;
        }
        if err.is_connect() {
            // A resolver probe separates name-resolution failures from
            // socket-level ones.
            if let Some(host) = url.host_str() {
                let port = url.port_or_known_default().unwrap_or(443);
                if tokio::net::lookup_host((host, port)).await.is_err() {
                    return FetchError::Dns {
                        host: host.to_string(),
                    };
                }
            }
            let detail = io_error_kind(&err).unwrap_or_else(|| "connection error".to_string());
            return FetchError::Connect { detail };
        }
        FetchError::Other(err.to_string())
    }
}

/// Walk the source chain for the underlying io error kind, if any.
fn io_error_kind(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io.kind().to_string());
        }
        source = cause.source();
    }
    None
}

#[async_trait]
impl UrlFetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let parsed = url::Url::parse(&request.url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", request.url)))?;

        let client = if request.verify_certificates {
            &self.verified
        } else {
            &self.unverified
        };
        let builder = match request.method {
            FetchMethod::Head => client.head(parsed.clone()),
            FetchMethod::Get => client.get(parsed.clone()),
        };

        debug!(url = %request.url, method = ?request.method, verify = request.verify_certificates, "fetching");

        let response = builder
            .header(reqwest::header::USER_AGENT, &request.user_agent)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => return Err(Self::classify_error(&parsed, err).await),
        };

        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let body = if request.want_body {
            match response.bytes().await {
                Ok(bytes) => Some(bytes.to_vec()),
                Err(err) => return Err(FetchError::Other(err.to_string())),
            }
        } else {
            None
        };

        Ok(FetchResponse {
            status: status.as_u16(),
            reason: status.canonical_reason(),
            location,
            body,
        })
    }
}
