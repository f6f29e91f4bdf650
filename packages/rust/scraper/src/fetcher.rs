//! Remote page fetcher.
//!
//! One GET per call, no retries. Only `200 OK` counts as success; every other
//! status is returned as [`LinkshelfError::HttpStatus`].

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use linkshelf_shared::{Cancellation, ExtractedMetadata, FetchConfig, LinkshelfError, Result};
use reqwest::redirect::{Attempt, Policy};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use crate::htmlmeta;

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("linkshelf/", env!("CARGO_PKG_VERSION"));

/// Something that can turn a URL into page metadata.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_metadata(
        &self,
        url: &str,
        deadline: Duration,
        cancel: &Cancellation,
    ) -> Result<ExtractedMetadata>;
}

/// HTTP fetcher holding one pooled client for its lifetime.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    max_body_bytes: u64,
    block_private_hosts: bool,
}

impl Fetcher {
    /// Build a fetcher from runtime config.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_deref().unwrap_or(USER_AGENT))
            .redirect(redirect_policy(config.max_redirects, config.block_private_hosts))
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| LinkshelfError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
            block_private_hosts: config.block_private_hosts,
        })
    }

    /// GET `url` and return its body as text.
    ///
    /// `deadline` bounds the whole exchange including the body read. Firing
    /// `cancel` aborts the request in flight.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &str, deadline: Duration, cancel: &Cancellation) -> Result<String> {
        let target = self.validate(url)?;

        if cancel.is_cancelled() {
            return Err(LinkshelfError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("fetch cancelled");
                Err(LinkshelfError::Cancelled)
            }
            result = self.get(&target, deadline) => result,
        }
    }

    async fn get(&self, url: &Url, deadline: Duration) -> Result<String> {
        debug!(timeout_ms = deadline.as_millis() as u64, "fetching page");

        let mut response = self
            .client
            .get(url.as_str())
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| request_err(url, deadline, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(LinkshelfError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                return Err(self.too_large(url));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| request_err(url, deadline, e))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_body_bytes {
                return Err(self.too_large(url));
            }
        }

        debug!(status = status.as_u16(), bytes = body.len(), "page fetched");
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn validate(&self, url: &str) -> Result<Url> {
        let parsed = Url::parse(url)
            .map_err(|e| LinkshelfError::validation(format!("invalid URL '{url}': {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(LinkshelfError::validation(format!(
                    "unsupported URL scheme '{other}' in {url}"
                )));
            }
        }

        if self.block_private_hosts && is_private_target(&parsed) {
            return Err(LinkshelfError::validation(format!(
                "refusing to fetch private address {url}"
            )));
        }

        Ok(parsed)
    }

    fn too_large(&self, url: &Url) -> LinkshelfError {
        LinkshelfError::Network(format!(
            "{url}: body exceeds {} bytes",
            self.max_body_bytes
        ))
    }
}

#[async_trait]
impl MetadataSource for Fetcher {
    async fn fetch_metadata(
        &self,
        url: &str,
        deadline: Duration,
        cancel: &Cancellation,
    ) -> Result<ExtractedMetadata> {
        let body = self.fetch(url, deadline, cancel).await?;
        htmlmeta::extract_from_str(&body, cancel)
    }
}

/// Redirect policy that caps the hop count and, when private hosts are
/// blocked, re-checks every hop's target.
fn redirect_policy(max_redirects: usize, block_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt: Attempt| {
        let hops = attempt.previous().len();
        match check_redirect(attempt.url(), hops, max_redirects, block_private_hosts) {
            Ok(()) => attempt.follow(),
            Err(reason) => attempt.error(reason),
        }
    })
}

fn check_redirect(
    next: &Url,
    hops: usize,
    max_redirects: usize,
    block_private_hosts: bool,
) -> std::result::Result<(), String> {
    if hops > max_redirects {
        return Err(format!("too many redirects (limit {max_redirects})"));
    }
    if block_private_hosts && is_private_target(next) {
        return Err(format!("redirect to private address {next}"));
    }
    Ok(())
}

fn request_err(url: &Url, deadline: Duration, e: reqwest::Error) -> LinkshelfError {
    if e.is_redirect() {
        let reason = std::error::Error::source(&e)
            .map(ToString::to_string)
            .unwrap_or_else(|| e.to_string());
        LinkshelfError::validation(format!("{url}: redirect refused: {reason}"))
    } else if e.is_timeout() {
        LinkshelfError::Timeout {
            operation: "fetch",
            millis: deadline.as_millis() as u64,
        }
    } else {
        LinkshelfError::Network(format!("{url}: {e}"))
    }
}

// ---------------------------------------------------------------------------
// Private address blocking
// ---------------------------------------------------------------------------

/// Whether a URL points at loopback, private, or link-local space.
fn is_private_target(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
