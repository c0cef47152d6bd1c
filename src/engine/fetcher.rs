//! HTTP fetcher implementation
//!
//! This module performs the network part of an attempt:
//! - Building HTTP clients with the crawler's user agent string
//! - Routing through a leased proxy or sending a leased cookie
//! - Classifying the response into an [`ErrorKind`]

use crate::config::UserAgentConfig;
use crate::credentials::{CredentialKind, CredentialPayload};
use crate::state::ErrorKind;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{header, redirect::Policy, Client, Proxy};
use std::time::Duration;
use url::Url;

/// One network fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,

    /// Payload of the leased credential, if the attempt holds one
    pub credential: Option<CredentialPayload>,
}

/// A successful (2xx) response
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    pub status_code: u16,
    pub content_type: String,
    pub body: String,
}

/// The network side of the Fetch Executor
///
/// Anything other than a 2xx page comes back as the [`ErrorKind`] the retry
/// policy should see. Implementations must not retry on their own.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchedPage, ErrorKind>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Whole-request timeout
/// * `proxy` - Proxy URL every request is routed through
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use sumi_harvest::config::UserAgentConfig;
/// use sumi_harvest::engine::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiHarvest".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30), None).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

/// reqwest-backed fetcher
///
/// Keeps one client for direct requests and one per proxy URL, so
/// connection pools are never shared across proxies.
pub struct HttpFetcher {
    user_agent: UserAgentConfig,
    timeout: Duration,
    direct: Client,
    proxied: DashMap<String, Client>,
}

impl HttpFetcher {
    pub fn new(user_agent: &UserAgentConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            direct: build_http_client(user_agent, timeout, None)?,
            user_agent: user_agent.clone(),
            timeout,
            proxied: DashMap::new(),
        })
    }

    fn client_for(&self, credential: Option<&CredentialPayload>) -> Result<Client, ErrorKind> {
        let proxy = match credential {
            Some(CredentialPayload {
                kind: CredentialKind::Proxy,
                value,
            }) => value,
            _ => return Ok(self.direct.clone()),
        };

        if let Some(client) = self.proxied.get(proxy) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.user_agent, self.timeout, Some(proxy)).map_err(|e| {
            tracing::warn!("Cannot build client for proxy {}: {}", proxy, e);
            ErrorKind::ConnectionError
        })?;
        self.proxied.insert(proxy.clone(), client.clone());
        Ok(client)
    }
}

/// Maps a transport error onto the taxonomy
fn classify(error: &reqwest::Error) -> ErrorKind {
    if error.is_timeout() {
        ErrorKind::Timeout
    } else if let Some(status) = error.status() {
        ErrorKind::from_status(status.as_u16()).unwrap_or(ErrorKind::ContentError)
    } else if error.is_redirect() || error.is_decode() {
        ErrorKind::ContentError
    } else {
        ErrorKind::ConnectionError
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchedPage, ErrorKind> {
        let client = self.client_for(request.credential.as_ref())?;

        let mut builder = client.get(request.url.clone());
        if let Some(CredentialPayload {
            kind: CredentialKind::Cookie,
            value,
        }) = &request.credential
        {
            builder = builder.header(header::COOKIE, value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::debug!("Fetch of {} failed: {}", request.url, e);
            classify(&e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ErrorKind::from_status(status.as_u16()).unwrap_or(ErrorKind::ContentError));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response.text().await.map_err(|e| classify(&e))?;

        Ok(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
        })
    }
}
