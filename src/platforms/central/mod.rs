//! RHACS Central management API client.

mod backend;

use log::{debug, warn};
use reqwest::{Certificate, Client, Identity, StatusCode};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::auth::Token;
use crate::error::{ProvisionError, Result};

pub use backend::{EndpointStatus, EntitiesMatching, EntityExists};

/// Central endpoint without its scheme, the form `roxctl` reads from
/// `ROX_CENTRAL_ADDRESS`.
pub fn central_address(url: &str) -> String {
    let url = url.trim();
    let address = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    address.trim_end_matches('/').to_string()
}

/// Connection settings for Central. Bearer token and client certificate can
/// be combined; at least one is normally present.
#[derive(Debug, Clone)]
pub struct CentralSettings {
    pub base_url: String,
    pub token: Option<Token>,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub insecure_skip_tls_verify: bool,
    pub read_retries: u32,
    pub retry_delay: Duration,
}

impl CentralSettings {
    pub fn new(base_url: impl Into<String>, token: Option<Token>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            insecure_skip_tls_verify: false,
            read_retries: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub struct CentralClient {
    client: Client,
    base_url: Url,
    token: Option<Token>,
    read_retries: u32,
    retry_delay: Duration,
}

impl CentralClient {
    pub fn new(settings: CentralSettings) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(concat!("acs-provision/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60));

        if let Some(path) = &settings.ca_cert {
            let pem = std::fs::read(path)?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| ProvisionError::Config(format!("Invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        match (&settings.client_cert, &settings.client_key) {
            (Some(cert), Some(key)) => {
                let mut pem = std::fs::read(cert)?;
                pem.push(b'\n');
                pem.extend(std::fs::read(key)?);
                let identity = Identity::from_pem(&pem).map_err(|e| {
                    ProvisionError::Config(format!("Invalid client certificate: {e}"))
                })?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(ProvisionError::Config(
                    "client-cert and client-key must be set together".into(),
                ))
            }
        }

        if settings.insecure_skip_tls_verify {
            warn!("TLS verification for Central is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| ProvisionError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base_url = Url::parse(&settings.base_url)
            .map_err(|e| ProvisionError::Config(format!("Invalid Central URL: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            token: settings.token,
            read_retries: settings.read_retries,
            retry_delay: settings.retry_delay,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `collection` relative to the base URL, with `name` appended as one
    /// escaped path segment.
    pub fn url(&self, collection: &str, name: Option<&str>) -> Result<Url> {
        let mut url = self
            .base_url
            .join(collection.trim_start_matches('/'))
            .map_err(|e| ProvisionError::Config(format!("Invalid API path {collection}: {e}")))?;
        if let Some(name) = name {
            url.path_segments_mut()
                .map_err(|()| ProvisionError::Config(format!("Cannot extend API path {collection}")))?
                .pop_if_empty()
                .push(name);
        }
        Ok(url)
    }

    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    /// GET a JSON document. `Ok(None)` means 404.
    ///
    /// Reads are retried on network errors, rate limiting and server errors.
    pub async fn get_json(&self, url: Url) -> Result<Option<Value>> {
        let mut retry_count = 0;
        loop {
            let request = self.auth_request(self.client.get(url.clone()));

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    if retry_count >= self.read_retries {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({}), retrying in {}s ({}/{})...",
                        e,
                        self.retry_delay.as_secs(),
                        retry_count + 1,
                        self.read_retries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= self.read_retries {
                    return Err(ProvisionError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: self.read_retries,
                    });
                }
                warn!(
                    "Central API error (status {status}). Waiting {}s before retry {}/{}...",
                    self.retry_delay.as_secs(),
                    retry_count + 1,
                    self.read_retries
                );
                tokio::time::sleep(self.retry_delay).await;
                retry_count += 1;
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                debug!("GET {url}: not found");
                return Ok(None);
            }

            if !status.is_success() {
                return Err(api_error(response).await);
            }

            return Ok(Some(response.json().await?));
        }
    }

    /// POST once; creates are never retried.
    pub async fn post_json(&self, url: Url, body: &Value) -> Result<Value> {
        let response = self
            .auth_request(self.client.post(url).json(body))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// PUT once.
    pub async fn put_json(&self, url: Url, body: &Value) -> Result<()> {
        let response = self
            .auth_request(self.client.put(url).json(body))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    /// Status code of a single GET, for endpoint checks such as `/metrics`.
    pub async fn status(&self, path: &str) -> Result<u16> {
        let url = self.url(path, None)?;
        let response = self.auth_request(self.client.get(url)).send().await?;
        Ok(response.status().as_u16())
    }
}

async fn api_error(response: reqwest::Response) -> ProvisionError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());
    ProvisionError::ApiError { status, message }
}
