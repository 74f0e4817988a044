//! HTTP client for the kubelet pod-listing endpoint

use rustls::ClientConfig;
use std::error::Error as StdError;
use tracing::debug;
use url::Url;

use crate::error::{AttestorError, Result};
use crate::pods::PodList;

const USER_AGENT: &str = concat!("podwarden/", env!("CARGO_PKG_VERSION"));

/// One immutable credential snapshot: HTTP client, endpoint and token.
#[derive(Debug, Clone)]
pub struct KubeletClient {
    http: reqwest::Client,
    url: Url,
    pods_url: Url,
    token: Option<String>,
}

impl KubeletClient {
    /// Client for the read-only port, no TLS and no credentials.
    pub fn insecure(url: Url) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .no_proxy()
            .build()
            .map_err(|e| AttestorError::config_with("unable to build kubelet client", e))?;
        Self::with_http(http, url, None)
    }

    /// Client for the secure port using a prepared TLS configuration.
    pub fn secure(url: Url, tls: ClientConfig, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .no_proxy()
            .use_preconfigured_tls(tls)
            .build()
            .map_err(|e| AttestorError::config_with("unable to build kubelet client", e))?;
        Self::with_http(http, url, token)
    }

    fn with_http(http: reqwest::Client, url: Url, token: Option<String>) -> Result<Self> {
        let pods_url = url
            .join("/pods")
            .map_err(|e| AttestorError::config_with("malformed kubelet URL", e))?;
        Ok(Self {
            http,
            url,
            pods_url,
            token,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub async fn get_pod_list(&self) -> Result<PodList> {
        let mut request = self.http.get(self.pods_url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            AttestorError::Kubelet(format!("unable to perform request: {}", error_chain(&e)))
        })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            AttestorError::Kubelet(format!("unable to read response body: {}", error_chain(&e)))
        })?;

        if !status.is_success() {
            return Err(AttestorError::Kubelet(format!(
                "unexpected status code on pods response: {} {}",
                status.as_u16(),
                String::from_utf8_lossy(&body).trim()
            )));
        }

        let pods: PodList = serde_json::from_slice(&body)
            .map_err(|e| AttestorError::Kubelet(format!("unable to decode kubelet response: {e}")))?;
        debug!(url = %self.pods_url, pods = pods.items.len(), "Fetched kubelet pod list");
        Ok(pods)
    }
}

/// `err` followed by each of its sources, colon separated
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}
