//! CT log client over HTTP (RFC 6962 `ct/v1` API)

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

use crate::ct::{AddChainResponse, CtError, CtLogClient};

#[derive(Serialize)]
struct AddChainRequest {
    chain: Vec<String>,
}

/// `reqwest`-backed CT log client.
#[derive(Debug, Clone)]
pub struct HttpCtLog {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCtLog {
    /// Client for the log at `base_url` (without the `ct/v1` suffix).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CtLogClient for HttpCtLog {
    async fn add_pre_chain(&self, chain: &[Vec<u8>]) -> Result<AddChainResponse, CtError> {
        let url = format!(
            "{}/ct/v1/add-pre-chain",
            self.base_url.trim_end_matches('/')
        );
        let body = AddChainRequest {
            chain: chain.iter().map(|der| BASE64.encode(der)).collect(),
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CtError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CtError::Transient(format!("log answered {status}")));
        }
        if !status.is_success() {
            return Err(CtError::Rejected(format!("log answered {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| CtError::InvalidSct(e.to_string()))
    }
}
