//! `reqwest` implementation of [`Backend`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::Backend;
use super::types::{
    CreateMemecoinRequest, MemecoinCreated, Portfolio, TokenPrice, Trade, TradeList, TradeReceipt,
    TradeRequest, WalletConnection,
};
use crate::error::{BackendError, BackendResult};

/// Default request timeout for backend calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Builder for [`HttpBackend`].
#[derive(Debug)]
pub struct HttpBackendBuilder {
    base_url: String,
    timeout: Duration,
}

impl HttpBackendBuilder {
    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Fails if the base URL does not parse or the HTTP client cannot be
    /// constructed.
    pub fn build(self) -> BackendResult<HttpBackend> {
        let mut base = Url::parse(&self.base_url)?;
        // `Url::join` drops the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        Ok(HttpBackend { client, base })
    }
}

/// HTTP client for the backend API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    /// Create a builder for the given base URL (e.g. `http://localhost:8001`).
    pub fn builder(base_url: impl Into<String>) -> HttpBackendBuilder {
        HttpBackendBuilder {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Base URL all API paths are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> BackendResult<Url> {
        Ok(self.base.join(path)?)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> BackendResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "POST");
        let response = self.client.post(url).json(body).send().await?;
        decode(response).await
    }

    async fn get<R: DeserializeOwned>(&self, url: Url) -> BackendResult<R> {
        debug!(%url, "GET");
        let response = self.client.get(url).send().await?;
        decode(response).await
    }
}

/// Map non-2xx to [`BackendError::Status`] and decode the body otherwise.
async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> BackendResult<R> {
    let status = response.status();
    if !status.is_success() {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(BackendError::Status {
            status: status.as_u16(),
            body: error_detail(&text),
        });
    }
    response
        .json()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

/// Prefer the backend's `{"detail": ...}` message over the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl Backend for HttpBackend {
    async fn record_connection(&self, record: &WalletConnection) -> BackendResult<()> {
        let _: serde_json::Value = self.post("api/wallet/connect", record).await?;
        Ok(())
    }

    async fn create_memecoin(
        &self,
        request: &CreateMemecoinRequest,
    ) -> BackendResult<MemecoinCreated> {
        self.post("api/memecoin/create", request).await
    }

    async fn submit_trade(&self, request: &TradeRequest) -> BackendResult<TradeReceipt> {
        self.post("api/trade", request).await
    }

    async fn portfolio(&self, address: &str) -> BackendResult<Portfolio> {
        let url = self.endpoint(&format!("api/wallet/{address}/portfolio"))?;
        self.get(url).await
    }

    async fn trades(&self, address: &str) -> BackendResult<Vec<Trade>> {
        let url = self.endpoint(&format!("api/wallet/{address}/trades"))?;
        let list: TradeList = self.get(url).await?;
        Ok(list.trades)
    }

    async fn prices(&self, symbols: &[&str]) -> BackendResult<HashMap<String, TokenPrice>> {
        let mut url = self.endpoint("api/crypto/prices")?;
        url.query_pairs_mut()
            .append_pair("symbols", &symbols.join(","));
        self.get(url).await
    }
}
