//! JSON-RPC over HTTP transport.
//!
//! For wallets that expose an HTTP endpoint (desktop wallets, dev nodes)
//! rather than an injected browser object. HTTP cannot push, so
//! `accountsChanged` / `chainChanged` are synthesised by polling
//! `eth_accounts` and `eth_chainId` while at least one listener is
//! registered.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use url::Url;

use super::{
    Eip1193, INTERNAL_ERROR, Listener, ListenerId, ListenerSet, ProviderEvent, ProviderEventKind,
    RpcError,
};
use crate::error::{ConfigError, ConfigResult};
use crate::network::parse_chain_id;

/// Default interval between event polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorPayload {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Builder for [`HttpEip1193`].
#[derive(Debug)]
pub struct HttpEip1193Builder {
    endpoint: String,
    metamask: bool,
    poll_interval: Duration,
}

impl HttpEip1193Builder {
    /// Report the MetaMask vendor flag for this endpoint.
    #[must_use]
    pub const fn metamask(mut self, flag: bool) -> Self {
        self.metamask = flag;
        self
    }

    /// Interval between `eth_accounts` / `eth_chainId` polls.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Build the transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the endpoint is not a valid URL
    /// or the poll interval is zero.
    pub fn build(self) -> ConfigResult<HttpEip1193> {
        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| ConfigError::invalid(format!("wallet endpoint '{}': {e}", self.endpoint)))?;
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("wallet poll interval must be non-zero"));
        }

        Ok(HttpEip1193 {
            rpc: Arc::new(RpcClient {
                client: reqwest::Client::new(),
                endpoint,
                next_id: AtomicU64::new(1),
            }),
            listeners: Arc::new(ListenerSet::new()),
            metamask: self.metamask,
            poll_interval: self.poll_interval,
            poller: Mutex::new(None),
        })
    }
}

struct RpcClient {
    client: reqwest::Client,
    endpoint: Url,
    next_id: AtomicU64,
}

impl RpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(id, method, "json-rpc request");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&RpcRequest {
                jsonrpc: "2.0",
                id,
                method,
                params,
            })
            .send()
            .await
            .map_err(|e| RpcError::new(INTERNAL_ERROR, format!("transport: {e}")))?;

        let status = response.status();
        let body: RpcResponse = response.json().await.map_err(|e| {
            RpcError::new(INTERNAL_ERROR, format!("HTTP {status}: invalid response: {e}"))
        })?;

        match (body.error, body.result) {
            (Some(err), _) => Err(RpcError {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        }
    }
}

/// Stops the poll task when dropped.
struct PollerHandle {
    _shutdown_tx: mpsc::Sender<()>,
}

/// EIP-1193 provider backed by a JSON-RPC HTTP endpoint.
pub struct HttpEip1193 {
    rpc: Arc<RpcClient>,
    listeners: Arc<ListenerSet>,
    metamask: bool,
    poll_interval: Duration,
    poller: Mutex<Option<PollerHandle>>,
}

impl fmt::Debug for HttpEip1193 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEip1193")
            .field("endpoint", &self.rpc.endpoint.as_str())
            .field("metamask", &self.metamask)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl HttpEip1193 {
    /// Create a builder for the given endpoint URL.
    pub fn builder(endpoint: impl Into<String>) -> HttpEip1193Builder {
        HttpEip1193Builder {
            endpoint: endpoint.into(),
            metamask: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// The endpoint this transport talks to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.rpc.endpoint
    }

    fn ensure_poller(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(endpoint = %self.rpc.endpoint, "no async runtime, wallet events will not be polled");
            return;
        };

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        runtime.spawn(poll_events(
            Arc::clone(&self.rpc),
            Arc::clone(&self.listeners),
            self.poll_interval,
            shutdown_rx,
        ));
        *poller = Some(PollerHandle {
            _shutdown_tx: shutdown_tx,
        });
    }

    fn stop_poller_if_idle(&self) {
        if self.listeners.is_empty() {
            let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
            if poller.take().is_some() {
                debug!(endpoint = %self.rpc.endpoint, "wallet event polling stopped");
            }
        }
    }
}

#[async_trait]
impl Eip1193 for HttpEip1193 {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.rpc.call(method, params).await
    }

    fn on(&self, kind: ProviderEventKind, listener: Listener) -> ListenerId {
        let id = self.listeners.add(kind, listener);
        self.ensure_poller();
        id
    }

    fn remove_listener(&self, kind: ProviderEventKind, id: ListenerId) -> bool {
        let removed = self.listeners.remove(kind, id);
        self.stop_poller_if_idle();
        removed
    }

    fn is_metamask(&self) -> bool {
        self.metamask
    }
}

/// Last account list and chain id read by the poller.
///
/// Only well-formed reads move the baseline; a null or malformed result is
/// skipped so a flaky endpoint never looks like a disconnect.
#[derive(Debug, Default)]
struct PollBaseline {
    accounts: Option<Vec<String>>,
    chain: Option<u64>,
}

impl PollBaseline {
    /// Record an `eth_accounts` result, returning the event to emit if any.
    fn observe_accounts(&mut self, value: &Value) -> Option<ProviderEvent> {
        let accounts = match super::parse_accounts(value) {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "ignoring malformed eth_accounts poll result");
                return None;
            }
        };
        let previous = self.accounts.replace(accounts.clone())?;
        (previous != accounts).then_some(ProviderEvent::AccountsChanged(accounts))
    }

    /// Record an `eth_chainId` result, returning the event to emit if any.
    fn observe_chain(&mut self, value: &Value) -> Option<ProviderEvent> {
        let Some(chain_id) = parse_chain_id(value) else {
            warn!(value = %value, "ignoring malformed eth_chainId poll result");
            return None;
        };
        let previous = self.chain.replace(chain_id)?;
        (previous != chain_id).then(|| ProviderEvent::ChainChanged(value.clone()))
    }
}

/// Poll accounts and chain id, emitting an event whenever either changes.
///
/// The first successful read only sets the baseline.
async fn poll_events(
    rpc: Arc<RpcClient>,
    listeners: Arc<ListenerSet>,
    interval: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    debug!(endpoint = %rpc.endpoint, ?interval, "wallet event polling started");
    let mut baseline = PollBaseline::default();

    loop {
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.recv() => break,
        }

        match rpc.call("eth_accounts", json!([])).await {
            Ok(accounts) => {
                if let Some(event) = baseline.observe_accounts(&accounts) {
                    listeners.emit(&event);
                }
            }
            Err(e) => debug!(error = %e, "eth_accounts poll failed"),
        }

        match rpc.call("eth_chainId", json!([])).await {
            Ok(chain) => {
                if let Some(event) = baseline.observe_chain(&chain) {
                    listeners.emit(&event);
                }
            }
            Err(e) => debug!(error = %e, "eth_chainId poll failed"),
        }
    }
}
