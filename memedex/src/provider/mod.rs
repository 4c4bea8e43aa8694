//! Wallet provider abstraction.
//!
//! Two layers:
//!
//! ```text
//! Eip1193            raw `request(method, params)` + `on` / `remove_listener`
//!   └── WalletProvider   typed capabilities used by the session manager
//!         ├── MetaMaskProvider  (`ethereum` global, `isMetaMask` flag)
//!         └── BinanceProvider   (`BinanceChain` global)
//! ```
//!
//! [`InjectedProviders`] stands in for the environment's injected globals,
//! and [`HttpEip1193`] is a JSON-RPC transport for wallets that expose an
//! HTTP endpoint instead of a browser object.

mod http;
mod injected;
#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::U256;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{WalletError, WalletResult};
use crate::network::{NetworkDescriptor, chain_id_to_hex, parse_chain_id};
use crate::session::WalletKind;

pub use http::{HttpEip1193, HttpEip1193Builder};
pub use injected::{BinanceProvider, InjectedProviders, MetaMaskProvider};

/// EIP-1193 "user rejected the request".
pub const USER_REJECTED: i64 = 4001;
/// EIP-1193 "unrecognized chain id" (wallet needs `wallet_addEthereumChain`).
pub const UNRECOGNIZED_CHAIN: i64 = 4902;
/// JSON-RPC internal error; some wallets wrap 4902 in it.
pub const INTERNAL_ERROR: i64 = -32603;

/// Error returned by a raw provider request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    /// EIP-1193 / JSON-RPC error code.
    pub code: i64,
    /// Provider message.
    pub message: String,
    /// Optional structured error data.
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error without data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured error data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether the wallet does not know the requested chain.
    #[must_use]
    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == UNRECOGNIZED_CHAIN
            || (self.code == INTERNAL_ERROR
                && self
                    .data
                    .as_ref()
                    .and_then(|d| d.pointer("/originalError/code"))
                    .and_then(Value::as_i64)
                    == Some(UNRECOGNIZED_CHAIN))
    }
}

impl From<RpcError> for WalletError {
    fn from(err: RpcError) -> Self {
        if err.code == USER_REJECTED {
            Self::UserRejected {
                message: err.message,
            }
        } else {
            Self::Provider {
                code: err.code,
                message: err.message,
            }
        }
    }
}

/// Provider notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    /// `accountsChanged`.
    AccountsChanged,
    /// `chainChanged`.
    ChainChanged,
}

impl ProviderEventKind {
    /// EIP-1193 event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccountsChanged => "accountsChanged",
            Self::ChainChanged => "chainChanged",
        }
    }
}

/// A notification pushed by a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// New list of authorized accounts; empty means the wallet locked or
    /// revoked access.
    AccountsChanged(Vec<String>),
    /// New chain id, usually base-16 (`"0x89"`).
    ChainChanged(Value),
}

impl ProviderEvent {
    /// Kind of this event.
    #[must_use]
    pub const fn kind(&self) -> ProviderEventKind {
        match self {
            Self::AccountsChanged(_) => ProviderEventKind::AccountsChanged,
            Self::ChainChanged(_) => ProviderEventKind::ChainChanged,
        }
    }
}

/// Event callback registered with a provider.
pub type Listener = Arc<dyn Fn(ProviderEvent) + Send + Sync>;

/// Handle returned by [`Eip1193::on`], used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Raw EIP-1193 provider.
#[async_trait]
pub trait Eip1193: Send + Sync {
    /// Send a JSON-RPC style request.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Register an event listener.
    fn on(&self, kind: ProviderEventKind, listener: Listener) -> ListenerId;

    /// Remove a listener. Returns whether it was registered.
    fn remove_listener(&self, kind: ProviderEventKind, id: ListenerId) -> bool;

    /// Vendor flag set by MetaMask (`ethereum.isMetaMask`).
    fn is_metamask(&self) -> bool {
        false
    }
}

/// Listener bookkeeping shared by provider implementations.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, ProviderEventKind, Listener)>>,
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("count", &self.len())
            .finish_non_exhaustive()
    }
}

impl ListenerSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add(&self, kind: ProviderEventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, kind, listener));
        id
    }

    /// Remove a listener by id and kind.
    pub fn remove(&self, kind: ProviderEventKind, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(lid, lkind, _)| !(*lid == id && *lkind == kind));
        listeners.len() != before
    }

    /// Deliver an event to every listener of its kind, in registration order.
    pub fn emit(&self, event: &ProviderEvent) {
        let kind = event.kind();
        // Snapshot so listeners may (de)register without deadlocking.
        let targets: Vec<Listener> = self
            .lock()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in targets {
            listener(event.clone());
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of listeners for one kind.
    #[must_use]
    pub fn count(&self, kind: ProviderEventKind) -> usize {
        self.lock().iter().filter(|(_, k, _)| *k == kind).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, ProviderEventKind, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Result of a `wallet_switchEthereumChain` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The wallet switched.
    Switched,
    /// The wallet does not know the chain; it must be added first.
    UnrecognizedChain,
}

/// Typed wallet capabilities on top of a raw [`Eip1193`] transport.
///
/// Every method has a default implementation over [`WalletProvider::transport`],
/// so a variant only has to say which kind it is and how it is detected.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Which wallet kind this provider represents.
    fn kind(&self) -> WalletKind;

    /// The underlying transport.
    fn transport(&self) -> &Arc<dyn Eip1193>;

    /// Detect this variant in the environment.
    fn detect(env: &InjectedProviders) -> Option<Self>
    where
        Self: Sized;

    /// Prompt the user for account access (`eth_requestAccounts`).
    async fn request_accounts(&self) -> WalletResult<Vec<String>> {
        let value = self
            .transport()
            .request("eth_requestAccounts", json!([]))
            .await?;
        parse_accounts(&value)
    }

    /// Already authorized accounts, without prompting (`eth_accounts`).
    async fn accounts(&self) -> WalletResult<Vec<String>> {
        let value = self.transport().request("eth_accounts", json!([])).await?;
        parse_accounts(&value)
    }

    /// Active chain id (`eth_chainId`).
    async fn chain_id(&self) -> WalletResult<u64> {
        let value = self.transport().request("eth_chainId", json!([])).await?;
        parse_chain_id(&value)
            .ok_or_else(|| WalletError::malformed(format!("eth_chainId returned {value}")))
    }

    /// Native balance in wei (`eth_getBalance`).
    async fn balance(&self, address: &str) -> WalletResult<U256> {
        let value = self
            .transport()
            .request("eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_quantity(&value)
            .ok_or_else(|| WalletError::malformed(format!("eth_getBalance returned {value}")))
    }

    /// Ask the wallet to switch chains (`wallet_switchEthereumChain`).
    async fn switch_chain(&self, chain_id: u64) -> WalletResult<SwitchOutcome> {
        let params = json!([{ "chainId": chain_id_to_hex(chain_id) }]);
        match self
            .transport()
            .request("wallet_switchEthereumChain", params)
            .await
        {
            Ok(_) => Ok(SwitchOutcome::Switched),
            Err(err) if err.is_unrecognized_chain() => Ok(SwitchOutcome::UnrecognizedChain),
            Err(err) => Err(err.into()),
        }
    }

    /// Ask the wallet to add a chain (`wallet_addEthereumChain`).
    async fn add_chain(&self, chain_id: u64, descriptor: &NetworkDescriptor) -> WalletResult<()> {
        self.transport()
            .request(
                "wallet_addEthereumChain",
                json!([descriptor.add_chain_params(chain_id)]),
            )
            .await?;
        Ok(())
    }

    /// Register an event listener.
    fn subscribe(&self, kind: ProviderEventKind, listener: Listener) -> ListenerId {
        self.transport().on(kind, listener)
    }

    /// Remove an event listener.
    fn unsubscribe(&self, kind: ProviderEventKind, id: ListenerId) -> bool {
        self.transport().remove_listener(kind, id)
    }
}

/// Parse an `eth_accounts` style array of address strings.
pub(crate) fn parse_accounts(value: &Value) -> WalletResult<Vec<String>> {
    value
        .as_array()
        .ok_or_else(|| WalletError::malformed(format!("expected account list, got {value}")))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| WalletError::malformed(format!("expected address, got {v}")))
        })
        .collect()
}

/// Parse a hex `QUANTITY` (or a decimal string / number) into a [`U256`].
pub(crate) fn parse_quantity(value: &Value) -> Option<U256> {
    match value {
        Value::String(s) => match s.strip_prefix("0x") {
            Some("") => Some(U256::ZERO),
            Some(hex) => U256::from_str_radix(hex, 16).ok(),
            None => U256::from_str_radix(s, 10).ok(),
        },
        Value::Number(n) => n.as_u64().map(U256::from),
        _ => None,
    }
}
