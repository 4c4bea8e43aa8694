//! Wallet session state.
//!
//! The [`Session`] is the single source of truth for which wallet, which
//! address and which chain are active. It lives inside a [`SessionStore`]
//! that is shared by the [`WalletSessionManager`](crate::manager::WalletSessionManager)
//! and the [`ProviderEventBridge`](crate::bridge::ProviderEventBridge).
//! Observers read snapshots and subscribe to changes; only the crate writes.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::provider::{Eip1193, WalletProvider};

/// Wei per displayed balance unit (four fractional digits of ether).
const WEI_PER_TEN_THOUSANDTH: u64 = 100_000_000_000_000;

/// Which browser-wallet integration is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    /// No wallet connected.
    #[default]
    None,
    /// MetaMask-flavoured `ethereum` provider.
    #[serde(rename = "metamask")]
    MetaMask,
    /// Binance Chain Wallet `BinanceChain` provider.
    Binance,
}

impl WalletKind {
    /// Identifier used on the wire (`"metamask"`, `"binance"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::MetaMask => "metamask",
            Self::Binance => "binance",
        }
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::MetaMask => "MetaMask",
            Self::Binance => "Binance",
        })
    }
}

impl FromStr for WalletKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metamask" => Ok(Self::MetaMask),
            "binance" | "binancechain" => Ok(Self::Binance),
            "none" => Ok(Self::None),
            other => Err(format!("unknown wallet kind: {other}")),
        }
    }
}

/// Coarse connection state, for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No wallet connected.
    Disconnected,
    /// A connect request is waiting on the provider.
    Connecting,
    /// A wallet is connected.
    Connected,
}

/// Snapshot of the wallet session.
///
/// `connected` is true exactly when `account` is set and the store holds
/// a provider; `chain_id` is always set while connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Whether a wallet is connected.
    pub connected: bool,
    /// Active address, as returned by the provider.
    pub account: Option<String>,
    /// Numeric chain id.
    pub chain_id: Option<u64>,
    /// Which wallet is active.
    pub wallet_kind: WalletKind,
    /// Native balance of `account`, four fractional digits.
    pub balance: String,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            connected: false,
            account: None,
            chain_id: None,
            wallet_kind: WalletKind::None,
            balance: "0".to_string(),
        }
    }
}

impl Session {
    pub(crate) fn new_connected(
        kind: WalletKind,
        account: impl Into<String>,
        chain_id: u64,
        balance: String,
    ) -> Self {
        Self {
            connected: true,
            account: Some(account.into()),
            chain_id: Some(chain_id),
            wallet_kind: kind,
            balance,
        }
    }

    /// Whether a wallet is connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Short form of the account for display (`0x1234...7890`).
    #[must_use]
    pub fn display_account(&self) -> String {
        let Some(addr) = self.account.as_deref() else {
            return "not connected".to_string();
        };
        let head = addr.get(..6);
        let tail = addr.len().checked_sub(4).and_then(|start| addr.get(start..));
        match (head, tail) {
            (Some(head), Some(tail)) if addr.len() >= 12 => format!("{head}...{tail}"),
            _ => addr.to_string(),
        }
    }
}

/// Format a wei amount as ether with four fractional digits, rounding half up.
#[must_use]
pub fn format_balance(wei: U256) -> String {
    let step = U256::from(WEI_PER_TEN_THOUSANDTH);
    let units = (wei + step / U256::from(2u8)) / step;
    let ten_thousand = U256::from(10_000u16);
    format!("{}.{:0>4}", units / ten_thousand, (units % ten_thousand).to_string())
}

// ============================================================================
// Session Store
// ============================================================================

/// Internal state behind the watch channel.
struct SessionState {
    session: Session,
    provider: Option<Arc<dyn WalletProvider>>,
    pending: Vec<WalletKind>,
}

/// Owned, shared holder of the process-wide [`Session`].
///
/// Writes happen in short synchronous sections, never across an await.
pub struct SessionStore {
    tx: watch::Sender<SessionState>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("session", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState {
            session: Session::default(),
            provider: None,
            pending: Vec::new(),
        });
        Self { tx }
    }

    /// Current session snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.tx.borrow().session.clone()
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let state = self.tx.borrow();
        if state.session.connected {
            ConnectionStatus::Connected
        } else if state.pending.is_empty() {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Connecting
        }
    }

    /// Subscribe to session changes.
    #[must_use]
    pub fn subscribe(&self) -> SessionWatcher {
        SessionWatcher {
            rx: self.tx.subscribe(),
        }
    }

    /// The active provider, if connected.
    pub(crate) fn provider(&self) -> Option<Arc<dyn WalletProvider>> {
        self.tx.borrow().provider.clone()
    }

    /// Replace the whole session with a freshly connected one.
    pub(crate) fn establish(&self, session: Session, provider: Arc<dyn WalletProvider>) {
        self.tx.send_modify(|state| {
            state.session = session;
            state.provider = Some(provider);
        });
    }

    /// Reset to the empty session. Returns whether anything changed.
    pub(crate) fn clear(&self) -> bool {
        self.tx.send_if_modified(|state| {
            let changed = state.session != Session::default() || state.provider.is_some();
            state.session = Session::default();
            state.provider = None;
            changed
        })
    }

    /// Mutate the session of a connected store.
    ///
    /// The closure only runs while connected and returns whether it changed
    /// anything; observers are notified only on change.
    pub(crate) fn update_connected(&self, f: impl FnOnce(&mut Session) -> bool) -> bool {
        self.tx.send_if_modified(|state| {
            if state.session.connected {
                f(&mut state.session)
            } else {
                false
            }
        })
    }

    /// Active provider and account, read together.
    pub(crate) fn connected_parts(&self) -> Option<(Arc<dyn WalletProvider>, String)> {
        let state = self.tx.borrow();
        match (&state.provider, &state.session.account) {
            (Some(provider), Some(account)) if state.session.connected => {
                Some((Arc::clone(provider), account.clone()))
            }
            _ => None,
        }
    }

    /// Mutate the session only if `provider` still fronts the active
    /// transport and, when given, `account` is still the active address.
    ///
    /// Returns `None` when the session moved on (disconnect, reconnect or
    /// account change while awaiting) and `f` was not run, otherwise
    /// whether `f` changed anything.
    pub(crate) fn update_if_current(
        &self,
        provider: &Arc<dyn WalletProvider>,
        account: Option<&str>,
        f: impl FnOnce(&mut Session) -> bool,
    ) -> Option<bool> {
        let mut outcome = None;
        self.tx.send_if_modified(|state| {
            let same_provider = state
                .provider
                .as_ref()
                .is_some_and(|active| Arc::ptr_eq(active.transport(), provider.transport()));
            let same_account =
                account.is_none_or(|a| state.session.account.as_deref() == Some(a));
            if !(state.session.connected && same_provider && same_account) {
                return false;
            }
            let changed = f(&mut state.session);
            outcome = Some(changed);
            changed
        });
        outcome
    }

    /// Whether `transport` backs the active provider.
    pub(crate) fn is_active_transport(&self, transport: &Arc<dyn Eip1193>) -> bool {
        self.tx
            .borrow()
            .provider
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active.transport(), transport))
    }

    /// Mark a connect for `kind` as in flight.
    ///
    /// Returns `None` when one is already running. The pending mark is
    /// removed when the guard drops, including on cancellation.
    pub(crate) fn begin_connect(&self, kind: WalletKind) -> Option<ConnectGuard<'_>> {
        let mut acquired = false;
        self.tx.send_if_modified(|state| {
            if !state.pending.contains(&kind) {
                state.pending.push(kind);
                acquired = true;
            }
            false
        });
        acquired.then_some(ConnectGuard { store: self, kind })
    }
}

/// Marks a connect as pending for as long as it lives.
#[derive(Debug)]
pub(crate) struct ConnectGuard<'a> {
    store: &'a SessionStore,
    kind: WalletKind,
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        let kind = self.kind;
        self.store.tx.send_if_modified(|state| {
            state.pending.retain(|k| *k != kind);
            false
        });
    }
}

/// Receives session snapshots as they change.
#[derive(Debug)]
pub struct SessionWatcher {
    rx: watch::Receiver<SessionState>,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("session", &self.session)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl SessionWatcher {
    /// The latest snapshot, marking it as seen.
    #[must_use]
    pub fn current(&mut self) -> Session {
        self.rx.borrow_and_update().session.clone()
    }

    /// Wait for the next change and return the new snapshot.
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Session> {
        self.rx.changed().await.ok()?;
        Some(self.current())
    }
}
