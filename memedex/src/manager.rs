//! Wallet session manager.
//!
//! Owns the connect, switch and disconnect flows. Every flow awaits its
//! provider reads first and then writes the [`SessionStore`] in one short
//! synchronous step, so observers never see a half-populated session and
//! a failed flow leaves the session as it was.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{self, Backend, HttpBackend, WalletConnection};
use crate::bridge::BridgeMessage;
use crate::config::MemedexConfig;
use crate::error::{Result, WalletError, WalletResult};
use crate::network::NetworkRegistry;
use crate::provider::{InjectedProviders, SwitchOutcome, WalletProvider};
use crate::session::{Session, SessionStore, WalletKind, format_balance};

/// Builder for [`WalletSessionManager`].
pub struct WalletSessionManagerBuilder {
    store: Option<Arc<SessionStore>>,
    providers: InjectedProviders,
    registry: NetworkRegistry,
    backend: Option<Arc<dyn Backend>>,
    confirm_after_add: bool,
    auto_connect: bool,
}

impl std::fmt::Debug for WalletSessionManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSessionManagerBuilder")
            .field("providers", &self.providers)
            .field("registry", &self.registry)
            .field("backend", &self.backend.is_some())
            .field("confirm_after_add", &self.confirm_after_add)
            .field("auto_connect", &self.auto_connect)
            .finish_non_exhaustive()
    }
}

impl WalletSessionManagerBuilder {
    /// Share an existing store instead of creating one.
    #[must_use]
    pub fn store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Provider environment to detect wallets in.
    #[must_use]
    pub fn providers(mut self, providers: InjectedProviders) -> Self {
        self.providers = providers;
        self
    }

    /// Networks known for the add-chain fallback.
    #[must_use]
    pub fn registry(mut self, registry: NetworkRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Backend receiving connection records.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Re-read the chain id after adding a chain.
    #[must_use]
    pub const fn confirm_after_add(mut self, flag: bool) -> Self {
        self.confirm_after_add = flag;
        self
    }

    /// Let the event bridge attempt a silent reconnect when it starts.
    #[must_use]
    pub const fn auto_connect(mut self, flag: bool) -> Self {
        self.auto_connect = flag;
        self
    }

    /// Build the manager.
    #[must_use]
    pub fn build(self) -> WalletSessionManager {
        let (bridge_tx, bridge_rx) = mpsc::unbounded_channel();
        WalletSessionManager {
            store: self.store.unwrap_or_default(),
            providers: self.providers,
            registry: self.registry,
            backend: self.backend,
            confirm_after_add: self.confirm_after_add,
            auto_connect: self.auto_connect,
            bridge_tx,
            bridge_rx: Mutex::new(Some(bridge_rx)),
        }
    }
}

/// Single source of truth for the wallet session.
pub struct WalletSessionManager {
    store: Arc<SessionStore>,
    providers: InjectedProviders,
    registry: NetworkRegistry,
    backend: Option<Arc<dyn Backend>>,
    confirm_after_add: bool,
    auto_connect: bool,
    bridge_tx: mpsc::UnboundedSender<BridgeMessage>,
    /// Taken by the bridge while it runs.
    bridge_rx: Mutex<Option<mpsc::UnboundedReceiver<BridgeMessage>>>,
}

impl std::fmt::Debug for WalletSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSessionManager")
            .field("session", &self.store.snapshot())
            .field("providers", &self.providers)
            .field("networks", &self.registry.len())
            .field("confirm_after_add", &self.confirm_after_add)
            .finish_non_exhaustive()
    }
}

impl WalletSessionManager {
    /// Create a builder with an empty environment and the built-in networks.
    #[must_use]
    pub fn builder() -> WalletSessionManagerBuilder {
        WalletSessionManagerBuilder {
            store: None,
            providers: InjectedProviders::new(),
            registry: NetworkRegistry::builtin(),
            backend: None,
            confirm_after_add: true,
            auto_connect: true,
        }
    }

    /// Wire a manager from configuration: provider endpoints, extra
    /// networks and the HTTP backend.
    ///
    /// # Errors
    ///
    /// Fails if an endpoint or the backend URL is invalid.
    pub fn from_config(config: &MemedexConfig) -> Result<Self> {
        let backend = HttpBackend::builder(&config.backend.url)
            .timeout(config.backend.timeout())
            .build()?;
        Ok(Self::builder()
            .providers(config.injected_providers()?)
            .registry(config.network_registry())
            .backend(Arc::new(backend))
            .confirm_after_add(config.wallet.confirm_after_add)
            .auto_connect(config.wallet.auto_connect)
            .build())
    }

    /// The store observers subscribe to.
    #[must_use]
    pub const fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Current session snapshot.
    #[must_use]
    pub fn session(&self) -> Session {
        self.store.snapshot()
    }

    /// Networks known to the switch fallback.
    #[must_use]
    pub const fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    /// Whether the wallet of `kind` is installed.
    #[must_use]
    pub fn check_capability(&self, kind: WalletKind) -> bool {
        self.providers.is_available(kind)
    }

    /// Connect the wallet of `kind`, prompting the user for access.
    ///
    /// Replaces any session of another kind on success.
    ///
    /// # Errors
    ///
    /// - [`WalletError::WalletUnavailable`] if the wallet is not installed.
    /// - [`WalletError::ConnectInProgress`] if a connect of the same kind is
    ///   already running.
    /// - [`WalletError::UserRejected`] or [`WalletError::Provider`] from the
    ///   wallet.
    pub async fn connect(&self, kind: WalletKind) -> WalletResult<Session> {
        let provider = self
            .providers
            .provider(kind)
            .ok_or(WalletError::WalletUnavailable(kind))?;
        let _guard = self
            .store
            .begin_connect(kind)
            .ok_or(WalletError::ConnectInProgress(kind))?;

        info!(wallet = %kind, "connecting wallet");
        let accounts = provider.request_accounts().await.inspect_err(|e| {
            if e.is_user_rejection() {
                info!(wallet = %kind, "connection rejected by user");
            }
        })?;
        self.establish(provider, accounts).await
    }

    /// Restore a MetaMask session without prompting.
    ///
    /// Uses the already authorized accounts. Returns `None` when MetaMask
    /// is absent or has not authorized any account.
    ///
    /// # Errors
    ///
    /// Propagates provider failures and [`WalletError::ConnectInProgress`].
    pub async fn silent_reconnect(&self) -> WalletResult<Option<Session>> {
        let kind = WalletKind::MetaMask;
        let Some(provider) = self.providers.provider(kind) else {
            debug!("metamask not installed, skipping silent reconnect");
            return Ok(None);
        };
        let _guard = self
            .store
            .begin_connect(kind)
            .ok_or(WalletError::ConnectInProgress(kind))?;

        let accounts = provider.accounts().await?;
        if accounts.is_empty() {
            debug!("no authorized metamask account");
            return Ok(None);
        }
        self.establish(provider, accounts).await.map(Some)
    }

    /// Read chain and balance for the first account and publish the session.
    async fn establish(
        &self,
        provider: Arc<dyn WalletProvider>,
        accounts: Vec<String>,
    ) -> WalletResult<Session> {
        let kind = provider.kind();
        let account = accounts
            .into_iter()
            .next()
            .ok_or_else(|| WalletError::malformed("wallet returned no accounts"))?;
        let chain_id = provider.chain_id().await?;
        let wei = provider.balance(&account).await?;

        let session = Session::new_connected(kind, account, chain_id, format_balance(wei));
        self.store.establish(session.clone(), Arc::clone(&provider));
        info!(
            wallet = %kind,
            account = %session.display_account(),
            chain_id,
            balance = %session.balance,
            "wallet connected"
        );

        self.notify_bridge(provider);
        self.record_connection(&session);
        Ok(session)
    }

    /// Ask a running bridge to subscribe to `provider`.
    ///
    /// Without a bridge nothing is queued; a bridge started later attaches
    /// the active provider itself.
    fn notify_bridge(&self, provider: Arc<dyn WalletProvider>) {
        if self.bridge_running() {
            let _ = self.bridge_tx.send(BridgeMessage::Attach(provider));
        } else {
            debug!("no event bridge running, not attaching provider");
        }
    }

    fn record_connection(&self, session: &Session) {
        let Some(backend) = &self.backend else {
            return;
        };
        if let (Some(address), Some(chain_id)) = (&session.account, session.chain_id) {
            backend::spawn_connection_record(
                Arc::clone(backend),
                WalletConnection {
                    address: address.clone(),
                    wallet_type: session.wallet_kind,
                    chain_id,
                },
            );
        }
    }

    /// Move the connected wallet to `target`.
    ///
    /// Tries `wallet_switchEthereumChain` first. If the wallet does not
    /// know the chain, adds it from the registry once and, when
    /// `confirm_after_add` is set, checks that the wallet landed on it.
    ///
    /// # Errors
    ///
    /// - [`WalletError::NotConnected`] without a session.
    /// - [`WalletError::UnsupportedNetwork`] if the chain is unknown to
    ///   both the wallet and the registry.
    /// - [`WalletError::ChainNotConfirmed`] if the wallet stayed elsewhere
    ///   after adding the chain.
    /// - [`WalletError::NotConnected`] if the session was disconnected or
    ///   replaced while the wallet was switching.
    /// - Any other provider error, unchanged.
    pub async fn switch_network(&self, target: u64) -> WalletResult<()> {
        let provider = self.store.provider().ok_or(WalletError::NotConnected)?;
        info!(wallet = %provider.kind(), chain_id = target, "switching network");

        match provider.switch_chain(target).await? {
            SwitchOutcome::Switched => {}
            SwitchOutcome::UnrecognizedChain => {
                let descriptor = self
                    .registry
                    .get(target)
                    .ok_or(WalletError::UnsupportedNetwork(target))?;
                info!(chain_id = target, network = %descriptor.name, "chain unknown to wallet, adding it");
                provider.add_chain(target, descriptor).await?;

                if self.confirm_after_add {
                    let actual = provider.chain_id().await?;
                    if actual != target {
                        warn!(expected = target, actual, "wallet did not move to the added chain");
                        return Err(WalletError::ChainNotConfirmed {
                            expected: target,
                            actual,
                        });
                    }
                }
            }
        }

        let outcome = self.store.update_if_current(&provider, None, |session| {
            if session.chain_id == Some(target) {
                false
            } else {
                session.chain_id = Some(target);
                true
            }
        });
        let Some(changed) = outcome else {
            warn!(chain_id = target, "session changed during network switch, result dropped");
            return Err(WalletError::NotConnected);
        };
        debug!(chain_id = target, changed, "network switch applied");
        Ok(())
    }

    /// Forget the session. Always succeeds.
    pub fn disconnect(&self) {
        if self.store.clear() {
            info!("wallet disconnected");
        }
    }

    /// Refresh the native balance of the current account.
    ///
    /// The result is dropped if the session moved to another account or
    /// provider while the balance was being read.
    ///
    /// # Errors
    ///
    /// Propagates the provider error of `eth_getBalance`.
    pub async fn update_balance(&self) -> WalletResult<()> {
        let Some((provider, account)) = self.store.connected_parts() else {
            return Ok(());
        };
        let balance = format_balance(provider.balance(&account).await?);

        let applied = self
            .store
            .update_if_current(&provider, Some(&account), |session| {
                if session.balance == balance {
                    false
                } else {
                    session.balance.clone_from(&balance);
                    true
                }
            })
            .is_some();
        debug!(account = %account, %balance, applied, "balance refreshed");
        Ok(())
    }

    /// Make `account` the active address. Returns whether it changed.
    ///
    /// The previous account's balance is cleared until it is refreshed.
    pub(crate) fn set_account(&self, account: &str) -> bool {
        self.store.update_connected(|session| {
            if session.account.as_deref() == Some(account) {
                false
            } else {
                session.account = Some(account.to_string());
                session.balance = Session::default().balance;
                true
            }
        })
    }

    /// Overwrite the chain id. Equal values are a no-op.
    pub(crate) fn set_chain(&self, chain_id: u64) -> bool {
        self.store.update_connected(|session| {
            if session.chain_id == Some(chain_id) {
                false
            } else {
                session.chain_id = Some(chain_id);
                true
            }
        })
    }

    pub(crate) const fn auto_connect(&self) -> bool {
        self.auto_connect
    }

    pub(crate) fn bridge_sender(&self) -> mpsc::UnboundedSender<BridgeMessage> {
        self.bridge_tx.clone()
    }

    fn bridge_running(&self) -> bool {
        self.bridge_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Take the bridge queue. Only one bridge can run at a time.
    pub(crate) fn take_bridge_inbox(&self) -> Option<mpsc::UnboundedReceiver<BridgeMessage>> {
        self.bridge_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Hand the queue back after the bridge stopped.
    pub(crate) fn restore_bridge_inbox(&self, inbox: mpsc::UnboundedReceiver<BridgeMessage>) {
        *self.bridge_rx.lock().unwrap_or_else(PoisonError::into_inner) = Some(inbox);
    }
}
