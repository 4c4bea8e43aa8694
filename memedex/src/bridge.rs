//! Provider event bridge.
//!
//! Turns wallet-originated `accountsChanged` / `chainChanged` events into
//! session updates. Listener closures only enqueue; a single consumer task
//! drains the queue in order and reads the current session for every
//! message, so an event can never act on a session that has since been
//! replaced or cleared.
//!
//! ```text
//! provider listeners ─┐
//!                     ├─► inbox (mpsc) ─► consumer task ─► WalletSessionManager
//! manager (attach) ───┘
//! ```

use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::manager::WalletSessionManager;
use crate::network::parse_chain_id;
use crate::provider::{Eip1193, ListenerId, ProviderEvent, ProviderEventKind, WalletProvider};
use crate::session::WalletKind;

const EVENT_KINDS: [ProviderEventKind; 2] = [
    ProviderEventKind::AccountsChanged,
    ProviderEventKind::ChainChanged,
];

/// Messages consumed by the bridge task.
pub(crate) enum BridgeMessage {
    /// A connect succeeded on this provider.
    Attach(Arc<dyn WalletProvider>),
    /// A provider fired an event.
    Event {
        source: Weak<dyn Eip1193>,
        event: ProviderEvent,
    },
    /// Reply once everything queued before it has been handled.
    Barrier(oneshot::Sender<()>),
}

/// Listeners registered on one provider instance.
struct Subscription {
    provider: Arc<dyn WalletProvider>,
    ids: Vec<(ProviderEventKind, ListenerId)>,
}

impl Subscription {
    fn kind(&self) -> WalletKind {
        self.provider.kind()
    }

    fn is_for(&self, provider: &Arc<dyn WalletProvider>) -> bool {
        Arc::ptr_eq(self.provider.transport(), provider.transport())
    }

    fn cancel(self) {
        for (kind, id) in self.ids {
            self.provider.unsubscribe(kind, id);
        }
        debug!(wallet = %self.provider.kind(), "provider listeners removed");
    }
}

/// Handle to a running bridge.
///
/// Dropping the handle stops the bridge as well; [`shutdown`](Self::shutdown)
/// additionally waits until every listener is removed.
#[derive(Debug)]
pub struct ProviderEventBridge {
    inbox_tx: mpsc::UnboundedSender<BridgeMessage>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ProviderEventBridge {
    /// Start the bridge for `manager`.
    ///
    /// Subscribes to the active provider if a session is already open,
    /// otherwise runs the silent reconnect once when the manager has
    /// auto-connect enabled. Returns `None` if a bridge is already running
    /// for this manager.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(manager: Arc<WalletSessionManager>) -> Option<Self> {
        let inbox = manager.take_bridge_inbox()?;
        let inbox_tx = manager.bridge_sender();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let consumer = Consumer {
            manager,
            inbox_tx: inbox_tx.clone(),
            subscriptions: Vec::new(),
        };
        let task = tokio::spawn(consumer.run(inbox, shutdown_rx));

        Some(Self {
            inbox_tx,
            shutdown_tx,
            task,
        })
    }

    /// Wait until every message queued so far has been handled.
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inbox_tx.send(BridgeMessage::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Remove every listener and stop the consumer task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "event bridge task failed");
        }
    }
}

struct Consumer {
    manager: Arc<WalletSessionManager>,
    inbox_tx: mpsc::UnboundedSender<BridgeMessage>,
    subscriptions: Vec<Subscription>,
}

impl Consumer {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<BridgeMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!("event bridge started");

        // Sessions opened before the bridge queued no attach notice.
        if let Some(provider) = self.manager.store().provider() {
            self.attach(provider);
        } else if self.manager.auto_connect() {
            let stopped = tokio::select! {
                result = self.manager.silent_reconnect() => {
                    match result {
                        Ok(Some(session)) => {
                            info!(account = %session.display_account(), "session restored");
                        }
                        Ok(None) => debug!("nothing to restore"),
                        Err(e) => warn!(error = %e, "silent reconnect failed"),
                    }
                    false
                }
                _ = shutdown_rx.recv() => true,
            };
            if stopped {
                self.stop(inbox);
                return;
            }
        }

        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = shutdown_rx.recv() => break,
            }
        }
        self.stop(inbox);
    }

    fn stop(self, mut inbox: mpsc::UnboundedReceiver<BridgeMessage>) {
        for subscription in self.subscriptions {
            subscription.cancel();
        }
        while let Ok(message) = inbox.try_recv() {
            if let BridgeMessage::Barrier(reply) = message {
                let _ = reply.send(());
            }
        }
        self.manager.restore_bridge_inbox(inbox);
        info!("event bridge stopped");
    }

    async fn handle(&mut self, message: BridgeMessage) {
        match message {
            BridgeMessage::Attach(provider) => self.attach(provider),
            BridgeMessage::Event { source, event } => self.dispatch(&source, event).await,
            BridgeMessage::Barrier(reply) => {
                let _ = reply.send(());
            }
        }
    }

    /// Register listeners on `provider` unless its transport already has them.
    fn attach(&mut self, provider: Arc<dyn WalletProvider>) {
        if self.subscriptions.iter().any(|s| s.is_for(&provider)) {
            trace!(wallet = %provider.kind(), "already subscribed");
            return;
        }

        let kind = provider.kind();
        if let Some(index) = self.subscriptions.iter().position(|s| s.kind() == kind) {
            self.subscriptions.swap_remove(index).cancel();
        }

        let source = Arc::downgrade(provider.transport());
        let ids = EVENT_KINDS
            .iter()
            .map(|&event_kind| {
                let tx = self.inbox_tx.clone();
                let source = Weak::clone(&source);
                let id = provider.subscribe(
                    event_kind,
                    Arc::new(move |event: ProviderEvent| {
                        let _ = tx.send(BridgeMessage::Event {
                            source: Weak::clone(&source),
                            event,
                        });
                    }),
                );
                (event_kind, id)
            })
            .collect();

        debug!(wallet = %kind, "provider listeners registered");
        self.subscriptions.push(Subscription { provider, ids });
    }

    async fn dispatch(&self, source: &Weak<dyn Eip1193>, event: ProviderEvent) {
        let Some(source) = source.upgrade() else {
            return;
        };
        if !self.manager.store().is_active_transport(&source) {
            debug!(event = event.kind().as_str(), "event from inactive provider ignored");
            return;
        }

        match event {
            ProviderEvent::AccountsChanged(accounts) => self.on_accounts(accounts).await,
            ProviderEvent::ChainChanged(raw) => self.on_chain(&raw),
        }
    }

    async fn on_accounts(&self, accounts: Vec<String>) {
        let Some(account) = accounts.into_iter().next() else {
            info!("wallet revoked all accounts");
            self.manager.disconnect();
            return;
        };

        if self.manager.set_account(&account) {
            info!(account = %account, "active account changed");
        }
        if let Err(e) = self.manager.update_balance().await {
            warn!(account = %account, error = %e, "balance refresh failed");
        }
    }

    fn on_chain(&self, raw: &serde_json::Value) {
        let Some(chain_id) = parse_chain_id(raw) else {
            warn!(value = %raw, "unparseable chainChanged payload");
            return;
        };
        if self.manager.set_chain(chain_id) {
            info!(chain_id, "wallet changed network");
        } else {
            trace!(chain_id, "chain unchanged");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::provider::InjectedProviders;
    use crate::provider::mock::{MockWallet, ether};
    use crate::session::Session;

    const ACCOUNT: &str = "0xABC0000000000000000000000000000000000001";

    fn manager(env: InjectedProviders) -> Arc<WalletSessionManager> {
        Arc::new(
            WalletSessionManager::builder()
                .providers(env)
                .auto_connect(false)
                .build(),
        )
    }

    async fn connected_pair(
        wallet: &Arc<MockWallet>,
    ) -> (Arc<WalletSessionManager>, ProviderEventBridge) {
        let manager = manager(InjectedProviders::new().with_ethereum(wallet.clone()));
        let bridge = ProviderEventBridge::start(Arc::clone(&manager)).unwrap();
        manager.connect(WalletKind::MetaMask).await.unwrap();
        bridge.sync().await;
        (manager, bridge)
    }

    #[tokio::test]
    async fn test_listeners_registered_after_connect() {
        let wallet = MockWallet::builder().build();
        let manager = manager(InjectedProviders::new().with_ethereum(wallet.clone()));
        let bridge = ProviderEventBridge::start(Arc::clone(&manager)).unwrap();
        bridge.sync().await;
        assert_eq!(wallet.listener_count(ProviderEventKind::ChainChanged), 0);

        manager.connect(WalletKind::MetaMask).await.unwrap();
        bridge.sync().await;
        assert_eq!(wallet.listener_count(ProviderEventKind::ChainChanged), 1);
        assert_eq!(wallet.listener_count(ProviderEventKind::AccountsChanged), 1);
    }

    #[tokio::test]
    async fn test_chain_changed_updates_only_chain() {
        let wallet = MockWallet::builder().balance(ether(2)).build();
        let (manager, bridge) = connected_pair(&wallet).await;
        let before = manager.session();

        wallet.emit(ProviderEvent::ChainChanged(json!("0x89")));
        bridge.sync().await;

        let after = manager.session();
        assert_eq!(after.chain_id, Some(137));
        assert_eq!(after.account, before.account);
        assert_eq!(after.balance, before.balance);
    }

    #[tokio::test]
    async fn test_chain_changed_accepts_decimal_and_number() {
        let wallet = MockWallet::builder().build();
        let (manager, bridge) = connected_pair(&wallet).await;

        wallet.emit(ProviderEvent::ChainChanged(json!("56")));
        bridge.sync().await;
        assert_eq!(manager.session().chain_id, Some(56));

        wallet.emit(ProviderEvent::ChainChanged(json!(137)));
        bridge.sync().await;
        assert_eq!(manager.session().chain_id, Some(137));

        wallet.emit(ProviderEvent::ChainChanged(json!("garbage")));
        bridge.sync().await;
        assert_eq!(manager.session().chain_id, Some(137));
    }

    #[tokio::test]
    async fn test_same_chain_is_coalesced() {
        let wallet = MockWallet::builder().build();
        let (manager, bridge) = connected_pair(&wallet).await;
        let mut watcher = manager.store().subscribe();
        let _ = watcher.current();

        wallet.emit(ProviderEvent::ChainChanged(json!("0x1")));
        bridge.sync().await;
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), watcher.changed())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_empty_accounts_disconnects() {
        let wallet = MockWallet::builder().build();
        let (manager, bridge) = connected_pair(&wallet).await;

        wallet.emit(ProviderEvent::AccountsChanged(Vec::new()));
        bridge.sync().await;
        assert_eq!(manager.session(), Session::default());
    }

    #[tokio::test]
    async fn test_account_change_refreshes_balance() {
        let wallet = MockWallet::builder().accounts(&[ACCOUNT, "0xdef"]).build();
        wallet.set_balance("0xdef", ether(7));
        let (manager, bridge) = connected_pair(&wallet).await;
        assert_eq!(manager.session().balance, "0.0000");

        wallet.emit(ProviderEvent::AccountsChanged(vec!["0xdef".into()]));
        bridge.sync().await;

        let session = manager.session();
        assert_eq!(session.account.as_deref(), Some("0xdef"));
        assert_eq!(session.balance, "7.0000");
        assert_eq!(session.chain_id, Some(1));
    }

    #[tokio::test]
    async fn test_failed_refresh_does_not_keep_old_balance() {
        let wallet = MockWallet::builder()
            .accounts(&[ACCOUNT, "0xdef"])
            .balance(ether(5))
            .build();
        let (manager, bridge) = connected_pair(&wallet).await;
        assert_eq!(manager.session().balance, "5.0000");

        wallet.fail(
            "eth_getBalance",
            crate::provider::RpcError::new(crate::provider::INTERNAL_ERROR, "rpc down"),
        );
        wallet.emit(ProviderEvent::AccountsChanged(vec!["0xdef".into()]));
        bridge.sync().await;

        let session = manager.session();
        assert_eq!(session.account.as_deref(), Some("0xdef"));
        assert_eq!(session.balance, Session::default().balance);
    }

    #[tokio::test]
    async fn test_bridge_started_after_connect_attaches_session() {
        let wallet = MockWallet::builder().build();
        let manager = manager(InjectedProviders::new().with_ethereum(wallet.clone()));
        manager.connect(WalletKind::MetaMask).await.unwrap();
        assert_eq!(wallet.listener_count(ProviderEventKind::ChainChanged), 0);

        let bridge = ProviderEventBridge::start(Arc::clone(&manager)).unwrap();
        bridge.sync().await;
        assert_eq!(wallet.listener_count(ProviderEventKind::ChainChanged), 1);

        wallet.emit(ProviderEvent::ChainChanged(json!("0x38")));
        bridge.sync().await;
        assert_eq!(manager.session().chain_id, Some(56));
    }

    #[tokio::test]
    async fn test_connect_while_stopped_is_not_replayed() {
        let wallet = MockWallet::builder().build();
        let manager = manager(InjectedProviders::new().with_ethereum(wallet.clone()));
        ProviderEventBridge::start(Arc::clone(&manager))
            .unwrap()
            .shutdown()
            .await;

        // Connect and drop the session while no bridge runs.
        manager.connect(WalletKind::MetaMask).await.unwrap();
        manager.disconnect();

        let bridge = ProviderEventBridge::start(Arc::clone(&manager)).unwrap();
        bridge.sync().await;
        assert_eq!(wallet.listener_count(ProviderEventKind::AccountsChanged), 0);
        assert_eq!(wallet.listener_count(ProviderEventKind::ChainChanged), 0);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_ignored_when_disconnected() {
        let wallet = MockWallet::builder().build();
        let (manager, bridge) = connected_pair(&wallet).await;
        manager.disconnect();

        wallet.emit(ProviderEvent::ChainChanged(json!("0x38")));
        wallet.emit(ProviderEvent::AccountsChanged(vec!["0xdef".into()]));
        bridge.sync().await;
        assert_eq!(manager.session(), Session::default());
    }

    #[tokio::test]
    async fn test_events_from_inactive_provider_ignored() {
        let metamask = MockWallet::builder().build();
        let binance = MockWallet::builder().metamask(false).chain_id(56).build();
        let manager = manager(
            InjectedProviders::new()
                .with_ethereum(metamask.clone())
                .with_binance_chain(binance.clone()),
        );
        let bridge = ProviderEventBridge::start(Arc::clone(&manager)).unwrap();

        manager.connect(WalletKind::MetaMask).await.unwrap();
        manager.connect(WalletKind::Binance).await.unwrap();
        bridge.sync().await;

        metamask.emit(ProviderEvent::ChainChanged(json!("0x89")));
        metamask.emit(ProviderEvent::AccountsChanged(Vec::new()));
        bridge.sync().await;
        let session = manager.session();
        assert_eq!(session.wallet_kind, WalletKind::Binance);
        assert_eq!(session.chain_id, Some(56));

        binance.emit(ProviderEvent::ChainChanged(json!("0x89")));
        bridge.sync().await;
        assert_eq!(manager.session().chain_id, Some(137));
    }

    #[tokio::test]
    async fn test_reconnect_does_not_double_subscribe() {
        let wallet = MockWallet::builder().build();
        let (manager, bridge) = connected_pair(&wallet).await;

        manager.disconnect();
        manager.connect(WalletKind::MetaMask).await.unwrap();
        manager.connect(WalletKind::MetaMask).await.unwrap();
        bridge.sync().await;

        assert_eq!(wallet.listener_count(ProviderEventKind::AccountsChanged), 1);
        assert_eq!(wallet.listener_count(ProviderEventKind::ChainChanged), 1);
    }

    #[tokio::test]
    async fn test_new_instance_replaces_old_subscription() {
        let old = MockWallet::builder().build();
        let new = MockWallet::builder().build();
        let manager = manager(InjectedProviders::new().with_ethereum(old.clone()));
        let bridge = ProviderEventBridge::start(Arc::clone(&manager)).unwrap();
        manager.connect(WalletKind::MetaMask).await.unwrap();
        bridge.sync().await;
        assert_eq!(old.listener_count(ProviderEventKind::ChainChanged), 1);

        // Same kind, different provider instance.
        let provider = InjectedProviders::new()
            .with_ethereum(new.clone())
            .provider(WalletKind::MetaMask)
            .unwrap();
        manager
            .bridge_sender()
            .send(BridgeMessage::Attach(provider))
            .unwrap();
        bridge.sync().await;

        assert_eq!(old.listener_count(ProviderEventKind::ChainChanged), 0);
        assert_eq!(new.listener_count(ProviderEventKind::ChainChanged), 1);
    }

    #[tokio::test]
    async fn test_shutdown_removes_listeners() {
        let wallet = MockWallet::builder().build();
        let (manager, bridge) = connected_pair(&wallet).await;

        bridge.shutdown().await;
        assert_eq!(wallet.listener_count(ProviderEventKind::AccountsChanged), 0);
        assert_eq!(wallet.listener_count(ProviderEventKind::ChainChanged), 0);

        // The queue is handed back, so a new bridge can start.
        let bridge = ProviderEventBridge::start(manager).unwrap();
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_only_one_bridge_per_manager() {
        let manager = manager(InjectedProviders::new());
        let bridge = ProviderEventBridge::start(Arc::clone(&manager)).unwrap();
        assert!(ProviderEventBridge::start(Arc::clone(&manager)).is_none());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_processed_in_order() {
        let wallet = MockWallet::builder().build();
        let (manager, bridge) = connected_pair(&wallet).await;

        wallet.emit(ProviderEvent::ChainChanged(json!("0x38")));
        wallet.emit(ProviderEvent::ChainChanged(json!("0x89")));
        wallet.emit(ProviderEvent::ChainChanged(json!("0x1")));
        bridge.sync().await;
        assert_eq!(manager.session().chain_id, Some(1));

        wallet.emit(ProviderEvent::AccountsChanged(Vec::new()));
        wallet.emit(ProviderEvent::ChainChanged(json!("0x38")));
        bridge.sync().await;
        assert!(!manager.session().connected);
    }

    #[tokio::test]
    async fn test_start_restores_authorized_session() {
        let wallet = MockWallet::builder().authorized(true).build();
        let manager = Arc::new(
            WalletSessionManager::builder()
                .providers(InjectedProviders::new().with_ethereum(wallet.clone()))
                .build(),
        );
        let bridge = ProviderEventBridge::start(Arc::clone(&manager)).unwrap();
        // The first barrier waits out the reconnect, the second the attach
        // notice it queued.
        bridge.sync().await;
        bridge.sync().await;

        let session = manager.session();
        assert!(session.connected);
        assert_eq!(session.account.as_deref(), Some(ACCOUNT));
        assert_eq!(wallet.prompt_count(), 0);
        assert_eq!(wallet.listener_count(ProviderEventKind::ChainChanged), 1);
    }

    #[tokio::test]
    async fn test_failed_silent_reconnect_is_not_surfaced() {
        let wallet = MockWallet::builder().authorized(true).build();
        wallet.fail(
            "eth_accounts",
            crate::provider::RpcError::new(crate::provider::INTERNAL_ERROR, "down"),
        );
        let manager = Arc::new(
            WalletSessionManager::builder()
                .providers(InjectedProviders::new().with_ethereum(wallet))
                .build(),
        );
        let bridge = ProviderEventBridge::start(Arc::clone(&manager)).unwrap();
        bridge.sync().await;
        assert!(!manager.session().connected);
        bridge.shutdown().await;
    }
}
