//! Scripted in-memory wallet for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::U256;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use super::{
    Eip1193, Listener, ListenerId, ListenerSet, ProviderEvent, ProviderEventKind, RpcError,
    UNRECOGNIZED_CHAIN, USER_REJECTED,
};
use crate::network::{chain_id_to_hex, parse_chain_id};

/// One ether in wei.
pub(crate) fn ether(whole: u64) -> U256 {
    U256::from(whole) * U256::from(10u64).pow(U256::from(18u8))
}

#[derive(Debug)]
struct MockState {
    accounts: Vec<String>,
    authorized: bool,
    chain_id: u64,
    balances: HashMap<String, U256>,
    known_chains: HashSet<u64>,
    reject_prompts: bool,
    switch_after_add: bool,
    failures: HashMap<String, RpcError>,
}

/// A wallet that behaves like a browser extension, driven by tests.
#[derive(Debug)]
pub(crate) struct MockWallet {
    metamask: bool,
    state: Mutex<MockState>,
    listeners: ListenerSet,
    calls: Mutex<Vec<(String, Value)>>,
    hold_prompts: Option<Arc<Notify>>,
    hold_switches: Option<Arc<Notify>>,
    prompts: AtomicUsize,
    open_prompts: AtomicUsize,
    max_open_prompts: AtomicUsize,
}

pub(crate) struct MockWalletBuilder {
    metamask: bool,
    accounts: Vec<String>,
    authorized: bool,
    chain_id: u64,
    balance: U256,
    known_chains: HashSet<u64>,
    switch_after_add: bool,
    hold_prompts: Option<Arc<Notify>>,
    hold_switches: Option<Arc<Notify>>,
}

impl MockWalletBuilder {
    pub(crate) const fn metamask(mut self, flag: bool) -> Self {
        self.metamask = flag;
        self
    }

    pub(crate) fn accounts(mut self, accounts: &[&str]) -> Self {
        self.accounts = accounts.iter().map(|a| (*a).to_string()).collect();
        self
    }

    /// Accounts are already authorized, so `eth_accounts` returns them.
    pub(crate) const fn authorized(mut self, flag: bool) -> Self {
        self.authorized = flag;
        self
    }

    pub(crate) fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self.known_chains.insert(chain_id);
        self
    }

    pub(crate) const fn balance(mut self, wei: U256) -> Self {
        self.balance = wei;
        self
    }

    pub(crate) fn known_chains(mut self, chains: &[u64]) -> Self {
        self.known_chains.extend(chains);
        self
    }

    pub(crate) const fn switch_after_add(mut self, flag: bool) -> Self {
        self.switch_after_add = flag;
        self
    }

    /// `eth_requestAccounts` waits on this until notified.
    pub(crate) fn hold_prompts(mut self, gate: Arc<Notify>) -> Self {
        self.hold_prompts = Some(gate);
        self
    }

    /// `wallet_switchEthereumChain` waits on this until notified.
    pub(crate) fn hold_switches(mut self, gate: Arc<Notify>) -> Self {
        self.hold_switches = Some(gate);
        self
    }

    pub(crate) fn build(self) -> Arc<MockWallet> {
        let balances = self
            .accounts
            .iter()
            .map(|a| (a.to_lowercase(), self.balance))
            .collect();
        Arc::new(MockWallet {
            metamask: self.metamask,
            state: Mutex::new(MockState {
                accounts: self.accounts,
                authorized: self.authorized,
                chain_id: self.chain_id,
                balances,
                known_chains: self.known_chains,
                reject_prompts: false,
                switch_after_add: self.switch_after_add,
                failures: HashMap::new(),
            }),
            listeners: ListenerSet::new(),
            calls: Mutex::new(Vec::new()),
            hold_prompts: self.hold_prompts,
            hold_switches: self.hold_switches,
            prompts: AtomicUsize::new(0),
            open_prompts: AtomicUsize::new(0),
            max_open_prompts: AtomicUsize::new(0),
        })
    }
}

impl MockWallet {
    pub(crate) fn builder() -> MockWalletBuilder {
        MockWalletBuilder {
            metamask: true,
            accounts: vec!["0xABC0000000000000000000000000000000000001".to_string()],
            authorized: false,
            chain_id: 1,
            balance: U256::ZERO,
            known_chains: HashSet::from([1]),
            switch_after_add: true,
            hold_prompts: None,
            hold_switches: None,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every request seen so far, in order.
    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Params of every request to `method`.
    pub(crate) fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p)
            .collect()
    }

    pub(crate) fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub(crate) fn max_open_prompts(&self) -> usize {
        self.max_open_prompts.load(Ordering::SeqCst)
    }

    pub(crate) fn listener_count(&self, kind: ProviderEventKind) -> usize {
        self.listeners.count(kind)
    }

    pub(crate) fn reject_prompts(&self) {
        self.state().reject_prompts = true;
    }

    /// Make every request to `method` fail with `err`.
    pub(crate) fn fail(&self, method: &str, err: RpcError) {
        self.state().failures.insert(method.to_string(), err);
    }

    pub(crate) fn set_balance(&self, account: &str, wei: U256) {
        self.state().balances.insert(account.to_lowercase(), wei);
    }

    /// Push an event to every registered listener.
    pub(crate) fn emit(&self, event: ProviderEvent) {
        self.listeners.emit(&event);
    }

    fn record(&self, method: &str, params: &Value) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((method.to_string(), params.clone()));
    }

    async fn prompt_accounts(&self) -> Result<Value, RpcError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let open = self.open_prompts.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_prompts.fetch_max(open, Ordering::SeqCst);

        if let Some(gate) = &self.hold_prompts {
            gate.notified().await;
        }
        self.open_prompts.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state();
        if state.reject_prompts {
            return Err(RpcError::new(USER_REJECTED, "User rejected the request."));
        }
        state.authorized = true;
        Ok(json!(state.accounts))
    }
}

fn requested_chain(params: &Value) -> Result<u64, RpcError> {
    params
        .pointer("/0/chainId")
        .and_then(parse_chain_id)
        .ok_or_else(|| RpcError::new(-32602, "Invalid params"))
}

#[async_trait]
impl Eip1193 for MockWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.record(method, &params);
        let forced = self.state().failures.get(method).cloned();
        if let Some(err) = forced {
            return Err(err);
        }

        if method == "eth_requestAccounts" {
            return self.prompt_accounts().await;
        }
        if method == "wallet_switchEthereumChain" {
            if let Some(gate) = &self.hold_switches {
                gate.notified().await;
            }
        }

        let mut state = self.state();
        match method {
            "eth_accounts" => Ok(if state.authorized {
                json!(state.accounts)
            } else {
                json!([])
            }),
            "eth_chainId" => Ok(json!(chain_id_to_hex(state.chain_id))),
            "eth_getBalance" => {
                let address = params
                    .pointer("/0")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_lowercase();
                let wei = state.balances.get(&address).copied().unwrap_or_default();
                Ok(json!(format!("0x{wei:x}")))
            }
            "wallet_switchEthereumChain" => {
                let chain_id = requested_chain(&params)?;
                if state.known_chains.contains(&chain_id) {
                    state.chain_id = chain_id;
                    Ok(Value::Null)
                } else {
                    Err(RpcError::new(
                        UNRECOGNIZED_CHAIN,
                        format!("Unrecognized chain ID \"{}\".", chain_id_to_hex(chain_id)),
                    ))
                }
            }
            "wallet_addEthereumChain" => {
                let chain_id = requested_chain(&params)?;
                state.known_chains.insert(chain_id);
                if state.switch_after_add {
                    state.chain_id = chain_id;
                }
                Ok(Value::Null)
            }
            other => Err(RpcError::new(
                -32601,
                format!("The method \"{other}\" does not exist"),
            )),
        }
    }

    fn on(&self, kind: ProviderEventKind, listener: Listener) -> ListenerId {
        self.listeners.add(kind, listener)
    }

    fn remove_listener(&self, kind: ProviderEventKind, id: ListenerId) -> bool {
        self.listeners.remove(kind, id)
    }

    fn is_metamask(&self) -> bool {
        self.metamask
    }
}
