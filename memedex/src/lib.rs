//! Memedex - wallet session and chain-network manager for a memecoin
//! trading dApp.
//!
//! The crate keeps one process-wide answer to "which wallet, which
//! address, which chain, connected or not", reconciled against events the
//! wallet fires on its own, and drives the switch-or-add network protocol.
//!
//! # Architecture
//!
//! - **Session** ([`session`]) - the [`Session`] snapshot and its observable store
//! - **Providers** ([`provider`]) - EIP-1193 transports and the MetaMask / Binance variants
//! - **Manager** ([`manager`]) - connect, switch, disconnect and balance refresh
//! - **Bridge** ([`bridge`]) - ordered handling of `accountsChanged` / `chainChanged`
//! - **Networks** ([`network`]) - chain id registry used to add unknown chains
//! - **Backend** ([`backend`]) - HTTP client for the dApp's REST API
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use memedex::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = load_config(None).await?;
//!     let manager = Arc::new(WalletSessionManager::from_config(&config)?);
//!     let bridge = ProviderEventBridge::start(Arc::clone(&manager));
//!
//!     manager.connect(WalletKind::MetaMask).await?;
//!     manager.switch_network(56).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod bridge;
pub mod config;
pub mod error;
pub mod manager;
pub mod network;
pub mod provider;
pub mod session;

#[cfg(test)]
pub(crate) mod stub_http;

pub use bridge::ProviderEventBridge;
pub use error::{Error, Result};
pub use manager::WalletSessionManager;
pub use session::{ConnectionStatus, Session, SessionStore, WalletKind};

/// Prelude module for convenient imports.
pub mod prelude {
    // Errors
    pub use crate::error::{
        BackendError, BackendResult, ConfigError, ConfigResult, Error, Result, WalletError,
        WalletResult,
    };

    // Session
    pub use crate::bridge::ProviderEventBridge;
    pub use crate::manager::{WalletSessionManager, WalletSessionManagerBuilder};
    pub use crate::session::{
        ConnectionStatus, Session, SessionStore, SessionWatcher, WalletKind, format_balance,
    };

    // Providers and networks
    pub use crate::network::{NetworkDescriptor, NetworkRegistry};
    pub use crate::provider::{
        Eip1193, HttpEip1193, InjectedProviders, ProviderEvent, ProviderEventKind, RpcError,
        WalletProvider,
    };

    // Backend
    pub use crate::backend::{Backend, HttpBackend};

    // Config
    pub use crate::config::{MemedexConfig, load_config, save_config};
}
