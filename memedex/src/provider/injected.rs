//! Injected wallet providers and their detection.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Eip1193, WalletProvider};
use crate::session::WalletKind;

/// The provider objects a wallet extension injects into the environment.
///
/// `ethereum` is the EIP-1193 slot most wallets (MetaMask among them)
/// populate; `binance_chain` is the Binance Chain Wallet's own slot.
#[derive(Clone, Default)]
pub struct InjectedProviders {
    ethereum: Option<Arc<dyn Eip1193>>,
    binance_chain: Option<Arc<dyn Eip1193>>,
}

impl fmt::Debug for InjectedProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedProviders")
            .field("ethereum", &self.ethereum.is_some())
            .field("binance_chain", &self.binance_chain.is_some())
            .finish()
    }
}

impl InjectedProviders {
    /// An environment with no wallet installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the `ethereum` slot.
    #[must_use]
    pub fn with_ethereum(mut self, provider: Arc<dyn Eip1193>) -> Self {
        self.ethereum = Some(provider);
        self
    }

    /// Populate the `BinanceChain` slot.
    #[must_use]
    pub fn with_binance_chain(mut self, provider: Arc<dyn Eip1193>) -> Self {
        self.binance_chain = Some(provider);
        self
    }

    /// The `ethereum` slot.
    #[must_use]
    pub const fn ethereum(&self) -> Option<&Arc<dyn Eip1193>> {
        self.ethereum.as_ref()
    }

    /// The `BinanceChain` slot.
    #[must_use]
    pub const fn binance_chain(&self) -> Option<&Arc<dyn Eip1193>> {
        self.binance_chain.as_ref()
    }

    /// Whether the provider for `kind` is present.
    #[must_use]
    pub fn is_available(&self, kind: WalletKind) -> bool {
        match kind {
            WalletKind::MetaMask => MetaMaskProvider::detect(self).is_some(),
            WalletKind::Binance => BinanceProvider::detect(self).is_some(),
            WalletKind::None => false,
        }
    }

    /// Detect the provider for `kind` as a trait object.
    #[must_use]
    pub fn provider(&self, kind: WalletKind) -> Option<Arc<dyn WalletProvider>> {
        match kind {
            WalletKind::MetaMask => MetaMaskProvider::detect(self)
                .map(|p| Arc::new(p) as Arc<dyn WalletProvider>),
            WalletKind::Binance => {
                BinanceProvider::detect(self).map(|p| Arc::new(p) as Arc<dyn WalletProvider>)
            }
            WalletKind::None => None,
        }
    }
}

/// MetaMask, found in the `ethereum` slot with `isMetaMask` set.
#[derive(Clone)]
pub struct MetaMaskProvider {
    inner: Arc<dyn Eip1193>,
}

impl fmt::Debug for MetaMaskProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaMaskProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl WalletProvider for MetaMaskProvider {
    fn kind(&self) -> WalletKind {
        WalletKind::MetaMask
    }

    fn transport(&self) -> &Arc<dyn Eip1193> {
        &self.inner
    }

    fn detect(env: &InjectedProviders) -> Option<Self> {
        env.ethereum()
            .filter(|p| p.is_metamask())
            .map(|p| Self {
                inner: Arc::clone(p),
            })
    }
}

/// Binance Chain Wallet, found in the `BinanceChain` slot.
#[derive(Clone)]
pub struct BinanceProvider {
    inner: Arc<dyn Eip1193>,
}

impl fmt::Debug for BinanceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinanceProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl WalletProvider for BinanceProvider {
    fn kind(&self) -> WalletKind {
        WalletKind::Binance
    }

    fn transport(&self) -> &Arc<dyn Eip1193> {
        &self.inner
    }

    fn detect(env: &InjectedProviders) -> Option<Self> {
        env.binance_chain().map(|p| Self {
            inner: Arc::clone(p),
        })
    }
}
