//! Static network registry.
//!
//! Maps chain ids to the descriptor handed to `wallet_addEthereumChain`
//! when a provider does not know the chain yet. Populated once at startup
//! and read-only afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Decimals of every native currency we register.
pub const NATIVE_CURRENCY_DECIMALS: u8 = 18;

/// Chain id of Ethereum Mainnet.
pub const ETHEREUM_MAINNET: u64 = 1;
/// Chain id of BNB Smart Chain.
pub const BINANCE_SMART_CHAIN: u64 = 56;
/// Chain id of Polygon PoS.
pub const POLYGON: u64 = 137;

/// Reference data for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// Human readable chain name.
    pub name: String,
    /// Native currency symbol (e.g. `ETH`).
    pub native_currency_symbol: String,
    /// Public JSON-RPC endpoint.
    pub rpc_url: String,
}

impl NetworkDescriptor {
    /// Create a descriptor.
    pub fn new(
        name: impl Into<String>,
        native_currency_symbol: impl Into<String>,
        rpc_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            native_currency_symbol: native_currency_symbol.into(),
            rpc_url: rpc_url.into(),
        }
    }

    /// EIP-3085 `wallet_addEthereumChain` parameter for this chain.
    #[must_use]
    pub fn add_chain_params(&self, chain_id: u64) -> Value {
        json!({
            "chainId": chain_id_to_hex(chain_id),
            "chainName": self.name,
            "nativeCurrency": {
                "name": self.native_currency_symbol,
                "symbol": self.native_currency_symbol,
                "decimals": NATIVE_CURRENCY_DECIMALS,
            },
            "rpcUrls": [self.rpc_url],
        })
    }
}

/// Chain id → descriptor lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRegistry {
    networks: BTreeMap<u64, NetworkDescriptor>,
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl NetworkRegistry {
    /// An empty registry.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            networks: BTreeMap::new(),
        }
    }

    /// Registry with Ethereum Mainnet, BNB Smart Chain and Polygon.
    #[must_use]
    pub fn builtin() -> Self {
        Self::empty()
            .with(
                ETHEREUM_MAINNET,
                NetworkDescriptor::new("Ethereum Mainnet", "ETH", "https://mainnet.infura.io/v3/"),
            )
            .with(
                BINANCE_SMART_CHAIN,
                NetworkDescriptor::new(
                    "Binance Smart Chain",
                    "BNB",
                    "https://bsc-dataseed.binance.org/",
                ),
            )
            .with(
                POLYGON,
                NetworkDescriptor::new("Polygon", "MATIC", "https://polygon-rpc.com/"),
            )
    }

    /// Add or replace a network.
    #[must_use]
    pub fn with(mut self, chain_id: u64, descriptor: NetworkDescriptor) -> Self {
        self.networks.insert(chain_id, descriptor);
        self
    }

    /// Look up a chain.
    #[must_use]
    pub fn get(&self, chain_id: u64) -> Option<&NetworkDescriptor> {
        self.networks.get(&chain_id)
    }

    /// Whether the chain is registered.
    #[must_use]
    pub fn contains(&self, chain_id: u64) -> bool {
        self.networks.contains_key(&chain_id)
    }

    /// Iterate registered networks in chain id order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &NetworkDescriptor)> {
        self.networks.iter().map(|(id, d)| (*id, d))
    }

    /// Number of registered networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether no network is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

/// Encode a chain id the way EIP-1193 providers expect it (`0x38`).
#[must_use]
pub fn chain_id_to_hex(chain_id: u64) -> String {
    format!("{chain_id:#x}")
}

/// Decode a chain id pushed by a provider.
///
/// Accepts base-16 strings (`"0x89"`), decimal strings (`"137"`) and JSON
/// numbers; some wallets emit each of these.
#[must_use]
pub fn parse_chain_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}
