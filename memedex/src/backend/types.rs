//! Request and response shapes of the memedex backend API.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::session::WalletKind;

/// Body of `POST /api/wallet/connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConnection {
    /// Connected address.
    pub address: String,
    /// `"metamask"` or `"binance"`.
    pub wallet_type: WalletKind,
    /// Chain the wallet was on when it connected.
    pub chain_id: u64,
}

/// Body of `POST /api/memecoin/create`, sent after a token deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMemecoinRequest {
    /// Token name.
    pub name: String,
    /// Token symbol.
    pub symbol: String,
    /// Deployed contract address.
    pub contract_address: String,
    /// Total supply, as a decimal string.
    pub total_supply: String,
    /// Token decimals.
    pub decimals: u8,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Deployer address.
    pub creator_address: String,
    /// Chain the token was deployed on.
    pub chain_id: u64,
    /// Deployment transaction hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

/// A memecoin record as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memecoin {
    /// Backend id.
    #[serde(default)]
    pub id: String,
    /// Token name.
    pub name: String,
    /// Token symbol.
    pub symbol: String,
    /// Contract address.
    pub contract_address: String,
    /// Total supply.
    pub total_supply: String,
    /// Token decimals.
    pub decimals: u8,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Deployer address.
    pub creator_address: String,
    /// Chain id.
    pub chain_id: u64,
    /// Deployment transaction hash.
    #[serde(default)]
    pub transaction_hash: Option<String>,
    /// Creation timestamp, as sent by the backend.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Response of `POST /api/memecoin/create`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemecoinCreated {
    /// Backend message.
    pub message: String,
    /// Stored record.
    pub memecoin: Memecoin,
}

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        })
    }
}

/// Body of `POST /api/trade`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    /// Trader address.
    pub wallet_address: String,
    /// Token symbol.
    pub token_symbol: String,
    /// Token contract address.
    pub token_address: String,
    /// Buy or sell.
    pub trade_type: TradeType,
    /// Amount of tokens.
    pub amount: f64,
}

/// Lifecycle of a trade order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    /// Accepted, not settled.
    #[default]
    Pending,
    /// Settled.
    Completed,
    /// Rejected or reverted.
    Failed,
}

/// A trade as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Backend id.
    pub id: String,
    /// Trader address.
    pub wallet_address: String,
    /// Token symbol.
    pub token_symbol: String,
    /// Token contract address.
    pub token_address: String,
    /// Buy or sell.
    pub trade_type: TradeType,
    /// Amount of tokens.
    pub amount: f64,
    /// Price at order time.
    #[serde(default)]
    pub price_usd: f64,
    /// Settlement transaction hash.
    #[serde(default)]
    pub transaction_hash: Option<String>,
    /// Order status.
    #[serde(default)]
    pub status: TradeStatus,
    /// Creation timestamp, as sent by the backend.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Response of `POST /api/trade`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeReceipt {
    /// Backend message.
    pub message: String,
    /// Id of the created order.
    pub trade_id: String,
}

/// Response of `GET /api/wallet/{address}/trades`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct TradeList {
    pub trades: Vec<Trade>,
}

/// Response of `GET /api/wallet/{address}/portfolio`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    /// Owner address.
    pub wallet_address: String,
    /// Token holdings, backend-defined shape.
    #[serde(default)]
    pub tokens: Vec<serde_json::Value>,
    /// Total value in USD.
    #[serde(default)]
    pub total_value_usd: f64,
}

/// One entry of `GET /api/crypto/prices`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPrice {
    /// Price in USD.
    pub usd: f64,
    /// 24h change in percent.
    #[serde(default)]
    pub usd_24h_change: Option<f64>,
}
