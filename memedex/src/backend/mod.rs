//! Backend API client.
//!
//! The backend keeps the wallet-connection audit log, the memecoin
//! registry, trade orders and portfolios. The session core only ever
//! sends the connection record, and it does so from a detached task
//! (see [`spawn_connection_record`]) so a slow or failing backend can
//! never hold up or undo a wallet operation.

mod http;
mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::BackendResult;

pub use http::{HttpBackend, HttpBackendBuilder};
pub use types::{
    CreateMemecoinRequest, Memecoin, MemecoinCreated, Portfolio, TokenPrice, Trade, TradeReceipt,
    TradeRequest, TradeStatus, TradeType, WalletConnection,
};

/// Backend operations used by the dApp.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /api/wallet/connect`.
    async fn record_connection(&self, record: &WalletConnection) -> BackendResult<()>;

    /// `POST /api/memecoin/create`.
    async fn create_memecoin(&self, request: &CreateMemecoinRequest)
    -> BackendResult<MemecoinCreated>;

    /// `POST /api/trade`.
    async fn submit_trade(&self, request: &TradeRequest) -> BackendResult<TradeReceipt>;

    /// `GET /api/wallet/{address}/portfolio`.
    async fn portfolio(&self, address: &str) -> BackendResult<Portfolio>;

    /// `GET /api/wallet/{address}/trades`.
    async fn trades(&self, address: &str) -> BackendResult<Vec<Trade>>;

    /// `GET /api/crypto/prices?symbols=..`.
    async fn prices(&self, symbols: &[&str]) -> BackendResult<HashMap<String, TokenPrice>>;
}

/// Send a connection record without waiting for it.
///
/// The returned handle may be dropped; any failure is logged here and
/// goes nowhere else.
pub fn spawn_connection_record(
    backend: Arc<dyn Backend>,
    record: WalletConnection,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match backend.record_connection(&record).await {
            Ok(()) => debug!(
                address = %record.address,
                wallet = %record.wallet_type,
                chain_id = record.chain_id,
                "wallet connection recorded"
            ),
            Err(e) => warn!(
                address = %record.address,
                wallet = %record.wallet_type,
                error = %e,
                "failed to record wallet connection"
            ),
        }
    })
}

#[cfg(test)]
pub(crate) mod recording {
    //! Backend double that records connection notices.

    use super::*;
    use crate::error::BackendError;
    use tokio::sync::mpsc;

    /// Forwards every connection record to a channel; optionally fails.
    #[derive(Debug)]
    pub(crate) struct RecordingBackend {
        tx: mpsc::UnboundedSender<WalletConnection>,
        fail: bool,
    }

    impl RecordingBackend {
        pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<WalletConnection>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx, fail: false }), rx)
        }

        pub(crate) fn failing() -> (Arc<Self>, mpsc::UnboundedReceiver<WalletConnection>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx, fail: true }), rx)
        }
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn record_connection(&self, record: &WalletConnection) -> BackendResult<()> {
            let _ = self.tx.send(record.clone());
            if self.fail {
                Err(BackendError::Unreachable("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn create_memecoin(
            &self,
            _request: &CreateMemecoinRequest,
        ) -> BackendResult<MemecoinCreated> {
            Err(BackendError::Unreachable("not recorded".into()))
        }

        async fn submit_trade(&self, _request: &TradeRequest) -> BackendResult<TradeReceipt> {
            Err(BackendError::Unreachable("not recorded".into()))
        }

        async fn portfolio(&self, _address: &str) -> BackendResult<Portfolio> {
            Err(BackendError::Unreachable("not recorded".into()))
        }

        async fn trades(&self, _address: &str) -> BackendResult<Vec<Trade>> {
            Ok(Vec::new())
        }

        async fn prices(&self, _symbols: &[&str]) -> BackendResult<HashMap<String, TokenPrice>> {
            Ok(HashMap::new())
        }
    }
}
