//! Unified error types for memedex.
//!
//! Each concern has its own error enum ([`WalletError`], [`BackendError`],
//! [`ConfigError`]); all of them convert into the crate-level [`Error`].

use crate::session::WalletKind;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for memedex operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wallet session error.
    #[error("wallet: {0}")]
    Wallet(#[from] WalletError),

    /// Backend API error.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for memedex operations.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Wallet Errors
// ============================================================================

/// Error type for wallet session operations.
///
/// Every variant except [`WalletError::ConnectInProgress`] leaves the
/// session exactly as it was before the failed call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// The provider for this wallet kind is not present.
    #[error("{0} wallet is not installed")]
    WalletUnavailable(WalletKind),

    /// The user declined the provider prompt.
    #[error("request rejected by user: {message}")]
    UserRejected {
        /// Message reported by the provider.
        message: String,
    },

    /// Any other provider failure, carrying the raw code and message.
    #[error("provider error {code}: {message}")]
    Provider {
        /// EIP-1193 / JSON-RPC error code.
        code: i64,
        /// Message reported by the provider.
        message: String,
    },

    /// The target chain is not in the network registry.
    #[error("unsupported network: chain {0}")]
    UnsupportedNetwork(u64),

    /// The operation requires a connected session.
    #[error("no wallet connected")]
    NotConnected,

    /// A connect for this wallet kind is already running.
    #[error("a {0} connection request is already pending")]
    ConnectInProgress(WalletKind),

    /// The provider added the chain but did not switch to it.
    #[error("provider stayed on chain {actual} after adding chain {expected}")]
    ChainNotConfirmed {
        /// Chain the switch asked for.
        expected: u64,
        /// Chain the provider reported afterwards.
        actual: u64,
    },

    /// The provider answered with a payload we could not interpret.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl WalletError {
    /// Create a provider error.
    #[inline]
    pub fn provider(code: i64, message: impl Into<String>) -> Self {
        Self::Provider {
            code,
            message: message.into(),
        }
    }

    /// Create a malformed response error.
    #[inline]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Whether this error came from the user declining a prompt.
    #[must_use]
    pub const fn is_user_rejection(&self) -> bool {
        matches!(self, Self::UserRejected { .. })
    }
}

/// Result type for wallet operations.
pub type WalletResult<T> = std::result::Result<T, WalletError>;

// ============================================================================
// Backend Errors
// ============================================================================

/// Error type for backend API calls.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The request never got a response.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, or the backend's `detail` field.
        body: String,
    },

    /// The response body did not match the expected shape.
    #[error("decode: {0}")]
    Decode(String),

    /// The endpoint URL could not be built.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_error_messages() {
        let err = WalletError::WalletUnavailable(WalletKind::MetaMask);
        assert_eq!(err.to_string(), "MetaMask wallet is not installed");

        let err = WalletError::provider(-32000, "boom");
        assert_eq!(err.to_string(), "provider error -32000: boom");

        let err = WalletError::UnsupportedNetwork(250);
        assert_eq!(err.to_string(), "unsupported network: chain 250");
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = WalletError::NotConnected.into();
        assert!(matches!(err, Error::Wallet(WalletError::NotConnected)));
        assert_eq!(err.to_string(), "wallet: no wallet connected");

        let err: Error = ConfigError::invalid("bad url").into();
        assert_eq!(err.to_string(), "config: invalid: bad url");
    }

    #[test]
    fn test_user_rejection_flag() {
        let err = WalletError::UserRejected {
            message: "User denied account authorization".into(),
        };
        assert!(err.is_user_rejection());
        assert!(!WalletError::NotConnected.is_user_rejection());
    }
}
