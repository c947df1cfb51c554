use std::time::Duration;

use crate::types::TxHash;

pub type Result<T, E = ExoError> = std::result::Result<T, E>;

#[derive(Debug, derive_more::Display, thiserror::Error)]
pub enum ExoError {
    /// Missing or malformed endpoint, key or address. Fatal before any
    /// network activity.
    #[display(fmt = "Err invalid config: {}", _0)]
    Config(String),

    /// The node rejected a request or a transaction.
    #[display(fmt = "Err rpc failure: {}", _0)]
    Rpc(String),

    /// The node could not estimate gas, which usually means the call reverts.
    #[display(fmt = "Err gas estimation failed: {}", _0)]
    Estimation(String),

    /// No receipt within the bound. The transaction may still confirm later.
    #[display(fmt = "Err no receipt for {} within {:?}", hash, waited)]
    Timeout { hash: TxHash, waited: Duration },

    #[display(fmt = "Err signing failed: {}", _0)]
    Signing(String),

    /// A read-only call reverted.
    #[display(fmt = "Err call reverted: {}", _0)]
    Call(String),

    #[display(fmt = "Err invalid abi encoding/decoding: {}", _0)]
    Abi(String),

    #[display(fmt = "Err not found: {}", _0)]
    NotFound(String),

    #[display(fmt = "Err: {}", _0)]
    Custom(String),
}

impl ExoError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExoError::Timeout { .. })
    }

    /// Short name of the error class, used in logs and phase diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExoError::Config(_) => "configuration",
            ExoError::Rpc(_) => "rpc",
            ExoError::Estimation(_) => "estimation",
            ExoError::Timeout { .. } => "timeout",
            ExoError::Signing(_) => "signing",
            ExoError::Call(_) => "call",
            ExoError::Abi(_) => "abi",
            ExoError::NotFound(_) => "not-found",
            ExoError::Custom(_) => "custom",
        }
    }
}
