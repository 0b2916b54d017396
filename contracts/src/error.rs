//! # Ledger Errors
//!
//! One error type for every way a ledger or access-control operation can be
//! refused. Every variant is returned before any state change, or after the
//! operation has been fully rolled back, so a caller that sees an `Err` can
//! assume the ledger is exactly as it was.

use coffer_protocol::asset::AssetId;
use coffer_protocol::custody::TransferError;
use coffer_protocol::identity::ParticipantId;
use thiserror::Error;

/// Errors produced by [`AccessController`](crate::access_control::AccessController)
/// and [`CustodyLedger`](crate::custody_ledger::CustodyLedger).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The caller does not hold administrative authority.
    #[error("unauthorized: {caller} is not the administrator")]
    Unauthorized {
        /// Identity that attempted the privileged operation.
        caller: ParticipantId,
    },

    /// Deposits and withdrawals are suspended.
    #[error("system is paused")]
    SystemPaused,

    /// The asset type is not on the allow-list.
    #[error("asset not allowed: {0}")]
    AssetNotAllowed(AssetId),

    /// A participant or asset identifier was the null identifier.
    #[error("invalid identity: null identifier")]
    InvalidIdentity,

    /// Deposits and withdrawals must move a positive amount.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The recorded balance does not cover the withdrawal.
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Recorded balance.
        available: u64,
        /// Amount asked for.
        requested: u64,
    },

    /// Crediting the deposit would overflow the recorded balance.
    #[error("balance overflow: {current} + {amount} exceeds u64::MAX")]
    BalanceOverflow {
        /// Recorded balance before the deposit.
        current: u64,
        /// Amount being deposited.
        amount: u64,
    },

    /// The external transfer capability reported failure.
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] TransferError),
}

impl LedgerError {
    /// Stable snake_case name of the variant, used as a metrics label and in
    /// RPC error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Unauthorized { .. } => "unauthorized",
            LedgerError::SystemPaused => "system_paused",
            LedgerError::AssetNotAllowed(_) => "asset_not_allowed",
            LedgerError::InvalidIdentity => "invalid_identity",
            LedgerError::ZeroAmount => "zero_amount",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::BalanceOverflow { .. } => "balance_overflow",
            LedgerError::TransferFailed(_) => "transfer_failed",
        }
    }
}

/// Convenience alias used throughout the contracts crate.
pub type LedgerResult<T> = Result<T, LedgerError>;
