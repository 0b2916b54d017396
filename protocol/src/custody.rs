//! # Custody: Asset Transfer Capability
//!
//! The ledger never moves value by itself. It asks an
//! [`AssetTransferAgent`] to pull funds into custody on deposit and to push
//! them back out on withdraw. How that happens (an on-chain token transfer,
//! a bank rail, a test double) is the agent's business. From the ledger's
//! side the contract is binary: `Ok(())` means the value moved, any `Err`
//! means it did not and the enclosing operation must fail.
//!
//! [`AssetBank`] is the in-memory agent used by the devnet node and the
//! test suites. It tracks every holder's external balance per asset,
//! custody included, so tests can check that the books actually balance.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::asset::AssetId;
use crate::identity::ParticipantId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an external asset movement did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The source did not hold enough of the asset.
    #[error("source {holder} holds {available} of asset {asset}, needs {requested}")]
    InsufficientFunds {
        /// Holder that was debited.
        holder: ParticipantId,
        /// Asset being moved.
        asset: AssetId,
        /// What the holder had.
        available: u64,
        /// What the transfer needed.
        requested: u64,
    },

    /// Crediting the destination would overflow `u64`.
    #[error("destination {holder} would overflow on asset {asset}")]
    Overflow {
        /// Holder that was credited.
        holder: ParticipantId,
        /// Asset being moved.
        asset: AssetId,
    },

    /// The settlement layer refused or could not process the transfer.
    #[error("transfer rejected: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// AssetTransferAgent
// ---------------------------------------------------------------------------

/// Capability to move assets in and out of the ledger's custody.
pub trait AssetTransferAgent {
    /// Moves `amount` of `asset` from `from` into `custody`.
    fn pull_into(
        &mut self,
        custody: &ParticipantId,
        from: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> Result<(), TransferError>;

    /// Moves `amount` of `asset` from `custody` out to `to`.
    fn push_from(
        &mut self,
        custody: &ParticipantId,
        to: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> Result<(), TransferError>;
}

impl<T: AssetTransferAgent + ?Sized> AssetTransferAgent for Box<T> {
    fn pull_into(
        &mut self,
        custody: &ParticipantId,
        from: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> Result<(), TransferError> {
        (**self).pull_into(custody, from, asset, amount)
    }

    fn push_from(
        &mut self,
        custody: &ParticipantId,
        to: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> Result<(), TransferError> {
        (**self).push_from(custody, to, asset, amount)
    }
}

// ---------------------------------------------------------------------------
// AssetBank
// ---------------------------------------------------------------------------

/// In-memory settlement layer: external holdings per `(holder, asset)`.
///
/// Transfers are atomic. A failed transfer leaves both sides untouched.
/// Outbound pushes can be switched off with [`AssetBank::set_outbound_frozen`]
/// to simulate a settlement outage.
#[derive(Clone, Debug, Default)]
pub struct AssetBank {
    holdings: BTreeMap<(ParticipantId, AssetId), u64>,
    outbound_frozen: bool,
}

impl AssetBank {
    /// Creates an empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a bank from persisted holdings.
    pub fn from_holdings(holdings: BTreeMap<(ParticipantId, AssetId), u64>) -> Self {
        Self {
            holdings,
            outbound_frozen: false,
        }
    }

    /// Credits `amount` of `asset` to `holder` out of thin air.
    ///
    /// Devnet faucet and test seeding only. Nothing in the ledger calls it.
    pub fn mint(
        &mut self,
        holder: ParticipantId,
        asset: AssetId,
        amount: u64,
    ) -> Result<u64, TransferError> {
        let entry = self.holdings.entry((holder, asset)).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or(TransferError::Overflow { holder, asset })?;
        Ok(*entry)
    }

    /// External holding of `holder` in `asset`, zero if never credited.
    pub fn holdings_of(&self, holder: &ParticipantId, asset: &AssetId) -> u64 {
        self.holdings.get(&(*holder, *asset)).copied().unwrap_or(0)
    }

    /// Total of `asset` held by `custody`.
    pub fn custody_total(&self, custody: &ParticipantId, asset: &AssetId) -> u64 {
        self.holdings_of(custody, asset)
    }

    /// All non-zero holdings, for persistence.
    pub fn holdings(&self) -> &BTreeMap<(ParticipantId, AssetId), u64> {
        &self.holdings
    }

    /// Makes every subsequent `push_from` fail (or succeed again).
    pub fn set_outbound_frozen(&mut self, frozen: bool) {
        self.outbound_frozen = frozen;
    }

    fn move_funds(
        &mut self,
        from: &ParticipantId,
        to: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> Result<(), TransferError> {
        if from == to {
            return Err(TransferError::Rejected(format!(
                "self-transfer by {from} refused"
            )));
        }
        let available = self.holdings_of(from, asset);
        if available < amount {
            return Err(TransferError::InsufficientFunds {
                holder: *from,
                asset: *asset,
                available,
                requested: amount,
            });
        }
        let credited = self
            .holdings_of(to, asset)
            .checked_add(amount)
            .ok_or(TransferError::Overflow {
                holder: *to,
                asset: *asset,
            })?;

        self.set_holding(*from, *asset, available - amount);
        self.set_holding(*to, *asset, credited);
        Ok(())
    }

    fn set_holding(&mut self, holder: ParticipantId, asset: AssetId, amount: u64) {
        if amount == 0 {
            self.holdings.remove(&(holder, asset));
        } else {
            self.holdings.insert((holder, asset), amount);
        }
    }
}

impl AssetTransferAgent for AssetBank {
    fn pull_into(
        &mut self,
        custody: &ParticipantId,
        from: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> Result<(), TransferError> {
        self.move_funds(from, custody, asset, amount)
    }

    fn push_from(
        &mut self,
        custody: &ParticipantId,
        to: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> Result<(), TransferError> {
        if self.outbound_frozen {
            return Err(TransferError::Rejected("outbound transfers frozen".into()));
        }
        self.move_funds(custody, to, asset, amount)
    }
}
