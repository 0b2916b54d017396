//! # Custody Ledger Contract
//!
//! Records how much of each approved asset every participant has placed in
//! custody, and moves value in and out through an [`AssetTransferAgent`].
//!
//! ## Accounting Rules
//!
//! - **Deposit credits only received funds.** The pull into custody happens
//!   first; the balance is credited after it succeeds. A failed pull leaves
//!   the books untouched.
//! - **Withdraw debits before paying out.** The balance is decremented
//!   before the push out of custody. If the push fails the decrement is
//!   restored and the withdrawal fails as a whole.
//! - **Guards run in a fixed order.** Pause, allow-list, participant,
//!   amount, then balance. A paused ledger therefore reports
//!   [`LedgerError::SystemPaused`] for any input.
//! - **Notifications follow success.** Nothing is emitted for a rejected or
//!   rolled-back operation.
//!
//! Every mutating method takes `&mut self`; a ledger value cannot be
//! re-entered from its own agent or sink.

use std::collections::{BTreeMap, BTreeSet};

use coffer_protocol::asset::AssetId;
use coffer_protocol::config::CUSTODY_ACCOUNT_LABEL;
use coffer_protocol::custody::AssetTransferAgent;
use coffer_protocol::events::{LedgerEvent, Notification, NotificationSink};
use coffer_protocol::identity::ParticipantId;
use coffer_protocol::storage::LedgerState;
use tracing::{debug, info, warn};

use crate::access_control::AccessController;
use crate::error::{LedgerError, LedgerResult};

/// The custodial balance ledger.
///
/// Generic over the transfer capability `A` and the notification sink `N`
/// so tests can plug in doubles without boxing.
#[derive(Debug)]
pub struct CustodyLedger<A, N> {
    access: AccessController,
    custody: ParticipantId,
    allowed_assets: BTreeSet<AssetId>,
    balances: BTreeMap<(ParticipantId, AssetId), u64>,
    agent: A,
    sink: N,
}

impl<A: AssetTransferAgent, N: NotificationSink> CustodyLedger<A, N> {
    /// Creates an empty, unpaused ledger administered by `administrator`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidIdentity`] if `administrator` is null.
    pub fn new(administrator: ParticipantId, agent: A, sink: N) -> LedgerResult<Self> {
        Ok(Self {
            access: AccessController::new(administrator)?,
            custody: ParticipantId::derive(CUSTODY_ACCOUNT_LABEL),
            allowed_assets: BTreeSet::new(),
            balances: BTreeMap::new(),
            agent,
            sink,
        })
    }

    /// Rebuilds a ledger from a persisted snapshot.
    ///
    /// Zero balance entries are dropped. A balance held in an asset that is
    /// not allow-listed means the snapshot is inconsistent and is refused
    /// with [`LedgerError::AssetNotAllowed`].
    pub fn restore(state: LedgerState, agent: A, sink: N) -> LedgerResult<Self> {
        let access = AccessController::from_parts(state.administrator, state.paused)?;
        if let Some(((_, asset), _)) = state
            .balances
            .iter()
            .find(|((_, asset), amount)| **amount > 0 && !state.allowed_assets.contains(asset))
        {
            return Err(LedgerError::AssetNotAllowed(*asset));
        }

        let mut balances = state.balances;
        balances.retain(|_, amount| *amount > 0);
        info!(
            administrator = %access.administrator(),
            paused = access.is_paused(),
            assets = state.allowed_assets.len(),
            entries = balances.len(),
            "custody ledger restored"
        );

        Ok(Self {
            access,
            custody: ParticipantId::derive(CUSTODY_ACCOUNT_LABEL),
            allowed_assets: state.allowed_assets,
            balances,
            agent,
            sink,
        })
    }

    /// Detached copy of the ledger's state for persistence.
    pub fn snapshot(&self) -> LedgerState {
        LedgerState {
            administrator: self.access.administrator(),
            paused: self.access.is_paused(),
            allowed_assets: self.allowed_assets.clone(),
            balances: self.balances.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    /// Adds `asset` to the allow-list. Returns `true` if it was not already
    /// there.
    pub fn allow_asset(&mut self, caller: &ParticipantId, asset: AssetId) -> LedgerResult<bool> {
        self.access.require_authority(caller)?;
        if asset.is_null() {
            return Err(LedgerError::InvalidIdentity);
        }
        let added = self.allowed_assets.insert(asset);
        if added {
            info!(%asset, by = %caller, "asset allowed");
            self.notify(LedgerEvent::AssetAllowed { asset });
        } else {
            debug!(%asset, "asset already allowed");
        }
        Ok(added)
    }

    /// Pulls `amount` of `asset` from `participant` into custody and credits
    /// it. Returns the new recorded balance.
    pub fn deposit(
        &mut self,
        participant: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> LedgerResult<u64> {
        self.check_movement(participant, asset, amount)?;

        let current = self.balance_of(participant, asset);
        let credited = current
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow { current, amount })?;

        if let Err(e) = self
            .agent
            .pull_into(&self.custody, participant, asset, amount)
        {
            warn!(%participant, %asset, amount, error = %e, "deposit pull failed");
            return Err(LedgerError::TransferFailed(e));
        }

        self.balances.insert((*participant, *asset), credited);
        info!(%participant, %asset, amount, balance = credited, "deposit completed");
        self.notify(LedgerEvent::DepositCompleted {
            participant: *participant,
            asset: *asset,
            amount,
        });
        Ok(credited)
    }

    /// Debits `amount` of `asset` from `participant` and pushes it out of
    /// custody. Returns the remaining recorded balance.
    pub fn withdraw(
        &mut self,
        participant: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> LedgerResult<u64> {
        self.check_movement(participant, asset, amount)?;

        let available = self.balance_of(participant, asset);
        let remaining = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                available,
                requested: amount,
            })?;

        self.set_balance(*participant, *asset, remaining);

        if let Err(e) = self.agent.push_from(&self.custody, participant, asset, amount) {
            self.set_balance(*participant, *asset, available);
            warn!(%participant, %asset, amount, error = %e, "withdraw push failed, debit rolled back");
            return Err(LedgerError::TransferFailed(e));
        }

        info!(%participant, %asset, amount, balance = remaining, "withdraw completed");
        self.notify(LedgerEvent::WithdrawCompleted {
            participant: *participant,
            asset: *asset,
            amount,
        });
        Ok(remaining)
    }

    // -----------------------------------------------------------------------
    // Administrative passthroughs
    // -----------------------------------------------------------------------

    /// Suspends deposits and withdrawals. See [`AccessController::pause`].
    pub fn pause(&mut self, caller: &ParticipantId) -> LedgerResult<bool> {
        let changed = self.access.pause(caller)?;
        if changed {
            self.notify(LedgerEvent::Paused { by: *caller });
        }
        Ok(changed)
    }

    /// Resumes deposits and withdrawals. See [`AccessController::unpause`].
    pub fn unpause(&mut self, caller: &ParticipantId) -> LedgerResult<bool> {
        let changed = self.access.unpause(caller)?;
        if changed {
            self.notify(LedgerEvent::Unpaused { by: *caller });
        }
        Ok(changed)
    }

    /// Hands administrative authority to `new_holder`.
    pub fn transfer_authority(
        &mut self,
        caller: &ParticipantId,
        new_holder: ParticipantId,
    ) -> LedgerResult<ParticipantId> {
        let previous = self.access.transfer_authority(caller, new_holder)?;
        self.notify(LedgerEvent::AuthorityTransferred {
            previous,
            new: new_holder,
        });
        Ok(previous)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Recorded balance, zero if the participant never deposited `asset`.
    pub fn balance_of(&self, participant: &ParticipantId, asset: &AssetId) -> u64 {
        self.balances
            .get(&(*participant, *asset))
            .copied()
            .unwrap_or(0)
    }

    /// Every non-zero balance held by `participant`.
    pub fn balances_of(&self, participant: &ParticipantId) -> BTreeMap<AssetId, u64> {
        self.balances
            .iter()
            .filter(|((p, _), _)| p == participant)
            .map(|((_, asset), amount)| (*asset, *amount))
            .collect()
    }

    /// Sum of all recorded balances in `asset`.
    pub fn total_recorded(&self, asset: &AssetId) -> u64 {
        self.balances
            .iter()
            .filter(|((_, a), _)| a == asset)
            .fold(0u64, |acc, (_, amount)| acc.saturating_add(*amount))
    }

    pub fn is_asset_allowed(&self, asset: &AssetId) -> bool {
        self.allowed_assets.contains(asset)
    }

    pub fn allowed_assets(&self) -> &BTreeSet<AssetId> {
        &self.allowed_assets
    }

    pub fn access(&self) -> &AccessController {
        &self.access
    }

    pub fn administrator(&self) -> ParticipantId {
        self.access.administrator()
    }

    pub fn is_paused(&self) -> bool {
        self.access.is_paused()
    }

    /// The ledger's own account at the settlement layer.
    pub fn custody_account(&self) -> ParticipantId {
        self.custody
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// Mutable access to the transfer agent, for settlement-side setup such
    /// as faucet minting. Never touches the books.
    pub fn agent_mut(&mut self) -> &mut A {
        &mut self.agent
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// The four guards shared by deposit and withdraw, in order. The
    /// custody account never holds a recorded balance of its own.
    fn check_movement(
        &self,
        participant: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> LedgerResult<()> {
        self.access.require_not_paused()?;
        if !self.allowed_assets.contains(asset) {
            return Err(LedgerError::AssetNotAllowed(*asset));
        }
        if participant.is_null() || *participant == self.custody {
            return Err(LedgerError::InvalidIdentity);
        }
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        Ok(())
    }

    fn set_balance(&mut self, participant: ParticipantId, asset: AssetId, amount: u64) {
        if amount == 0 {
            self.balances.remove(&(participant, asset));
        } else {
            self.balances.insert((participant, asset), amount);
        }
    }

    fn notify(&self, event: LedgerEvent) {
        self.sink.emit(Notification::new(event));
    }
}
