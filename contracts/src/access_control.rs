//! # Access Controller
//!
//! Holds the ledger's single administrator and its emergency pause flag.
//!
//! ## Security Model
//!
//! - **One administrator.** Exactly one identity holds authority at a time,
//!   and it is never the null identifier. Authority moves only by an
//!   explicit hand-over from the current holder.
//! - **Pause is a circuit breaker.** While paused, deposits and withdrawals
//!   are refused. Administrative operations (allow-listing, pausing,
//!   unpausing, hand-over) keep working so the administrator can recover.
//! - **Guards have no side effects.** [`AccessController::require_not_paused`]
//!   and [`AccessController::require_authority`] only inspect state.

use coffer_protocol::identity::ParticipantId;
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};

/// Administrator identity plus pause flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessController {
    administrator: ParticipantId,
    paused: bool,
}

impl AccessController {
    /// Creates an unpaused controller with `administrator` holding authority.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidIdentity`] if `administrator` is null.
    pub fn new(administrator: ParticipantId) -> LedgerResult<Self> {
        Self::from_parts(administrator, false)
    }

    /// Rebuilds a controller from persisted fields.
    pub fn from_parts(administrator: ParticipantId, paused: bool) -> LedgerResult<Self> {
        if administrator.is_null() {
            return Err(LedgerError::InvalidIdentity);
        }
        Ok(Self {
            administrator,
            paused,
        })
    }

    /// Current administrator.
    pub fn administrator(&self) -> ParticipantId {
        self.administrator
    }

    /// `true` while deposits and withdrawals are suspended.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    // -----------------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------------

    /// Fails with [`LedgerError::SystemPaused`] while paused.
    pub fn require_not_paused(&self) -> LedgerResult<()> {
        if self.paused {
            debug!("operation refused: system paused");
            return Err(LedgerError::SystemPaused);
        }
        Ok(())
    }

    /// Fails with [`LedgerError::Unauthorized`] unless `caller` is the
    /// administrator.
    pub fn require_authority(&self, caller: &ParticipantId) -> LedgerResult<()> {
        if *caller != self.administrator {
            debug!(%caller, "operation refused: caller lacks authority");
            return Err(LedgerError::Unauthorized { caller: *caller });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Privileged operations
    // -----------------------------------------------------------------------

    /// Hands authority to `new_holder`. Returns the previous administrator.
    ///
    /// The caller check runs first, so an outsider learns nothing about the
    /// validity of the proposed holder.
    pub fn transfer_authority(
        &mut self,
        caller: &ParticipantId,
        new_holder: ParticipantId,
    ) -> LedgerResult<ParticipantId> {
        self.require_authority(caller)?;
        if new_holder.is_null() {
            return Err(LedgerError::InvalidIdentity);
        }
        let previous = std::mem::replace(&mut self.administrator, new_holder);
        info!(%previous, new = %new_holder, "administrative authority transferred");
        Ok(previous)
    }

    /// Suspends deposits and withdrawals. Returns `false` if already paused.
    pub fn pause(&mut self, caller: &ParticipantId) -> LedgerResult<bool> {
        self.require_authority(caller)?;
        let changed = !self.paused;
        self.paused = true;
        if changed {
            info!(by = %caller, "ledger paused");
        }
        Ok(changed)
    }

    /// Resumes deposits and withdrawals. Returns `false` if not paused.
    pub fn unpause(&mut self, caller: &ParticipantId) -> LedgerResult<bool> {
        self.require_authority(caller)?;
        let changed = self.paused;
        self.paused = false;
        if changed {
            info!(by = %caller, "ledger unpaused");
        }
        Ok(changed)
    }
}
