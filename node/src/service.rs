//! # Ledger Service
//!
//! The node's single owner of the live [`CustodyLedger`]. Every request
//! handler goes through a [`LedgerService`], which:
//!
//! 1. takes the ledger lock for the whole operation, external transfer
//!    included, so operations are strictly serialized;
//! 2. runs the ledger operation;
//! 3. on success persists the snapshot and settlement holdings to sled
//!    before releasing the lock;
//! 4. records metrics either way.
//!
//! A committed operation is never reported as failed. If its snapshot
//! cannot be written the service turns degraded: the result is still
//! returned, and further mutations are refused until a retried write
//! succeeds.
//!
//! Notifications leave the ledger through a [`FanoutSink`]: one structured
//! log line per event plus a broadcast to WebSocket subscribers.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;

use coffer_contracts::{CustodyLedger, LedgerError, LedgerResult};
use coffer_protocol::asset::AssetId;
use coffer_protocol::custody::{AssetBank, TransferError};
use coffer_protocol::events::{FanoutSink, Notification, NotificationSink, TracingSink};
use coffer_protocol::identity::ParticipantId;
use coffer_protocol::storage::{DbError, LedgerStore};

use crate::metrics::SharedMetrics;

/// The concrete ledger a node runs.
pub type NodeLedger = CustodyLedger<AssetBank, FanoutSink>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by [`LedgerService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The ledger refused the operation. State is unchanged.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Persisting or loading the ledger failed.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    /// The devnet faucet could not credit external holdings.
    #[error("faucet error: {0}")]
    Faucet(TransferError),

    /// An earlier snapshot write failed and retrying it failed again.
    /// Nothing was changed.
    #[error("ledger snapshot is stale, mutations suspended: {0}")]
    Degraded(DbError),

    /// A fresh database was opened without an administrator to install.
    #[error("no ledger in the database and no administrator given")]
    MissingAdministrator,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// ---------------------------------------------------------------------------
// Broadcast sink
// ---------------------------------------------------------------------------

/// Pushes notifications onto a tokio broadcast channel. Having no
/// subscribers is normal, so send errors are ignored.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<Notification>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for BroadcastSink {
    fn emit(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Point-in-time summary of the ledger, for `/status` and `coffer_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerStatus {
    pub administrator: ParticipantId,
    pub custody_account: ParticipantId,
    pub paused: bool,
    pub allowed_assets: usize,
    pub balance_entries: usize,
    pub state_root: String,
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// LedgerService
// ---------------------------------------------------------------------------

/// Shared handle on the node's ledger. Cheap to clone.
#[derive(Clone)]
pub struct LedgerService {
    ledger: Arc<Mutex<NodeLedger>>,
    store: Arc<dyn LedgerStore>,
    metrics: SharedMetrics,
    degraded: Arc<AtomicBool>,
}

impl LedgerService {
    /// Loads the ledger from `store`, or creates one administered by
    /// `administrator` if the store is empty.
    ///
    /// `administrator` is ignored when a ledger already exists; authority
    /// only ever moves through `transfer_authority`.
    pub fn open(
        store: impl LedgerStore + 'static,
        metrics: SharedMetrics,
        events: broadcast::Sender<Notification>,
        administrator: Option<ParticipantId>,
    ) -> ServiceResult<Self> {
        let sink = FanoutSink::new()
            .with(TracingSink)
            .with(BroadcastSink::new(events));
        let bank = AssetBank::from_holdings(store.load_holdings()?);

        let ledger = match store.load_state()? {
            Some(state) => {
                if let Some(admin) = administrator {
                    if admin != state.administrator {
                        tracing::warn!(
                            requested = %admin,
                            current = %state.administrator,
                            "ignoring administrator flag, ledger already initialized"
                        );
                    }
                }
                CustodyLedger::restore(state, bank, sink)?
            }
            None => {
                let admin = administrator.ok_or(ServiceError::MissingAdministrator)?;
                let ledger = CustodyLedger::new(admin, bank, sink)?;
                store.save(&ledger.snapshot(), ledger.agent().holdings())?;
                tracing::info!(administrator = %admin, "new ledger created");
                ledger
            }
        };

        metrics.sync_gauges(ledger.is_paused(), ledger.allowed_assets().len());

        Ok(Self {
            ledger: Arc::new(Mutex::new(ledger)),
            store: Arc::new(store),
            metrics,
            degraded: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs one mutating operation under the lock and persists on success.
    fn mutate<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut NodeLedger) -> LedgerResult<T>,
    ) -> ServiceResult<T> {
        let started = Instant::now();
        let mut ledger = self.ledger.lock();
        self.recover(&ledger)?;

        let outcome = match f(&mut *ledger) {
            Ok(value) => {
                self.persist(op, &ledger);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(op, kind = e.kind(), "ledger operation refused");
                self.metrics.record_rejection(&e);
                Err(ServiceError::Ledger(e))
            }
        };

        self.metrics
            .sync_gauges(ledger.is_paused(), ledger.allowed_assets().len());
        self.metrics
            .operation_latency_seconds
            .observe(started.elapsed().as_secs_f64());
        outcome
    }

    /// Writes the committed ledger. A failure marks the service degraded
    /// instead of failing the operation that already happened.
    fn persist(&self, op: &'static str, ledger: &NodeLedger) {
        if let Err(e) = self.write_snapshot(ledger) {
            tracing::error!(op, error = %e, "failed to persist committed operation, disk copy is stale");
            self.metrics.persist_failures_total.inc();
            self.set_degraded(true);
        }
    }

    /// Retries the pending write of a degraded service. Refuses to go on
    /// while the disk copy is still stale.
    fn recover(&self, ledger: &NodeLedger) -> ServiceResult<()> {
        if !self.is_degraded() {
            return Ok(());
        }
        self.write_snapshot(ledger).map_err(ServiceError::Degraded)?;
        self.set_degraded(false);
        tracing::info!("ledger snapshot persisted again, mutations resumed");
        Ok(())
    }

    fn write_snapshot(&self, ledger: &NodeLedger) -> Result<(), DbError> {
        self.store.save(&ledger.snapshot(), ledger.agent().holdings())
    }

    fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
        self.metrics.degraded.set(i64::from(degraded));
    }

    /// Whether the last committed operation has not reached disk.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    // -- Operations ---------------------------------------------------------

    pub fn deposit(
        &self,
        participant: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> ServiceResult<u64> {
        let balance = self.mutate("deposit", |l| l.deposit(participant, asset, amount))?;
        self.metrics.deposits_total.inc();
        Ok(balance)
    }

    pub fn withdraw(
        &self,
        participant: &ParticipantId,
        asset: &AssetId,
        amount: u64,
    ) -> ServiceResult<u64> {
        let balance = self.mutate("withdraw", |l| l.withdraw(participant, asset, amount))?;
        self.metrics.withdrawals_total.inc();
        Ok(balance)
    }

    pub fn allow_asset(&self, caller: &ParticipantId, asset: AssetId) -> ServiceResult<bool> {
        self.mutate("allow_asset", |l| l.allow_asset(caller, asset))
    }

    pub fn pause(&self, caller: &ParticipantId) -> ServiceResult<bool> {
        self.mutate("pause", |l| l.pause(caller))
    }

    pub fn unpause(&self, caller: &ParticipantId) -> ServiceResult<bool> {
        self.mutate("unpause", |l| l.unpause(caller))
    }

    pub fn transfer_authority(
        &self,
        caller: &ParticipantId,
        new_holder: ParticipantId,
    ) -> ServiceResult<ParticipantId> {
        self.mutate("transfer_authority", |l| {
            l.transfer_authority(caller, new_holder)
        })
    }

    /// Devnet faucet: credits external holdings at the settlement layer.
    /// The ledger's books are not touched.
    pub fn fund(
        &self,
        participant: ParticipantId,
        asset: AssetId,
        amount: u64,
    ) -> ServiceResult<u64> {
        let mut ledger = self.ledger.lock();
        self.recover(&ledger)?;
        let held = ledger
            .agent_mut()
            .mint(participant, asset, amount)
            .map_err(ServiceError::Faucet)?;
        self.persist("fund", &ledger);
        tracing::info!(%participant, %asset, amount, held, "faucet credited external holdings");
        Ok(held)
    }

    // -- Queries ------------------------------------------------------------

    pub fn balance_of(&self, participant: &ParticipantId, asset: &AssetId) -> u64 {
        self.ledger.lock().balance_of(participant, asset)
    }

    pub fn balances_of(&self, participant: &ParticipantId) -> BTreeMap<AssetId, u64> {
        self.ledger.lock().balances_of(participant)
    }

    /// External holdings at the settlement layer.
    pub fn holdings_of(&self, participant: &ParticipantId, asset: &AssetId) -> u64 {
        self.ledger.lock().agent().holdings_of(participant, asset)
    }

    pub fn allowed_assets(&self) -> BTreeSet<AssetId> {
        self.ledger.lock().allowed_assets().clone()
    }

    pub fn administrator(&self) -> ParticipantId {
        self.ledger.lock().administrator()
    }

    pub fn status(&self) -> LedgerStatus {
        let ledger = self.ledger.lock();
        let snapshot = ledger.snapshot();
        LedgerStatus {
            administrator: snapshot.administrator,
            custody_account: ledger.custody_account(),
            paused: snapshot.paused,
            allowed_assets: snapshot.allowed_assets.len(),
            balance_entries: snapshot.entry_count(),
            state_root: snapshot.root_hash_hex(),
            degraded: self.is_degraded(),
        }
    }

    /// Flushes pending writes; called on shutdown.
    pub fn flush(&self) -> ServiceResult<()> {
        Ok(self.store.flush()?)
    }
}
