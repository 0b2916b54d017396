//! # LedgerDb: Persistent Storage Engine
//!
//! The persistence layer for a Coffer node, built on sled's embedded
//! key-value store.
//!
//! ## Tree Layout
//!
//! | Tree         | Key                              | Value                 |
//! |--------------|----------------------------------|-----------------------|
//! | `meta`       | key (UTF-8)                      | see below             |
//! | `allow_list` | `asset` (32B)                    | empty                 |
//! | `balances`   | `participant` (32B) ‖ `asset` (32B) | `amount` (8B BE)   |
//! | `holdings`   | `holder` (32B) ‖ `asset` (32B)   | `amount` (8B BE)      |
//!
//! `meta` carries `schema_version` (4B BE) and `ledger_meta`
//! (`bincode(MetaRecord)`: administrator + pause flag).
//!
//! ## Atomicity
//!
//! [`LedgerDb::save`] writes all four trees in a single multi-tree sled
//! transaction, then flushes. The books and the holdings they account for
//! land together or not at all.

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::state::LedgerState;
use crate::asset::AssetId;
use crate::config::{IDENTIFIER_LENGTH, STORAGE_SCHEMA_VERSION};
use crate::identity::ParticipantId;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record in tree {tree}: {reason}")]
    Corrupt { tree: &'static str, reason: String },

    #[error("storage schema mismatch: database has v{found}, node expects v{expected}")]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("refusing to persist a ledger with a null administrator")]
    NullAdministrator,
}

pub type DbResult<T> = Result<T, DbError>;

impl From<TransactionError<DbError>> for DbError {
    fn from(e: TransactionError<DbError>) -> Self {
        match e {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(e) => DbError::Sled(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

const META_SCHEMA_VERSION: &[u8] = b"schema_version";
const META_LEDGER: &[u8] = b"ledger_meta";

/// Singleton ledger fields, stored as one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MetaRecord {
    administrator: ParticipantId,
    paused: bool,
}

// ---------------------------------------------------------------------------
// Key encoding
// ---------------------------------------------------------------------------

fn pair_key(participant: &ParticipantId, asset: &AssetId) -> [u8; 2 * IDENTIFIER_LENGTH] {
    let mut key = [0u8; 2 * IDENTIFIER_LENGTH];
    key[..IDENTIFIER_LENGTH].copy_from_slice(participant.as_bytes());
    key[IDENTIFIER_LENGTH..].copy_from_slice(asset.as_bytes());
    key
}

fn decode_pair_key(tree: &'static str, key: &[u8]) -> DbResult<(ParticipantId, AssetId)> {
    if key.len() != 2 * IDENTIFIER_LENGTH {
        return Err(DbError::Corrupt {
            tree,
            reason: format!("key length {}", key.len()),
        });
    }
    let mut p = [0u8; IDENTIFIER_LENGTH];
    let mut a = [0u8; IDENTIFIER_LENGTH];
    p.copy_from_slice(&key[..IDENTIFIER_LENGTH]);
    a.copy_from_slice(&key[IDENTIFIER_LENGTH..]);
    Ok((ParticipantId::from_bytes(p), AssetId::from_bytes(a)))
}

fn decode_amount(tree: &'static str, value: &[u8]) -> DbResult<u64> {
    let bytes: [u8; 8] = value.try_into().map_err(|_| DbError::Corrupt {
        tree,
        reason: format!("amount length {}", value.len()),
    })?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_asset_key(key: &[u8]) -> DbResult<AssetId> {
    let bytes: [u8; IDENTIFIER_LENGTH] = key.try_into().map_err(|_| DbError::Corrupt {
        tree: "allow_list",
        reason: format!("key length {}", key.len()),
    })?;
    Ok(AssetId::from_bytes(bytes))
}

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Persistent storage for a custody ledger and its simulated settlement
/// layer.
///
/// Cheap to clone; sled handles are reference counted and thread-safe.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    db: Db,
    meta: Tree,
    allow_list: Tree,
    balances: Tree,
    holdings: Tree,
}

impl LedgerDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database, deleted when the last handle drops.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let store = Self {
            meta: db.open_tree("meta")?,
            allow_list: db.open_tree("allow_list")?,
            balances: db.open_tree("balances")?,
            holdings: db.open_tree("holdings")?,
            db,
        };
        store.check_schema()?;
        Ok(store)
    }

    /// Stamps a new database with the current schema version, or verifies
    /// an existing one.
    fn check_schema(&self) -> DbResult<()> {
        match self.meta.get(META_SCHEMA_VERSION)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_ref().try_into().map_err(|_| DbError::Corrupt {
                    tree: "meta",
                    reason: "schema_version length".into(),
                })?;
                let found = u32::from_be_bytes(raw);
                if found != STORAGE_SCHEMA_VERSION {
                    return Err(DbError::SchemaMismatch {
                        found,
                        expected: STORAGE_SCHEMA_VERSION,
                    });
                }
            }
            None => {
                self.meta
                    .insert(META_SCHEMA_VERSION, &STORAGE_SCHEMA_VERSION.to_be_bytes())?;
            }
        }
        Ok(())
    }

    // -- Ledger state -------------------------------------------------------

    /// Replaces the persisted ledger with `state` and the settlement
    /// holdings with `holdings`, in one transaction over all four trees.
    pub fn save(
        &self,
        state: &LedgerState,
        holdings: &BTreeMap<(ParticipantId, AssetId), u64>,
    ) -> DbResult<()> {
        if state.administrator.is_null() {
            return Err(DbError::NullAdministrator);
        }

        let meta_bytes = bincode::serialize(&MetaRecord {
            administrator: state.administrator,
            paused: state.paused,
        })
        .map_err(|e| DbError::Serialization(e.to_string()))?;

        // Work out the diffs outside the transaction; the closure may retry.
        let mut allow_batch = Batch::default();
        for key in self.allow_list.iter().keys() {
            let key = key?;
            if !state.allowed_assets.contains(&decode_asset_key(&key)?) {
                allow_batch.remove(key);
            }
        }
        for asset in &state.allowed_assets {
            allow_batch.insert(asset.as_bytes().as_slice(), &[] as &[u8]);
        }

        let balance_batch = Self::pair_batch("balances", &self.balances, &state.balances)?;
        let holdings_batch = Self::pair_batch("holdings", &self.holdings, holdings)?;

        (&self.meta, &self.allow_list, &self.balances, &self.holdings).transaction(
            |(meta, allow_list, balances, holdings)| {
                meta.insert(META_LEDGER, meta_bytes.as_slice())?;
                allow_list.apply_batch(&allow_batch)?;
                balances.apply_batch(&balance_batch)?;
                holdings.apply_batch(&holdings_batch)?;
                Ok::<(), ConflictableTransactionError<DbError>>(())
            },
        )?;

        self.db.flush()?;
        Ok(())
    }

    /// Batch turning `tree` into exactly the non-zero entries of `wanted`.
    fn pair_batch(
        name: &'static str,
        tree: &Tree,
        wanted: &BTreeMap<(ParticipantId, AssetId), u64>,
    ) -> DbResult<Batch> {
        let mut batch = Batch::default();
        for key in tree.iter().keys() {
            let key = key?;
            if !wanted.contains_key(&decode_pair_key(name, &key)?) {
                batch.remove(key);
            }
        }
        for ((holder, asset), amount) in wanted {
            let key = pair_key(holder, asset);
            if *amount == 0 {
                batch.remove(key.as_slice());
            } else {
                batch.insert(key.as_slice(), &amount.to_be_bytes());
            }
        }
        Ok(batch)
    }

    /// Loads the persisted ledger, or `None` for a database that has never
    /// had a ledger saved into it.
    pub fn load_state(&self) -> DbResult<Option<LedgerState>> {
        let meta: MetaRecord = match self.meta.get(META_LEDGER)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| DbError::Serialization(e.to_string()))?,
            None => return Ok(None),
        };

        let mut allowed_assets = BTreeSet::new();
        for key in self.allow_list.iter().keys() {
            allowed_assets.insert(decode_asset_key(&key?)?);
        }

        let balances = Self::read_pair_tree("balances", &self.balances)?;

        Ok(Some(LedgerState {
            administrator: meta.administrator,
            paused: meta.paused,
            allowed_assets,
            balances,
        }))
    }

    // -- Settlement holdings ------------------------------------------------

    /// Loads the persisted settlement-layer holdings.
    pub fn load_holdings(&self) -> DbResult<BTreeMap<(ParticipantId, AssetId), u64>> {
        Self::read_pair_tree("holdings", &self.holdings)
    }

    fn read_pair_tree(
        name: &'static str,
        tree: &Tree,
    ) -> DbResult<BTreeMap<(ParticipantId, AssetId), u64>> {
        let mut out = BTreeMap::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            out.insert(decode_pair_key(name, &key)?, decode_amount(name, &value)?);
        }
        Ok(out)
    }

    // -- Utility operations -------------------------------------------------

    /// Number of persisted balance entries.
    pub fn balance_entry_count(&self) -> usize {
        self.balances.len()
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Where a node keeps its ledger between restarts.
pub trait LedgerStore: Send + Sync {
    fn load_state(&self) -> DbResult<Option<LedgerState>>;

    fn load_holdings(&self) -> DbResult<BTreeMap<(ParticipantId, AssetId), u64>>;

    /// Writes a snapshot and the holdings it accounts for, atomically.
    fn save(
        &self,
        state: &LedgerState,
        holdings: &BTreeMap<(ParticipantId, AssetId), u64>,
    ) -> DbResult<()>;

    fn flush(&self) -> DbResult<()>;
}

impl LedgerStore for LedgerDb {
    fn load_state(&self) -> DbResult<Option<LedgerState>> {
        LedgerDb::load_state(self)
    }

    fn load_holdings(&self) -> DbResult<BTreeMap<(ParticipantId, AssetId), u64>> {
        LedgerDb::load_holdings(self)
    }

    fn save(
        &self,
        state: &LedgerState,
        holdings: &BTreeMap<(ParticipantId, AssetId), u64>,
    ) -> DbResult<()> {
        LedgerDb::save(self, state, holdings)
    }

    fn flush(&self) -> DbResult<()> {
        LedgerDb::flush(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
