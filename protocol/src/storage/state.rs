//! # Ledger State: the persisted logical layout
//!
//! [`LedgerState`] is the complete state of one custody ledger, detached
//! from any behavior: the administrator, the pause flag, the allow-list and
//! the sparse balance table. The contracts layer owns the live copy; this
//! struct is what crosses the boundary into storage and back.
//!
//! ## State root
//!
//! [`LedgerState::root_hash`] commits to the whole state with a binary
//! BLAKE3 Merkle tree over sorted leaves, so two nodes holding the same
//! books report the same root regardless of insertion order.
//!
//! ```text
//! leaf(meta)    = BLAKE3("meta"  || administrator || paused)
//! leaf(asset)   = BLAKE3("allow" || asset)
//! leaf(balance) = BLAKE3("bal"   || participant || asset || amount_be)
//! root          = merkle(leaves in BTree order)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::asset::AssetId;
use crate::identity::ParticipantId;

/// Snapshot of a custody ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerState {
    /// Current holder of administrative authority. Never `NULL`.
    pub administrator: ParticipantId,
    /// `true` while deposits and withdrawals are rejected.
    pub paused: bool,
    /// Asset types accepted for deposit and withdraw.
    pub allowed_assets: BTreeSet<AssetId>,
    /// Recorded balance per `(participant, asset)`. Zero entries are omitted.
    pub balances: BTreeMap<(ParticipantId, AssetId), u64>,
}

impl LedgerState {
    /// Fresh state: unpaused, nothing allowed, no balances.
    pub fn genesis(administrator: ParticipantId) -> Self {
        Self {
            administrator,
            paused: false,
            allowed_assets: BTreeSet::new(),
            balances: BTreeMap::new(),
        }
    }

    /// Recorded balance, zero when absent.
    pub fn balance_of(&self, participant: &ParticipantId, asset: &AssetId) -> u64 {
        self.balances
            .get(&(*participant, *asset))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of all recorded balances for `asset`. Saturates rather than wraps,
    /// though a consistent ledger can never exceed what custody holds.
    pub fn total_recorded(&self, asset: &AssetId) -> u64 {
        self.balances
            .iter()
            .filter(|((_, a), _)| a == asset)
            .fold(0u64, |acc, (_, amount)| acc.saturating_add(*amount))
    }

    /// Number of non-zero balance entries.
    pub fn entry_count(&self) -> usize {
        self.balances.len()
    }

    /// Merkle commitment to the full state. See the module docs.
    pub fn root_hash(&self) -> [u8; 32] {
        let mut leaves: Vec<[u8; 32]> =
            Vec::with_capacity(1 + self.allowed_assets.len() + self.balances.len());

        let mut meta = blake3::Hasher::new();
        meta.update(b"meta");
        meta.update(self.administrator.as_bytes());
        meta.update(&[self.paused as u8]);
        leaves.push(*meta.finalize().as_bytes());

        for asset in &self.allowed_assets {
            let mut h = blake3::Hasher::new();
            h.update(b"allow");
            h.update(asset.as_bytes());
            leaves.push(*h.finalize().as_bytes());
        }

        for ((participant, asset), amount) in &self.balances {
            let mut h = blake3::Hasher::new();
            h.update(b"bal");
            h.update(participant.as_bytes());
            h.update(asset.as_bytes());
            h.update(&amount.to_be_bytes());
            leaves.push(*h.finalize().as_bytes());
        }

        while leaves.len() > 1 {
            let mut next_level = Vec::with_capacity((leaves.len() + 1) / 2);
            for chunk in leaves.chunks(2) {
                let mut h = blake3::Hasher::new();
                h.update(&chunk[0]);
                // Odd node out is paired with itself.
                h.update(chunk.get(1).unwrap_or(&chunk[0]));
                next_level.push(*h.finalize().as_bytes());
            }
            leaves = next_level;
        }

        leaves[0]
    }

    /// Hex-encoded [`root_hash`](Self::root_hash).
    pub fn root_hash_hex(&self) -> String {
        hex::encode(self.root_hash())
    }
}
