//! # Storage Module
//!
//! Persistent storage for a Coffer node.
//!
//! ```text
//! state.rs : LedgerState snapshot and its BLAKE3 state root
//! db.rs    : sled persistence, one tree per concern
//! ```
//!
//! The contracts layer owns the live ledger. After every mutation the node
//! takes a [`LedgerState`] snapshot and hands it to [`LedgerDb`], which
//! replaces the persisted copy in one transaction. On startup the same
//! snapshot is read back and restored.
//!
//! Bincode is used for the small structured records, fixed-width big-endian
//! integers for amounts. JSON is for APIs; bincode is for storage.

pub mod db;
pub mod state;

pub use db::{DbError, DbResult, LedgerDb, LedgerStore};
pub use state::LedgerState;
