//! # Coffer Custody Contracts
//!
//! The accounting and access-control core of Coffer:
//!
//! - **Access Control**: a single administrator identity and an emergency
//!   pause flag, with guard functions the ledger consults before acting.
//! - **Custody Ledger**: the per-participant, per-asset balance table, the
//!   asset allow-list, and the deposit/withdraw operations that move value
//!   through an external transfer capability.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow: `checked_add` and
//!    `checked_sub` everywhere, because wrapping arithmetic and money do not
//!    mix.
//! 2. The books never claim funds custody does not hold. Deposits credit
//!    after the pull; withdrawals that fail to pay out are rolled back.
//! 3. Every failure is a typed [`LedgerError`] and leaves state untouched.

pub mod access_control;
pub mod custody_ledger;
pub mod error;

pub use access_control::AccessController;
pub use custody_ledger::CustodyLedger;
pub use error::{LedgerError, LedgerResult};
