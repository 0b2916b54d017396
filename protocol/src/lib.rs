// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Coffer Protocol: Core Library
//!
//! Shared building blocks for Coffer, a custodial balance ledger: it holds
//! assets on behalf of many participants, records who owns how much of
//! each asset, and lets an administrator gate which assets are accepted and
//! halt activity in an emergency.
//!
//! This crate holds everything the ledger logic in `coffer-contracts` and
//! the node binary agree on:
//!
//! - **identity**: Participant identifiers, the `NULL` sentinel.
//! - **asset**: Asset type identifiers.
//! - **custody**: The transfer capability that moves value in and out of
//!   custody, plus the in-memory settlement bank.
//! - **events**: Ledger notifications and the sinks that receive them.
//! - **storage**: Ledger snapshots and sled persistence.
//! - **config**: Protocol constants and defaults.
//!
//! ## Design Philosophy
//!
//! 1. Books before transfers. The ledger records nothing it cannot back.
//! 2. Every arithmetic step on an amount is checked.
//! 3. If it touches money, it has tests. Plural.

pub mod asset;
pub mod config;
pub mod custody;
pub mod events;
pub mod identity;
pub mod storage;
