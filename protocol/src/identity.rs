//! # Participant Identity
//!
//! A [`ParticipantId`] names anyone who can hold a balance in Coffer:
//! depositors, the administrator, and the custody account itself. It is a
//! 32-byte opaque identifier, rendered as lowercase hex on the wire.
//!
//! The all-zero identifier is reserved as [`ParticipantId::NULL`]. It is
//! what an unset or defaulted identity decodes to, and every operation that
//! accepts an identity rejects it.
//!
//! Coffer performs no authentication of its own. Whoever supplies the
//! caller identity (the node's request extractor, a test harness) is
//! trusted as authoritative.

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::IDENTIFIER_LENGTH;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while parsing an identifier from its textual form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// The input was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// The decoded input had the wrong number of bytes.
    #[error("invalid identifier length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Required byte length.
        expected: usize,
        /// Decoded byte length.
        got: usize,
    },
}

/// Decodes a 32-byte identifier from hex, tolerating an optional `0x` prefix.
pub(crate) fn decode_identifier(s: &str) -> Result<[u8; IDENTIFIER_LENGTH], IdentifierError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).map_err(|e| IdentifierError::InvalidHex(e.to_string()))?;
    if bytes.len() != IDENTIFIER_LENGTH {
        return Err(IdentifierError::InvalidLength {
            expected: IDENTIFIER_LENGTH,
            got: bytes.len(),
        });
    }
    let mut arr = [0u8; IDENTIFIER_LENGTH];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

// ---------------------------------------------------------------------------
// ParticipantId
// ---------------------------------------------------------------------------

/// Opaque 32-byte participant identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ParticipantId([u8; IDENTIFIER_LENGTH]);

impl ParticipantId {
    /// The reserved null identity.
    pub const NULL: ParticipantId = ParticipantId([0u8; IDENTIFIER_LENGTH]);

    /// Wraps raw identifier bytes.
    pub const fn from_bytes(bytes: [u8; IDENTIFIER_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LENGTH] {
        &self.0
    }

    /// Derives a stable identifier from a human label.
    ///
    /// `BLAKE3("coffer/participant" || 0x00 || label)`. Handy for fixtures
    /// and devnet seeding where a readable name is easier than raw hex.
    pub fn derive(label: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"coffer/participant");
        hasher.update(&[0x00]);
        hasher.update(label.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        let mut bytes = [0u8; IDENTIFIER_LENGTH];
        loop {
            rand::thread_rng().fill_bytes(&mut bytes);
            // Astronomically unlikely, but NULL must never be handed out.
            if bytes != [0u8; IDENTIFIER_LENGTH] {
                return Self(bytes);
            }
        }
    }

    /// Returns `true` for the reserved null identity.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Lowercase hex encoding, no prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex identifier (optionally `0x`-prefixed).
    pub fn from_hex(s: &str) -> Result<Self, IdentifierError> {
        decode_identifier(s).map(Self)
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({}...)", &self.to_hex()[..12])
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ParticipantId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ParticipantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ParticipantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
