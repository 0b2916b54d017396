//! # Asset Types
//!
//! An [`AssetId`] identifies a fungible asset type the ledger may hold in
//! custody (in the original token world, the token contract address). Like
//! participant identities it is a 32-byte value rendered as hex, with the
//! all-zero value reserved as [`AssetId::NULL`].
//!
//! IDs are content-addressed when derived: the same symbol from the same
//! issuer always yields the same ID.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::config::IDENTIFIER_LENGTH;
use crate::identity::{decode_identifier, IdentifierError};

/// Opaque 32-byte asset-type identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssetId([u8; IDENTIFIER_LENGTH]);

impl AssetId {
    /// The reserved null asset.
    pub const NULL: AssetId = AssetId([0u8; IDENTIFIER_LENGTH]);

    /// Wraps raw identifier bytes.
    pub const fn from_bytes(bytes: [u8; IDENTIFIER_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LENGTH] {
        &self.0
    }

    /// Derives an asset ID from its symbol and issuer label.
    ///
    /// The preimage is `symbol || 0x00 || issuer`; the separator keeps
    /// `("AB", "C")` and `("A", "BC")` apart. Symbols are upper-cased first
    /// so `"usdc"` and `"USDC"` name the same asset.
    pub fn derive(symbol: &str, issuer: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"coffer/asset");
        hasher.update(&[0x00]);
        hasher.update(symbol.to_uppercase().as_bytes());
        hasher.update(&[0x00]);
        hasher.update(issuer.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Returns `true` for the reserved null asset.
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

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({}...)", &self.to_hex()[..12])
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for AssetId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
