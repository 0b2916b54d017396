//! # Protocol Configuration & Constants
//!
//! Every magic number in Coffer lives here. Runtime knobs (ports, data
//! directory, administrator) are parsed by the node's CLI and default to the
//! values below.

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Major version. Bump on incompatible changes to the persisted layout.
pub const PROTOCOL_VERSION_MAJOR: u16 = 0;

/// Minor version. Bump on backward-compatible additions.
pub const PROTOCOL_VERSION_MINOR: u16 = 1;

/// Patch version. Bump on bug fixes.
pub const PROTOCOL_VERSION_PATCH: u16 = 0;

/// The full version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Schema version written into the `meta` tree of every database. A node
/// refuses to open a database written with a different schema.
pub const STORAGE_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Byte length of participant and asset identifiers.
pub const IDENTIFIER_LENGTH: usize = 32;

/// HTTP header carrying the caller identity (hex). The node trusts it
/// as-is; authentication belongs to whatever sits in front of the node.
pub const CALLER_HEADER: &str = "x-coffer-caller";

/// Derivation label of the ledger's own account at the settlement layer.
/// Deposits are pulled into it, withdrawals pushed out of it.
pub const CUSTODY_ACCOUNT_LABEL: &str = "coffer/custody";

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default JSON-RPC / REST API port.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Broadcast channel capacity for live notification streaming. Slow
/// WebSocket subscribers past this backlog start losing events.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Returns `"major.minor.patch"` assembled from the version components.
pub fn protocol_version_string() -> String {
    format!(
        "{}.{}.{}",
        PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR, PROTOCOL_VERSION_PATCH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_components_match_string() {
        assert_eq!(protocol_version_string(), PROTOCOL_VERSION);
    }

    #[test]
    fn test_ports_are_distinct() {
        assert_ne!(DEFAULT_RPC_PORT, DEFAULT_METRICS_PORT);
    }

    #[test]
    fn test_caller_header_is_lowercase() {
        // HTTP/2 requires lowercase header names.
        assert_eq!(CALLER_HEADER, CALLER_HEADER.to_lowercase());
    }
}
