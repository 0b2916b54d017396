//! # CLI Interface
//!
//! Command-line arguments for `coffer-node`, via `clap` derive. Four
//! subcommands: `run`, `init`, `status` and `version`. Every `run` flag can
//! also come from a `COFFER_*` environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use coffer_protocol::asset::AssetId;
use coffer_protocol::config::{DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT};
use coffer_protocol::identity::ParticipantId;

/// Coffer custody ledger node.
///
/// Holds assets on behalf of participants, records per-participant balances,
/// serves the JSON-RPC / REST / WebSocket API, and exposes Prometheus
/// metrics.
#[derive(Parser, Debug)]
#[command(
    name = "coffer-node",
    about = "Coffer custody ledger node",
    version,
    propagate_version = true
)]
pub struct CofferNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the Coffer node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the ledger node.
    Run(RunArgs),
    /// Initialize a new node: creates the data directory and generates an
    /// administrator identity.
    Init(InitArgs),
    /// Query the status of a running node via its API.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node data directory where the ledger database lives.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "COFFER_DATA_DIR", default_value = ".coffer")]
    pub data_dir: PathBuf,

    /// Port for the JSON-RPC and REST API.
    #[arg(long, env = "COFFER_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "COFFER_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Hex administrator identity for a fresh ledger.
    ///
    /// Ignored when the database already holds a ledger. Without it, the
    /// node reads `admin.id` from the data directory written by `init`.
    #[arg(long, env = "COFFER_ADMIN")]
    pub admin: Option<ParticipantId>,

    /// Asset to allow-list at startup, as hex or `SYMBOL@issuer`. Repeatable.
    #[arg(long = "allow-asset", value_parser = parse_asset)]
    pub allow_assets: Vec<AssetId>,

    /// Devnet faucet: credit external holdings at startup, as
    /// `participant:asset:amount`. Repeatable.
    #[arg(long = "fund")]
    pub fund: Vec<FundSpec>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "COFFER_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "COFFER_DATA_DIR", default_value = ".coffer")]
    pub data_dir: PathBuf,

    /// Overwrite an existing administrator identity file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// `host:port` of the running node's API.
    #[arg(long, default_value_t = format!("127.0.0.1:{}", DEFAULT_RPC_PORT))]
    pub rpc_addr: String,
}

// ---------------------------------------------------------------------------
// Value parsers
// ---------------------------------------------------------------------------

/// Parses an asset as 64 hex characters or `SYMBOL@issuer`.
pub fn parse_asset(s: &str) -> Result<AssetId, String> {
    if let Some((symbol, issuer)) = s.split_once('@') {
        if symbol.is_empty() || issuer.is_empty() {
            return Err(format!("invalid asset '{s}': expected SYMBOL@issuer"));
        }
        return Ok(AssetId::derive(symbol, issuer));
    }
    AssetId::from_hex(s).map_err(|e| format!("invalid asset '{s}': {e}"))
}

/// One `--fund participant:asset:amount` seeding instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundSpec {
    pub participant: ParticipantId,
    pub asset: AssetId,
    pub amount: u64,
}

impl FromStr for FundSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(participant), Some(asset), Some(amount)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("invalid fund spec '{s}': expected participant:asset:amount"));
        };
        Ok(FundSpec {
            participant: participant
                .parse()
                .map_err(|e| format!("invalid participant '{participant}': {e}"))?,
            asset: parse_asset(asset)?,
            amount: amount
                .parse()
                .map_err(|e| format!("invalid amount '{amount}': {e}"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        CofferNodeCli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let alice = ParticipantId::derive("alice");
        let cli = CofferNodeCli::try_parse_from([
            "coffer-node",
            "run",
            "--rpc-port",
            "1234",
            "--allow-asset",
            "USDC@circle",
            "--fund",
            &format!("{}:USDC@circle:500", alice.to_hex()),
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.rpc_port, 1234);
        assert_eq!(args.allow_assets, vec![AssetId::derive("USDC", "circle")]);
        assert_eq!(
            args.fund,
            vec![FundSpec {
                participant: alice,
                asset: AssetId::derive("USDC", "circle"),
                amount: 500,
            }]
        );
    }

    #[test]
    fn asset_accepts_hex() {
        let asset = AssetId::derive("DAI", "maker");
        assert_eq!(parse_asset(&asset.to_hex()).unwrap(), asset);
        assert!(parse_asset("@maker").is_err());
        assert!(parse_asset("nothex").is_err());
    }

    #[test]
    fn malformed_fund_rejected() {
        assert!("abc".parse::<FundSpec>().is_err());
        let alice = ParticipantId::derive("alice").to_hex();
        assert!(format!("{alice}:USDC@circle:lots").parse::<FundSpec>().is_err());
        assert!(format!("{alice}:USDC@circle").parse::<FundSpec>().is_err());
    }
}
