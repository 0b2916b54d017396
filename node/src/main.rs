// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Coffer Ledger Node
//!
//! Entry point for the `coffer-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the ledger database, and serves
//! the HTTP/WS API.
//!
//! The binary supports four subcommands:
//!
//! - `run`: start the ledger node
//! - `init`: initialize the data directory and generate an administrator
//! - `status`: query a running node's status endpoint
//! - `version`: print build version information

mod api;
mod caller;
mod cli;
mod logging;
mod metrics;
mod service;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal;
use tokio::sync::broadcast;

use coffer_protocol::config::{NOTIFICATION_CHANNEL_CAPACITY, PROTOCOL_VERSION};
use coffer_protocol::identity::ParticipantId;
use coffer_protocol::storage::LedgerDb;

use cli::{CofferNodeCli, Commands};
use logging::LogFormat;
use metrics::LedgerMetrics;
use service::LedgerService;

/// File inside the data directory holding the hex administrator identity.
const ADMIN_ID_FILE: &str = "admin.id";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CofferNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the ledger node: API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.log_format),
    )
    .context("failed to initialize logging")?;

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting coffer-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = LedgerDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Metrics & notifications ---
    let node_metrics = Arc::new(LedgerMetrics::new());
    let (event_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

    // --- Ledger ---
    let administrator = match args.admin {
        Some(admin) => Some(admin),
        None => read_admin_file(&args.data_dir)?,
    };
    let service = LedgerService::open(
        db,
        Arc::clone(&node_metrics),
        event_tx.clone(),
        administrator,
    )
    .context("failed to open ledger (run `coffer-node init` or pass --admin)")?;

    // --- Devnet seeding ---
    let admin = service.administrator();
    for asset in &args.allow_assets {
        let added = service
            .allow_asset(&admin, *asset)
            .with_context(|| format!("failed to allow asset {}", asset))?;
        if added {
            tracing::info!(%asset, "asset allowed from command line");
        }
    }
    for fund in &args.fund {
        service
            .fund(fund.participant, fund.asset, fund.amount)
            .with_context(|| format!("failed to fund {}", fund.participant))?;
    }

    let status = service.status();
    tracing::info!(
        administrator = %status.administrator,
        custody = %status.custody_account,
        paused = status.paused,
        assets = status.allowed_assets,
        state_root = %status.state_root,
        "ledger ready"
    );

    // --- Application state ---
    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        service: service.clone(),
        event_tx,
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("RPC/API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    service.flush().context("failed to flush ledger database")?;
    tracing::info!("coffer-node stopped");
    Ok(())
}

/// Reads the administrator written by `init`, if any.
fn read_admin_file(data_dir: &Path) -> Result<Option<ParticipantId>> {
    let path = data_dir.join(ADMIN_ID_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let admin = text
        .trim()
        .parse::<ParticipantId>()
        .with_context(|| format!("invalid administrator identity in {}", path.display()))?;
    Ok(Some(admin))
}

/// Initializes a new node data directory and generates an administrator
/// identity.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("coffer_node=info", LogFormat::Pretty)
        .context("failed to initialize logging")?;

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let admin_path = data_dir.join(ADMIN_ID_FILE);
    if admin_path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to replace it",
            admin_path.display()
        );
    }

    let admin = ParticipantId::random();
    std::fs::write(&admin_path, admin.to_hex())
        .with_context(|| format!("failed to write administrator to {}", admin_path.display()))?;

    tracing::info!(
        administrator = %admin,
        path = %admin_path.display(),
        "administrator identity generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Administrator  : {}", admin.to_hex());
    println!("  Identity file  : {}", admin_path.display());
    println!();
    println!("Send administrative requests with the header:");
    println!(
        "  {}: {}",
        coffer_protocol::config::CALLER_HEADER,
        admin.to_hex()
    );

    Ok(())
}

/// Queries a running node's status endpoint over plain HTTP/1.1 and prints
/// the body.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let mut stream = tokio::net::TcpStream::connect(&args.rpc_addr)
        .await
        .with_context(|| format!("failed to connect to {}", args.rpc_addr))?;

    let request = format!(
        "GET /status HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        args.rpc_addr,
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let (head, body) = response
        .split_once("\r\n\r\n")
        .unwrap_or((response.as_ref(), ""));
    if !head.starts_with("HTTP/1.1 200") {
        bail!(
            "node returned: {}",
            head.lines().next().unwrap_or("empty response")
        );
    }
    println!("{}", body);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("coffer-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", PROTOCOL_VERSION);
    println!("storage     v{}", coffer_protocol::config::STORAGE_SCHEMA_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
