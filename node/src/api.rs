//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the ledger node's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                              | Description                        |
//! |--------|-----------------------------------|------------------------------------|
//! | GET    | `/health`                         | Liveness probe                     |
//! | GET    | `/status`                         | Ledger status summary              |
//! | POST   | `/rpc`                            | JSON-RPC 2.0 gateway               |
//! | GET    | `/ws`                             | WebSocket for live notifications   |
//! | GET    | `/balances/:participant/:asset`   | Recorded balance                   |
//! | GET    | `/assets`                         | Allow-listed assets                |
//! | GET    | `/me/balances`                    | Every balance of the caller        |
//!
//! ## Caller identity
//!
//! Mutating RPC methods act as the identity in the `x-coffer-caller`
//! header; see [`crate::caller`]. `coffer_deposit` and `coffer_withdraw`
//! move the caller's own funds.
//!
//! Ledger calls take a lock and may flush sled, so handlers run them on
//! tokio's blocking pool.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use coffer_contracts::LedgerError;
use coffer_protocol::asset::AssetId;
use coffer_protocol::events::Notification;
use coffer_protocol::identity::ParticipantId;

use crate::caller::{Caller, CallerRejection};
use crate::metrics::SharedMetrics;
use crate::service::{LedgerService, ServiceError};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The live ledger.
    pub service: LedgerService,
    /// Broadcast channel carrying ledger notifications to WebSocket clients.
    pub event_tx: broadcast::Sender<Notification>,
    /// Reference to Prometheus metrics.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .route("/balances/:participant/:asset", get(balance_handler))
        .route("/assets", get(assets_handler))
        .route("/me/balances", get(my_balances_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    /// The method to invoke.
    pub method: String,
    /// Method parameters, as a named object.
    pub params: Option<serde_json::Value>,
    /// Request identifier. Echoed back in the response.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version. Always "2.0".
    pub jsonrpc: String,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Request identifier, echoed from the request.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i32,
    /// Short human-readable error description.
    pub message: String,
    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC error codes. The `-320xx` range is Coffer-specific.
pub mod codes {
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const CALLER_REQUIRED: i32 = -32001;
    pub const UNAUTHORIZED: i32 = -32010;
    pub const SYSTEM_PAUSED: i32 = -32011;
    pub const ASSET_NOT_ALLOWED: i32 = -32012;
    pub const INVALID_IDENTITY: i32 = -32013;
    pub const ZERO_AMOUNT: i32 = -32014;
    pub const INSUFFICIENT_BALANCE: i32 = -32015;
    pub const BALANCE_OVERFLOW: i32 = -32016;
    pub const TRANSFER_FAILED: i32 = -32017;
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self::new(codes::INVALID_PARAMS, format!("Invalid params: {}", detail))
    }

    fn caller(rejection: CallerRejection) -> Self {
        Self::new(codes::CALLER_REQUIRED, rejection.message())
    }
}

impl From<ServiceError> for JsonRpcError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Ledger(e) => {
                let code = match &e {
                    LedgerError::Unauthorized { .. } => codes::UNAUTHORIZED,
                    LedgerError::SystemPaused => codes::SYSTEM_PAUSED,
                    LedgerError::AssetNotAllowed(_) => codes::ASSET_NOT_ALLOWED,
                    LedgerError::InvalidIdentity => codes::INVALID_IDENTITY,
                    LedgerError::ZeroAmount => codes::ZERO_AMOUNT,
                    LedgerError::InsufficientBalance { .. } => codes::INSUFFICIENT_BALANCE,
                    LedgerError::BalanceOverflow { .. } => codes::BALANCE_OVERFLOW,
                    LedgerError::TransferFailed(_) => codes::TRANSFER_FAILED,
                };
                Self {
                    code,
                    message: e.to_string(),
                    data: Some(serde_json::json!({ "kind": e.kind() })),
                }
            }
            other => Self::new(codes::INTERNAL_ERROR, format!("Internal error: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// RPC Params
// ---------------------------------------------------------------------------

/// Params for `coffer_deposit` and `coffer_withdraw`.
#[derive(Debug, Deserialize)]
struct MovementParams {
    asset: AssetId,
    amount: u64,
}

/// Params for `coffer_allowAsset`.
#[derive(Debug, Deserialize)]
struct AssetParams {
    asset: AssetId,
}

/// Params for `coffer_transferAuthority`.
#[derive(Debug, Deserialize)]
struct TransferAuthorityParams {
    new_holder: ParticipantId,
}

/// Params for `coffer_balanceOf` and `coffer_holdingsOf`.
#[derive(Debug, Deserialize)]
struct PositionParams {
    participant: ParticipantId,
    asset: AssetId,
}

fn parse_params<T: DeserializeOwned>(params: Option<serde_json::Value>) -> Result<T, JsonRpcError> {
    let value = params.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value).map_err(|e| JsonRpcError::invalid_params(e))
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status` and `coffer_status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node software version.
    pub version: String,
    /// Current administrator.
    pub administrator: ParticipantId,
    /// The ledger's account at the settlement layer.
    pub custody_account: ParticipantId,
    /// Whether deposits and withdrawals are suspended.
    pub paused: bool,
    /// Number of allow-listed assets.
    pub allowed_assets: usize,
    /// Number of non-zero balance entries.
    pub balance_entries: usize,
    /// Hex BLAKE3 commitment to the full ledger state.
    pub state_root: String,
    /// Whether the on-disk snapshot lags the live ledger.
    pub degraded: bool,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `GET /balances/:participant/:asset`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub participant: ParticipantId,
    pub asset: AssetId,
    pub balance: u64,
}

/// Response payload for `GET /assets`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssetsResponse {
    pub assets: Vec<AssetId>,
}

/// Response payload for `GET /me/balances`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HoldingsResponse {
    pub participant: ParticipantId,
    pub balances: BTreeMap<AssetId, u64>,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_response(state: &AppState) -> StatusResponse {
    let status = state.service.status();
    StatusResponse {
        degraded: status.degraded,
        version: state.version.clone(),
        administrator: status.administrator,
        custody_account: status.custody_account,
        paused: status.paused,
        allowed_assets: status.allowed_assets,
        balance_entries: status.balance_entries,
        state_root: status.state_root,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Runs `f` against the application state on the blocking pool.
async fn run_blocking<T, F>(state: AppState, f: F) -> Result<T, tokio::task::JoinError>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&state)).await
}

fn join_failed(e: tokio::task::JoinError) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!(error = %e, "ledger task failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
}

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: returns the ledger status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    match run_blocking(state, status_response).await {
        Ok(status) => (
            StatusCode::OK,
            Json(serde_json::to_value(status).unwrap_or_default()),
        ),
        Err(e) => join_failed(e),
    }
}

/// `GET /balances/:participant/:asset`: recorded balance, zero if absent.
async fn balance_handler(
    State(state): State<AppState>,
    Path((participant, asset)): Path<(String, String)>,
) -> impl IntoResponse {
    let parsed = ParticipantId::from_hex(&participant)
        .map_err(|e| format!("invalid participant: {}", e))
        .and_then(|p| {
            AssetId::from_hex(&asset)
                .map(|a| (p, a))
                .map_err(|e| format!("invalid asset: {}", e))
        });

    match parsed {
        Ok((participant, asset)) => {
            let balance =
                match run_blocking(state, move |s| s.service.balance_of(&participant, &asset))
                    .await
                {
                    Ok(balance) => balance,
                    Err(e) => return join_failed(e),
                };
            (
                StatusCode::OK,
                Json(serde_json::to_value(BalanceResponse {
                    participant,
                    asset,
                    balance,
                })
                .unwrap_or_default()),
            )
        }
        Err(error) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::to_value(ErrorResponse { error }).unwrap_or_default()),
        ),
    }
}

/// `GET /assets`: the allow-list, in identifier order.
async fn assets_handler(State(state): State<AppState>) -> impl IntoResponse {
    match run_blocking(state, |s| s.service.allowed_assets()).await {
        Ok(assets) => (
            StatusCode::OK,
            Json(serde_json::json!(AssetsResponse {
                assets: assets.into_iter().collect(),
            })),
        ),
        Err(e) => join_failed(e),
    }
}

/// `GET /me/balances`: every non-zero balance recorded for the caller.
async fn my_balances_handler(
    State(state): State<AppState>,
    Caller(participant): Caller,
) -> impl IntoResponse {
    match run_blocking(state, move |s| s.service.balances_of(&participant)).await {
        Ok(balances) => (
            StatusCode::OK,
            Json(serde_json::json!(HoldingsResponse {
                participant,
                balances,
            })),
        ),
        Err(e) => join_failed(e),
    }
}

/// `POST /rpc`: JSON-RPC 2.0 gateway.
///
/// Routes method calls to the ledger service. Unknown methods return
/// error code -32601 (Method not found).
async fn rpc_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError::new(
                codes::INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            )),
            id: req.id,
        });
    }

    let metrics = state.metrics.clone();
    let method = req.method.clone();
    let outcome = run_blocking(state, move |s| dispatch(s, &headers, &method, req.params))
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "rpc task failed");
            Err(JsonRpcError::new(codes::INTERNAL_ERROR, "Internal error"))
        });

    let known = !matches!(&outcome, Err(e) if e.code == codes::METHOD_NOT_FOUND);
    metrics.record_rpc(&req.method, known);

    let (result, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e)),
    };

    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id: req.id,
    })
}

fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, JsonRpcError> {
    let caller = || -> Result<ParticipantId, JsonRpcError> {
        match Caller::from_headers(headers) {
            Ok(Some(Caller(id))) => Ok(id),
            Ok(None) => Err(JsonRpcError::caller(CallerRejection::Missing)),
            Err(rejection) => Err(JsonRpcError::caller(rejection)),
        }
    };
    let service = &state.service;

    match method {
        "coffer_deposit" => {
            let who = caller()?;
            let p: MovementParams = parse_params(params)?;
            let balance = service.deposit(&who, &p.asset, p.amount)?;
            Ok(serde_json::json!({ "balance": balance }))
        }
        "coffer_withdraw" => {
            let who = caller()?;
            let p: MovementParams = parse_params(params)?;
            let balance = service.withdraw(&who, &p.asset, p.amount)?;
            Ok(serde_json::json!({ "balance": balance }))
        }
        "coffer_allowAsset" => {
            let who = caller()?;
            let p: AssetParams = parse_params(params)?;
            let added = service.allow_asset(&who, p.asset)?;
            Ok(serde_json::json!({ "added": added }))
        }
        "coffer_pause" => {
            let changed = service.pause(&caller()?)?;
            Ok(serde_json::json!({ "paused": true, "changed": changed }))
        }
        "coffer_unpause" => {
            let changed = service.unpause(&caller()?)?;
            Ok(serde_json::json!({ "paused": false, "changed": changed }))
        }
        "coffer_transferAuthority" => {
            let who = caller()?;
            let p: TransferAuthorityParams = parse_params(params)?;
            let previous = service.transfer_authority(&who, p.new_holder)?;
            Ok(serde_json::json!({ "previous": previous, "administrator": p.new_holder }))
        }
        "coffer_balanceOf" => {
            let p: PositionParams = parse_params(params)?;
            Ok(serde_json::json!(service.balance_of(&p.participant, &p.asset)))
        }
        "coffer_holdingsOf" => {
            let p: PositionParams = parse_params(params)?;
            Ok(serde_json::json!(service.holdings_of(&p.participant, &p.asset)))
        }
        "coffer_allowedAssets" => Ok(serde_json::json!(service.allowed_assets())),
        "coffer_status" => serde_json::to_value(status_response(state))
            .map_err(|e| JsonRpcError::new(codes::INTERNAL_ERROR, e.to_string())),
        _ => Err(JsonRpcError::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )),
    }
}

/// `GET /ws`: WebSocket upgrade for live notification streaming.
///
/// Clients receive one JSON-encoded [`Notification`] per completed ledger
/// operation. The connection is push-only; client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Drives a single WebSocket connection, forwarding broadcast events
/// until the client disconnects or the channel is closed.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(notification) => {
                        let payload = match serde_json::to_string(&notification) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws notification: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} notifications", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use coffer_protocol::config::CALLER_HEADER;
    use coffer_protocol::storage::LedgerDb;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::metrics::LedgerMetrics;

    fn admin() -> ParticipantId {
        ParticipantId::derive("admin")
    }

    fn alice() -> ParticipantId {
        ParticipantId::derive("alice")
    }

    fn usdc() -> AssetId {
        AssetId::derive("USDC", "circle")
    }

    /// Creates a test AppState backed by a temporary database, with USDC
    /// allowed and alice holding 1 000 externally.
    fn test_app_state() -> AppState {
        let db = LedgerDb::open_temporary().expect("temp db");
        let (event_tx, _) = broadcast::channel(16);
        let metrics = Arc::new(LedgerMetrics::new());
        let service =
            LedgerService::open(db, metrics.clone(), event_tx.clone(), Some(admin())).unwrap();
        service.allow_asset(&admin(), usdc()).unwrap();
        service.fund(alice(), usdc(), 1_000).unwrap();

        AppState {
            version: "0.1.0-test".into(),
            service,
            event_tx,
            metrics,
        }
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    /// Sends a JSON-RPC call, optionally as `caller`, and returns the
    /// decoded response envelope.
    async fn rpc(
        router: &Router,
        caller: Option<ParticipantId>,
        method: &str,
        params: serde_json::Value,
    ) -> JsonRpcResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json");
        if let Some(id) = caller {
            builder = builder.header(CALLER_HEADER, id.to_hex());
        }
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let req = builder
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    // -- Health / status ------------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_endpoint_reports_ledger() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/status").await;

        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.administrator, admin());
        assert!(!resp.paused);
        assert_eq!(resp.allowed_assets, 1);
        assert_eq!(resp.state_root.len(), 64);
    }

    #[tokio::test]
    async fn assets_endpoint_lists_allow_list() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/assets").await;

        assert_eq!(status, StatusCode::OK);
        let resp: AssetsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.assets, vec![usdc()]);
    }

    // -- Deposit / withdraw ---------------------------------------------------

    #[tokio::test]
    async fn deposit_and_withdraw_round_trip() {
        let state = test_app_state();
        let router = create_router(state.clone());
        let params = serde_json::json!({ "asset": usdc(), "amount": 100 });

        let resp = rpc(&router, Some(alice()), "coffer_deposit", params.clone()).await;
        assert!(resp.error.is_none(), "{:?}", resp.error);
        assert_eq!(resp.result.unwrap()["balance"], 100);

        let path = format!("/balances/{}/{}", alice().to_hex(), usdc().to_hex());
        let (status, body) = get(&router, &path).await;
        assert_eq!(status, StatusCode::OK);
        let balance: BalanceResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(balance.balance, 100);

        let resp = rpc(&router, Some(alice()), "coffer_withdraw", params).await;
        assert_eq!(resp.result.unwrap()["balance"], 0);

        let holdings = rpc(
            &router,
            None,
            "coffer_holdingsOf",
            serde_json::json!({ "participant": alice(), "asset": usdc() }),
        )
        .await;
        assert_eq!(holdings.result.unwrap(), 1_000);
        assert_eq!(state.metrics.deposits_total.get(), 1);
        assert_eq!(state.metrics.withdrawals_total.get(), 1);
    }

    #[tokio::test]
    async fn overdraw_maps_to_insufficient_balance() {
        let router = create_router(test_app_state());
        rpc(
            &router,
            Some(alice()),
            "coffer_deposit",
            serde_json::json!({ "asset": usdc(), "amount": 100 }),
        )
        .await;

        let resp = rpc(
            &router,
            Some(alice()),
            "coffer_withdraw",
            serde_json::json!({ "asset": usdc(), "amount": 150 }),
        )
        .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, codes::INSUFFICIENT_BALANCE);
        assert_eq!(err.data.unwrap()["kind"], "insufficient_balance");

        let balance = rpc(
            &router,
            None,
            "coffer_balanceOf",
            serde_json::json!({ "participant": alice(), "asset": usdc() }),
        )
        .await;
        assert_eq!(balance.result.unwrap(), 100);
    }

    #[tokio::test]
    async fn deposit_without_caller_rejected() {
        let router = create_router(test_app_state());
        let resp = rpc(
            &router,
            None,
            "coffer_deposit",
            serde_json::json!({ "asset": usdc(), "amount": 1 }),
        )
        .await;
        assert_eq!(resp.error.unwrap().code, codes::CALLER_REQUIRED);
    }

    #[tokio::test]
    async fn zero_amount_rejected() {
        let router = create_router(test_app_state());
        let resp = rpc(
            &router,
            Some(alice()),
            "coffer_deposit",
            serde_json::json!({ "asset": usdc(), "amount": 0 }),
        )
        .await;
        assert_eq!(resp.error.unwrap().code, codes::ZERO_AMOUNT);
    }

    // -- Administration -------------------------------------------------------

    #[tokio::test]
    async fn pause_blocks_deposits_until_unpaused() {
        let router = create_router(test_app_state());
        let deposit = serde_json::json!({ "asset": usdc(), "amount": 50 });

        let resp = rpc(&router, Some(admin()), "coffer_pause", serde_json::Value::Null).await;
        assert_eq!(resp.result.unwrap()["changed"], true);

        let resp = rpc(&router, Some(alice()), "coffer_deposit", deposit.clone()).await;
        assert_eq!(resp.error.unwrap().code, codes::SYSTEM_PAUSED);

        rpc(&router, Some(admin()), "coffer_unpause", serde_json::Value::Null).await;
        let resp = rpc(&router, Some(alice()), "coffer_deposit", deposit).await;
        assert_eq!(resp.result.unwrap()["balance"], 50);
    }

    #[tokio::test]
    async fn outsider_cannot_administer() {
        let router = create_router(test_app_state());
        for (method, params) in [
            ("coffer_pause", serde_json::Value::Null),
            ("coffer_unpause", serde_json::Value::Null),
            (
                "coffer_allowAsset",
                serde_json::json!({ "asset": AssetId::derive("DAI", "maker") }),
            ),
            (
                "coffer_transferAuthority",
                serde_json::json!({ "new_holder": alice() }),
            ),
        ] {
            let resp = rpc(&router, Some(alice()), method, params).await;
            assert_eq!(resp.error.unwrap().code, codes::UNAUTHORIZED, "{method}");
        }

        let (_, body) = get(&router, "/assets").await;
        let resp: AssetsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.assets.len(), 1);
    }

    #[tokio::test]
    async fn transfer_authority_via_rpc() {
        let router = create_router(test_app_state());
        let resp = rpc(
            &router,
            Some(admin()),
            "coffer_transferAuthority",
            serde_json::json!({ "new_holder": alice() }),
        )
        .await;
        assert_eq!(
            resp.result.unwrap()["previous"],
            serde_json::json!(admin())
        );

        let resp = rpc(&router, None, "coffer_status", serde_json::Value::Null).await;
        let status: StatusResponse = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(status.administrator, alice());
    }

    #[tokio::test]
    async fn allow_asset_then_list() {
        let router = create_router(test_app_state());
        let dai = AssetId::derive("DAI", "maker");
        let resp = rpc(
            &router,
            Some(admin()),
            "coffer_allowAsset",
            serde_json::json!({ "asset": dai }),
        )
        .await;
        assert_eq!(resp.result.unwrap()["added"], true);

        let resp = rpc(&router, None, "coffer_allowedAssets", serde_json::Value::Null).await;
        let assets: Vec<AssetId> = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(assets.contains(&dai));
        assert!(assets.contains(&usdc()));
    }

    // -- Protocol errors ------------------------------------------------------

    #[tokio::test]
    async fn rpc_invalid_version_returns_error() {
        let router = create_router(test_app_state());
        let req = Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"jsonrpc":"1.0","method":"coffer_status","id":7}"#,
            ))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let resp: JsonRpcResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(resp.error.unwrap().code, codes::INVALID_REQUEST);
        assert_eq!(resp.id, 7);
    }

    #[tokio::test]
    async fn unknown_method_and_bad_params() {
        let router = create_router(test_app_state());
        let resp = rpc(&router, None, "coffer_mint", serde_json::Value::Null).await;
        assert_eq!(resp.error.unwrap().code, codes::METHOD_NOT_FOUND);

        let resp = rpc(
            &router,
            Some(alice()),
            "coffer_deposit",
            serde_json::json!({ "asset": "zz", "amount": 1 }),
        )
        .await;
        assert_eq!(resp.error.unwrap().code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn balance_endpoint_rejects_bad_hex() {
        let router = create_router(test_app_state());
        let (status, _) = get(&router, &format!("/balances/nothex/{}", usdc().to_hex())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn my_balances_requires_caller() {
        let router = create_router(test_app_state());
        rpc(
            &router,
            Some(alice()),
            "coffer_deposit",
            serde_json::json!({ "asset": usdc(), "amount": 25 }),
        )
        .await;

        let (status, _) = get(&router, "/me/balances").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/me/balances")
            .header(CALLER_HEADER, alice().to_hex())
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let holdings: HoldingsResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(holdings.participant, alice());
        assert_eq!(holdings.balances.get(&usdc()), Some(&25));

        let req = Request::builder()
            .uri("/me/balances")
            .header(CALLER_HEADER, "not-an-id")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn notifications_are_broadcast() {
        let state = test_app_state();
        let mut rx = state.event_tx.subscribe();
        let router = create_router(state);

        rpc(
            &router,
            Some(alice()),
            "coffer_deposit",
            serde_json::json!({ "asset": usdc(), "amount": 10 }),
        )
        .await;

        let n = rx.recv().await.unwrap();
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "deposit_completed");
        assert_eq!(json["amount"], 10);
    }

    #[tokio::test]
    async fn rpc_calls_are_counted_by_method() {
        let state = test_app_state();
        let router = create_router(state.clone());

        rpc(&router, None, "coffer_status", serde_json::Value::Null).await;
        rpc(&router, None, "coffer_status", serde_json::Value::Null).await;
        rpc(&router, None, "eth_blockNumber", serde_json::Value::Null).await;

        let count = |m: &str| state.metrics.rpc_requests_total.with_label_values(&[m]).get();
        assert_eq!(count("coffer_status"), 2);
        assert_eq!(count("unknown"), 1);
    }

    #[tokio::test]
    async fn custody_account_cannot_deposit_as_caller() {
        let state = test_app_state();
        let router = create_router(state.clone());
        let custody = state.service.status().custody_account;
        state.service.fund(custody, usdc(), 100).unwrap();

        let resp = rpc(
            &router,
            Some(custody),
            "coffer_deposit",
            serde_json::json!({ "asset": usdc(), "amount": 100 }),
        )
        .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, codes::INVALID_IDENTITY);
        assert_eq!(state.service.balance_of(&custody, &usdc()), 0);
    }
}
