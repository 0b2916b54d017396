//! # Caller Identity
//!
//! Resolves "who is asking" for every request. The node trusts the
//! `x-coffer-caller` header as authoritative: whatever sits in front of the
//! node (gateway, mTLS terminator, wallet bridge) authenticates the caller
//! and sets the header. The node itself performs no authentication.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use serde_json::json;

use coffer_protocol::config::CALLER_HEADER;
use coffer_protocol::identity::ParticipantId;

/// The identity a request acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub ParticipantId);

/// Why a caller header could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerRejection {
    Missing,
    Malformed(String),
}

impl CallerRejection {
    pub fn message(&self) -> String {
        match self {
            CallerRejection::Missing => format!("{CALLER_HEADER} header is required"),
            CallerRejection::Malformed(reason) => {
                format!("{CALLER_HEADER} header is not a valid identity: {reason}")
            }
        }
    }
}

impl Caller {
    /// Reads the caller header. `Ok(None)` when absent.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, CallerRejection> {
        let Some(value) = headers.get(CALLER_HEADER) else {
            return Ok(None);
        };
        let text = value
            .to_str()
            .map_err(|e| CallerRejection::Malformed(e.to_string()))?;
        let id = ParticipantId::from_hex(text.trim())
            .map_err(|e| CallerRejection::Malformed(e.to_string()))?;
        Ok(Some(Caller(id)))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match Caller::from_headers(&parts.headers) {
            Ok(Some(caller)) => Ok(caller),
            Ok(None) => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "missing_caller",
                    "message": CallerRejection::Missing.message(),
                })),
            )),
            Err(rejection) => Err((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_caller",
                    "message": rejection.message(),
                })),
            )),
        }
    }
}
