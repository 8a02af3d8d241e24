//! HTTP transport for the CCIP-Read URL template.
//!
//! ```text
//! GET  {prefix}/{sender}/{calldata}[.json]
//! POST {prefix}/   {"sender": "0x..", "data": "0x..", "signature": {..}?}
//! ```
//!
//! Both return `{"data": "0x..", "ttl": n}` on success and
//! `{"message": ".."}` otherwise, with the dispatch status as HTTP status.
//! Rejections raised by the middleware itself (timeout, body limit, unknown
//! route) are rewritten into the same `{"message": ".."}` shape.

use std::any::Any;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{StatusCode, header};
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::auth::{AuthMessage, WriteAuthorization};
use crate::config::ServerConfig;
use crate::dispatch::{Gateway, RpcCall, RpcResponse};
use crate::error::{Error, Result};

/// POST body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    /// Requesting contract address.
    pub sender: String,
    /// Hex calldata.
    pub data: String,
    /// Optional EIP-5559 write authorization.
    #[serde(default)]
    pub signature: Option<SignaturePayload>,
}

/// Signed write authorization as sent by clients.
#[derive(Debug, Clone, Deserialize)]
pub struct SignaturePayload {
    /// Hex `r ‖ s ‖ v`.
    pub signature: String,
    /// The signed message.
    pub message: MessagePayload,
}

/// EIP-712 message fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Hex calldata the signer approved.
    pub call_data: String,
    /// Contract address.
    pub sender: String,
    /// Unix seconds, as a JSON number or decimal/hex string.
    pub expiration_timestamp: serde_json::Value,
}

fn parse_sender(raw: &str) -> Result<Address> {
    Address::from_str(raw).map_err(|e| Error::malformed(format!("invalid sender '{raw}': {e}")))
}

fn parse_data(raw: &str) -> Result<Bytes> {
    Bytes::from_str(raw).map_err(|e| Error::malformed(format!("invalid calldata: {e}")))
}

fn parse_expiration(value: &serde_json::Value) -> Result<u64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => U256::from_str(s)
            .ok()
            .and_then(|v| u64::try_from(v).ok()),
        _ => None,
    };
    parsed.ok_or_else(|| Error::malformed(format!("invalid expirationTimestamp: {value}")))
}

impl GatewayRequest {
    /// Validate and convert into an [`RpcCall`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] for invalid hex or addresses.
    pub fn into_call(self) -> Result<RpcCall> {
        let call = RpcCall::new(parse_sender(&self.sender)?, parse_data(&self.data)?);
        let Some(payload) = self.signature else {
            return Ok(call);
        };
        let authorization = WriteAuthorization {
            signature: parse_data(&payload.signature)?,
            message: AuthMessage {
                call_data: parse_data(&payload.message.call_data)?,
                sender: parse_sender(&payload.message.sender)?,
                expiration: parse_expiration(&payload.message.expiration_timestamp)?,
            },
        };
        Ok(call.with_authorization(authorization))
    }
}

impl IntoResponse for RpcResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body)).into_response()
    }
}

async fn handle_get(
    State(gateway): State<Arc<Gateway>>,
    Path((sender, call_data)): Path<(String, String)>,
) -> Response {
    let call_data = call_data.strip_suffix(".json").unwrap_or(&call_data);
    let call = match (parse_sender(&sender), parse_data(call_data)) {
        (Ok(to), Ok(data)) => RpcCall::new(to, data),
        (Err(e), _) | (_, Err(e)) => return RpcResponse::from_error(&e).into_response(),
    };
    debug!(sender = %call.to, bytes = call.data.len(), "GET request");
    gateway.handle(call).await.into_response()
}

async fn handle_post(
    State(gateway): State<Arc<Gateway>>,
    body: std::result::Result<Json<GatewayRequest>, JsonRejection>,
) -> Response {
    let call = match body
        .map_err(|rejection| Error::malformed(rejection.body_text()))
        .and_then(|Json(request)| request.into_call())
    {
        Ok(call) => call,
        Err(e) => return RpcResponse::from_error(&e).into_response(),
    };
    debug!(
        sender = %call.to,
        bytes = call.data.len(),
        authorized = call.authorization.is_some(),
        "POST request"
    );
    gateway.handle(call).await.into_response()
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    error!(%message, "request handler panicked");
    RpcResponse::error(500, "internal server error").into_response()
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

async fn json_rejection(response: Response) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || is_json(&response) {
        return response;
    }
    let reason = status
        .canonical_reason()
        .map_or_else(|| "request failed".to_owned(), str::to_lowercase);
    debug!(status = status.as_u16(), %reason, "middleware rejection");
    RpcResponse::error(status.as_u16(), reason).into_response()
}

/// Build the gateway router with its middleware stack.
pub fn router(gateway: Arc<Gateway>, server: &ServerConfig) -> Router {
    let routes = Router::new()
        .route("/", post(handle_post))
        .route("/:sender/:call_data", get(handle_get))
        .with_state(gateway);

    let app = if server.prefix.is_empty() || server.prefix == "/" {
        routes
    } else {
        Router::new().nest(&server.prefix, routes)
    };

    app.layer(DefaultBodyLimit::max(server.max_body_bytes))
        .layer(RequestBodyLimitLayer::new(server.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs)))
        .layer(map_response(json_rejection))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
}
