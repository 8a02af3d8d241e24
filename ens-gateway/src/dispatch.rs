//! Dispatch engine: selector lookup, decode, execute, encode.
//!
//! ```text
//! RpcCall ─→ Dispatcher::dispatch ─→ split selector ─→ HandlerTable lookup
//!   ─→ decode args (declared input types) ─→ Handler / Multicall
//!   ─→ encode result (declared output types) ─→ RpcResponse
//!   ─→ Gateway response stages (integrity, signing) ─→ RpcResponse
//! ```
//!
//! Every failure is converted into an [`RpcResponse`]; nothing a handler
//! does (error or panic) can escape the dispatch loop.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::ser::SerializeMap;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::abi::split_selector;
use crate::auth::WriteAuthorization;
use crate::error::{Error, Result};
use crate::handler::{Args, CallContext, HandlerKind, HandlerTable};
use crate::multicall;

/// An inbound call: recipient contract and raw calldata.
#[derive(Debug, Clone)]
pub struct RpcCall {
    /// The contract the CCIP-Read request originates from.
    pub to: Address,
    /// Raw calldata (selector followed by ABI-encoded arguments).
    pub data: Bytes,
    /// Optional EIP-712 write authorization (EIP-5559 POST bodies).
    pub authorization: Option<Arc<WriteAuthorization>>,
}

impl RpcCall {
    /// Create a call without write authorization.
    #[must_use]
    pub const fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            authorization: None,
        }
    }

    /// Attach a write authorization.
    #[must_use]
    pub fn with_authorization(mut self, authorization: WriteAuthorization) -> Self {
        self.authorization = Some(Arc::new(authorization));
        self
    }
}

/// Response body: encoded data on success, a message on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// ABI-encoded result plus optional ttl.
    Data {
        /// Encoded bytes.
        data: Bytes,
        /// Time-to-live (offset before signing, expiry timestamp after).
        ttl: Option<u64>,
    },
    /// Failure description.
    Message {
        /// Human-readable message.
        message: String,
    },
}

/// Serializes to `{"data": "0x..", "ttl": n}` or `{"message": ".."}`.
impl Serialize for ResponseBody {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Data { data, ttl } => {
                let mut map = serializer.serialize_map(Some(if ttl.is_some() { 2 } else { 1 }))?;
                map.serialize_entry("data", &data.to_string())?;
                if let Some(ttl) = ttl {
                    map.serialize_entry("ttl", ttl)?;
                }
                map.end()
            }
            Self::Message { message } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("message", message)?;
                map.end()
            }
        }
    }
}

/// Status code plus body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcResponse {
    /// HTTP-style status code.
    pub status: u16,
    /// Response body.
    pub body: ResponseBody,
}

impl RpcResponse {
    /// Successful response.
    #[must_use]
    pub const fn ok(data: Bytes, ttl: Option<u64>) -> Self {
        Self {
            status: 200,
            body: ResponseBody::Data { data, ttl },
        }
    }

    /// Failure response with an explicit status.
    #[must_use]
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ResponseBody::Message {
                message: message.into(),
            },
        }
    }

    /// Failure response derived from an [`Error`].
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        Self::error(err.status(), err.to_string())
    }

    /// Whether the status is 200.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Encoded data, if this is a data body.
    #[must_use]
    pub const fn data(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Data { data, .. } => Some(data),
            ResponseBody::Message { .. } => None,
        }
    }

    /// Ttl, if this is a data body that carries one.
    #[must_use]
    pub const fn ttl(&self) -> Option<u64> {
        match &self.body {
            ResponseBody::Data { ttl, .. } => *ttl,
            ResponseBody::Message { .. } => None,
        }
    }

    /// Failure message, if this is a message body.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Message { message } => Some(message),
            ResponseBody::Data { .. } => None,
        }
    }
}

/// Resolves calldata to a handler and runs it.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<HandlerTable>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("table", &self.table)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher over a frozen handler table.
    #[must_use]
    pub fn new(table: HandlerTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    /// The handler table.
    #[must_use]
    pub fn table(&self) -> &HandlerTable {
        &self.table
    }

    /// Dispatch a top-level call.
    pub fn dispatch(&self, call: RpcCall) -> BoxFuture<'_, RpcResponse> {
        self.dispatch_context(CallContext::new(call.to, call.data, call.authorization))
    }

    /// Dispatch with an explicit context; used recursively by multicall.
    pub(crate) fn dispatch_context(&self, ctx: CallContext) -> BoxFuture<'_, RpcResponse> {
        let span = info_span!("dispatch", sender = %ctx.sender, nested = ctx.is_nested());
        async move {
            match self.execute(&ctx).await {
                Ok(response) => response,
                Err(e) => {
                    if e.status() >= 500 {
                        error!(status = e.status(), error = %e, "call failed");
                    } else {
                        debug!(status = e.status(), error = %e, "call rejected");
                    }
                    RpcResponse::from_error(&e)
                }
            }
        }
        .instrument(span)
        .boxed()
    }

    async fn execute(&self, ctx: &CallContext) -> Result<RpcResponse> {
        let (selector, payload) = split_selector(&ctx.data)?;
        let registration = self
            .table
            .get(&selector)
            .ok_or(Error::NotImplemented { selector })?;
        let signature = &registration.signature;
        debug!(%selector, function = signature.canonical(), "dispatching");

        let args = Args::new(signature.decode_input(payload)?);

        let reply = match &registration.kind {
            HandlerKind::Function(handler) => {
                AssertUnwindSafe(handler.handle(args, ctx))
                    .catch_unwind()
                    .await
                    .map_err(|panic| {
                        let message = panic_message(panic.as_ref());
                        warn!(%selector, %message, "handler panicked");
                        Error::application(message)
                    })??
            }
            HandlerKind::Multicall => multicall::execute(self, &args, ctx).await?,
        };

        let data = if signature.outputs().is_empty() || reply.values.is_empty() {
            Bytes::new()
        } else {
            signature.encode_output(&reply.values)?
        };

        Ok(RpcResponse::ok(data, reply.ttl))
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_owned())
}

/// Post-processing applied to every dispatched response.
///
/// Stages run in registration order. A stage error fails the request
/// closed: the caller gets the error response, never a half-processed body.
#[async_trait]
pub trait ResponseStage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect and possibly rewrite `response` for `call`.
    async fn process(&self, call: &RpcCall, response: RpcResponse) -> Result<RpcResponse>;
}

/// Dispatcher plus its response pipeline.
pub struct Gateway {
    dispatcher: Dispatcher,
    stages: Vec<Box<dyn ResponseStage>>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("Gateway")
            .field("dispatcher", &self.dispatcher)
            .field("stages", &stages)
            .finish()
    }
}

impl Gateway {
    /// Create a gateway with no response stages.
    #[must_use]
    pub fn new(table: HandlerTable) -> Self {
        Self {
            dispatcher: Dispatcher::new(table),
            stages: Vec::new(),
        }
    }

    /// Append a response stage.
    #[must_use]
    pub fn with_stage<S: ResponseStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// The underlying dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Dispatch `call` and run every response stage over the result.
    pub async fn handle(&self, call: RpcCall) -> RpcResponse {
        let mut response = self.dispatcher.dispatch(call.clone()).await;
        for stage in &self.stages {
            response = match stage.process(&call, response).await {
                Ok(response) => response,
                Err(e) => {
                    error!(stage = stage.name(), error = %e, "response stage failed");
                    return RpcResponse::from_error(&e);
                }
            };
        }
        response
    }
}
