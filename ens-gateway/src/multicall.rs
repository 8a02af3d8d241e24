//! Built-in `multicall(bytes[])` fan-out.
//!
//! Each inner call is dispatched through the same engine with the outer
//! call's sender and authorization. Slots run concurrently and results are
//! placed by index, so the output order always matches the input order. A
//! failed slot holds an `Error(string)` revert payload instead of data.
//!
//! A multicall may wrap another multicall, up to [`MAX_MULTICALL_DEPTH`]
//! levels. A batch nested deeper fails as malformed, which its parent
//! records as an error slot.

use std::panic::AssertUnwindSafe;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::Bytes;
use alloy::sol_types::{Revert, SolError};
use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::dispatch::{Dispatcher, RpcResponse, panic_message};
use crate::error::{Error, Result};
use crate::handler::{Args, CallContext, Reply};

/// Standard multicall signature, pre-registered in every handler table.
pub const MULTICALL_SIGNATURE: &str =
    "function multicall(bytes[] data) returns (bytes[] results)";

/// Deepest nesting level at which a multicall still executes; the
/// top-level batch is level 0.
pub const MAX_MULTICALL_DEPTH: u8 = 8;

/// Encode a failure message as `Error(string)` revert data.
#[must_use]
pub fn error_payload(message: &str) -> Bytes {
    Revert {
        reason: message.to_owned(),
    }
    .abi_encode()
    .into()
}

/// Decode `Error(string)` revert data back into its message.
///
/// Returns `None` when `data` is not an `Error(string)` payload.
#[must_use]
pub fn decode_error_payload(data: &[u8]) -> Option<String> {
    Revert::abi_decode(data).ok().map(|revert| revert.reason)
}

pub(crate) async fn execute(
    dispatcher: &Dispatcher,
    args: &Args,
    ctx: &CallContext,
) -> Result<Reply> {
    if ctx.depth >= MAX_MULTICALL_DEPTH {
        return Err(Error::malformed("multicall nested too deeply"));
    }
    let calls = args.bytes_array(0)?;
    debug!(calls = calls.len(), "multicall");

    let slots = calls.into_iter().map(|data| {
        let inner = ctx.nested(data);
        AssertUnwindSafe(dispatcher.dispatch_context(inner)).catch_unwind()
    });

    let results = join_all(slots)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| {
            let bytes = match outcome {
                Ok(response) => slot_bytes(index, response),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(slot = index, %message, "multicall slot panicked");
                    error_payload(&message)
                }
            };
            DynSolValue::Bytes(bytes.to_vec())
        })
        .collect();

    Ok(Reply::value(DynSolValue::Array(results)))
}

fn slot_bytes(index: usize, response: RpcResponse) -> Bytes {
    if response.is_success() {
        return response.data().cloned().unwrap_or_default();
    }
    let message = response.message().unwrap_or("call failed").to_owned();
    warn!(slot = index, status = response.status, %message, "multicall slot failed");
    error_payload(&message)
}
