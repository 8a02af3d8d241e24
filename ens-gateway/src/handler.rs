//! Handlers and the selector-keyed handler table.
//!
//! A handler pairs a [`FunctionSignature`] with an async business function.
//! The table is filled at startup and then shared immutably by the
//! dispatch engine; registering a second handler for a selector replaces the
//! first (last write wins), which lets composition layers override built-ins
//! such as multicall.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, B256, Bytes, Selector, U256};
use async_trait::async_trait;
use tracing::debug;

use crate::abi::{AbiRegistry, FunctionSignature};
use crate::auth::WriteAuthorization;
use crate::error::{Error, Result};
use crate::multicall::MULTICALL_SIGNATURE;

/// Raw call context handed to every handler.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Address of the contract that issued the CCIP-Read request.
    pub sender: Address,
    /// Calldata of this call (selector included).
    pub data: Bytes,
    /// Calldata of the top-level request; differs from `data` inside a multicall.
    pub root_data: Bytes,
    /// EIP-712 write authorization attached to the top-level request.
    pub authorization: Option<Arc<WriteAuthorization>>,
    /// Multicall nesting level; 0 for the top-level call.
    pub depth: u8,
}

impl CallContext {
    /// Context for a top-level call.
    #[must_use]
    pub fn new(
        sender: Address,
        data: Bytes,
        authorization: Option<Arc<WriteAuthorization>>,
    ) -> Self {
        Self {
            sender,
            root_data: data.clone(),
            data,
            authorization,
            depth: 0,
        }
    }

    /// Context for a call nested inside this one (multicall slot).
    #[must_use]
    pub fn nested(&self, data: Bytes) -> Self {
        Self {
            sender: self.sender,
            data,
            root_data: self.root_data.clone(),
            authorization: self.authorization.clone(),
            depth: self.depth.saturating_add(1),
        }
    }

    /// Whether this context belongs to a nested call.
    #[must_use]
    pub const fn is_nested(&self) -> bool {
        self.depth > 0
    }
}

/// Decoded call arguments with typed accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<DynSolValue>);

impl Args {
    /// Wrap decoded values.
    #[must_use]
    pub const fn new(values: Vec<DynSolValue>) -> Self {
        Self(values)
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw value at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] if the index is out of range.
    pub fn get(&self, index: usize) -> Result<&DynSolValue> {
        self.0
            .get(index)
            .ok_or_else(|| Error::malformed(format!("missing argument {index}")))
    }

    /// `bytes32` argument.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] on a type mismatch.
    pub fn b256(&self, index: usize) -> Result<B256> {
        match self.get(index)? {
            DynSolValue::FixedBytes(word, 32) => Ok(*word),
            other => Err(mismatch(index, "bytes32", other)),
        }
    }

    /// `address` argument.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] on a type mismatch.
    pub fn address(&self, index: usize) -> Result<Address> {
        match self.get(index)? {
            DynSolValue::Address(addr) => Ok(*addr),
            other => Err(mismatch(index, "address", other)),
        }
    }

    /// Unsigned integer argument of any width.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] on a type mismatch.
    pub fn uint(&self, index: usize) -> Result<U256> {
        match self.get(index)? {
            DynSolValue::Uint(value, _) => Ok(*value),
            other => Err(mismatch(index, "uint", other)),
        }
    }

    /// Unsigned integer argument narrowed to `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] on a type mismatch or overflow.
    pub fn u64(&self, index: usize) -> Result<u64> {
        let value = self.uint(index)?;
        u64::try_from(value)
            .map_err(|_| Error::malformed(format!("argument {index} does not fit in uint64")))
    }

    /// `string` argument.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] on a type mismatch.
    pub fn string(&self, index: usize) -> Result<&str> {
        match self.get(index)? {
            DynSolValue::String(s) => Ok(s),
            other => Err(mismatch(index, "string", other)),
        }
    }

    /// Dynamic `bytes` argument.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] on a type mismatch.
    pub fn bytes(&self, index: usize) -> Result<Bytes> {
        match self.get(index)? {
            DynSolValue::Bytes(b) => Ok(Bytes::copy_from_slice(b)),
            other => Err(mismatch(index, "bytes", other)),
        }
    }

    /// `bytes[]` argument.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] on a type mismatch.
    pub fn bytes_array(&self, index: usize) -> Result<Vec<Bytes>> {
        match self.get(index)? {
            DynSolValue::Array(items) => items
                .iter()
                .map(|item| match item {
                    DynSolValue::Bytes(b) => Ok(Bytes::copy_from_slice(b)),
                    other => Err(mismatch(index, "bytes[]", other)),
                })
                .collect(),
            other => Err(mismatch(index, "bytes[]", other)),
        }
    }

    /// Consume into the underlying values.
    #[must_use]
    pub fn into_inner(self) -> Vec<DynSolValue> {
        self.0
    }
}

fn mismatch(index: usize, expected: &str, got: &DynSolValue) -> Error {
    let actual = got
        .as_type()
        .map_or_else(|| "unknown".to_owned(), |t| t.to_string());
    Error::malformed(format!("argument {index}: expected {expected}, got {actual}"))
}

/// Successful handler result: return values plus optional metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// Return values, in declared output order.
    pub values: Vec<DynSolValue>,
    /// Time-to-live offset in seconds.
    pub ttl: Option<u64>,
}

impl Reply {
    /// Reply with the given values.
    #[must_use]
    pub const fn new(values: Vec<DynSolValue>) -> Self {
        Self { values, ttl: None }
    }

    /// Reply with no data.
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Reply with a single value.
    #[must_use]
    pub fn value(value: DynSolValue) -> Self {
        Self::new(vec![value])
    }

    /// Attach a ttl offset.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// An async business function behind a selector.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute with decoded arguments and the raw call context.
    async fn handle(&self, args: Args, ctx: &CallContext) -> Result<Reply>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    /// Wrap a closure.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Args, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply>> + Send,
{
    async fn handle(&self, args: Args, ctx: &CallContext) -> Result<Reply> {
        (self.0)(args, ctx.clone()).await
    }
}

/// What runs when a selector is hit.
#[derive(Clone)]
pub enum HandlerKind {
    /// A registered business function.
    Function(Arc<dyn Handler>),
    /// The built-in multicall fan-out.
    Multicall,
}

impl fmt::Debug for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function"),
            Self::Multicall => f.write_str("Multicall"),
        }
    }
}

/// A signature bound to its handler.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Parsed signature used to decode arguments and encode results.
    pub signature: FunctionSignature,
    /// The handler to invoke.
    pub kind: HandlerKind,
}

/// Selector → handler mapping.
#[derive(Clone)]
pub struct HandlerTable {
    abi: AbiRegistry,
    handlers: HashMap<Selector, Registration>,
}

impl HandlerTable {
    /// Create a table with multicall pre-registered.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the built-in signature is a constant.
    pub fn new() -> Result<Self> {
        let mut table = Self::empty();
        table.insert(FunctionSignature::parse(MULTICALL_SIGNATURE)?, HandlerKind::Multicall);
        Ok(table)
    }

    /// Create a table with no handlers at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            abi: AbiRegistry::new(),
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` under the function described by `signature`.
    ///
    /// Returns the computed selector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] if the signature cannot be parsed.
    pub fn register<H>(&mut self, signature: &str, handler: H) -> Result<Selector>
    where
        H: Handler + 'static,
    {
        self.register_shared(signature, Arc::new(handler))
    }

    /// Register an async closure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] if the signature cannot be parsed.
    pub fn register_fn<F, Fut>(&mut self, signature: &str, f: F) -> Result<Selector>
    where
        F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        self.register(signature, FnHandler::new(f))
    }

    /// Register a shared handler, e.g. one service behind several selectors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] if the signature cannot be parsed.
    pub fn register_shared(
        &mut self,
        signature: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<Selector> {
        let signature = FunctionSignature::parse(signature)?;
        let selector = signature.selector();
        self.insert(signature, HandlerKind::Function(handler));
        Ok(selector)
    }

    fn insert(&mut self, signature: FunctionSignature, kind: HandlerKind) {
        let selector = signature.selector();
        debug!(%selector, signature = signature.canonical(), ?kind, "registering handler");
        self.abi.insert(signature.clone());
        if self
            .handlers
            .insert(selector, Registration { signature, kind })
            .is_some()
        {
            debug!(%selector, "replaced existing handler");
        }
    }

    /// Look up the registration for a selector.
    #[must_use]
    pub fn get(&self, selector: &Selector) -> Option<&Registration> {
        self.handlers.get(selector)
    }

    /// Whether a selector has a handler.
    #[must_use]
    pub fn contains(&self, selector: &Selector) -> bool {
        self.handlers.contains_key(selector)
    }

    /// ABI registry of every registered signature.
    #[must_use]
    pub const fn abi(&self) -> &AbiRegistry {
        &self.abi
    }

    /// All registered selectors.
    #[must_use]
    pub fn selectors(&self) -> Vec<Selector> {
        self.handlers.keys().copied().collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let signatures: Vec<&str> = self
            .handlers
            .values()
            .map(|r| r.signature.canonical())
            .collect();
        f.debug_struct("HandlerTable")
            .field("handlers", &signatures)
            .finish()
    }
}
