//! ABI registry: parsed function signatures keyed by 4-byte selector.
//!
//! Signatures are parsed at runtime from human-readable Solidity fragments
//! (`function text(bytes32 node, string key) view returns (string)`) or a
//! JSON ABI, so handlers can be registered without compile-time bindings.
//! Encoding and decoding go through [`alloy::dyn_abi`] and therefore follow
//! the standard contract ABI rules bit for bit.

use std::collections::HashMap;
use std::fmt;

use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy::json_abi::{Function, JsonAbi, Param, StateMutability};
use alloy::primitives::{Bytes, Selector};

use crate::error::{Error, Result};

/// A parsed ABI function: name, typed inputs and outputs, and selector.
///
/// Immutable once parsed.
#[derive(Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    function: Function,
    selector: Selector,
    canonical: String,
}

impl FunctionSignature {
    /// Parse a human-readable function fragment.
    ///
    /// The leading `function` keyword is optional.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] if the fragment cannot be parsed.
    pub fn parse(fragment: &str) -> Result<Self> {
        let function = Function::parse(fragment.trim())
            .map_err(|e| Error::MalformedInterface(format!("`{fragment}`: {e}")))?;
        Ok(Self::from_function(function))
    }

    /// Wrap an already parsed [`Function`].
    #[must_use]
    pub fn from_function(function: Function) -> Self {
        let selector = function.selector();
        let canonical = function.signature();
        Self {
            function,
            selector,
            canonical,
        }
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// 4-byte selector (first 4 bytes of keccak256 of the canonical signature).
    #[must_use]
    pub const fn selector(&self) -> Selector {
        self.selector
    }

    /// Canonical signature string, e.g. `text(bytes32,string)`.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Declared inputs, in order.
    #[must_use]
    pub fn inputs(&self) -> &[Param] {
        &self.function.inputs
    }

    /// Declared outputs, in order.
    #[must_use]
    pub fn outputs(&self) -> &[Param] {
        &self.function.outputs
    }

    /// Whether the function may change state (neither `view` nor `pure`).
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(
            self.function.state_mutability,
            StateMutability::NonPayable | StateMutability::Payable
        )
    }

    /// Decode call arguments (calldata without the selector).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] if the payload does not match the
    /// declared input types.
    pub fn decode_input(&self, data: &[u8]) -> Result<Vec<DynSolValue>> {
        self.function
            .abi_decode_input(data)
            .map_err(|e| Error::malformed(format!("cannot decode {}: {e}", self.canonical)))
    }

    /// Encode a full call: selector followed by the encoded arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if `args` do not match the declared input types.
    pub fn encode_call(&self, args: &[DynSolValue]) -> Result<Bytes> {
        self.function
            .abi_encode_input(args)
            .map(Bytes::from)
            .map_err(|e| Error::malformed(format!("cannot encode {}: {e}", self.canonical)))
    }

    /// Encode return values according to the declared output types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `values` do not match the declared
    /// output types; that is a handler defect, not a caller mistake.
    pub fn encode_output(&self, values: &[DynSolValue]) -> Result<Bytes> {
        self.function
            .abi_encode_output(values)
            .map(Bytes::from)
            .map_err(|e| {
                Error::internal(format!("cannot encode result of {}: {e}", self.canonical))
            })
    }

    /// Decode return data according to the declared output types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] if the data does not match.
    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<DynSolValue>> {
        self.function.abi_decode_output(data).map_err(|e| {
            Error::malformed(format!("cannot decode result of {}: {e}", self.canonical))
        })
    }
}

impl fmt::Debug for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSignature")
            .field("selector", &self.selector)
            .field("signature", &self.canonical)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.canonical, self.selector)
    }
}

/// Mapping from selector to parsed [`FunctionSignature`].
#[derive(Debug, Clone, Default)]
pub struct AbiRegistry {
    functions: HashMap<Selector, FunctionSignature>,
}

impl AbiRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from human-readable function fragments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] on the first fragment that
    /// cannot be parsed.
    pub fn from_human_readable<I, S>(fragments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        for fragment in fragments {
            registry.insert(FunctionSignature::parse(fragment.as_ref())?);
        }
        Ok(registry)
    }

    /// Build a registry from a JSON ABI document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] if the document is not a valid
    /// JSON ABI.
    pub fn from_json(json: &str) -> Result<Self> {
        let abi: JsonAbi = serde_json::from_str(json)
            .map_err(|e| Error::MalformedInterface(format!("invalid JSON ABI: {e}")))?;
        let mut registry = Self::new();
        for function in abi.functions() {
            registry.insert(FunctionSignature::from_function(function.clone()));
        }
        Ok(registry)
    }

    /// Insert a signature, replacing any previous entry with the same selector.
    pub fn insert(&mut self, signature: FunctionSignature) -> Option<FunctionSignature> {
        self.functions.insert(signature.selector(), signature)
    }

    /// Look up a signature by selector.
    #[must_use]
    pub fn get(&self, selector: &Selector) -> Option<&FunctionSignature> {
        self.functions.get(selector)
    }

    /// Look up a signature by its canonical string, e.g. `addr(bytes32)`.
    #[must_use]
    pub fn by_canonical(&self, canonical: &str) -> Option<&FunctionSignature> {
        self.functions.values().find(|f| f.canonical() == canonical)
    }

    /// Iterate over all signatures.
    pub fn iter(&self) -> impl Iterator<Item = &FunctionSignature> {
        self.functions.values()
    }

    /// Number of registered signatures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Split calldata into its selector and argument payload.
///
/// # Errors
///
/// Returns [`Error::MalformedRequest`] if `data` is shorter than 4 bytes.
pub fn split_selector(data: &[u8]) -> Result<(Selector, &[u8])> {
    if data.len() < 4 {
        return Err(Error::malformed(format!(
            "calldata must be at least 4 bytes, got {}",
            data.len()
        )));
    }
    let (head, rest) = data.split_at(4);
    Ok((Selector::from_slice(head), rest))
}
