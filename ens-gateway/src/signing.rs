//! Response signing envelope.
//!
//! Every successful response is bound to the request that produced it:
//!
//! ```text
//! digest = keccak256(0x19 ‖ 0x00 ‖ sender[20] ‖ expires[8, big-endian]
//!                    ‖ keccak256(request calldata) ‖ keccak256(response data))
//! body   = abi.encode(bytes data, uint64 expires, bytes signature)
//! ```
//!
//! The byte layout matches the on-chain verifier and must not change.
//! [`EnvelopeVerifier`] performs the same check off-chain.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, B256, Bytes, Signature, keccak256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolValue;
use async_trait::async_trait;
use tracing::debug;

use crate::dispatch::{ResponseStage, RpcCall, RpcResponse};
use crate::error::{Error, Result};

/// Default response lifetime: 100 days.
pub const DEFAULT_TTL_SECS: u64 = 8_640_000;

/// Prefix of the signing digest preimage.
pub const DIGEST_PREFIX: [u8; 2] = [0x19, 0x00];

/// Current unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

/// Compute the signing digest.
#[must_use]
pub fn digest(sender: Address, expires: u64, request: &[u8], response: &[u8]) -> B256 {
    let mut preimage = Vec::with_capacity(2 + 20 + 8 + 32 + 32);
    preimage.extend_from_slice(&DIGEST_PREFIX);
    preimage.extend_from_slice(sender.as_slice());
    preimage.extend_from_slice(&expires.to_be_bytes());
    preimage.extend_from_slice(keccak256(request).as_slice());
    preimage.extend_from_slice(keccak256(response).as_slice());
    keccak256(preimage)
}

/// A signed response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    /// The handler's encoded response data.
    pub data: Bytes,
    /// Absolute expiry (unix seconds).
    pub expires: u64,
    /// 65-byte signature over [`digest`].
    pub signature: Bytes,
}

impl SignedEnvelope {
    /// `abi.encode(bytes, uint64, bytes)`.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        (self.data.clone(), self.expires, self.signature.clone())
            .abi_encode_params()
            .into()
    }

    /// Inverse of [`SignedEnvelope::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] if `body` is not a valid envelope.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let (data, expires, signature) = <(Bytes, u64, Bytes)>::abi_decode_params(body)
            .map_err(|e| Error::malformed(format!("invalid signed envelope: {e}")))?;
        Ok(Self {
            data,
            expires,
            signature,
        })
    }
}

/// Signing key plus default lifetime.
#[derive(Clone)]
pub struct SigningEnvelope {
    signer: PrivateKeySigner,
    default_ttl: u64,
}

impl fmt::Debug for SigningEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningEnvelope")
            .field("address", &self.signer.address())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl SigningEnvelope {
    /// Wrap a signer.
    #[must_use]
    pub const fn new(signer: PrivateKeySigner, default_ttl: u64) -> Self {
        Self {
            signer,
            default_ttl,
        }
    }

    /// Parse a hex private key (with or without `0x`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] if the key is invalid.
    pub fn from_hex(key: &str, default_ttl: u64) -> Result<Self> {
        let key = key.strip_prefix("0x").unwrap_or(key);
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|e| Error::signing(format!("invalid private key: {e}")))?;
        Ok(Self::new(signer, default_ttl))
    }

    /// Address responses are signed with.
    #[must_use]
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Lifetime used when a handler does not supply one.
    #[must_use]
    pub const fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// Sign `response` for `request` from `sender`, valid until `expires`.
    ///
    /// Deterministic for a fixed input tuple and key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] if the signer fails.
    pub fn sign(
        &self,
        sender: Address,
        expires: u64,
        request: &[u8],
        response: Bytes,
    ) -> Result<SignedEnvelope> {
        let hash = digest(sender, expires, request, &response);
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| Error::signing(e.to_string()))?;
        Ok(SignedEnvelope {
            data: response,
            expires,
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
        })
    }
}

/// Response stage that signs every 200 response.
///
/// Non-200 responses pass through unsigned. The handler ttl (or the
/// default) is an offset from now; the response ttl becomes the absolute
/// expiry that was signed.
#[derive(Debug, Clone)]
pub struct SigningStage {
    envelope: Arc<SigningEnvelope>,
    fixed_time: Option<u64>,
}

impl SigningStage {
    /// Sign with `envelope` against the wall clock.
    #[must_use]
    pub fn new(envelope: SigningEnvelope) -> Self {
        Self {
            envelope: Arc::new(envelope),
            fixed_time: None,
        }
    }

    /// Pin the clock; used for reproducible output.
    #[must_use]
    pub const fn at_time(mut self, now: u64) -> Self {
        self.fixed_time = Some(now);
        self
    }

    fn now(&self) -> u64 {
        self.fixed_time.unwrap_or_else(unix_now)
    }
}

#[async_trait]
impl ResponseStage for SigningStage {
    fn name(&self) -> &'static str {
        "signing"
    }

    async fn process(&self, call: &RpcCall, response: RpcResponse) -> Result<RpcResponse> {
        if !response.is_success() {
            return Ok(response);
        }
        let data = response.data().cloned().unwrap_or_default();
        let offset = response.ttl().unwrap_or(self.envelope.default_ttl);
        let expires = self.now().saturating_add(offset);
        let signed = self.envelope.sign(call.to, expires, &call.data, data)?;
        debug!(sender = %call.to, expires, "response signed");
        Ok(RpcResponse::ok(signed.encode(), Some(expires)))
    }
}

/// Off-chain counterpart of the resolver's response verification.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeVerifier {
    signers: HashSet<Address>,
}

impl EnvelopeVerifier {
    /// Trust the given signers.
    #[must_use]
    pub fn new(signers: impl IntoIterator<Item = Address>) -> Self {
        Self {
            signers: signers.into_iter().collect(),
        }
    }

    /// Add a trusted signer.
    pub fn add_signer(&mut self, signer: Address) {
        self.signers.insert(signer);
    }

    /// Whether `signer` is trusted.
    #[must_use]
    pub fn is_signer(&self, signer: &Address) -> bool {
        self.signers.contains(signer)
    }

    /// Verify a signed `body` for `request` from `sender` at time `now`.
    ///
    /// Returns the inner response data and the recovered signer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] if the body does not decode and
    /// [`Error::Unauthorized`] if it expired, does not recover or was signed
    /// by an unknown key.
    pub fn verify(
        &self,
        sender: Address,
        request: &[u8],
        body: &[u8],
        now: u64,
    ) -> Result<(Bytes, Address)> {
        let envelope = SignedEnvelope::decode(body)?;
        if envelope.expires < now {
            return Err(Error::unauthorized("signature expired"));
        }
        let signature = Signature::try_from(envelope.signature.as_ref())
            .map_err(|e| Error::unauthorized(format!("malformed signature: {e}")))?;
        let hash = digest(sender, envelope.expires, request, &envelope.data);
        let signer = signature
            .recover_address_from_prehash(&hash)
            .map_err(|e| Error::unauthorized(format!("signature recovery failed: {e}")))?;
        if !self.is_signer(&signer) {
            return Err(Error::unauthorized(format!("unknown signer {signer}")));
        }
        Ok((envelope.data, signer))
    }
}
