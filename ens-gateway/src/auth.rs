//! Write authorization and ownership validation.
//!
//! Mutating calls arrive with an EIP-712 signed
//! `Message(bytes callData,address sender,uint256 expirationTimestamp)`
//! bound to the exact top-level calldata and sender. [`Authorizer`] checks
//! the binding and expiry, recovers the signer, and asks an
//! [`OwnershipValidator`] whether that signer controls the node.
//!
//! Two validators are provided:
//! - [`RepositoryOwnership`]: owner as stored by the gateway itself.
//! - [`RegistryOwnership`]: `owner(bytes32)` on an ENS registry contract.

use std::fmt;
use std::sync::Arc;

use alloy::network::{Ethereum, TransactionBuilder};
use alloy::primitives::{Address, B256, Bytes, Signature, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{Eip712Domain, SolCall, SolStruct};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::handler::CallContext;
use crate::repository::Repository;

mod abi {
    alloy::sol! {
        struct Message {
            bytes callData;
            address sender;
            uint256 expirationTimestamp;
        }

        function owner(bytes32 node) external view returns (address);
    }
}

/// EIP-712 domain under which write authorizations are signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningDomain {
    /// Domain name.
    pub name: String,
    /// Domain version.
    pub version: String,
    /// Chain the verifying contract lives on.
    pub chain_id: u64,
    /// The contract that defers writes to this gateway.
    pub verifying_contract: Address,
}

impl SigningDomain {
    /// Build a domain.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        chain_id: u64,
        verifying_contract: Address,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            chain_id,
            verifying_contract,
        }
    }

    /// The alloy representation used for hashing.
    #[must_use]
    pub fn eip712(&self) -> Eip712Domain {
        Eip712Domain::new(
            Some(self.name.clone().into()),
            Some(self.version.clone().into()),
            Some(U256::from(self.chain_id)),
            Some(self.verifying_contract),
            None,
        )
    }
}

/// The signed part of a write authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMessage {
    /// Calldata the signer approved; must equal the request calldata.
    pub call_data: Bytes,
    /// Contract the request is addressed to.
    pub sender: Address,
    /// Unix timestamp after which the authorization is void.
    pub expiration: u64,
}

impl AuthMessage {
    fn typed(&self) -> abi::Message {
        abi::Message {
            callData: self.call_data.clone(),
            sender: self.sender,
            expirationTimestamp: U256::from(self.expiration),
        }
    }

    /// EIP-712 signing hash under `domain`.
    #[must_use]
    pub fn signing_hash(&self, domain: &SigningDomain) -> B256 {
        self.typed().eip712_signing_hash(&domain.eip712())
    }
}

/// Signature plus message, as carried by a POST body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAuthorization {
    /// 65-byte `r ‖ s ‖ v` signature.
    pub signature: Bytes,
    /// The signed message.
    pub message: AuthMessage,
}

impl WriteAuthorization {
    /// Sign `message` with `signer`. Used by clients and tests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] if the signer fails.
    pub fn sign(
        signer: &PrivateKeySigner,
        domain: &SigningDomain,
        message: AuthMessage,
    ) -> Result<Self> {
        let hash = message.signing_hash(domain);
        let signature = signer
            .sign_hash_sync(&hash)
            .map_err(|e| Error::signing(format!("authorization signing failed: {e}")))?;
        Ok(Self {
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
            message,
        })
    }

    /// Recover the signing address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] if the signature is malformed or
    /// recovery fails.
    pub fn recover(&self, domain: &SigningDomain) -> Result<Address> {
        let signature = Signature::try_from(self.signature.as_ref())
            .map_err(|e| Error::unauthorized(format!("malformed signature: {e}")))?;
        signature
            .recover_address_from_prehash(&self.message.signing_hash(domain))
            .map_err(|e| Error::unauthorized(format!("signature recovery failed: {e}")))
    }
}

/// Decides whether an address controls a node.
#[async_trait]
pub trait OwnershipValidator: Send + Sync + fmt::Debug {
    /// Whether `signer` may mutate `node`.
    async fn verify_ownership(&self, node: B256, signer: Address) -> Result<bool>;
}

/// Ownership as recorded in the gateway's own repository.
#[derive(Debug, Clone)]
pub struct RepositoryOwnership {
    repository: Arc<dyn Repository>,
}

impl RepositoryOwnership {
    /// Validate against `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl OwnershipValidator for RepositoryOwnership {
    async fn verify_ownership(&self, node: B256, signer: Address) -> Result<bool> {
        Ok(self.repository.owner(node).await? == Some(signer))
    }
}

/// Ownership read from an on-chain ENS registry.
pub struct RegistryOwnership {
    provider: DynProvider<Ethereum>,
    registry: Address,
}

impl fmt::Debug for RegistryOwnership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryOwnership")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl RegistryOwnership {
    /// Connect to `rpc_url` and validate against `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the RPC connection fails.
    pub async fn connect(rpc_url: &str, registry: Address) -> Result<Self> {
        let provider: DynProvider<Ethereum> = ProviderBuilder::new()
            .connect(rpc_url)
            .await
            .map_err(|e| Error::internal(format!("RPC connection to '{rpc_url}' failed: {e}")))?
            .erased();
        Ok(Self::with_provider(provider, registry))
    }

    /// Use an existing provider.
    #[must_use]
    pub const fn with_provider(provider: DynProvider<Ethereum>, registry: Address) -> Self {
        Self { provider, registry }
    }

    /// Registry owner of `node`; zero when unowned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the call or decoding fails.
    pub async fn owner(&self, node: B256) -> Result<Address> {
        let calldata = abi::ownerCall { node }.abi_encode();
        let tx = TransactionRequest::default()
            .with_to(self.registry)
            .with_input(Bytes::from(calldata));
        let result = self
            .provider
            .call(tx)
            .await
            .map_err(|e| Error::internal(format!("eth_call failed: {e}")))?;
        abi::ownerCall::abi_decode_returns(&result)
            .map_err(|e| Error::internal(format!("registry owner decode failed: {e}")))
    }
}

#[async_trait]
impl OwnershipValidator for RegistryOwnership {
    async fn verify_ownership(&self, node: B256, signer: Address) -> Result<bool> {
        let owner = self.owner(node).await?;
        debug!(%node, %owner, %signer, "registry ownership lookup");
        Ok(!owner.is_zero() && owner == signer)
    }
}

/// Applies write authorization to a call context.
#[derive(Debug, Clone)]
pub struct Authorizer {
    domain: SigningDomain,
    validator: Arc<dyn OwnershipValidator>,
}

impl Authorizer {
    /// Create an authorizer.
    #[must_use]
    pub fn new(domain: SigningDomain, validator: Arc<dyn OwnershipValidator>) -> Self {
        Self { domain, validator }
    }

    /// The EIP-712 domain.
    #[must_use]
    pub const fn domain(&self) -> &SigningDomain {
        &self.domain
    }

    /// Recover the signer of the call's authorization, checked against the
    /// current time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] on any mismatch.
    pub fn signer(&self, ctx: &CallContext) -> Result<Address> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        self.signer_at(ctx, now)
    }

    /// [`Authorizer::signer`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] on any mismatch.
    pub fn signer_at(&self, ctx: &CallContext, now: u64) -> Result<Address> {
        let auth = ctx
            .authorization
            .as_deref()
            .ok_or_else(|| Error::unauthorized("missing write authorization"))?;
        let message = &auth.message;
        if message.call_data != ctx.root_data {
            return Err(Error::unauthorized("authorization does not cover this calldata"));
        }
        if message.sender != ctx.sender {
            return Err(Error::unauthorized("authorization sender mismatch"));
        }
        if message.expiration < now {
            return Err(Error::unauthorized("authorization expired"));
        }
        auth.recover(&self.domain)
    }

    /// Authorize a write to `node`, returning the signer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] if the authorization is invalid or
    /// the signer does not own the node.
    pub async fn authorize(&self, ctx: &CallContext, node: B256) -> Result<Address> {
        let signer = self.signer(ctx)?;
        if self.validator.verify_ownership(node, signer).await? {
            debug!(%node, %signer, "write authorized");
            Ok(signer)
        } else {
            warn!(%node, %signer, "signer does not own node");
            Err(Error::unauthorized(format!("{signer} does not own {node}")))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::{DomainRecord, InMemoryRepository};

    pub(crate) const DEV_KEY: &str =
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    pub(crate) const OTHER_KEY: &str =
        "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    pub(crate) fn key(hex: &str) -> PrivateKeySigner {
        hex.parse().unwrap()
    }

    pub(crate) fn domain() -> SigningDomain {
        SigningDomain::new("ENS Gateway", "1", 1, Address::repeat_byte(0xcc))
    }

    fn ctx_with(signer: &PrivateKeySigner, data: &[u8], expiration: u64) -> CallContext {
        let sender = Address::repeat_byte(0xcc);
        let auth = WriteAuthorization::sign(
            signer,
            &domain(),
            AuthMessage {
                call_data: Bytes::copy_from_slice(data),
                sender,
                expiration,
            },
        )
        .unwrap();
        CallContext::new(sender, Bytes::copy_from_slice(data), Some(Arc::new(auth)))
    }

    fn authorizer(repo: InMemoryRepository) -> Authorizer {
        Authorizer::new(domain(), Arc::new(RepositoryOwnership::new(Arc::new(repo))))
    }

    mod signatures {
        use super::*;

        #[test]
        fn recover_returns_signer() {
            let signer = key(DEV_KEY);
            let ctx = ctx_with(&signer, &[1, 2, 3, 4], u64::MAX);
            let recovered = ctx.authorization.unwrap().recover(&domain()).unwrap();
            assert_eq!(recovered, signer.address());
        }

        #[test]
        fn other_domain_recovers_someone_else() {
            let signer = key(DEV_KEY);
            let ctx = ctx_with(&signer, &[1, 2, 3, 4], u64::MAX);
            let other = SigningDomain::new("ENS Gateway", "2", 1, Address::repeat_byte(0xcc));
            let recovered = ctx.authorization.unwrap().recover(&other).unwrap();
            assert_ne!(recovered, signer.address());
        }

        #[test]
        fn malformed_signature_is_unauthorized() {
            let auth = WriteAuthorization {
                signature: Bytes::from_static(&[1, 2, 3]),
                message: AuthMessage {
                    call_data: Bytes::new(),
                    sender: Address::ZERO,
                    expiration: 0,
                },
            };
            assert_eq!(auth.recover(&domain()).unwrap_err().status(), 401);
        }
    }

    mod binding {
        use super::*;

        #[test]
        fn missing_authorization() {
            let ctx = CallContext::new(Address::ZERO, Bytes::new(), None);
            let err = authorizer(InMemoryRepository::new()).signer(&ctx).unwrap_err();
            assert_eq!(err.status(), 401);
        }

        #[test]
        fn calldata_must_match_root() {
            let mut ctx = ctx_with(&key(DEV_KEY), &[1, 2, 3, 4], u64::MAX);
            ctx.root_data = Bytes::from_static(&[9, 9, 9, 9]);
            assert!(authorizer(InMemoryRepository::new()).signer(&ctx).is_err());
        }

        #[test]
        fn nested_call_inherits_root_binding() {
            let ctx = ctx_with(&key(DEV_KEY), &[1, 2, 3, 4], u64::MAX);
            let inner = ctx.nested(Bytes::from_static(&[5, 6, 7, 8]));
            let signer = authorizer(InMemoryRepository::new()).signer(&inner).unwrap();
            assert_eq!(signer, key(DEV_KEY).address());
        }

        #[test]
        fn sender_must_match() {
            let mut ctx = ctx_with(&key(DEV_KEY), &[1, 2, 3, 4], u64::MAX);
            ctx.sender = Address::repeat_byte(0xdd);
            assert!(authorizer(InMemoryRepository::new()).signer(&ctx).is_err());
        }

        #[test]
        fn expiry_is_enforced() {
            let ctx = ctx_with(&key(DEV_KEY), &[1, 2, 3, 4], 1_000);
            let auth = authorizer(InMemoryRepository::new());
            assert!(auth.signer_at(&ctx, 999).is_ok());
            assert!(auth.signer_at(&ctx, 1_000).is_ok());
            assert_eq!(auth.signer_at(&ctx, 1_001).unwrap_err().status(), 401);
        }
    }

    mod ownership {
        use super::*;

        #[tokio::test]
        async fn owner_is_authorized() {
            let node = B256::repeat_byte(1);
            let owner = key(DEV_KEY);
            let repo = InMemoryRepository::with_records([DomainRecord::registered(
                node,
                owner.address(),
                0,
            )]);
            let ctx = ctx_with(&owner, &[1, 2, 3, 4], u64::MAX);
            assert_eq!(authorizer(repo).authorize(&ctx, node).await.unwrap(), owner.address());
        }

        #[tokio::test]
        async fn non_owner_is_rejected() {
            let node = B256::repeat_byte(1);
            let repo = InMemoryRepository::with_records([DomainRecord::registered(
                node,
                key(DEV_KEY).address(),
                0,
            )]);
            let ctx = ctx_with(&key(OTHER_KEY), &[1, 2, 3, 4], u64::MAX);
            let err = authorizer(repo).authorize(&ctx, node).await.unwrap_err();
            assert_eq!(err.status(), 401);
        }

        #[tokio::test]
        async fn unregistered_node_is_rejected() {
            let ctx = ctx_with(&key(DEV_KEY), &[1, 2, 3, 4], u64::MAX);
            let err = authorizer(InMemoryRepository::new())
                .authorize(&ctx, B256::repeat_byte(7))
                .await
                .unwrap_err();
            assert_eq!(err.status(), 401);
        }
    }
}
