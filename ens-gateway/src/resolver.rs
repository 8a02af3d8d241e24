//! ENS resolver handlers.
//!
//! [`ResolverService`] serves the off-chain resolver ABI on top of a
//! [`Repository`]. Reads are open and return zero values for missing
//! records. Writes go through the [`Authorizer`]: `register` only needs a
//! valid signer, every other write needs the signer to own the node.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, B256, Bytes, U256, keccak256};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::auth::Authorizer;
use crate::error::{Error, Result};
use crate::handler::{Args, CallContext, Handler, HandlerTable, Reply};
use crate::integrity::IntegrityStage;
use crate::repository::{DomainRecord, Repository};

/// SLIP-44 coin type of Ether, used by `addr(bytes32)`.
pub const COIN_TYPE_ETH: u64 = 60;

/// `text(bytes32,string)`.
pub const TEXT: &str = "function text(bytes32 node, string key) view returns (string)";
/// `setText(bytes32,string,string)`.
pub const SET_TEXT: &str = "function setText(bytes32 node, string key, string value)";
/// `addr(bytes32)`.
pub const ADDR: &str = "function addr(bytes32 node) view returns (address)";
/// `addr(bytes32,uint256)`.
pub const ADDR_COIN: &str =
    "function addr(bytes32 node, uint256 coinType) view returns (bytes)";
/// `setAddr(bytes32,address)`.
pub const SET_ADDR: &str = "function setAddr(bytes32 node, address a)";
/// `setAddr(bytes32,uint256,bytes)`.
pub const SET_ADDR_COIN: &str = "function setAddr(bytes32 node, uint256 coinType, bytes a)";
/// `contenthash(bytes32)`.
pub const CONTENTHASH: &str = "function contenthash(bytes32 node) view returns (bytes)";
/// `setContenthash(bytes32,bytes)`.
pub const SET_CONTENTHASH: &str = "function setContenthash(bytes32 node, bytes hash)";
/// `register(bytes32,uint32)`.
pub const REGISTER: &str = "function register(bytes32 node, uint32 ttl)";
/// `transfer(bytes32,address)`.
pub const TRANSFER: &str = "function transfer(bytes32 node, address owner)";

/// Compute the ENS namehash of `name` (EIP-137).
///
/// The empty name hashes to the zero node. Labels are hashed as given; the
/// caller is responsible for normalization.
#[must_use]
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(node.as_slice());
        buf[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(buf);
    }
    node
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Text,
    SetText,
    Addr,
    AddrCoin,
    SetAddr,
    SetAddrCoin,
    Contenthash,
    SetContenthash,
    Register,
    Transfer,
}

impl Operation {
    const ALL: [Self; 10] = [
        Self::Text,
        Self::SetText,
        Self::Addr,
        Self::AddrCoin,
        Self::SetAddr,
        Self::SetAddrCoin,
        Self::Contenthash,
        Self::SetContenthash,
        Self::Register,
        Self::Transfer,
    ];

    const fn signature(self) -> &'static str {
        match self {
            Self::Text => TEXT,
            Self::SetText => SET_TEXT,
            Self::Addr => ADDR,
            Self::AddrCoin => ADDR_COIN,
            Self::SetAddr => SET_ADDR,
            Self::SetAddrCoin => SET_ADDR_COIN,
            Self::Contenthash => CONTENTHASH,
            Self::SetContenthash => SET_CONTENTHASH,
            Self::Register => REGISTER,
            Self::Transfer => TRANSFER,
        }
    }
}

/// Resolver business logic shared by every resolver handler.
pub struct ResolverService {
    repository: Arc<dyn Repository>,
    authorizer: Authorizer,
    reserved_keys: HashSet<String>,
}

impl fmt::Debug for ResolverService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverService")
            .field("repository", &self.repository)
            .field("domain", self.authorizer.domain())
            .field("reserved_keys", &self.reserved_keys)
            .finish()
    }
}

impl ResolverService {
    /// Create a service over `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn Repository>, authorizer: Authorizer) -> Self {
        Self {
            repository,
            authorizer,
            reserved_keys: HashSet::new(),
        }
    }

    /// Reject `setText` for these keys.
    #[must_use]
    pub fn with_reserved_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// The backing repository.
    #[must_use]
    pub fn repository(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.repository)
    }

    /// Register every resolver function on `table`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] if a signature does not parse.
    pub fn install(self: &Arc<Self>, table: &mut HandlerTable) -> Result<()> {
        for op in Operation::ALL {
            table.register(
                op.signature(),
                ResolverHandler {
                    service: Arc::clone(self),
                    op,
                },
            )?;
        }
        info!(functions = Operation::ALL.len(), "resolver handlers installed");
        Ok(())
    }

    /// A handler table with multicall plus every resolver function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] if a signature does not parse.
    pub fn handler_table(self: &Arc<Self>) -> Result<HandlerTable> {
        let mut table = HandlerTable::new()?;
        self.install(&mut table)?;
        Ok(table)
    }

    /// Integrity stage tracking every resolver write; `register` and
    /// `transfer` responses carry the fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] if a signature does not parse.
    pub fn integrity_stage(&self) -> Result<IntegrityStage> {
        IntegrityStage::new(self.repository())?
            .track(SET_TEXT)?
            .track(SET_ADDR)?
            .track(SET_ADDR_COIN)?
            .track(SET_CONTENTHASH)?
            .embed(REGISTER)?
            .embed(TRANSFER)
    }

    async fn record(&self, node: B256) -> Result<Option<DomainRecord>> {
        self.repository.domain(node).await
    }

    async fn text(&self, args: &Args) -> Result<Reply> {
        let node = args.b256(0)?;
        let key = args.string(1)?;
        let record = self.record(node).await?;
        let value = record
            .as_ref()
            .and_then(|r| r.texts.get(key).cloned())
            .unwrap_or_default();
        Ok(read_reply(DynSolValue::String(value), record.as_ref()))
    }

    async fn addr(&self, args: &Args) -> Result<Reply> {
        let node = args.b256(0)?;
        let record = self.record(node).await?;
        let address = record
            .as_ref()
            .and_then(|r| r.addresses.get(&U256::from(COIN_TYPE_ETH)))
            .filter(|raw| raw.len() == 20)
            .map_or(Address::ZERO, |raw| Address::from_slice(raw));
        Ok(read_reply(DynSolValue::Address(address), record.as_ref()))
    }

    async fn addr_coin(&self, args: &Args) -> Result<Reply> {
        let node = args.b256(0)?;
        let coin_type = args.uint(1)?;
        let record = self.record(node).await?;
        let value = record
            .as_ref()
            .and_then(|r| r.addresses.get(&coin_type).cloned())
            .unwrap_or_default();
        Ok(read_reply(DynSolValue::Bytes(value.to_vec()), record.as_ref()))
    }

    async fn contenthash(&self, args: &Args) -> Result<Reply> {
        let node = args.b256(0)?;
        let record = self.record(node).await?;
        let value = record
            .as_ref()
            .and_then(|r| r.contenthash.clone())
            .unwrap_or_default();
        Ok(read_reply(DynSolValue::Bytes(value.to_vec()), record.as_ref()))
    }

    async fn set_text(&self, args: &Args, ctx: &CallContext) -> Result<Reply> {
        let node = args.b256(0)?;
        let key = args.string(1)?;
        let value = args.string(2)?;
        if self.reserved_keys.contains(key) {
            return Err(Error::application(format!("reserved key: {key}")));
        }
        self.authorizer.authorize(ctx, node).await?;
        self.repository.set_text(node, key, value).await?;
        debug!(%node, key, "text record set");
        Ok(Reply::empty())
    }

    async fn set_addr(&self, args: &Args, ctx: &CallContext) -> Result<Reply> {
        let node = args.b256(0)?;
        let address = args.address(1)?;
        self.authorizer.authorize(ctx, node).await?;
        let value = if address.is_zero() {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(address.as_slice())
        };
        self.repository
            .set_addr(node, U256::from(COIN_TYPE_ETH), value)
            .await?;
        debug!(%node, %address, "address record set");
        Ok(Reply::empty())
    }

    async fn set_addr_coin(&self, args: &Args, ctx: &CallContext) -> Result<Reply> {
        let node = args.b256(0)?;
        let coin_type = args.uint(1)?;
        let value = args.bytes(2)?;
        self.authorizer.authorize(ctx, node).await?;
        self.repository.set_addr(node, coin_type, value).await?;
        debug!(%node, %coin_type, "address record set");
        Ok(Reply::empty())
    }

    async fn set_contenthash(&self, args: &Args, ctx: &CallContext) -> Result<Reply> {
        let node = args.b256(0)?;
        let hash = args.bytes(1)?;
        self.authorizer.authorize(ctx, node).await?;
        self.repository.set_contenthash(node, hash).await?;
        debug!(%node, "contenthash set");
        Ok(Reply::empty())
    }

    async fn register(&self, args: &Args, ctx: &CallContext) -> Result<Reply> {
        let node = args.b256(0)?;
        let ttl = args.u64(1)?;
        let owner = self.authorizer.signer(ctx)?;
        self.repository.register(node, owner, ttl).await?;
        info!(%node, %owner, ttl, "domain registered");
        Ok(Reply::empty())
    }

    async fn transfer(&self, args: &Args, ctx: &CallContext) -> Result<Reply> {
        let node = args.b256(0)?;
        let new_owner = args.address(1)?;
        if new_owner.is_zero() {
            return Err(Error::application("cannot transfer to the zero address"));
        }
        let previous = self.authorizer.authorize(ctx, node).await?;
        self.repository.transfer(node, new_owner).await?;
        info!(%node, from = %previous, to = %new_owner, "domain transferred");
        Ok(Reply::empty())
    }
}

fn read_reply(value: DynSolValue, record: Option<&DomainRecord>) -> Reply {
    let reply = Reply::value(value);
    match record.map(|r| r.ttl) {
        Some(ttl) if ttl > 0 => reply.with_ttl(ttl),
        _ => reply,
    }
}

struct ResolverHandler {
    service: Arc<ResolverService>,
    op: Operation,
}

#[async_trait]
impl Handler for ResolverHandler {
    async fn handle(&self, args: Args, ctx: &CallContext) -> Result<Reply> {
        let service = &self.service;
        match self.op {
            Operation::Text => service.text(&args).await,
            Operation::SetText => service.set_text(&args, ctx).await,
            Operation::Addr => service.addr(&args).await,
            Operation::AddrCoin => service.addr_coin(&args).await,
            Operation::SetAddr => service.set_addr(&args, ctx).await,
            Operation::SetAddrCoin => service.set_addr_coin(&args, ctx).await,
            Operation::Contenthash => service.contenthash(&args).await,
            Operation::SetContenthash => service.set_contenthash(&args, ctx).await,
            Operation::Register => service.register(&args, ctx).await,
            Operation::Transfer => service.transfer(&args, ctx).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use alloy::primitives::{address, b256, fixed_bytes};
    use alloy::signers::local::PrivateKeySigner;

    use super::*;
    use crate::abi::FunctionSignature;
    use crate::auth::tests::{DEV_KEY, OTHER_KEY, domain, key};
    use crate::auth::{AuthMessage, RepositoryOwnership, WriteAuthorization};
    use crate::dispatch::{Dispatcher, RpcCall, RpcResponse};
    use crate::repository::InMemoryRepository;

    const SENDER: Address = address!("cccccccccccccccccccccccccccccccccccccccc");

    fn service(repo: &InMemoryRepository) -> Arc<ResolverService> {
        let repo: Arc<dyn Repository> = Arc::new(repo.clone());
        let ownership = Arc::new(RepositoryOwnership::new(Arc::clone(&repo)));
        let authorizer = Authorizer::new(domain(), ownership);
        Arc::new(ResolverService::new(repo, authorizer).with_reserved_keys(["avatar.locked"]))
    }

    fn dispatcher(repo: &InMemoryRepository) -> Dispatcher {
        Dispatcher::new(service(repo).handler_table().unwrap())
    }

    fn encode(signature: &str, args: &[DynSolValue]) -> Bytes {
        FunctionSignature::parse(signature).unwrap().encode_call(args).unwrap()
    }

    fn decode(signature: &str, response: &RpcResponse) -> Args {
        assert_eq!(response.status, 200, "{:?}", response.message());
        Args::new(
            FunctionSignature::parse(signature)
                .unwrap()
                .decode_output(response.data().unwrap())
                .unwrap(),
        )
    }

    fn signed(signer: &PrivateKeySigner, data: Bytes) -> RpcCall {
        let auth = WriteAuthorization::sign(
            signer,
            &domain(),
            AuthMessage {
                call_data: data.clone(),
                sender: SENDER,
                expiration: u64::MAX,
            },
        )
        .unwrap();
        RpcCall::new(SENDER, data).with_authorization(auth)
    }

    fn node_arg(node: B256) -> DynSolValue {
        DynSolValue::FixedBytes(node, 32)
    }

    fn text_call(node: B256, key: &str) -> Bytes {
        encode(TEXT, &[node_arg(node), DynSolValue::String(key.into())])
    }

    async fn register(dispatcher: &Dispatcher, signer: &PrivateKeySigner, node: B256) {
        let data = encode(REGISTER, &[node_arg(node), DynSolValue::Uint(U256::from(300u64), 32)]);
        let response = dispatcher.dispatch(signed(signer, data)).await;
        assert_eq!(response.status, 200, "{:?}", response.message());
    }

    mod hashing {
        use super::*;

        #[test]
        fn namehash_matches_eip137_vectors() {
            assert_eq!(namehash(""), B256::ZERO);
            assert_eq!(
                namehash("eth"),
                b256!("93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae")
            );
            assert_eq!(
                namehash("foo.eth"),
                b256!("de9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f")
            );
        }

        #[test]
        fn selectors_match_solidity() {
            let selector = |s| FunctionSignature::parse(s).unwrap().selector();
            assert_eq!(selector(TEXT), fixed_bytes!("59d1d43c"));
            assert_eq!(selector(SET_TEXT), fixed_bytes!("10f13a8c"));
            assert_eq!(selector(ADDR), fixed_bytes!("3b3b57de"));
            assert_eq!(selector(ADDR_COIN), fixed_bytes!("f1cb7e06"));
            assert_eq!(selector(SET_ADDR), fixed_bytes!("d5fa2b00"));
            assert_eq!(selector(SET_ADDR_COIN), fixed_bytes!("8b95dd71"));
            assert_eq!(selector(CONTENTHASH), fixed_bytes!("bc1c58d1"));
            assert_eq!(selector(SET_CONTENTHASH), fixed_bytes!("304e6ade"));
        }
    }

    mod reads {
        use super::*;

        #[tokio::test]
        async fn missing_records_are_zero_values() {
            let dispatcher = dispatcher(&InMemoryRepository::new());
            let node = namehash("nobody.eth");

            let text = dispatcher
                .dispatch(RpcCall::new(SENDER, text_call(node, "avatar")))
                .await;
            assert_eq!(decode(TEXT, &text).string(0).unwrap(), "");
            assert_eq!(text.ttl(), None);

            let addr = dispatcher
                .dispatch(RpcCall::new(SENDER, encode(ADDR, &[node_arg(node)])))
                .await;
            assert_eq!(decode(ADDR, &addr).address(0).unwrap(), Address::ZERO);

            let hash = dispatcher
                .dispatch(RpcCall::new(SENDER, encode(CONTENTHASH, &[node_arg(node)])))
                .await;
            assert!(decode(CONTENTHASH, &hash).bytes(0).unwrap().is_empty());
        }

        #[tokio::test]
        async fn reads_carry_domain_ttl() {
            let node = namehash("ttl.eth");
            let record = DomainRecord::registered(node, Address::repeat_byte(1), 120);
            let repo = InMemoryRepository::with_records([record]);
            let response = dispatcher(&repo)
                .dispatch(RpcCall::new(SENDER, encode(ADDR, &[node_arg(node)])))
                .await;
            assert_eq!(response.ttl(), Some(120));
        }
    }

    mod writes {
        use super::*;

        #[tokio::test]
        async fn set_text_then_text() {
            let repo = InMemoryRepository::new();
            let dispatcher = dispatcher(&repo);
            let owner = key(DEV_KEY);
            let node = namehash("blockful.eth");
            register(&dispatcher, &owner, node).await;

            let write = encode(
                SET_TEXT,
                &[
                    node_arg(node),
                    DynSolValue::String("avatar".into()),
                    DynSolValue::String("blockful.png".into()),
                ],
            );
            let response = dispatcher.dispatch(signed(&owner, write)).await;
            assert_eq!(response.status, 200);
            assert!(response.data().unwrap().is_empty());

            let read = dispatcher
                .dispatch(RpcCall::new(SENDER, text_call(node, "avatar")))
                .await;
            assert_eq!(decode(TEXT, &read).string(0).unwrap(), "blockful.png");
            assert_eq!(read.ttl(), Some(300));
        }

        #[tokio::test]
        async fn set_addr_variants() {
            let repo = InMemoryRepository::new();
            let dispatcher = dispatcher(&repo);
            let owner = key(DEV_KEY);
            let node = namehash("addr.eth");
            register(&dispatcher, &owner, node).await;

            let target = Address::repeat_byte(0x42);
            let write = encode(SET_ADDR, &[node_arg(node), DynSolValue::Address(target)]);
            assert_eq!(dispatcher.dispatch(signed(&owner, write)).await.status, 200);

            let btc = Bytes::from_static(&[0x00, 0x14, 0xaa]);
            let write = encode(
                SET_ADDR_COIN,
                &[
                    node_arg(node),
                    DynSolValue::Uint(U256::from(0u64), 256),
                    DynSolValue::Bytes(btc.to_vec()),
                ],
            );
            assert_eq!(dispatcher.dispatch(signed(&owner, write)).await.status, 200);

            let eth = dispatcher
                .dispatch(RpcCall::new(SENDER, encode(ADDR, &[node_arg(node)])))
                .await;
            assert_eq!(decode(ADDR, &eth).address(0).unwrap(), target);

            let eth_bytes = dispatcher
                .dispatch(RpcCall::new(
                    SENDER,
                    encode(
                        ADDR_COIN,
                        &[node_arg(node), DynSolValue::Uint(U256::from(COIN_TYPE_ETH), 256)],
                    ),
                ))
                .await;
            assert_eq!(decode(ADDR_COIN, &eth_bytes).bytes(0).unwrap().as_ref(), target.as_slice());

            let coin = dispatcher
                .dispatch(RpcCall::new(
                    SENDER,
                    encode(ADDR_COIN, &[node_arg(node), DynSolValue::Uint(U256::ZERO, 256)]),
                ))
                .await;
            assert_eq!(decode(ADDR_COIN, &coin).bytes(0).unwrap(), btc);
        }

        #[tokio::test]
        async fn contenthash_round_trip() {
            let repo = InMemoryRepository::new();
            let dispatcher = dispatcher(&repo);
            let owner = key(DEV_KEY);
            let node = namehash("ipfs.eth");
            register(&dispatcher, &owner, node).await;

            let hash = vec![0xe3, 0x01, 0x01, 0x70];
            let write = encode(
                SET_CONTENTHASH,
                &[node_arg(node), DynSolValue::Bytes(hash.clone())],
            );
            assert_eq!(dispatcher.dispatch(signed(&owner, write)).await.status, 200);
            let read = dispatcher
                .dispatch(RpcCall::new(SENDER, encode(CONTENTHASH, &[node_arg(node)])))
                .await;
            assert_eq!(decode(CONTENTHASH, &read).bytes(0).unwrap().to_vec(), hash);
        }

        #[tokio::test]
        async fn non_owner_write_is_401_and_state_unchanged() {
            let repo = InMemoryRepository::new();
            let dispatcher = dispatcher(&repo);
            let node = namehash("owned.eth");
            register(&dispatcher, &key(DEV_KEY), node).await;

            let write = encode(
                SET_ADDR,
                &[node_arg(node), DynSolValue::Address(Address::repeat_byte(9))],
            );
            let response = dispatcher.dispatch(signed(&key(OTHER_KEY), write)).await;
            assert_eq!(response.status, 401);
            assert!(repo.domain(node).await.unwrap().unwrap().addresses.is_empty());
        }

        #[tokio::test]
        async fn unsigned_write_is_401() {
            let repo = InMemoryRepository::new();
            let write = encode(
                SET_TEXT,
                &[
                    node_arg(B256::ZERO),
                    DynSolValue::String("k".into()),
                    DynSolValue::String("v".into()),
                ],
            );
            let response = dispatcher(&repo).dispatch(RpcCall::new(SENDER, write)).await;
            assert_eq!(response.status, 401);
            assert!(repo.is_empty().await);
        }

        #[tokio::test]
        async fn reserved_key_is_rejected() {
            let repo = InMemoryRepository::new();
            let dispatcher = dispatcher(&repo);
            let owner = key(DEV_KEY);
            let node = namehash("reserved.eth");
            register(&dispatcher, &owner, node).await;

            let write = encode(
                SET_TEXT,
                &[
                    node_arg(node),
                    DynSolValue::String("avatar.locked".into()),
                    DynSolValue::String("x".into()),
                ],
            );
            let response = dispatcher.dispatch(signed(&owner, write)).await;
            assert_eq!(response.status, 400);
            assert_eq!(response.message(), Some("reserved key: avatar.locked"));
        }
    }

    mod ownership {
        use super::*;

        #[tokio::test]
        async fn double_register_is_rejected() {
            let repo = InMemoryRepository::new();
            let dispatcher = dispatcher(&repo);
            let node = namehash("taken.eth");
            register(&dispatcher, &key(DEV_KEY), node).await;

            let data = encode(REGISTER, &[node_arg(node), DynSolValue::Uint(U256::ZERO, 32)]);
            let response = dispatcher.dispatch(signed(&key(OTHER_KEY), data)).await;
            assert_eq!(response.status, 400);
            assert_eq!(response.message(), Some("domain already registered"));
            assert_eq!(repo.owner(node).await.unwrap(), Some(key(DEV_KEY).address()));
        }

        #[tokio::test]
        async fn transfer_moves_ownership() {
            let repo = InMemoryRepository::new();
            let dispatcher = dispatcher(&repo);
            let node = namehash("moving.eth");
            let alice = key(DEV_KEY);
            let bob = key(OTHER_KEY);
            register(&dispatcher, &alice, node).await;

            let data = encode(TRANSFER, &[node_arg(node), DynSolValue::Address(bob.address())]);
            assert_eq!(dispatcher.dispatch(signed(&alice, data.clone())).await.status, 200);
            assert_eq!(repo.owner(node).await.unwrap(), Some(bob.address()));

            // Alice no longer owns it.
            let response = dispatcher.dispatch(signed(&alice, data)).await;
            assert_eq!(response.status, 401);
        }

        #[tokio::test]
        async fn transfer_to_zero_is_rejected() {
            let repo = InMemoryRepository::new();
            let dispatcher = dispatcher(&repo);
            let node = namehash("zero.eth");
            register(&dispatcher, &key(DEV_KEY), node).await;
            let data = encode(TRANSFER, &[node_arg(node), DynSolValue::Address(Address::ZERO)]);
            assert_eq!(dispatcher.dispatch(signed(&key(DEV_KEY), data)).await.status, 400);
        }
    }

    mod integrity {
        use super::*;
        use crate::dispatch::Gateway;

        #[tokio::test]
        async fn register_response_embeds_fingerprint() {
            let repo = InMemoryRepository::new();
            let service = service(&repo);
            let gateway = Gateway::new(service.handler_table().unwrap())
                .with_stage(service.integrity_stage().unwrap());
            let node = namehash("fp.eth");
            let data = encode(
                REGISTER,
                &[node_arg(node), DynSolValue::Uint(U256::from(60u64), 32)],
            );
            let response = gateway.handle(signed(&key(DEV_KEY), data)).await;
            assert_eq!(response.status, 200);
            let payload = response.data().unwrap();
            let record = repo.domain(node).await.unwrap().unwrap();
            assert_eq!(&payload[..32], node.as_slice());
            assert_eq!(&payload[32..], record.fingerprint().as_slice());
            assert_eq!(record.fingerprint, Some(record.fingerprint()));
        }
    }
}
