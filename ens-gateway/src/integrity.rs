//! Record fingerprinting after writes.
//!
//! [`IntegrityStage`] runs after dispatch. For a successful tracked write it
//! locates the affected node, recomputes [`DomainRecord::fingerprint`] over
//! the post-write state and stores it. For a small set of operations the
//! on-chain verifier expects the fingerprint in the payload, so the response
//! data is replaced by `node ‖ fingerprint`.
//!
//! Multicall requests are inspected too: the node comes from the last
//! tracked inner call. Their response is never rewritten.
//!
//! [`DomainRecord::fingerprint`]: crate::repository::DomainRecord::fingerprint

use std::collections::HashSet;
use std::sync::Arc;

use alloy::primitives::{B256, Bytes, Selector};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::abi::{FunctionSignature, split_selector};
use crate::dispatch::{ResponseStage, RpcCall, RpcResponse};
use crate::error::{Error, Result};
use crate::handler::Args;
use crate::multicall::{MAX_MULTICALL_DEPTH, MULTICALL_SIGNATURE};
use crate::repository::Repository;

/// Fingerprints records touched by tracked writes.
#[derive(Debug, Clone)]
pub struct IntegrityStage {
    repository: Arc<dyn Repository>,
    multicall: FunctionSignature,
    tracked: HashSet<Selector>,
    embedded: HashSet<Selector>,
}

impl IntegrityStage {
    /// Create a stage that tracks nothing yet.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the multicall signature is a constant.
    pub fn new(repository: Arc<dyn Repository>) -> Result<Self> {
        Ok(Self {
            repository,
            multicall: FunctionSignature::parse(MULTICALL_SIGNATURE)?,
            tracked: HashSet::new(),
            embedded: HashSet::new(),
        })
    }

    /// Track writes made through `signature`. Its first argument must be the
    /// `bytes32` node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] if the signature does not parse.
    pub fn track(mut self, signature: &str) -> Result<Self> {
        self.tracked.insert(FunctionSignature::parse(signature)?.selector());
        Ok(self)
    }

    /// Track `signature` and embed `node ‖ fingerprint` in its direct
    /// responses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInterface`] if the signature does not parse.
    pub fn embed(mut self, signature: &str) -> Result<Self> {
        let selector = FunctionSignature::parse(signature)?.selector();
        self.tracked.insert(selector);
        self.embedded.insert(selector);
        Ok(self)
    }

    /// Node affected by `data`, if it is a tracked write or a multicall
    /// containing one.
    fn affected_node(&self, data: &[u8]) -> Option<B256> {
        self.affected_node_at(data, 0)
    }

    /// Multicalls at or past [`MAX_MULTICALL_DEPTH`] were never executed,
    /// so they are not searched.
    fn affected_node_at(&self, data: &[u8], depth: u8) -> Option<B256> {
        let (selector, payload) = split_selector(data).ok()?;
        if self.tracked.contains(&selector) {
            return payload.get(..32).map(B256::from_slice);
        }
        if selector != self.multicall.selector() || depth >= MAX_MULTICALL_DEPTH {
            return None;
        }
        let inner = Args::new(self.multicall.decode_input(payload).ok()?)
            .bytes_array(0)
            .ok()?;
        inner
            .iter()
            .rev()
            .find_map(|call| self.affected_node_at(call, depth + 1))
    }
}

#[async_trait]
impl ResponseStage for IntegrityStage {
    fn name(&self) -> &'static str {
        "integrity"
    }

    async fn process(&self, call: &RpcCall, response: RpcResponse) -> Result<RpcResponse> {
        if !response.is_success() {
            return Ok(response);
        }
        let Some(node) = self.affected_node(&call.data) else {
            return Ok(response);
        };

        let record = self
            .repository
            .domain(node)
            .await
            .map_err(|e| Error::signing(format!("integrity lookup failed: {e}")))?;
        let Some(record) = record else {
            warn!(%node, "tracked write left no record; skipping fingerprint");
            return Ok(response);
        };

        let fingerprint = record.fingerprint();
        self.repository
            .set_fingerprint(node, fingerprint)
            .await
            .map_err(|e| Error::signing(format!("integrity update failed: {e}")))?;
        debug!(%node, %fingerprint, "record fingerprinted");

        let embedded = split_selector(&call.data)
            .map(|(selector, _)| self.embedded.contains(&selector))
            .unwrap_or(false);
        if !embedded {
            return Ok(response);
        }

        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(node.as_slice());
        data.extend_from_slice(fingerprint.as_slice());
        Ok(RpcResponse::ok(Bytes::from(data), response.ttl()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use alloy::dyn_abi::DynSolValue;
    use alloy::primitives::{Address, U256};

    use super::*;
    use crate::repository::{DomainRecord, InMemoryRepository};

    const SET_TEXT: &str = "function setText(bytes32 node, string key, string value)";
    const REGISTER: &str = "function register(bytes32 node, uint32 ttl)";
    const TEXT: &str = "function text(bytes32 node, string key) view returns (string)";

    fn encode(signature: &str, args: &[DynSolValue]) -> Bytes {
        FunctionSignature::parse(signature).unwrap().encode_call(args).unwrap()
    }

    fn set_text(node: B256) -> Bytes {
        encode(
            SET_TEXT,
            &[
                DynSolValue::FixedBytes(node, 32),
                DynSolValue::String("avatar".into()),
                DynSolValue::String("a.png".into()),
            ],
        )
    }

    fn register(node: B256) -> Bytes {
        encode(
            REGISTER,
            &[DynSolValue::FixedBytes(node, 32), DynSolValue::Uint(U256::from(60u64), 32)],
        )
    }

    fn multicall(calls: &[Bytes]) -> Bytes {
        encode(
            MULTICALL_SIGNATURE,
            &[DynSolValue::Array(
                calls.iter().map(|c| DynSolValue::Bytes(c.to_vec())).collect(),
            )],
        )
    }

    fn setup() -> (InMemoryRepository, IntegrityStage) {
        let node = |n| DomainRecord::registered(B256::repeat_byte(n), Address::repeat_byte(n), 60);
        let repo = InMemoryRepository::with_records([node(1), node(2)]);
        let stage = IntegrityStage::new(Arc::new(repo.clone()))
            .unwrap()
            .track(SET_TEXT)
            .unwrap()
            .embed(REGISTER)
            .unwrap();
        (repo, stage)
    }

    async fn run(stage: &IntegrityStage, data: Bytes) -> RpcResponse {
        let call = RpcCall::new(Address::ZERO, data);
        stage
            .process(&call, RpcResponse::ok(Bytes::from_static(b"orig"), Some(5)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn tracked_write_stores_fingerprint() {
        let (repo, stage) = setup();
        let node = B256::repeat_byte(1);
        let response = run(&stage, set_text(node)).await;
        assert_eq!(response.data().unwrap().as_ref(), b"orig");
        let record = repo.domain(node).await.unwrap().unwrap();
        assert_eq!(record.fingerprint, Some(record.fingerprint()));
    }

    #[tokio::test]
    async fn embedded_write_rewrites_payload() {
        let (repo, stage) = setup();
        let node = B256::repeat_byte(2);
        let response = run(&stage, register(node)).await;
        let data = response.data().unwrap();
        assert_eq!(data.len(), 64);
        assert_eq!(&data[..32], node.as_slice());
        let record = repo.domain(node).await.unwrap().unwrap();
        assert_eq!(&data[32..], record.fingerprint().as_slice());
        assert_eq!(response.ttl(), Some(5));
    }

    #[tokio::test]
    async fn multicall_uses_last_tracked_call() {
        let (repo, stage) = setup();
        let read = encode(
            TEXT,
            &[DynSolValue::FixedBytes(B256::repeat_byte(1), 32), DynSolValue::String("k".into())],
        );
        let data = multicall(&[
            set_text(B256::repeat_byte(1)),
            register(B256::repeat_byte(2)),
            read,
        ]);
        let response = run(&stage, data).await;
        // Never rewritten, even when the last tracked call is embedded.
        assert_eq!(response.data().unwrap().as_ref(), b"orig");
        let second = repo.domain(B256::repeat_byte(2)).await.unwrap().unwrap();
        assert!(second.fingerprint.is_some());
        let first = repo.domain(B256::repeat_byte(1)).await.unwrap().unwrap();
        assert!(first.fingerprint.is_none());
    }

    #[tokio::test]
    async fn nested_multicall_is_searched_up_to_the_limit() {
        let (repo, stage) = setup();
        let node = B256::repeat_byte(1);

        let mut too_deep = set_text(node);
        for _ in 0..=MAX_MULTICALL_DEPTH {
            too_deep = multicall(&[too_deep]);
        }
        run(&stage, too_deep).await;
        assert!(repo.domain(node).await.unwrap().unwrap().fingerprint.is_none());

        let mut deepest = set_text(node);
        for _ in 0..MAX_MULTICALL_DEPTH {
            deepest = multicall(&[deepest]);
        }
        run(&stage, deepest).await;
        assert!(repo.domain(node).await.unwrap().unwrap().fingerprint.is_some());
    }

    #[tokio::test]
    async fn reads_and_failures_are_untouched() {
        let (repo, stage) = setup();
        let read = encode(
            TEXT,
            &[DynSolValue::FixedBytes(B256::repeat_byte(1), 32), DynSolValue::String("k".into())],
        );
        run(&stage, read).await;
        let failed = stage
            .process(
                &RpcCall::new(Address::ZERO, set_text(B256::repeat_byte(1))),
                RpcResponse::error(401, "nope"),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, 401);
        assert!(repo.domain(B256::repeat_byte(1)).await.unwrap().unwrap().fingerprint.is_none());
    }

    #[tokio::test]
    async fn missing_record_is_skipped() {
        let (_, stage) = setup();
        let response = run(&stage, set_text(B256::repeat_byte(9))).await;
        assert_eq!(response.data().unwrap().as_ref(), b"orig");
    }
}
