//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use ens_gateway::prelude::*;
//! ```

pub use crate::abi::{AbiRegistry, FunctionSignature};
pub use crate::auth::{
    AuthMessage, Authorizer, OwnershipValidator, RegistryOwnership, RepositoryOwnership,
    SigningDomain, WriteAuthorization,
};
pub use crate::config::{ConfigError, ConfigIssue, GatewayConfig, IssueLevel};
pub use crate::dispatch::{Dispatcher, Gateway, ResponseBody, ResponseStage, RpcCall, RpcResponse};
pub use crate::error::{Error, Result};
pub use crate::handler::{Args, CallContext, Handler, HandlerTable, Reply};
pub use crate::integrity::IntegrityStage;
pub use crate::multicall::{MULTICALL_SIGNATURE, decode_error_payload, error_payload};
#[cfg(feature = "sqlite")]
pub use crate::repository::SqliteRepository;
pub use crate::repository::{DomainRecord, InMemoryRepository, Repository, RepositoryError};
pub use crate::resolver::{ResolverService, namehash};
pub use crate::signing::{EnvelopeVerifier, SignedEnvelope, SigningEnvelope, SigningStage};
pub use crate::transport::router;
