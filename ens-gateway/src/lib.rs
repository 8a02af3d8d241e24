//! ENS Gateway - off-chain resolution for CCIP-Read (EIP-3668) and
//! write deferral (EIP-5559).
//!
//! A contract reverts with `OffchainLookup`; the client fetches
//! `{url}/{sender}/{calldata}` from this gateway; the gateway decodes the
//! calldata against a selector table, runs the matching handler, encodes
//! the result and signs it so the contract can verify the answer.
//!
//! The pieces compose as follows:
//!
//! - [`handler::HandlerTable`] maps selectors to [`handler::Handler`]s.
//! - [`dispatch::Dispatcher`] decodes, executes and encodes, with built-in
//!   [`multicall`] fan-out.
//! - [`dispatch::Gateway`] runs the [`integrity`] and [`signing`] stages
//!   over every response.
//! - [`transport::router`] serves the gateway over HTTP.

pub mod abi;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod integrity;
pub mod multicall;
pub mod prelude;
pub mod repository;
pub mod resolver;
pub mod signing;
pub mod transport;

pub use error::{Error, Result};
