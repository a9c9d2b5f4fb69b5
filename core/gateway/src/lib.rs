//! Remote transport for Goalpost.
//!
//! Provides the `RemoteGateway` trait with two implementations:
//! - `HttpGateway`: the REST backend over reqwest
//! - `MemoryGateway`: an in-process remote with failure injection, for tests

pub mod gateway;
pub mod http;
pub mod memory;

pub use gateway::RemoteGateway;
pub use http::{GatewayConfig, HttpGateway};
pub use memory::{GatewayCall, MemoryGateway};
