//! iarnet, a federated compute scheduler.
//!
//! A cluster of scheduler nodes cooperatively places component workloads
//! onto execution backends ("providers"). Each node:
//!
//! - manages its local providers through RPC adapters with cached
//!   capacity, a health-check loop and durable records
//!   ([`provider`]);
//! - schedules deploys local-first, with eager cache refresh and a
//!   force-refresh second pass, falling back to remote nodes discovered
//!   via gossip ([`scheduler`], [`remote`]);
//! - enforces bounded per-component message concurrency with FIFO
//!   queueing ([`actors`]);
//! - runs a router-style messaging fabric deployed components dial back
//!   into ([`messaging`]).
//!
//! [`node::IarnetNode`] assembles all of it; the `cli` crate wraps that
//! in a binary.

pub mod actors;
pub mod config;
pub mod error;
pub mod messaging;
pub mod node;
pub mod provider;
pub mod remote;
pub mod resources;
pub mod runtime;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::IarnetConfig;
pub use error::{IarnetError, Result};
pub use node::{IarnetNode, NodeOptions};
pub use resources::{Capacity, Language, ResourceInfo, ResourceTags};
pub use runtime::RuntimeContext;
pub use scheduler::{Component, ProviderRef, Scheduler};
