//! Per-component bounded concurrency.
//!
//! An [`Actor`] wraps one deployed component and enforces a cap on
//! in-flight message deliveries with FIFO queueing behind the cap.
//! [`ActorGroup`] round-robins over a set of actors and blocks callers
//! while every member is saturated.

mod actor;
mod group;
mod system;

pub use actor::{Actor, SendOutcome};
pub use group::ActorGroup;
pub use system::ActorSystem;
