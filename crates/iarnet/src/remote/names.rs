//! Canonical DHT name constructors for mesh-visible actors.
//!
//! Registration and lookup must build names through the same functions so
//! they can never disagree on the string.
//!
//! | Actor             | DHT name                    |
//! |-------------------|-----------------------------|
//! | `SchedulerServer` | `scheduler::peer::{peer_id}`|
//! | `GossipActor`     | `gossip::peer::{peer_id}`   |

use std::fmt;

/// DHT name for a node's `SchedulerServer`, keyed by its peer id.
///
/// This string doubles as the `scheduler_address` gossiped in `NodeInfo`:
/// resolving the advertised address and resolving the peer directly are
/// the same operation.
pub fn scheduler(peer_id: &impl fmt::Display) -> String {
    format!("scheduler::peer::{}", peer_id)
}

/// DHT name for a node's `GossipActor`, keyed by its peer id.
pub fn gossip(peer_id: &impl fmt::Display) -> String {
    format!("gossip::peer::{}", peer_id)
}
