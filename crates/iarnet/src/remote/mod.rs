//! Cross-node plumbing: mesh bootstrap, node identity, the gossip
//! protocol and node table, and the scheduler RPC actor.

pub mod gossip;
pub mod mesh;
pub mod names;
pub mod node_id;
pub mod node_table;
pub mod server;

#[cfg(test)]
pub(crate) mod test_helpers;

#[cfg(test)]
mod server_tests;

pub use gossip::{GossipActor, NodeAnnouncement, spawn_gossip_loop, spawn_peer_watch};
pub use mesh::{LookupPolicy, MeshConfig, MeshError, MeshHandle, PeerEvent, bootstrap_mesh};
pub use node_id::NodeId;
pub use node_table::{NodeInfo, NodeSnapshot, NodeStatus, NodeTable};
pub use server::{
    ListProviders, ProviderListing, RemoteSchedule, ScheduleRemote, SchedulerServer,
    UndeployRemote,
};
