//! Cluster view assembled from gossip.
//!
//! Every received announcement refreshes the sender's entry. Liveness is
//! TTL-based: a node unheard past the stale threshold turns Offline and is
//! excluded from scheduling; past the prune horizon it is dropped from the
//! table entirely. The local node's own entry is always Online.

use crate::resources::{Capacity, ResourceTags};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Liveness of a gossiped node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Online,
    Offline,
    /// Reachable but reporting a fault (reserved for administrative
    /// surfacing; the scheduler treats it like Offline).
    Error,
}

/// The gossiped description of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub node_name: String,
    pub domain_id: String,
    /// Transport address of the node's swarm listener.
    pub address: String,
    /// DHT name resolving to the node's scheduler RPC actor. Recorded by
    /// deploy callers so later undeploys route to the same node.
    pub scheduler_address: String,
    /// Aggregate over the node's connected, non-fake providers.
    pub resource_capacity: Capacity,
    pub resource_tags: ResourceTags,
    /// Sender's clock at announcement time (unix seconds).
    pub timestamp: i64,
}

/// Query-surface view of one table entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub info: NodeInfo,
    pub status: NodeStatus,
    /// Seconds since this node was last heard from.
    pub last_seen_secs: u64,
}

struct NodeRecord {
    info: NodeInfo,
    status: NodeStatus,
    last_seen: Instant,
}

/// The node table: local identity plus everything gossip has taught us.
///
/// The local entry is republished wholesale every gossip tick, so it lives
/// in an `ArcSwap` so readers grab the current snapshot without locking.
pub struct NodeTable {
    local: ArcSwap<NodeInfo>,
    nodes: Mutex<HashMap<String, NodeRecord>>,
    stale_threshold: Duration,
    prune_horizon: Duration,
}

impl NodeTable {
    pub fn new(local: NodeInfo, stale_threshold: Duration, prune_horizon: Duration) -> Self {
        Self {
            local: ArcSwap::from_pointee(local),
            nodes: Mutex::new(HashMap::new()),
            stale_threshold,
            prune_horizon,
        }
    }

    /// Publish a fresh local announcement (capacity changes every tick).
    pub fn set_local(&self, info: NodeInfo) {
        self.local.store(Arc::new(info));
    }

    /// This node's entry, Online by definition.
    pub fn local_node(&self) -> NodeSnapshot {
        NodeSnapshot {
            info: self.local.load().as_ref().clone(),
            status: NodeStatus::Online,
            last_seen_secs: 0,
        }
    }

    pub fn local_node_id(&self) -> String {
        self.local.load().node_id.clone()
    }

    /// Apply one received announcement.
    ///
    /// Announcements about ourselves are ignored; the local entry is
    /// maintained directly by the gossip loop.
    pub fn observe(&self, info: NodeInfo) {
        if info.node_id == self.local_node_id() {
            return;
        }
        let mut nodes = self.nodes.lock();
        let node_id = info.node_id.clone();
        match nodes.get_mut(&node_id) {
            Some(record) => {
                record.info = info;
                record.status = NodeStatus::Online;
                record.last_seen = Instant::now();
            }
            None => {
                log::info!("discovered node {} via gossip", node_id);
                nodes.insert(
                    node_id,
                    NodeRecord {
                        info,
                        status: NodeStatus::Online,
                        last_seen: Instant::now(),
                    },
                );
            }
        }
    }

    /// Immediate downgrade, driven by mesh peer-expiry events.
    pub fn mark_offline(&self, node_id: &str) {
        if let Some(record) = self.nodes.lock().get_mut(node_id) {
            if record.status == NodeStatus::Online {
                log::info!("node {} marked offline", node_id);
            }
            record.status = NodeStatus::Offline;
        }
    }

    /// Snapshot of every known node, local entry first.
    pub fn known_nodes(&self) -> Vec<NodeSnapshot> {
        let mut out = vec![self.local_node()];
        let nodes = self.nodes.lock();
        let mut remote: Vec<NodeSnapshot> = nodes
            .values()
            .map(|record| NodeSnapshot {
                info: record.info.clone(),
                status: record.status,
                last_seen_secs: record.last_seen.elapsed().as_secs(),
            })
            .collect();
        remote.sort_by(|a, b| a.info.node_id.cmp(&b.info.node_id));
        out.extend(remote);
        out
    }

    /// The recorded scheduler address of a node, regardless of liveness.
    ///
    /// Undeploy routing uses this: a node that dropped Offline after a
    /// deploy must still be addressable once it comes back.
    pub fn scheduler_address_for(&self, node_id: &str) -> Option<String> {
        self.nodes
            .lock()
            .get(node_id)
            .map(|record| record.info.scheduler_address.clone())
    }

    /// Remote nodes eligible for cross-node scheduling, in stable order.
    pub fn online_remote_nodes(&self) -> Vec<NodeInfo> {
        let nodes = self.nodes.lock();
        let mut online: Vec<NodeInfo> = nodes
            .values()
            .filter(|record| record.status == NodeStatus::Online)
            .map(|record| record.info.clone())
            .collect();
        online.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        online
    }

    /// One TTL pass: stale entries go Offline, ancient ones are pruned.
    pub fn sweep(&self) {
        let mut nodes = self.nodes.lock();
        nodes.retain(|node_id, record| {
            let age = record.last_seen.elapsed();
            if age >= self.prune_horizon {
                log::info!("pruning node {} (unheard for {:?})", node_id, age);
                return false;
            }
            if age >= self.stale_threshold && record.status == NodeStatus::Online {
                log::info!("node {} is stale ({:?}); marking offline", node_id, age);
                record.status = NodeStatus::Offline;
            }
            true
        });
    }

    /// Periodic sweep task; granularity of half the stale threshold keeps
    /// the Offline transition within one gossip period of the deadline.
    pub fn spawn_sweep_loop(
        self: &std::sync::Arc<Self>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let table = std::sync::Arc::clone(self);
        let period = table.stale_threshold.div_f32(2.0).max(Duration::from_millis(50));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::debug!("node-table sweep loop stopped");
                        return;
                    }
                    _ = ticker.tick() => table.sweep(),
                }
            }
        })
    }
}
