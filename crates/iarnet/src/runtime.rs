//! Process-wide runtime identity.
//!
//! The node's identity and configuration are effectively global, but no
//! subsystem consults ambient state: everything receives an explicit
//! `Arc<RuntimeContext>` at construction time and never looks elsewhere
//! after bootstrap.

use crate::config::IarnetConfig;
use crate::remote::node_id::NodeId;
use std::sync::Arc;

/// Identity and configuration snapshot handed to every subsystem.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// Mesh identity of this node (peer id of the swarm keypair, or a
    /// random id when running without a mesh).
    pub node_id: NodeId,
    /// Human-readable node name (gossiped, shown in listings).
    pub node_name: String,
    pub domain_id: String,
    pub domain_name: String,
    /// Address deployed components dial for the messaging router
    /// (advertised to backends as `ZMQ_ADDR`).
    pub messaging_address: String,
    /// Address of the store RPC advertised to deployed components.
    pub store_address: String,
    /// DHT name other nodes resolve to reach this node's scheduler.
    pub scheduler_address: String,
    pub config: Arc<IarnetConfig>,
}

impl RuntimeContext {
    pub fn new(node_id: NodeId, config: Arc<IarnetConfig>) -> Self {
        let scheduler_address = crate::remote::names::scheduler(&node_id);
        Self {
            node_name: config.node.name.clone(),
            domain_id: config.domain.id.clone(),
            domain_name: config.domain.name.clone(),
            messaging_address: config.transport.messaging.bind.clone(),
            store_address: config.transport.rpc.store.bind.clone(),
            scheduler_address,
            node_id,
            config,
        }
    }

    /// Environment passed to every deployed component so it can dial back.
    pub fn component_env(&self, component_id: &str) -> Vec<(String, String)> {
        vec![
            ("COMPONENT_ID".to_string(), component_id.to_string()),
            ("ZMQ_ADDR".to_string(), self.messaging_address.clone()),
            ("STORE_ADDR".to_string(), self.store_address.clone()),
            ("LOGGER_ADDR".to_string(), self.messaging_address.clone()),
        ]
    }
}
