//! Stable node identity used for cross-node routing.
//!
//! Backed by the libp2p `PeerId` of the node's mesh keypair; serialized as
//! its base58 string at every wire and storage boundary. The string form is
//! what appears in `<pid>@<nodeID>` component bindings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(libp2p::PeerId);

impl NodeId {
    pub fn from_peer_id(peer_id: libp2p::PeerId) -> Self {
        Self(peer_id)
    }

    /// A fresh random identity, used by nodes running without a mesh
    /// (tests, single-node deployments).
    pub fn random() -> Self {
        Self(libp2p::PeerId::random())
    }

    pub fn as_peer_id(&self) -> &libp2p::PeerId {
        &self.0
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        value
            .parse::<libp2p::PeerId>()
            .map(Self)
            .map_err(|e| format!("invalid node id '{}': {}", value, e))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
