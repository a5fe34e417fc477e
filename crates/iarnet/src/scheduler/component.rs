//! Components and their provider bindings.
//!
//! A component's `provider_ref` string is the single source of truth for
//! undeploy routing: `local.<pid>` means this node owns the provider,
//! `<pid>@<nodeID>` means another node does. The two encodings are
//! disjoint because a provider id never contains `@`; a node id may
//! contain dots without creating ambiguity.

use crate::error::{IarnetError, Result};
use crate::messaging::Envelope;
use crate::resources::ResourceInfo;
use futures_util::future::BoxFuture;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where a component runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRef {
    /// Owned by a provider registered on this node.
    Local { provider_id: String },
    /// Owned by `provider_id` on the remote node `node_id`.
    Remote {
        provider_id: String,
        node_id: String,
    },
}

impl ProviderRef {
    pub fn local(provider_id: impl Into<String>) -> Self {
        ProviderRef::Local {
            provider_id: provider_id.into(),
        }
    }

    pub fn remote(provider_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        ProviderRef::Remote {
            provider_id: provider_id.into(),
            node_id: node_id.into(),
        }
    }

    pub fn provider_id(&self) -> &str {
        match self {
            ProviderRef::Local { provider_id } => provider_id,
            ProviderRef::Remote { provider_id, .. } => provider_id,
        }
    }

    /// Parse the canonical encoding.
    ///
    /// Disambiguation rule: any `@` makes it remote (provider ids never
    /// contain `@`); otherwise a `local.` prefix is required.
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some((provider_id, node_id)) = raw.split_once('@') {
            if provider_id.is_empty() || node_id.is_empty() || node_id.contains('@') {
                return Err(IarnetError::InvalidProviderIdFormat {
                    raw: raw.to_string(),
                });
            }
            return Ok(ProviderRef::remote(provider_id, node_id));
        }
        if let Some(provider_id) = raw.strip_prefix("local.") {
            if provider_id.is_empty() {
                return Err(IarnetError::InvalidProviderIdFormat {
                    raw: raw.to_string(),
                });
            }
            return Ok(ProviderRef::local(provider_id));
        }
        Err(IarnetError::InvalidProviderIdFormat {
            raw: raw.to_string(),
        })
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderRef::Local { provider_id } => write!(f, "local.{}", provider_id),
            ProviderRef::Remote {
                provider_id,
                node_id,
            } => write!(f, "{}@{}", provider_id, node_id),
        }
    }
}

/// Delivery callback installed by the messaging fabric when the component
/// is registered with it.
pub type ComponentSender =
    Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// One deployed (or in-flight) unit of compute.
pub struct Component {
    /// Globally unique, `comp.`-prefixed.
    pub id: String,
    /// Opaque image reference, when the caller supplies one.
    pub image: Option<String>,
    /// The resource request the component was scheduled with.
    pub resource_usage: ResourceInfo,
    provider_ref: RwLock<Option<ProviderRef>>,
    sender: OnceCell<ComponentSender>,
}

impl Component {
    pub fn new(id: impl Into<String>, resource_usage: ResourceInfo) -> Self {
        Self {
            id: id.into(),
            image: None,
            resource_usage,
            provider_ref: RwLock::new(None),
            sender: OnceCell::new(),
        }
    }

    /// Mint a fresh component id.
    pub fn generate_id() -> String {
        format!("comp.{}", uuid::Uuid::new_v4())
    }

    /// The binding, if the scheduling critical section has completed.
    pub fn provider_ref(&self) -> Option<ProviderRef> {
        self.provider_ref.read().clone()
    }

    pub(crate) fn bind(&self, provider_ref: ProviderRef) {
        *self.provider_ref.write() = Some(provider_ref);
    }

    /// Install the delivery callback. First caller wins; the fabric sets
    /// this exactly once at registration.
    pub fn set_sender(&self, sender: ComponentSender) {
        let _ = self.sender.set(sender);
    }

    /// Deliver a message through the installed callback.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        let sender = self.sender.get().cloned().ok_or_else(|| {
            IarnetError::Internal(format!("component {} has no sender installed", self.id))
        })?;
        sender(envelope).await
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("resource_usage", &self.resource_usage)
            .field("provider_ref", &self.provider_ref.read())
            .finish_non_exhaustive()
    }
}

/// `component_id → Component`, shared by the scheduler and the actor layer.
#[derive(Default)]
pub struct ComponentRegistry {
    components: RwLock<HashMap<String, Arc<Component>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, component: Arc<Component>) {
        self.components
            .write()
            .insert(component.id.clone(), component);
    }

    pub fn get(&self, component_id: &str) -> Option<Arc<Component>> {
        self.components.read().get(component_id).cloned()
    }

    pub fn remove(&self, component_id: &str) -> Option<Arc<Component>> {
        self.components.write().remove(component_id)
    }

    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.components.read().keys().cloned().collect()
    }

    /// Components whose scheduling critical section has not finished.
    /// Transiently non-empty during deploys; anything left here afterwards
    /// is a leak.
    pub fn unbound_ids(&self) -> Vec<String> {
        self.components
            .read()
            .values()
            .filter(|c| c.provider_ref().is_none())
            .map(|c| c.id.clone())
            .collect()
    }
}
