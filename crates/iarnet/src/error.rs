//! Structured error type for the scheduler.
//!
//! Every variant carries typed context and is serializable so it crosses
//! the node-to-node RPC boundary without losing its tag. The caller-side
//! retry policy keys off [`IarnetError::is_retryable`].

use crate::resources::Language;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend error code used for timeouts and connection-level failures
/// (anything without an HTTP status from the backend).
pub const BACKEND_NETWORK: u16 = 0;

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum IarnetError {
    // --- Scheduling ---
    #[error("no available provider satisfies the request")]
    NoAvailableProvider,

    #[error("language {language} is not supported by provider {provider_id}")]
    LanguageUnsupported {
        provider_id: String,
        language: Language,
    },

    #[error("provider {provider_id} does not cover the requested tags")]
    TagMismatch { provider_id: String },

    // --- Provider lifecycle ---
    #[error("provider {provider_id} is not connected")]
    ProviderNotConnected { provider_id: String },

    #[error("provider not found: {provider_id}")]
    ProviderNotFound { provider_id: String },

    #[error("provider {provider_id} is a placeholder and cannot run workloads")]
    FakeProvider { provider_id: String },

    #[error("backend error (code {code}): {message}")]
    Backend { code: u16, message: String },

    // --- Components ---
    #[error("component not found: {component_id}")]
    ComponentNotFound { component_id: String },

    #[error("component {component_id} has no bound provider")]
    ComponentNotBound { component_id: String },

    #[error("provider id '{raw}' is neither 'local.<pid>' nor '<pid>@<node>'")]
    InvalidProviderIdFormat { raw: String },

    // --- Cross-node ---
    #[error("remote node {node_id} is offline")]
    RemoteNodeOffline { node_id: String },

    #[error("mesh not bootstrapped; cross-node operations unavailable")]
    MeshNotBootstrapped,

    #[error("remote rpc error: {0}")]
    RemoteRpc(String),

    // --- Messaging / actors ---
    #[error("actor queue is full")]
    Overloaded,

    #[error("messaging fabric is closed")]
    FabricClosed,

    // --- Ambient ---
    #[error("operation cancelled")]
    Cancelled,

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IarnetError {
    /// Construct a backend error from an HTTP status code.
    pub fn backend_status(code: u16, message: impl Into<String>) -> Self {
        IarnetError::Backend {
            code,
            message: message.into(),
        }
    }

    /// Construct a backend error for a timeout / connection-level failure.
    pub fn backend_network(message: impl Into<String>) -> Self {
        IarnetError::Backend {
            code: BACKEND_NETWORK,
            message: message.into(),
        }
    }

    /// Whether the caller-side retry policy should re-attempt.
    ///
    /// `NoAvailableProvider` retries because capacity frees up over time;
    /// network-class backend errors retry; explicit backend refusals
    /// (an HTTP status), tag/language mismatches and format errors do not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IarnetError::NoAvailableProvider
                | IarnetError::Backend {
                    code: BACKEND_NETWORK,
                    ..
                }
        )
    }
}

impl From<anyhow::Error> for IarnetError {
    fn from(e: anyhow::Error) -> Self {
        IarnetError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for IarnetError {
    fn from(e: serde_json::Error) -> Self {
        IarnetError::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for IarnetError {
    fn from(e: rusqlite::Error) -> Self {
        IarnetError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for IarnetError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => IarnetError::backend_status(status.as_u16(), e.to_string()),
            // Timeouts, DNS failures, refused connections: retryable class.
            None => IarnetError::backend_network(e.to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IarnetError>;
