//! Configuration file support for a scheduler node.
//!
//! One TOML file per node. Every tunable has a serde default so an empty
//! file (or no file at all) yields a runnable single-node configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_GOSSIP_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_GOSSIP_STALE_MULTIPLIER: u32 = 3;
pub const DEFAULT_GOSSIP_PRUNE_HORIZON_SECS: u64 = 300;
pub const DEFAULT_ACTOR_CONCURRENCY: usize = 8;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MIN_SECS: u64 = 5;
pub const DEFAULT_RETRY_DELAY_MAX_SECS: u64 = 15;

fn default_health_interval() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL_SECS
}

fn default_health_timeout() -> u64 {
    DEFAULT_HEALTH_CHECK_TIMEOUT_SECS
}

fn default_deploy_timeout() -> u64 {
    DEFAULT_DEPLOY_TIMEOUT_SECS
}

fn default_gossip_interval() -> u64 {
    DEFAULT_GOSSIP_INTERVAL_SECS
}

fn default_stale_multiplier() -> u32 {
    DEFAULT_GOSSIP_STALE_MULTIPLIER
}

fn default_prune_horizon() -> u64 {
    DEFAULT_GOSSIP_PRUNE_HORIZON_SECS
}

fn default_actor_concurrency() -> usize {
    DEFAULT_ACTOR_CONCURRENCY
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_MAX_ATTEMPTS
}

fn default_retry_delay_min() -> u64 {
    DEFAULT_RETRY_DELAY_MIN_SECS
}

fn default_retry_delay_max() -> u64 {
    DEFAULT_RETRY_DELAY_MAX_SECS
}

fn default_messaging_bind() -> String {
    "0.0.0.0:5555".to_string()
}

fn default_scheduler_bind() -> String {
    "/ip4/0.0.0.0/tcp/9600".to_string()
}

fn default_store_bind() -> String {
    "0.0.0.0:5556".to_string()
}

fn default_persistence_path() -> String {
    "iarnet.db".to_string()
}

fn default_node_name() -> String {
    // Same override-then-syscall order everywhere a display name is needed.
    if let Ok(h) = std::env::var("HOSTNAME")
        && !h.is_empty()
    {
        return h;
    }
    std::process::Command::new("hostname")
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "iarnet-node".to_string())
}

fn default_domain() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

/// Node identity section.
///
/// Only the display name is configurable. The node's id is its mesh
/// keypair identity and cannot be chosen here; a `[node] id = ...` key
/// is rejected at parse time instead of being silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    /// Display name. Defaults to the OS hostname.
    #[serde(default = "default_node_name")]
    pub name: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_node_name(),
        }
    }
}

/// Administrative domain this node belongs to (visible in gossip,
/// not used for routing).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainSection {
    #[serde(default = "default_domain")]
    pub id: String,
    #[serde(default = "default_domain")]
    pub name: String,
}

impl Default for DomainSection {
    fn default() -> Self {
        Self {
            id: default_domain(),
            name: default_domain(),
        }
    }
}

/// Provider health-check loop tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckSection {
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    /// Per-deploy RPC timeout (deploys pull images and are slower than
    /// health probes).
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout_secs: u64,
}

impl Default for HealthCheckSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            timeout_secs: DEFAULT_HEALTH_CHECK_TIMEOUT_SECS,
            deploy_timeout_secs: DEFAULT_DEPLOY_TIMEOUT_SECS,
        }
    }
}

impl HealthCheckSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }
}

/// Gossip / discovery tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GossipSection {
    #[serde(default = "default_gossip_interval")]
    pub interval_secs: u64,
    /// A node unheard for `interval × stale_multiplier` is Offline.
    #[serde(default = "default_stale_multiplier")]
    pub stale_multiplier: u32,
    /// A node unheard for this long is pruned from the table entirely.
    #[serde(default = "default_prune_horizon")]
    pub prune_horizon_secs: u64,
    /// Multiaddrs of well-known peers dialed at startup.
    #[serde(default)]
    pub seed_peers: Vec<String>,
    /// Zero-config LAN discovery via mDNS. Disable for cross-subnet
    /// deployments that rely solely on `seed_peers`.
    #[serde(default = "default_true")]
    pub mdns: bool,
}

impl Default for GossipSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_GOSSIP_INTERVAL_SECS,
            stale_multiplier: DEFAULT_GOSSIP_STALE_MULTIPLIER,
            prune_horizon_secs: DEFAULT_GOSSIP_PRUNE_HORIZON_SECS,
            seed_peers: Vec::new(),
            mdns: true,
        }
    }
}

impl GossipSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Offline threshold: `interval × stale_multiplier`.
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.interval_secs * self.stale_multiplier as u64)
    }

    pub fn prune_horizon(&self) -> Duration {
        Duration::from_secs(self.prune_horizon_secs)
    }
}

/// Caller-side deploy retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_min")]
    pub delay_min_secs: u64,
    #[serde(default = "default_retry_delay_max")]
    pub delay_max_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            delay_min_secs: DEFAULT_RETRY_DELAY_MIN_SECS,
            delay_max_secs: DEFAULT_RETRY_DELAY_MAX_SECS,
        }
    }
}

/// Scheduler tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    /// Default per-actor in-flight message bound.
    #[serde(default = "default_actor_concurrency")]
    pub default_actor_concurrency: usize,
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            default_actor_concurrency: DEFAULT_ACTOR_CONCURRENCY,
            retry: RetrySection::default(),
        }
    }
}

/// One bindable listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindSection {
    pub bind: String,
}

/// Transport endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportSection {
    /// Router socket deployed components dial back into.
    #[serde(default = "default_transport_messaging")]
    pub messaging: BindSection,
    #[serde(default)]
    pub rpc: RpcSection,
}

fn default_transport_messaging() -> BindSection {
    BindSection {
        bind: default_messaging_bind(),
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            messaging: default_transport_messaging(),
            rpc: RpcSection::default(),
        }
    }
}

/// RPC listeners: the node-to-node scheduler mesh (a multiaddr) and the
/// store endpoint advertised to deployed components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcSection {
    #[serde(default = "default_transport_scheduler")]
    pub scheduler: BindSection,
    #[serde(default = "default_transport_store")]
    pub store: BindSection,
}

fn default_transport_scheduler() -> BindSection {
    BindSection {
        bind: default_scheduler_bind(),
    }
}

fn default_transport_store() -> BindSection {
    BindSection {
        bind: default_store_bind(),
    }
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            scheduler: default_transport_scheduler(),
            store: default_transport_store(),
        }
    }
}

/// Durable state location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceSection {
    #[serde(default = "default_persistence_path")]
    pub path: String,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            path: default_persistence_path(),
        }
    }
}

/// Root configuration for one scheduler node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IarnetConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub domain: DomainSection,
    #[serde(default)]
    pub health_check: HealthCheckSection,
    #[serde(default)]
    pub gossip: GossipSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

impl IarnetConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: IarnetConfig =
            toml::from_str(content).context("parsing scheduler configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.health_check.interval_secs > 0,
            "health_check.interval_secs must be positive"
        );
        anyhow::ensure!(
            self.gossip.interval_secs > 0,
            "gossip.interval_secs must be positive"
        );
        anyhow::ensure!(
            self.scheduler.retry.delay_min_secs <= self.scheduler.retry.delay_max_secs,
            "scheduler.retry.delay_min_secs must not exceed delay_max_secs"
        );
        anyhow::ensure!(
            self.scheduler.default_actor_concurrency > 0,
            "scheduler.default_actor_concurrency must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_documented_defaults() {
        let cfg = IarnetConfig::from_toml("").unwrap();
        assert_eq!(cfg.health_check.interval_secs, 30);
        assert_eq!(cfg.health_check.timeout_secs, 5);
        assert_eq!(cfg.gossip.interval_secs, 5);
        assert_eq!(cfg.gossip.stale_multiplier, 3);
        assert_eq!(cfg.scheduler.default_actor_concurrency, 8);
        assert_eq!(cfg.scheduler.retry.max_attempts, 3);
        assert_eq!(cfg.scheduler.retry.delay_min_secs, 5);
        assert_eq!(cfg.scheduler.retry.delay_max_secs, 15);
        assert!(cfg.gossip.seed_peers.is_empty());
        assert!(cfg.gossip.mdns);
    }

    #[test]
    fn stale_threshold_is_interval_times_multiplier() {
        let cfg = IarnetConfig::from_toml("").unwrap();
        assert_eq!(cfg.gossip.stale_threshold(), Duration::from_secs(15));
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let cfg = IarnetConfig::from_toml(
            r#"
[node]
name = "edge-3"

[gossip]
interval_secs = 2
seed_peers = ["/ip4/10.0.0.1/tcp/9600"]

[transport.messaging]
bind = "0.0.0.0:7700"
"#,
        )
        .unwrap();
        assert_eq!(cfg.node.name, "edge-3");
        assert_eq!(cfg.gossip.interval_secs, 2);
        assert_eq!(cfg.gossip.seed_peers.len(), 1);
        assert_eq!(cfg.transport.messaging.bind, "0.0.0.0:7700");
        // untouched section keeps its default
        assert_eq!(cfg.health_check.interval_secs, 30);
    }

    #[test]
    fn inverted_retry_window_is_rejected() {
        let err = IarnetConfig::from_toml(
            r#"
[scheduler.retry]
delay_min_secs = 20
delay_max_secs = 10
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("delay_min_secs"));
    }

    #[test]
    fn zero_health_interval_is_rejected() {
        let err = IarnetConfig::from_toml("[health_check]\ninterval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }

    /// The node id is the mesh keypair identity, not a config value.
    /// Setting one must fail the parse, not vanish silently.
    #[test]
    fn node_id_key_is_rejected_not_swallowed() {
        let err = IarnetConfig::from_toml("[node]\nid = \"node-7\"\n").unwrap_err();
        let chain = format!("{:#}", err);
        assert!(chain.contains("unknown field"), "got: {}", chain);
    }

    #[test]
    fn misspelled_keys_are_parse_errors() {
        let err =
            IarnetConfig::from_toml("[gossip]\ninterval_seconds = 5\n").unwrap_err();
        assert!(format!("{:#}", err).contains("unknown field"));
    }
}
