//! Mesh bootstrap for the node-to-node actor network.
//!
//! Builds the libp2p swarm that makes each node's `SchedulerServer` and
//! `GossipActor` addressable across the cluster. Peer discovery is either
//! zero-config mDNS (LAN) or explicit seed peers dialed at startup
//! (cross-subnet); both feed the same peer-liveness set that the gossip
//! broadcast loop iterates.
//!
//! Call [`bootstrap_mesh`] at most once per process: the underlying actor
//! swarm is a process-global and panics on re-initialisation.

use futures_util::future::BoxFuture;
use libp2p::PeerId;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Peer lifecycle event emitted by the swarm event loop.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A peer became reachable (mDNS record or live connection).
    Discovered(PeerId),
    /// A peer went away (mDNS expiry or last connection closed).
    Expired(PeerId),
}

/// Swarm configuration for one node.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Multiaddr to listen on, e.g. `"/ip4/0.0.0.0/tcp/9600"`.
    /// `None` lets the OS pick a port (tests, ephemeral nodes).
    pub listen: Option<String>,
    /// Zero-config LAN discovery.
    pub mdns: bool,
    /// Well-known peers dialed immediately after bootstrap.
    pub seed_peers: Vec<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            listen: Some("/ip4/0.0.0.0/tcp/9600".to_string()),
            mdns: true,
            seed_peers: vec![],
        }
    }
}

/// Errors during mesh bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("libp2p swarm error: {0}")]
    Swarm(String),

    #[error("invalid listen address '{addr}': {reason}")]
    InvalidListenAddr { addr: String, reason: String },

    #[error("invalid seed peer address '{addr}': {reason}")]
    InvalidSeedAddr { addr: String, reason: String },
}

/// How hard a DHT resolution tries before reporting a miss.
#[derive(Debug, Clone, Copy)]
pub enum LookupPolicy {
    /// One probe. The gossip loop uses this: a silent peer costs one
    /// miss and the next tick covers it anyway.
    Single,
    /// Poll until the deadline, sleeping `step` between probes.
    /// Scheduling and undeploy use this to ride out the propagation gap
    /// right after a peer (re)appears.
    Until { deadline: Duration, step: Duration },
}

impl LookupPolicy {
    /// The polling window the deploy/undeploy paths use: up to two
    /// seconds, probing every 400 ms.
    pub fn patient() -> Self {
        LookupPolicy::Until {
            deadline: Duration::from_secs(2),
            step: Duration::from_millis(400),
        }
    }
}

/// One mesh-visible actor this node has published. `announce` repeats the
/// full registration sequence; kept so the event loop can push every
/// local name into a newly discovered peer's routing table.
struct Publication {
    name: String,
    announce: AnnounceFn,
}

type AnnounceFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), kameo::error::RegistryError>> + Send + Sync>;

/// Proof that the swarm is running and the capability object for every
/// DHT interaction. Cheap to clone.
#[derive(Clone)]
pub struct MeshHandle {
    peer_id: PeerId,
    peer_events_tx: broadcast::Sender<PeerEvent>,
    known_peers: Arc<RwLock<HashSet<PeerId>>>,
    listen_addrs: Arc<RwLock<Vec<String>>>,
    publications: Arc<RwLock<Vec<Publication>>>,
}

impl std::fmt::Debug for MeshHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshHandle")
            .field("peer_id", &self.peer_id)
            .field(
                "known_peers",
                &self.known_peers.read().map(|g| g.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

impl MeshHandle {
    /// This node's identity in the mesh.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Addresses the swarm is actually listening on (populated
    /// asynchronously shortly after bootstrap).
    pub fn listen_addrs(&self) -> Vec<String> {
        self.listen_addrs
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Peers currently believed alive.
    pub fn known_peer_ids(&self) -> Vec<PeerId> {
        self.known_peers
            .read()
            .map(|g| g.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_peer_alive(&self, peer_id: &PeerId) -> bool {
        self.known_peers
            .read()
            .map(|g| g.contains(peer_id))
            .unwrap_or(false)
    }

    /// Subscribe to peer lifecycle events. Each call returns an
    /// independent receiver.
    pub fn subscribe_peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.peer_events_tx.subscribe()
    }

    /// Publish a local actor under `name` in the mesh directory.
    ///
    /// The actor enters the remote registry (routable by id) and the
    /// Kademlia DHT (discoverable by name). A failed DHT write is not
    /// fatal: the publication is remembered and announced again whenever
    /// a peer appears, so the record converges.
    pub async fn register_actor<A>(
        &self,
        actor_ref: kameo::actor::ActorRef<A>,
        name: impl Into<String>,
    ) where
        A: kameo::Actor + kameo::remote::RemoteActor,
    {
        let name = name.into();
        let announce: AnnounceFn = {
            let actor_ref = actor_ref.clone();
            let name = name.clone();
            Arc::new(move || {
                let actor_ref = actor_ref.clone();
                let name = name.clone();
                Box::pin(async move {
                    actor_ref.into_remote_ref().await;
                    actor_ref.register(name).await
                })
            })
        };

        match announce().await {
            Ok(()) => log::debug!("published '{}' to the mesh directory", name),
            Err(e) => log::warn!(
                "publishing '{}' failed (will announce again on peer discovery): {}",
                name,
                e
            ),
        }
        if let Ok(mut publications) = self.publications.write() {
            publications.push(Publication { name, announce });
        }
    }

    /// Resolve a published actor by name.
    ///
    /// With [`LookupPolicy::Until`] the directory is polled until the
    /// deadline runs out; a name that appears mid-window resolves on the
    /// next probe.
    pub async fn lookup_actor<A>(
        &self,
        name: impl Into<String>,
        policy: LookupPolicy,
    ) -> Result<Option<kameo::actor::RemoteActorRef<A>>, kameo::error::RegistryError>
    where
        A: kameo::Actor + kameo::remote::RemoteActor,
    {
        let name: String = name.into();
        let started = Instant::now();
        let mut probes: u32 = 0;

        loop {
            probes += 1;
            if let Some(found) =
                kameo::actor::RemoteActorRef::<A>::lookup(name.clone()).await?
            {
                if probes > 1 {
                    log::debug!("'{}' resolved on probe {}", name, probes);
                }
                return Ok(Some(found));
            }

            let LookupPolicy::Until { deadline, step } = policy else {
                return Ok(None);
            };
            if started.elapsed() + step >= deadline {
                log::debug!("'{}' unresolved after {} probe(s)", name, probes);
                return Ok(None);
            }
            tokio::time::sleep(step).await;
        }
    }

    #[cfg(test)]
    pub fn inject_known_peer_for_test(&self, peer_id: PeerId) {
        if let Ok(mut peers) = self.known_peers.write() {
            peers.insert(peer_id);
        }
    }
}

/// Bootstrap the mesh swarm according to `config`.
///
/// Owns the event loop (rather than using the library's bootstrap helper)
/// so peer discovery and loss can be surfaced as [`PeerEvent`]s and local
/// actors can be re-published the moment a new peer shows up.
pub async fn bootstrap_mesh(config: &MeshConfig) -> Result<MeshHandle, MeshError> {
    use futures_util::StreamExt as _;
    use kameo::remote;
    use libp2p::swarm::behaviour::toggle::Toggle;
    use libp2p::{
        SwarmBuilder, mdns, noise,
        swarm::{NetworkBehaviour, SwarmEvent},
        tcp, yamux,
    };

    let listen_addr = config.listen.as_deref().unwrap_or("/ip4/0.0.0.0/tcp/0");

    // Validate seed addresses up-front so a typo fails fast.
    let mut seed_addrs = Vec::new();
    for peer_addr in &config.seed_peers {
        let addr = peer_addr
            .parse::<libp2p::Multiaddr>()
            .map_err(|e| MeshError::InvalidSeedAddr {
                addr: peer_addr.clone(),
                reason: e.to_string(),
            })?;
        seed_addrs.push(addr);
    }

    let (peer_events_tx, _) = broadcast::channel::<PeerEvent>(32);
    let peer_events_tx_loop = peer_events_tx.clone();

    let known_peers: Arc<RwLock<HashSet<PeerId>>> = Arc::new(RwLock::new(HashSet::new()));
    let known_peers_loop = Arc::clone(&known_peers);

    let listen_addrs: Arc<RwLock<Vec<String>>> = Arc::new(RwLock::new(Vec::new()));
    let listen_addrs_loop = Arc::clone(&listen_addrs);

    let publications: Arc<RwLock<Vec<Publication>>> = Arc::new(RwLock::new(Vec::new()));
    let publications_loop = Arc::clone(&publications);

    #[derive(NetworkBehaviour)]
    struct MeshBehaviour {
        kameo: remote::Behaviour,
        mdns: Toggle<mdns::tokio::Behaviour>,
    }

    let enable_mdns = config.mdns;
    let mut swarm = SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| MeshError::Swarm(e.to_string()))?
        .with_quic()
        .with_behaviour(|key| {
            let local_peer_id = key.public().to_peer_id();
            let kameo_behaviour =
                remote::Behaviour::new(local_peer_id, remote::messaging::Config::default());
            // Short TTL / query interval so a crashed peer is noticed in
            // ~30 s instead of libp2p's 5-minute default.
            let mdns_behaviour = if enable_mdns {
                let mdns_config = mdns::Config {
                    ttl: std::time::Duration::from_secs(30),
                    query_interval: std::time::Duration::from_secs(15),
                    ..mdns::Config::default()
                };
                Some(mdns::tokio::Behaviour::new(mdns_config, local_peer_id)?)
            } else {
                None
            };
            Ok(MeshBehaviour {
                kameo: kameo_behaviour,
                mdns: Toggle::from(mdns_behaviour),
            })
        })
        .map_err(|e: libp2p::BehaviourBuilderError| MeshError::Swarm(e.to_string()))?
        .with_swarm_config(|c| {
            // Gossip ticks every few seconds; keep connections warm well
            // past one interval so Kademlia always has a route.
            c.with_idle_connection_timeout(std::time::Duration::from_secs(300))
        })
        .build();

    swarm
        .behaviour()
        .kameo
        .try_init_global()
        .map_err(|e| MeshError::Swarm(e.to_string()))?;

    swarm
        .listen_on(listen_addr.parse().map_err(|e: libp2p::multiaddr::Error| {
            MeshError::InvalidListenAddr {
                addr: listen_addr.to_string(),
                reason: e.to_string(),
            }
        })?)
        .map_err(|e| MeshError::Swarm(e.to_string()))?;

    // Dial seeds immediately; ConnectionEstablished marks them alive.
    for addr in seed_addrs {
        log::info!("dialing seed peer {}", addr);
        if let Err(e) = swarm.dial(addr.clone()) {
            log::warn!("failed to dial seed peer {}: {}", addr, e);
        }
    }

    let local_peer_id = *swarm.local_peer_id();

    // ── Swarm event loop ──────────────────────────────────────────────────────
    tokio::spawn(async move {
        let mark_alive = |peer_id: PeerId| -> bool {
            known_peers_loop
                .write()
                .map(|mut peers| peers.insert(peer_id))
                .unwrap_or(false)
        };
        let mark_gone = |peer_id: &PeerId| -> bool {
            known_peers_loop
                .write()
                .map(|mut peers| peers.remove(peer_id))
                .unwrap_or(false)
        };

        loop {
            match swarm.select_next_some().await {
                SwarmEvent::Behaviour(MeshBehaviourEvent::Mdns(mdns::Event::Discovered(
                    list,
                ))) => {
                    let mut seen = HashSet::new();
                    for (peer_id, multiaddr) in list {
                        swarm.add_peer_address(peer_id, multiaddr);
                        if seen.insert(peer_id) && mark_alive(peer_id) {
                            log::info!("mDNS discovered peer {peer_id}");
                            let _ = peer_events_tx_loop.send(PeerEvent::Discovered(peer_id));
                            announce_publications(&publications_loop);
                        }
                    }
                }
                SwarmEvent::Behaviour(MeshBehaviourEvent::Mdns(mdns::Event::Expired(list))) => {
                    let mut seen = HashSet::new();
                    for (peer_id, _multiaddr) in list {
                        if seen.insert(peer_id) && mark_gone(&peer_id) {
                            log::info!("mDNS peer expired: {peer_id}");
                            let _ = swarm.disconnect_peer_id(peer_id);
                            let _ = peer_events_tx_loop.send(PeerEvent::Expired(peer_id));
                        }
                    }
                }
                SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                    // Covers seed peers and inbound dials on meshes
                    // running without mDNS.
                    if mark_alive(peer_id) {
                        log::info!("connection established with peer {peer_id}");
                        let _ = peer_events_tx_loop.send(PeerEvent::Discovered(peer_id));
                        announce_publications(&publications_loop);
                    }
                }
                SwarmEvent::ConnectionClosed {
                    peer_id,
                    num_established,
                    ..
                } => {
                    if num_established == 0 && mark_gone(&peer_id) {
                        log::info!("lost last connection to peer {peer_id}");
                        let _ = peer_events_tx_loop.send(PeerEvent::Expired(peer_id));
                    }
                }
                SwarmEvent::NewListenAddr { address, .. } => {
                    log::info!("mesh listening on {address}");
                    if let Ok(mut addrs) = listen_addrs_loop.write() {
                        addrs.push(address.to_string());
                    }
                }
                _ => {}
            }
        }
    });

    log::info!(
        "mesh bootstrapped: peer_id={}, listen={}",
        local_peer_id,
        listen_addr
    );

    Ok(MeshHandle {
        peer_id: local_peer_id,
        peer_events_tx,
        known_peers,
        listen_addrs,
        publications,
    })
}

/// Push every published name again on a background task, so a freshly
/// discovered peer learns this node's actors without waiting for the
/// directory's own refresh cycle.
fn announce_publications(publications: &Arc<RwLock<Vec<Publication>>>) {
    let entries: Vec<(String, AnnounceFn)> = publications
        .read()
        .map(|g| g.iter().map(|p| (p.name.clone(), p.announce.clone())).collect())
        .unwrap_or_default();
    if entries.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for (name, announce) in entries {
            if let Err(e) = announce().await {
                log::debug!("announcing '{}' after peer discovery failed: {}", name, e);
            }
        }
    });
}
