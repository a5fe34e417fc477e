//! Router-style messaging fabric between the node and its deployed
//! components.
//!
//! Components dial in over TCP and identify themselves with their first
//! frame. Outbound sends to a component that has not identified yet are
//! buffered and flushed, in submission order, the moment its first frame
//! arrives. Inbound frames surface on a single channel keyed by component
//! id; receivers look the component up by id, never through stored
//! back-pointers.

pub mod frame;

pub use frame::{Envelope, EnvelopeKind, RouterCodec, RouterFrame};

use crate::error::{IarnetError, Result};
use crate::scheduler::component::ComponentSender;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

/// A frame received from an identified component.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub component_id: String,
    pub envelope: Envelope,
}

struct FabricShared {
    connected: Mutex<HashMap<String, mpsc::UnboundedSender<Envelope>>>,
    pending: Mutex<HashMap<String, VecDeque<Envelope>>>,
    closed: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
}

impl FabricShared {
    /// Queue-on-send: route to the live connection if the component has
    /// identified itself, otherwise buffer in submission order.
    ///
    /// Lock order is always `connected` then `pending`; identification
    /// holds both while flushing so queued and live sends cannot
    /// interleave out of order.
    fn send(&self, component_id: &str, envelope: Envelope) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IarnetError::FabricClosed);
        }
        let mut connected = self.connected.lock();
        if let Some(tx) = connected.get(component_id) {
            if tx.send(envelope.clone()).is_ok() {
                return Ok(());
            }
            // Writer is gone (connection dropped mid-send): fall back to
            // queueing for the next connection.
            connected.remove(component_id);
        }
        self.pending
            .lock()
            .entry(component_id.to_string())
            .or_default()
            .push_back(envelope);
        Ok(())
    }

    /// Mark a component connected and flush its backlog in order.
    fn attach(&self, component_id: &str, tx: mpsc::UnboundedSender<Envelope>) {
        let mut connected = self.connected.lock();
        let mut pending = self.pending.lock();
        if let Some(backlog) = pending.remove(component_id) {
            for envelope in backlog {
                let _ = tx.send(envelope);
            }
        }
        connected.insert(component_id.to_string(), tx);
    }

    /// Drop the live connection entry, but only if it is still ours;
    /// a reconnect may already have replaced it.
    fn detach(&self, component_id: &str, tx: &mpsc::UnboundedSender<Envelope>) {
        let mut connected = self.connected.lock();
        if let Some(current) = connected.get(component_id)
            && current.same_channel(tx)
        {
            connected.remove(component_id);
        }
    }
}

/// The router socket. One per node.
pub struct MessagingFabric {
    shared: Arc<FabricShared>,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: SocketAddr,
}

impl MessagingFabric {
    /// Bind the router socket and start accepting component connections.
    ///
    /// Returns the fabric and the inbound message stream.
    pub async fn bind(
        addr: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<InboundMessage>)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| IarnetError::Internal(format!("messaging bind {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| IarnetError::Internal(e.to_string()))?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(FabricShared {
            connected: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            inbound_tx,
        });
        let cancel = CancellationToken::new();

        let accept_shared = Arc::clone(&shared);
        let accept_cancel = cancel.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer) = tokio::select! {
                    _ = accept_cancel.cancelled() => return,
                    accepted = listener.accept() => match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("messaging accept error: {}", e);
                            continue;
                        }
                    },
                };
                log::debug!("messaging connection from {}", peer);
                let conn_shared = Arc::clone(&accept_shared);
                let conn_cancel = accept_cancel.clone();
                tokio::spawn(async move {
                    handle_connection(conn_shared, conn_cancel, stream).await;
                });
            }
        });

        log::info!("messaging fabric listening on {}", local_addr);
        Ok((
            Arc::new(Self {
                shared,
                cancel,
                accept_task: Mutex::new(Some(accept_task)),
                local_addr,
            }),
            inbound_rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send an envelope to a component, buffering if it has not yet
    /// identified itself.
    pub fn send(&self, component_id: &str, envelope: Envelope) -> Result<()> {
        self.shared.send(component_id, envelope)
    }

    /// Build the delivery callback installed on a [`Component`] at
    /// registration time.
    ///
    /// [`Component`]: crate::scheduler::component::Component
    pub fn component_sender(&self, component_id: &str) -> ComponentSender {
        let shared = Arc::clone(&self.shared);
        let component_id = component_id.to_string();
        Arc::new(move |envelope| {
            let shared = Arc::clone(&shared);
            let component_id = component_id.clone();
            Box::pin(async move { shared.send(&component_id, envelope) })
        })
    }

    /// Number of envelopes buffered for not-yet-connected components.
    pub fn pending_len(&self, component_id: &str) -> usize {
        self.shared
            .pending
            .lock()
            .get(component_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Shut the fabric down: stop accepting, drop every connection and
    /// queued buffer, reject further sends. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.shared.pending.lock().clear();
        self.shared.connected.lock().clear();
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        log::info!("messaging fabric closed");
    }
}

/// Per-connection protocol: first frame identifies the component, then
/// the connection carries traffic both ways until either side drops.
async fn handle_connection(
    shared: Arc<FabricShared>,
    cancel: CancellationToken,
    stream: TcpStream,
) {
    let framed = Framed::new(stream, RouterCodec);
    let (mut sink, mut stream) = framed.split();

    // Identification: first inbound frame names the component.
    let first = tokio::select! {
        _ = cancel.cancelled() => return,
        frame = stream.next() => frame,
    };
    let first = match first {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
            log::debug!("messaging connection dropped before identify: {}", e);
            return;
        }
        None => return,
    };
    let component_id = first.component_id.clone();
    log::debug!("component {} identified on messaging fabric", component_id);

    // Writer half: drain the per-component channel into the socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    shared.attach(&component_id, tx.clone());

    let writer_id = component_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let frame = RouterFrame::new(writer_id.clone(), envelope);
            if let Err(e) = sink.send(frame).await {
                log::debug!("messaging write to {} failed: {}", writer_id, e);
                return;
            }
        }
    });

    // The identify frame may carry a payload of its own.
    if !first.envelope.body.is_empty() {
        let _ = shared.inbound_tx.send(InboundMessage {
            component_id: component_id.clone(),
            envelope: first.envelope,
        });
    }

    // Reader half: forward inbound frames keyed by the identified id.
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(frame)) => {
                let _ = shared.inbound_tx.send(InboundMessage {
                    component_id: component_id.clone(),
                    envelope: frame.envelope,
                });
            }
            Some(Err(e)) => {
                log::debug!("messaging read from {} failed: {}", component_id, e);
                break;
            }
            None => break,
        }
    }

    shared.detach(&component_id, &tx);
    writer.abort();
}
