//! In-memory transport.
//!
//! [`LoopbackTransport`] plays the transport's part of the contract: it
//! resolves proxy paths through a [`ProviderChain`], builds a fresh
//! [`RpcContext`] for every call, and fans event publishes out to connected
//! peers, each of which owns an ordered [`PeerInbox`]. The first server
//! resolved for a path stays pinned for the transport's lifetime, so calls
//! and bound events always reach the same instance.

use crate::faults::{FaultPlan, FaultyDelivery};
use courier_core::{
    CancellationToken, ConnectionId, DeliveryError, DeliveryLog, EncodedPayload, EventFanout,
    FanoutBinding, PeerDelivery, PeerDirectory, PeerId, ProviderChain, ProxyPath, Result,
    RpcContext, RpcError, RpcServer, TransportConfig, MAX_PEER_QUEUE_CAPACITY,
    REQUESTING_CONNECTION,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

/// One event publish as seen by a peer
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Path of the server that published
    pub path: ProxyPath,
    /// Event member name
    pub event: String,
    /// Payload
    pub payload: Value,
}

struct PeerEntry {
    peer: PeerId,
    connection: ConnectionId,
    outbox: mpsc::Sender<EventEnvelope>,
}

#[derive(Default)]
struct PeerTable {
    entries: Mutex<Vec<PeerEntry>>,
}

impl PeerTable {
    fn connection_of(&self, peer: &PeerId) -> Option<ConnectionId> {
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.peer == *peer)
            .map(|entry| entry.connection)
    }

    fn outbox_of(&self, peer: &PeerId) -> Option<mpsc::Sender<EventEnvelope>> {
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.peer == *peer)
            .map(|entry| entry.outbox.clone())
    }
}

impl PeerDirectory for PeerTable {
    fn connected_peers(&self) -> Vec<PeerId> {
        self.entries.lock().iter().map(|entry| entry.peer).collect()
    }
}

struct InboxDelivery {
    peers: Arc<PeerTable>,
    path: ProxyPath,
    event: String,
}

impl PeerDelivery<EncodedPayload> for InboxDelivery {
    fn deliver(
        &self,
        peer: &PeerId,
        value: &EncodedPayload,
    ) -> std::result::Result<(), DeliveryError> {
        let value = value
            .as_ref()
            .map_err(|message| DeliveryError::Unencodable {
                peer: *peer,
                message: message.clone(),
            })?;
        let outbox = self
            .peers
            .outbox_of(peer)
            .ok_or(DeliveryError::Disconnected { peer: *peer })?;
        let envelope = EventEnvelope {
            path: self.path.clone(),
            event: self.event.clone(),
            payload: value.clone(),
        };
        outbox.try_send(envelope).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::QueueFull { peer: *peer },
            TrySendError::Closed(_) => DeliveryError::Disconnected { peer: *peer },
        })
    }
}

/// Receiving end of one connected peer
#[derive(Debug)]
pub struct PeerInbox {
    peer: PeerId,
    connection: ConnectionId,
    receiver: mpsc::Receiver<EventEnvelope>,
}

impl PeerInbox {
    /// Peer this inbox belongs to
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Connection the peer arrived on
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Next event, waiting for one; `None` once the peer is disconnected
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.try_recv().ok()
    }

    /// All queued events, in delivery order
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// In-memory transport dispatching into servers of a [`ProviderChain`]
pub struct LoopbackTransport {
    providers: ProviderChain,
    servers: Mutex<HashMap<ProxyPath, Arc<dyn RpcServer>>>,
    config: TransportConfig,
    peers: Arc<PeerTable>,
    faults: FaultPlan,
    log: DeliveryLog,
    bindings: Mutex<Vec<FanoutBinding>>,
}

impl LoopbackTransport {
    /// Transport with default settings
    pub fn new(providers: ProviderChain) -> Self {
        Self::with_config(providers, TransportConfig::default(), DeliveryLog::default())
    }

    /// Transport with explicit settings and failure log
    pub fn with_config(providers: ProviderChain, config: TransportConfig, log: DeliveryLog) -> Self {
        Self {
            providers,
            servers: Mutex::new(HashMap::new()),
            config,
            peers: Arc::new(PeerTable::default()),
            faults: FaultPlan::new(),
            log,
            bindings: Mutex::new(Vec::new()),
        }
    }

    /// Connect `peer`, replacing any previous connection it had
    pub fn connect(&self, peer: PeerId) -> PeerInbox {
        let (outbox, receiver) = mpsc::channel(
            self.config
                .peer_queue_capacity
                .clamp(1, MAX_PEER_QUEUE_CAPACITY),
        );
        let connection = ConnectionId::next();
        let mut entries = self.peers.entries.lock();
        entries.retain(|entry| entry.peer != peer);
        entries.push(PeerEntry {
            peer,
            connection,
            outbox,
        });
        info!(%peer, %connection, "Peer connected");
        PeerInbox {
            peer,
            connection,
            receiver,
        }
    }

    /// Disconnect `peer`; its inbox yields `None` once drained
    pub fn disconnect(&self, peer: &PeerId) {
        let mut entries = self.peers.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.peer != *peer);
        if entries.len() != before {
            info!(%peer, "Peer disconnected");
        }
    }

    /// Peers currently connected, in connection order
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.connected_peers()
    }

    /// Faults applied to event deliveries
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Failures recorded by every bound event
    pub fn delivery_log(&self) -> &DeliveryLog {
        &self.log
    }

    /// Server handling `path`, resolved on first use and pinned afterwards
    pub fn server_for(&self, path: &ProxyPath) -> Result<Arc<dyn RpcServer>> {
        if let Some(server) = self.servers.lock().get(path) {
            return Ok(Arc::clone(server));
        }
        let server = self.providers.resolve(path)?;
        let mut servers = self.servers.lock();
        let pinned = Arc::clone(servers.entry(path.clone()).or_insert(server));
        Ok(pinned)
    }

    /// Fan the event member `event` of the server at `path` out to connected peers
    pub fn bind_event(&self, path: &ProxyPath, event: &str) -> Result<()> {
        let server = self.server_for(path)?;
        let member = server
            .event(event)
            .ok_or_else(|| RpcError::unknown_method(server.shape().service(), event))?;

        let delivery = InboxDelivery {
            peers: Arc::clone(&self.peers),
            path: path.clone(),
            event: event.to_string(),
        };
        let delivery = FaultyDelivery::new(Arc::new(delivery), self.faults.clone());
        let fanout = Arc::new(EventFanout::new(
            Arc::clone(&self.peers) as Arc<dyn PeerDirectory>,
            Arc::new(delivery),
            self.log.clone(),
        ));
        let binding = fanout.attach(member);

        debug!(%path, event, payload = member.payload_type(), "Bound event fan-out");
        self.bindings.lock().push(binding);
        Ok(())
    }

    /// Invoke `method` on the server at `path` on behalf of `sender`
    pub async fn call(
        &self,
        sender: &PeerId,
        path: &ProxyPath,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let ctx = self.context_for(sender, None);
        self.dispatch(ctx, path, method, args).await
    }

    /// Like [`call`](Self::call), returning the token that cancels this request
    pub fn call_cancellable<'a>(
        &'a self,
        sender: &PeerId,
        path: &'a ProxyPath,
        method: &'a str,
        args: Vec<Value>,
    ) -> (CancellationToken, BoxFuture<'a, Result<Value>>) {
        let token = CancellationToken::new();
        let ctx = self.context_for(sender, Some(token.clone()));
        let call = async move { self.dispatch(ctx, path, method, args).await }.boxed();
        (token, call)
    }

    fn context_for(&self, sender: &PeerId, token: Option<CancellationToken>) -> RpcContext {
        let mut builder = RpcContext::builder(*sender);
        if let Some(connection) = self.peers.connection_of(sender) {
            builder = builder.insert(&REQUESTING_CONNECTION, connection);
        }
        if let Some(token) = token {
            builder = builder.cancellable(token);
        }
        builder.build()
    }

    async fn dispatch(
        &self,
        ctx: RpcContext,
        path: &ProxyPath,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let server = self.server_for(path)?;
        if self.config.log_calls {
            debug!(%path, method, sender = %ctx.sender(), args = args.len(), "Dispatching call");
        }
        let result = server.call(&ctx, method, args).await;
        if let Err(err) = &result {
            debug!(%path, method, error = %err, "Call failed");
        }
        result
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        for binding in self.bindings.get_mut().drain(..) {
            binding.detach();
        }
    }
}
