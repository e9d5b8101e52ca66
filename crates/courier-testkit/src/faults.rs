//! Fault injection for event delivery.

use courier_core::{DeliveryError, PeerDelivery, PeerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// How delivery to a peer should misbehave
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail as if the peer had gone away
    Disconnect,
    /// Fail as if the peer's queue were full
    QueueFull,
    /// Fail with a transport rejection
    Reject(String),
    /// Panic inside the delivery call
    Panic,
}

/// Shared table of injected faults, keyed by peer
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    faults: Arc<Mutex<HashMap<PeerId, Fault>>>,
}

impl FaultPlan {
    /// Empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery to `peer` fail with `fault`
    pub fn fail(&self, peer: PeerId, fault: Fault) {
        self.faults.lock().insert(peer, fault);
    }

    /// Restore normal delivery to `peer`
    pub fn heal(&self, peer: &PeerId) {
        self.faults.lock().remove(peer);
    }

    /// Restore normal delivery to everyone
    pub fn clear(&self) {
        self.faults.lock().clear();
    }

    /// Fault currently injected for `peer`
    pub fn fault_for(&self, peer: &PeerId) -> Option<Fault> {
        self.faults.lock().get(peer).cloned()
    }
}

/// Delivery wrapper applying a [`FaultPlan`] before the real delivery
pub struct FaultyDelivery<T> {
    inner: Arc<dyn PeerDelivery<T>>,
    plan: FaultPlan,
}

impl<T> FaultyDelivery<T> {
    /// Wrap `inner`, consulting `plan` on every delivery
    pub fn new(inner: Arc<dyn PeerDelivery<T>>, plan: FaultPlan) -> Self {
        Self { inner, plan }
    }
}

impl<T> PeerDelivery<T> for FaultyDelivery<T> {
    fn deliver(&self, peer: &PeerId, value: &T) -> Result<(), DeliveryError> {
        match self.plan.fault_for(peer) {
            None => self.inner.deliver(peer, value),
            Some(Fault::Disconnect) => Err(DeliveryError::Disconnected { peer: *peer }),
            Some(Fault::QueueFull) => Err(DeliveryError::QueueFull { peer: *peer }),
            Some(Fault::Reject(message)) => Err(DeliveryError::Rejected {
                peer: *peer,
                message,
            }),
            Some(Fault::Panic) => panic!("injected delivery panic for {peer}"),
        }
    }
}
