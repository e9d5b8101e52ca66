//! Peer, connection and proxy-path identifiers
//!
//! [`PeerId`] is the single peer identifier domain: it names the sender of a
//! call ([`crate::RpcContext::sender`]) as well as the exclusion and target
//! lists accepted by [`crate::RpcEvent::send_all`] and
//! [`crate::RpcEvent::send_to`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Namespace for label-derived peer identifiers.
const PEER_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_29d4_8e0b_4d57_a3b2_5f0e_7d4c_9a11);

/// Identifier of a connected remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Create a random peer identifier
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a deterministic peer identifier from a label
    ///
    /// The same label always yields the same identifier, which keeps test
    /// fixtures and log output stable.
    pub fn from_label(label: &str) -> Self {
        Self(Uuid::new_v5(&PEER_NAMESPACE, label.as_bytes()))
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("peer-").unwrap_or(s);
        Ok(PeerId(Uuid::parse_str(raw)?))
    }
}

impl From<Uuid> for PeerId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<PeerId> for Uuid {
    fn from(peer_id: PeerId) -> Self {
        peer_id.0
    }
}

/// Identifier of one transport connection
///
/// A peer may reconnect and get a new connection while keeping its [`PeerId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate the next process-unique connection identifier
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Opaque routing identifier naming the remote service a caller wants to reach
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyPath(String);

impl ProxyPath {
    /// Create a proxy path
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProxyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProxyPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for ProxyPath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_derived_peers_are_stable() {
        assert_eq!(PeerId::from_label("ui"), PeerId::from_label("ui"));
        assert_ne!(PeerId::from_label("ui"), PeerId::from_label("host"));
    }

    #[test]
    fn test_peer_display_round_trips() {
        let peer = PeerId::random();
        let parsed: PeerId = peer.to_string().parse().unwrap();
        assert_eq!(parsed, peer);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }
}
