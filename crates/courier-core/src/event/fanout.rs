//! Per-peer delivery of published events with failure isolation.
//!
//! The transport attaches an [`EventFanout`] to an event's hooks. Each
//! publish is delivered to its recipients one at a time; a failing or
//! panicking delivery is recorded and the remaining recipients are still
//! attempted. Nothing is ever re-thrown to the publisher.

use super::broadcast::{EventHooks, ListenerHandle, SendAll, SendTo};
use crate::config::FanoutConfig;
use crate::identifiers::PeerId;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a single peer did not receive a payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The peer is no longer connected
    #[error("peer {peer} is disconnected")]
    Disconnected {
        /// Recipient
        peer: PeerId,
    },

    /// The peer's outbound queue is full
    #[error("outbound queue for {peer} is full")]
    QueueFull {
        /// Recipient
        peer: PeerId,
    },

    /// The transport refused the payload
    #[error("delivery to {peer} rejected: {message}")]
    Rejected {
        /// Recipient
        peer: PeerId,
        /// Transport-specific reason
        message: String,
    },

    /// The payload could not be encoded for the wire
    #[error("payload for {peer} could not be encoded: {message}")]
    Unencodable {
        /// Recipient
        peer: PeerId,
        /// Encoder error
        message: String,
    },

    /// Delivery code panicked
    #[error("delivery to {peer} panicked")]
    Panicked {
        /// Recipient
        peer: PeerId,
    },
}

/// Set of peers currently reachable by the transport
pub trait PeerDirectory: Send + Sync {
    /// Connected peers
    fn connected_peers(&self) -> Vec<PeerId>;
}

/// Pushes one payload to one peer
pub trait PeerDelivery<T>: Send + Sync {
    /// Deliver `value` to `peer`.
    ///
    /// Implementations must not block; per-peer order of successive calls
    /// must be preserved.
    fn deliver(&self, peer: &PeerId, value: &T) -> Result<(), DeliveryError>;
}

/// One recorded delivery failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Recipient that was not reached
    pub peer: PeerId,
    /// Cause
    pub error: DeliveryError,
}

/// Outcome of delivering one publish
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Peers the payload was handed to
    pub delivered: Vec<PeerId>,
    /// Peers that failed
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    /// Whether every recipient was reached
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of recipients attempted
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failures.len()
    }
}

/// Bounded record of delivery failures the transport may drain and report
#[derive(Clone)]
pub struct DeliveryLog {
    entries: Arc<Mutex<VecDeque<DeliveryFailure>>>,
    capacity: usize,
}

impl DeliveryLog {
    /// Log retaining at most `capacity` failures, oldest evicted first.
    ///
    /// Storage grows with recorded failures, not with `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    /// Log sized from configuration
    pub fn from_config(config: &FanoutConfig) -> Self {
        Self::new(config.failure_log_capacity)
    }

    /// Append failures
    pub fn record(&self, failures: &[DeliveryFailure]) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        for failure in failures {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(failure.clone());
        }
    }

    /// Take all recorded failures
    pub fn drain(&self) -> Vec<DeliveryFailure> {
        self.entries.lock().drain(..).collect()
    }

    /// Number of retained failures
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no failure is retained
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeliveryLog {
    fn default() -> Self {
        Self::from_config(&FanoutConfig::default())
    }
}

/// Deliver `value` to each recipient in order, isolating failures
pub fn deliver_each<T>(
    recipients: &[PeerId],
    value: &T,
    delivery: &dyn PeerDelivery<T>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for peer in recipients {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| delivery.deliver(peer, value)))
            .unwrap_or(Err(DeliveryError::Panicked { peer: *peer }));
        match outcome {
            Ok(()) => report.delivered.push(*peer),
            Err(error) => report.failures.push(DeliveryFailure { peer: *peer, error }),
        }
    }
    report
}

/// Recipients of a `send_all`: connected peers minus exceptions
pub fn recipients_for_all<T>(connected: &[PeerId], notice: &SendAll<T>) -> Vec<PeerId> {
    let mut seen = BTreeSet::new();
    connected
        .iter()
        .filter(|peer| !notice.excludes(peer) && seen.insert(**peer))
        .copied()
        .collect()
}

/// Recipients of a `send_to`: targets in order, each at most once
pub fn recipients_for_targets<T>(notice: &SendTo<T>) -> Vec<PeerId> {
    let mut seen = BTreeSet::new();
    notice
        .targets
        .iter()
        .filter(|peer| seen.insert(**peer))
        .copied()
        .collect()
}

/// Transport-side listener that turns publishes into per-peer deliveries
pub struct EventFanout<T> {
    directory: Arc<dyn PeerDirectory>,
    delivery: Arc<dyn PeerDelivery<T>>,
    log: DeliveryLog,
}

impl<T: 'static> EventFanout<T> {
    /// Create a fan-out over a peer directory and delivery mechanism
    pub fn new(
        directory: Arc<dyn PeerDirectory>,
        delivery: Arc<dyn PeerDelivery<T>>,
        log: DeliveryLog,
    ) -> Self {
        Self {
            directory,
            delivery,
            log,
        }
    }

    /// Deliver a `send_all` publish
    pub fn publish_all(&self, notice: &SendAll<T>) -> DeliveryReport {
        let connected = self.directory.connected_peers();
        let recipients = recipients_for_all(&connected, notice);
        let report = deliver_each(&recipients, &notice.value, self.delivery.as_ref());
        self.settle("send_all", &report);
        report
    }

    /// Deliver a `send_to` publish
    pub fn publish_to(&self, notice: &SendTo<T>) -> DeliveryReport {
        let recipients = recipients_for_targets(notice);
        let report = deliver_each(&recipients, &notice.value, self.delivery.as_ref());
        self.settle("send_to", &report);
        report
    }

    /// Failure log this fan-out records into
    pub fn log(&self) -> &DeliveryLog {
        &self.log
    }

    /// Register on both hooks of an event
    pub fn attach<H>(self: Arc<Self>, hooks: &H) -> FanoutBinding
    where
        H: EventHooks<T> + ?Sized,
    {
        let all = Arc::clone(&self);
        let send_all = hooks.hook_send_all(Arc::new(move |notice: &SendAll<T>| {
            all.publish_all(notice);
        }));
        let to = self;
        let send_to = hooks.hook_send_to(Arc::new(move |notice: &SendTo<T>| {
            to.publish_to(notice);
        }));
        FanoutBinding { send_all, send_to }
    }

    fn settle(&self, hook: &'static str, report: &DeliveryReport) {
        debug!(
            hook,
            delivered = report.delivered.len(),
            failed = report.failures.len(),
            "Event fan-out complete"
        );
        for failure in &report.failures {
            warn!(hook, peer = %failure.peer, error = %failure.error, "Event delivery failed");
        }
        self.log.record(&report.failures);
    }
}

/// Both hook registrations of an attached [`EventFanout`]
#[must_use = "dropping a FanoutBinding detaches the fan-out"]
#[derive(Debug)]
pub struct FanoutBinding {
    send_all: ListenerHandle,
    send_to: ListenerHandle,
}

impl FanoutBinding {
    /// Detach from the event
    pub fn detach(self) {
        self.send_all.dispose();
        self.send_to.dispose();
    }
}
