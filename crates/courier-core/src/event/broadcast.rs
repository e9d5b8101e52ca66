use crate::identifiers::PeerId;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Callback registered on one of an event's observation hooks
pub type Listener<N> = Arc<dyn Fn(&N) + Send + Sync>;

/// Notification raised by [`RpcEvent::send_all`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAll<T> {
    /// Published payload
    pub value: T,
    /// Peers that must not receive the payload
    pub exceptions: Vec<PeerId>,
}

impl<T> SendAll<T> {
    /// Whether `peer` is excluded from this publish
    pub fn excludes(&self, peer: &PeerId) -> bool {
        self.exceptions.contains(peer)
    }
}

/// Notification raised by [`RpcEvent::send_to`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTo<T> {
    /// Published payload
    pub value: T,
    /// The only peers that should receive the payload
    pub targets: Vec<PeerId>,
}

struct Registry<N> {
    next_id: u64,
    entries: Vec<(u64, Listener<N>)>,
}

impl<N> Registry<N> {
    fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    fn add(&mut self, listener: Listener<N>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    fn snapshot(&self) -> Vec<Listener<N>> {
        self.entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

struct EventInner<T> {
    send_all: Mutex<Registry<SendAll<T>>>,
    send_to: Mutex<Registry<SendTo<T>>>,
}

/// Registration of a listener on an event hook.
///
/// The listener stays registered until the handle is disposed or dropped.
#[must_use = "dropping a ListenerHandle removes the listener"]
pub struct ListenerHandle {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Remove the listener now
    pub fn dispose(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.detach.is_some())
            .finish()
    }
}

/// Listener registration seam between an event and the transport that delivers it
pub trait EventHooks<T> {
    /// Register a listener for [`SendAll`] notifications
    fn hook_send_all(&self, listener: Listener<SendAll<T>>) -> ListenerHandle;

    /// Register a listener for [`SendTo`] notifications
    fn hook_send_to(&self, listener: Listener<SendTo<T>>) -> ListenerHandle;
}

/// Event broadcast member of a server.
///
/// Publishing raises exactly one notification on the matching hook,
/// synchronously, before `send_all`/`send_to` return. The transport is the
/// listener that performs per-peer delivery; a panicking listener is
/// contained and never reaches the publisher.
pub struct RpcEvent<T> {
    inner: Arc<EventInner<T>>,
}

impl<T: 'static> RpcEvent<T> {
    /// Create an event with no listeners
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventInner {
                send_all: Mutex::new(Registry::new()),
                send_to: Mutex::new(Registry::new()),
            }),
        }
    }

    /// Deliver `value` to every connected peer except those in `exceptions`
    pub fn send_all(&self, value: T, exceptions: &[PeerId]) {
        let notice = SendAll {
            value,
            exceptions: exceptions.to_vec(),
        };
        let listeners = self.inner.send_all.lock().snapshot();
        trace!(
            listeners = listeners.len(),
            exceptions = notice.exceptions.len(),
            "Publishing event to all peers"
        );
        notify(&listeners, &notice, "send_all");
    }

    /// Deliver `value` only to `targets`
    pub fn send_to(&self, value: T, targets: &[PeerId]) {
        let notice = SendTo {
            value,
            targets: targets.to_vec(),
        };
        let listeners = self.inner.send_to.lock().snapshot();
        trace!(
            listeners = listeners.len(),
            targets = notice.targets.len(),
            "Publishing event to selected peers"
        );
        notify(&listeners, &notice, "send_to");
    }

    /// Observe every `send_all` publish
    pub fn on_send_all(
        &self,
        listener: impl Fn(&SendAll<T>) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.hook_send_all(Arc::new(listener))
    }

    /// Observe every `send_to` publish
    pub fn on_send_to(
        &self,
        listener: impl Fn(&SendTo<T>) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.hook_send_to(Arc::new(listener))
    }

    /// Total listeners across both hooks
    pub fn listener_count(&self) -> usize {
        self.inner.send_all.lock().entries.len() + self.inner.send_to.lock().entries.len()
    }

    /// Capability test: whether `value` is an event broadcast of payload `T`
    pub fn is(value: &dyn Any) -> bool {
        value.is::<RpcEvent<T>>()
    }
}

impl<T: 'static> EventHooks<T> for RpcEvent<T> {
    fn hook_send_all(&self, listener: Listener<SendAll<T>>) -> ListenerHandle {
        let id = self.inner.send_all.lock().add(listener);
        let weak: Weak<EventInner<T>> = Arc::downgrade(&self.inner);
        ListenerHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.send_all.lock().remove(id);
            }
        })
    }

    fn hook_send_to(&self, listener: Listener<SendTo<T>>) -> ListenerHandle {
        let id = self.inner.send_to.lock().add(listener);
        let weak: Weak<EventInner<T>> = Arc::downgrade(&self.inner);
        ListenerHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.send_to.lock().remove(id);
            }
        })
    }
}

impl<T: 'static> Default for RpcEvent<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RpcEvent<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for RpcEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcEvent")
            .field("payload", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

fn notify<N>(listeners: &[Listener<N>], notice: &N, hook: &'static str) {
    for listener in listeners {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(notice)));
        if outcome.is_err() {
            warn!(hook, "Event listener panicked; remaining listeners still notified");
        }
    }
}
