//! Per-call context handed to every remotely invoked server method.
//!
//! Design intent:
//! - The transport creates one `RpcContext` per inbound call with
//!   [`RpcContext::builder`], fills in metadata, and freezes it with
//!   [`RpcContextBuilder::build`].
//! - Servers only read. No write operation is exposed after `build`, so a
//!   context may be observed from several futures without synchronisation.
//! - A context is never persisted; it is dropped once the call (and any event
//!   subscription it establishes) completes.

use crate::cancellation::CancellationToken;
use crate::errors::{Result, RpcError};
use crate::identifiers::PeerId;
use crate::keys::{KeyId, RpcContextKey};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Metadata = HashMap<KeyId, Box<dyn Any + Send + Sync>>;

struct ContextInner {
    sender: PeerId,
    request: Option<CancellationToken>,
    metadata: Metadata,
}

/// Read-only context of one remote call
#[derive(Clone)]
pub struct RpcContext {
    inner: Arc<ContextInner>,
}

impl RpcContext {
    /// Start building a context for a call issued by `sender`
    pub fn builder(sender: PeerId) -> RpcContextBuilder {
        RpcContextBuilder {
            sender,
            request: None,
            metadata: HashMap::new(),
        }
    }

    /// Context without metadata or cancellation signal
    pub fn new(sender: PeerId) -> Self {
        Self::builder(sender).build()
    }

    /// Peer that issued the call
    pub fn sender(&self) -> &PeerId {
        &self.inner.sender
    }

    /// Cancellation signal, present only for calls the transport marked cancellable
    pub fn request(&self) -> Option<&CancellationToken> {
        self.inner.request.as_ref()
    }

    /// Whether cancellation has been requested; `false` when no signal exists
    pub fn is_cancelled(&self) -> bool {
        self.request().is_some_and(CancellationToken::is_cancelled)
    }

    /// Look up a metadata value; `None` when absent, never an error
    ///
    /// A value stored under an equal key but with a different value type is
    /// reported as absent.
    pub fn get<T: 'static>(&self, key: &RpcContextKey<T>) -> Option<&T> {
        self.inner
            .metadata
            .get(key.id())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Look up a metadata value that the server cannot proceed without
    pub fn require<T: 'static>(&self, key: &RpcContextKey<T>) -> Result<&T> {
        self.get(key)
            .ok_or_else(|| RpcError::missing_context_value(key.label()))
    }

    /// Whether a value of the key's type is present
    pub fn contains<T: 'static>(&self, key: &RpcContextKey<T>) -> bool {
        self.get(key).is_some()
    }

    /// Number of populated metadata entries
    pub fn metadata_len(&self) -> usize {
        self.inner.metadata.len()
    }
}

impl fmt::Debug for RpcContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.inner.metadata.keys().map(KeyId::label).collect();
        keys.sort_unstable();
        f.debug_struct("RpcContext")
            .field("sender", &self.inner.sender)
            .field("cancellable", &self.inner.request.is_some())
            .field("keys", &keys)
            .finish()
    }
}

/// Transport-side builder for [`RpcContext`]
pub struct RpcContextBuilder {
    sender: PeerId,
    request: Option<CancellationToken>,
    metadata: Metadata,
}

impl RpcContextBuilder {
    /// Mark the call as cancellable through `token`
    pub fn cancellable(mut self, token: CancellationToken) -> Self {
        self.request = Some(token);
        self
    }

    /// Populate a metadata value, replacing any previous value for the key
    pub fn insert<T: Send + Sync + 'static>(mut self, key: &RpcContextKey<T>, value: T) -> Self {
        self.metadata.insert(key.id().clone(), Box::new(value));
        self
    }

    /// Freeze the context
    pub fn build(self) -> RpcContext {
        RpcContext {
            inner: Arc::new(ContextInner {
                sender: self.sender,
                request: self.request,
                metadata: self.metadata,
            }),
        }
    }
}
