//! Typed keys for per-call context metadata.
//!
//! A key is a lookup token only: it owns no value and carries its value type
//! at the type level (`RpcContextKey<T>`), never at runtime. Two identity
//! kinds exist:
//!
//! - **Named** keys compare by string. Independently compiled modules that
//!   agree on a name share the key on purpose.
//! - **Unique** keys compare by a process-wide serial number. Two unique keys
//!   are never equal, even when created with the same display label.

use crate::identifiers::ConnectionId;
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIQUE_KEY: AtomicU64 = AtomicU64::new(1);

/// Runtime identity of a context key
#[derive(Clone)]
pub enum KeyId {
    /// String identity; equal names are the same key
    Named(Cow<'static, str>),
    /// Serial identity; `label` is only used for display
    Unique {
        /// Process-unique serial number
        serial: u64,
        /// Display label
        label: Cow<'static, str>,
    },
}

impl KeyId {
    /// Display label of the key
    pub fn label(&self) -> &str {
        match self {
            KeyId::Named(name) => name,
            KeyId::Unique { label, .. } => label,
        }
    }
}

impl PartialEq for KeyId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeyId::Named(a), KeyId::Named(b)) => a == b,
            (KeyId::Unique { serial: a, .. }, KeyId::Unique { serial: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for KeyId {}

impl Hash for KeyId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            KeyId::Named(name) => name.hash(state),
            KeyId::Unique { serial, .. } => serial.hash(state),
        }
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Named(name) => write!(f, "Named({name:?})"),
            KeyId::Unique { serial, label } => write!(f, "Unique({label:?}#{serial})"),
        }
    }
}

/// Key indexing a value of type `T` in an [`crate::RpcContext`]
pub struct RpcContextKey<T> {
    id: KeyId,
    _value: PhantomData<fn() -> T>,
}

impl<T> RpcContextKey<T> {
    /// Key identified by name; usable in `static` items
    pub const fn named(name: &'static str) -> Self {
        Self {
            id: KeyId::Named(Cow::Borrowed(name)),
            _value: PhantomData,
        }
    }

    /// Key identified by an owned name
    pub fn named_owned(name: impl Into<String>) -> Self {
        Self {
            id: KeyId::Named(Cow::Owned(name.into())),
            _value: PhantomData,
        }
    }

    /// Key that is distinct from every other key ever created
    pub fn unique(label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id: KeyId::Unique {
                serial: NEXT_UNIQUE_KEY.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
            },
            _value: PhantomData,
        }
    }

    /// Runtime identity of this key
    pub fn id(&self) -> &KeyId {
        &self.id
    }

    /// Display label of this key
    pub fn label(&self) -> &str {
        self.id.label()
    }
}

impl<T> Clone for RpcContextKey<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> PartialEq for RpcContextKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for RpcContextKey<T> {}

impl<T> Hash for RpcContextKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for RpcContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RpcContextKey").field(&self.id).finish()
    }
}

impl<T> fmt::Display for RpcContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Connection that issued the current call
pub static REQUESTING_CONNECTION: RpcContextKey<ConnectionId> =
    RpcContextKey::named("courier.requesting-connection");
