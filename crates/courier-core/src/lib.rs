//! Courier Core - RPC Dispatch Contract
//!
//! This crate defines how in-process service objects are exposed to callers
//! in another process or context. It owns the contract between a transport
//! and the servers it dispatches into, and nothing about the wire.
//!
//! # Architecture
//!
//! ## Call path
//! - A transport resolves a [`ProxyPath`] to a server through a
//!   [`ServerProvider`].
//! - It builds a fresh [`RpcContext`] (sender, optional cancellation, typed
//!   metadata keyed by [`RpcContextKey`]).
//! - It invokes [`RpcServer::call`] with a reserved-prefix endpoint name;
//!   only endpoints listed in the server's [`ServerShape`] are reachable.
//!
//! ## Server contract
//! - `#[rpc_service]` turns a service trait into a `<Trait>Server` trait
//!   (context first, cancellation parameter dropped, results awaitable) and
//!   a `<Trait>Dispatcher` implementing [`RpcServer`].
//! - Name collisions after prefixing are rejected when the service is
//!   defined, never at call time.
//!
//! ## Events
//! - Event members are [`RpcEvent<T>`]s. Publishing raises one notification
//!   on the `send_all`/`send_to` hook; the transport listens there and
//!   delivers per peer through [`EventFanout`], isolating failures.
//!
//! # Concurrency
//!
//! Context metadata is frozen before dispatch and never written again.
//! Event hooks are notified synchronously on the publishing task; any I/O the
//! transport triggers from a hook must not block.

#![forbid(unsafe_code)]

// Lets `#[rpc_service]` output resolve `::courier_core` inside this crate's own tests.
extern crate self as courier_core;

/// Cooperative cancellation signal
pub mod cancellation;

/// Configuration loading and validation
pub mod config;

/// Per-call context
pub mod context;

/// Dispatch seam and helpers for generated dispatchers
pub mod dispatch;

/// Unified error handling
pub mod errors;

/// Event broadcast primitive and fan-out delivery
pub mod event;

/// Peer, connection and proxy-path identifiers
pub mod identifiers;

/// Typed context keys
pub mod keys;

/// Server providers
pub mod provider;

/// Server shapes and the reserved-prefix rule
pub mod shape;

// === Public API Re-exports ===

pub use cancellation::CancellationToken;
pub use config::{
    CourierConfig, FanoutConfig, TransportConfig, MAX_FAILURE_LOG_CAPACITY, MAX_PEER_QUEUE_CAPACITY,
};
pub use context::{RpcContext, RpcContextBuilder};
pub use dispatch::{Member, RpcServer};
pub use errors::{Result, RpcError};
pub use event::{
    DeliveryError, DeliveryFailure, DeliveryLog, DeliveryReport, EncodedPayload, ErasedRpcEvent,
    EventFanout, EventHooks, FanoutBinding, ListenerHandle, PeerDelivery, PeerDirectory, RpcEvent,
    SendAll, SendTo,
};
pub use identifiers::{ConnectionId, PeerId, ProxyPath};
pub use keys::{KeyId, RpcContextKey, REQUESTING_CONNECTION};
pub use provider::{LazyServer, ProviderChain, ServerProvider};
pub use shape::{
    endpoint_name, is_endpoint_name, EventShape, MethodShape, ParamShape, ServerShape,
    ShapeMember, RESERVED_PREFIX,
};

pub use courier_macros::rpc_service;

#[doc(hidden)]
pub use async_trait::async_trait;
#[doc(hidden)]
pub use serde_json;
