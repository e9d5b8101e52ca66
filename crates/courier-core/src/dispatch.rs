//! Dispatch seam between a transport and a server.
//!
//! A transport holds servers as `Arc<dyn RpcServer>` and invokes them by
//! endpoint name with dynamically typed arguments. Only names listed in the
//! server's [`ServerShape`] are reachable; everything else is
//! [`RpcError::UnknownMethod`].
//!
//! Dispatchers are normally generated by `#[rpc_service]`; the helpers in
//! this module are what the generated code calls.

use crate::context::RpcContext;
use crate::errors::{Result, RpcError};
use crate::event::ErasedRpcEvent;
use crate::shape::{MethodShape, ServerShape};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::vec::IntoIter;

/// A server the transport can dispatch calls into
#[async_trait]
pub trait RpcServer: Send + Sync {
    /// Remotely visible surface
    fn shape(&self) -> &ServerShape;

    /// Invoke the endpoint `method` with positional `args`
    async fn call(&self, ctx: &RpcContext, method: &str, args: Vec<Value>) -> Result<Value>;

    /// Event member by name
    fn event(&self, name: &str) -> Option<&dyn ErasedRpcEvent>;

    /// Tagged member lookup
    fn member(&self, name: &str) -> Option<Member<'_>> {
        if let Some(method) = self.shape().method(name) {
            return Some(Member::Method(method));
        }
        self.event(name).map(Member::Event)
    }
}

/// Member of a running server, decided by its declaration rather than by probing
pub enum Member<'a> {
    /// Remotely callable endpoint
    Method(&'a MethodShape),
    /// Event broadcast member
    Event(&'a dyn ErasedRpcEvent),
}

impl Member<'_> {
    /// Whether this is an event broadcast member
    pub fn is_event(&self) -> bool {
        matches!(self, Member::Event(_))
    }
}

impl std::fmt::Debug for Member<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Member::Method(method) => f.debug_tuple("Method").field(&method.name).finish(),
            Member::Event(event) => f.debug_tuple("Event").field(&event.payload_type()).finish(),
        }
    }
}

/// Positional argument reader for one call
#[derive(Debug)]
pub struct Arguments {
    method: &'static str,
    expected: usize,
    position: usize,
    values: IntoIter<Value>,
}

impl Arguments {
    /// Reader over `values` for the endpoint `method` taking `expected` arguments
    pub fn new(method: &'static str, expected: usize, values: Vec<Value>) -> Result<Self> {
        if values.len() != expected {
            return Err(RpcError::invalid_arguments(
                method,
                format!("expected {expected} argument(s), got {}", values.len()),
            ));
        }
        Ok(Self {
            method,
            expected,
            position: 0,
            values: values.into_iter(),
        })
    }

    /// Decode the next argument
    pub fn take<T: DeserializeOwned>(&mut self) -> Result<T> {
        let position = self.position;
        let value = self.values.next().ok_or_else(|| {
            RpcError::invalid_arguments(
                self.method,
                format!("missing argument {position} of {}", self.expected),
            )
        })?;
        self.position += 1;
        serde_json::from_value(value).map_err(|err| {
            RpcError::invalid_arguments(self.method, format!("argument {position}: {err}"))
        })
    }
}

/// Encode a server reply
pub fn encode_reply<T: Serialize>(method: &str, reply: &T) -> Result<Value> {
    serde_json::to_value(reply)
        .map_err(|err| RpcError::serialization(format!("reply of `{method}`: {err}")))
}
