//! Server shapes: the remotely visible surface of a service.
//!
//! A service interface is turned into a server shape by two rules:
//!
//! 1. Every callable member becomes a method endpoint named with
//!    [`RESERVED_PREFIX`] (unless the name already carries it), receives the
//!    call's [`crate::RpcContext`] first, loses a trailing cancellation
//!    parameter, and returns an awaitable of its unwrapped result.
//! 2. Every event-stream member becomes an [`crate::RpcEvent`] of the same
//!    payload type, keeping its name.
//!
//! The dispatcher only ever looks endpoints up in the shape, so the shape is
//! the allow-list of what a remote caller may invoke. Shapes are validated
//! when they are built; a name collision is a contract violation and no
//! server can be constructed from it.

use crate::errors::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Prefix reserved for remotely dispatchable method endpoints
pub const RESERVED_PREFIX: &str = "$";

/// Apply the reserved-prefix rule to a member name.
///
/// Idempotent: a name that already starts with the prefix is returned as-is.
pub fn endpoint_name(raw: &str) -> String {
    if is_endpoint_name(raw) {
        raw.to_string()
    } else {
        format!("{RESERVED_PREFIX}{raw}")
    }
}

/// Whether `name` carries the reserved prefix
pub fn is_endpoint_name(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// One positional parameter of a method endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamShape {
    /// Parameter name as declared
    pub name: String,
    /// Rendered parameter type
    pub ty: String,
}

impl ParamShape {
    /// Describe a parameter
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// A remotely callable method endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodShape {
    /// Endpoint name, always prefixed
    pub name: String,
    /// Parameters after the injected context
    pub params: Vec<ParamShape>,
    /// Rendered result type with any awaitable wrapper removed
    pub returns: String,
    /// A trailing cancellation parameter was dropped from the interface signature
    pub cancellable: bool,
}

impl MethodShape {
    /// Describe a method endpoint; `name` is passed through [`endpoint_name`]
    pub fn new(name: &str, returns: impl Into<String>) -> Self {
        Self {
            name: endpoint_name(name),
            params: Vec::new(),
            returns: returns.into(),
            cancellable: false,
        }
    }

    /// Append a parameter
    pub fn param(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.params.push(ParamShape::new(name, ty));
        self
    }

    /// Record that the interface took a trailing cancellation parameter
    pub fn cancellable(mut self) -> Self {
        self.cancellable = true;
        self
    }

    /// Number of positional arguments a caller must supply
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// An event-stream member backed by [`crate::RpcEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventShape {
    /// Member name, never prefixed
    pub name: String,
    /// Rendered payload type
    pub payload: String,
}

impl EventShape {
    /// Describe an event member
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

/// Tagged member of a server shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeMember {
    /// Remotely callable method
    Method(MethodShape),
    /// Event broadcast member
    Event(EventShape),
}

impl ShapeMember {
    /// Name under which the member is looked up
    pub fn name(&self) -> &str {
        match self {
            ShapeMember::Method(method) => &method.name,
            ShapeMember::Event(event) => &event.name,
        }
    }

    /// Whether this is an event broadcast member
    pub fn is_event(&self) -> bool {
        matches!(self, ShapeMember::Event(_))
    }
}

/// Remotely visible surface of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerShape {
    service: String,
    members: Vec<ShapeMember>,
}

impl ServerShape {
    /// Start describing the shape of `service`
    pub fn builder(service: impl Into<String>) -> ServerShapeBuilder {
        ServerShapeBuilder {
            service: service.into(),
            members: Vec::new(),
        }
    }

    /// Shape whose members were already validated when the service was defined.
    ///
    /// Used by code generated with `#[rpc_service]`, which rejects collisions
    /// at compile time.
    #[doc(hidden)]
    pub fn prevalidated(service: &str, members: Vec<ShapeMember>) -> Self {
        Self {
            service: service.to_string(),
            members,
        }
    }

    /// Name of the service
    pub fn service(&self) -> &str {
        &self.service
    }

    /// All members in declaration order
    pub fn members(&self) -> &[ShapeMember] {
        &self.members
    }

    /// Look up a method endpoint by its prefixed name
    pub fn method(&self, name: &str) -> Option<&MethodShape> {
        self.members.iter().find_map(|member| match member {
            ShapeMember::Method(method) if method.name == name => Some(method),
            _ => None,
        })
    }

    /// Look up an event member by name
    pub fn event(&self, name: &str) -> Option<&EventShape> {
        self.members.iter().find_map(|member| match member {
            ShapeMember::Event(event) if event.name == name => Some(event),
            _ => None,
        })
    }

    /// Method endpoints in declaration order
    pub fn methods(&self) -> impl Iterator<Item = &MethodShape> {
        self.members.iter().filter_map(|member| match member {
            ShapeMember::Method(method) => Some(method),
            ShapeMember::Event(_) => None,
        })
    }

    /// Event members in declaration order
    pub fn events(&self) -> impl Iterator<Item = &EventShape> {
        self.members.iter().filter_map(|member| match member {
            ShapeMember::Event(event) => Some(event),
            ShapeMember::Method(_) => None,
        })
    }
}

/// Builder that validates a shape before any server is constructed from it
pub struct ServerShapeBuilder {
    service: String,
    members: Vec<ShapeMember>,
}

impl ServerShapeBuilder {
    /// Add a method endpoint
    pub fn method(mut self, method: MethodShape) -> Self {
        self.members.push(ShapeMember::Method(method));
        self
    }

    /// Add an event member
    pub fn event(mut self, event: EventShape) -> Self {
        self.members.push(ShapeMember::Event(event));
        self
    }

    /// Validate and produce the shape
    pub fn build(self) -> Result<ServerShape> {
        let mut seen = BTreeSet::new();
        for member in &self.members {
            match member {
                ShapeMember::Method(method) if !is_endpoint_name(&method.name) => {
                    return Err(RpcError::contract_violation(
                        &self.service,
                        format!("method `{}` lacks the reserved prefix", method.name),
                    ));
                }
                ShapeMember::Event(event) if is_endpoint_name(&event.name) => {
                    return Err(RpcError::contract_violation(
                        &self.service,
                        format!(
                            "event `{}` uses the reserved prefix `{RESERVED_PREFIX}`",
                            event.name
                        ),
                    ));
                }
                _ => {}
            }
            if !seen.insert(member.name()) {
                return Err(RpcError::contract_violation(
                    &self.service,
                    format!("member name `{}` is declared more than once", member.name()),
                ));
            }
        }

        Ok(ServerShape {
            service: self.service,
            members: self.members,
        })
    }
}
