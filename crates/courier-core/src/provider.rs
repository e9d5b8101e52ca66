//! Server providers: map a proxy path to the server that handles it.
//!
//! Registration and dependency resolution live outside this crate; a
//! provider is just the boundary the transport consults. A provider returns
//! `None` to decline a path so the transport can try the next one.

use crate::dispatch::RpcServer;
use crate::errors::{Result, RpcError};
use crate::identifiers::ProxyPath;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, trace};

/// Resolves proxy paths to servers
///
/// Within one session the decision for a given path must not change between
/// calls; providers may still construct the server lazily and cache it.
pub trait ServerProvider: Send + Sync {
    /// Server for `path`, or `None` to decline
    fn provide(&self, path: &ProxyPath) -> Option<Arc<dyn RpcServer>>;
}

impl<F> ServerProvider for F
where
    F: Fn(&ProxyPath) -> Option<Arc<dyn RpcServer>> + Send + Sync,
{
    fn provide(&self, path: &ProxyPath) -> Option<Arc<dyn RpcServer>> {
        self(path)
    }
}

/// Providers consulted in registration order
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn ServerProvider>>,
}

impl ProviderChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider
    pub fn push(&mut self, provider: impl ServerProvider + 'static) {
        self.providers.push(Arc::new(provider));
    }

    /// Append a provider, builder style
    pub fn with(mut self, provider: impl ServerProvider + 'static) -> Self {
        self.push(provider);
        self
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// First server any provider returns for `path`
    pub fn resolve(&self, path: &ProxyPath) -> Result<Arc<dyn RpcServer>> {
        for (index, provider) in self.providers.iter().enumerate() {
            if let Some(server) = provider.provide(path) {
                trace!(%path, provider = index, service = server.shape().service(), "Resolved proxy path");
                return Ok(server);
            }
        }
        debug!(%path, providers = self.providers.len(), "No provider handles proxy path");
        Err(RpcError::unhandled(path.as_str()))
    }
}

impl ServerProvider for ProviderChain {
    fn provide(&self, path: &ProxyPath) -> Option<Arc<dyn RpcServer>> {
        self.resolve(path).ok()
    }
}

/// Provider for a single path whose server is built on first use
pub struct LazyServer<F> {
    path: ProxyPath,
    factory: F,
    server: OnceCell<Arc<dyn RpcServer>>,
}

impl<F> LazyServer<F>
where
    F: Fn() -> Arc<dyn RpcServer> + Send + Sync,
{
    /// Serve `path` with the server produced by `factory`
    pub fn new(path: impl Into<ProxyPath>, factory: F) -> Self {
        Self {
            path: path.into(),
            factory,
            server: OnceCell::new(),
        }
    }

    /// Whether the server has been constructed yet
    pub fn is_initialized(&self) -> bool {
        self.server.get().is_some()
    }
}

impl<F> ServerProvider for LazyServer<F>
where
    F: Fn() -> Arc<dyn RpcServer> + Send + Sync,
{
    fn provide(&self, path: &ProxyPath) -> Option<Arc<dyn RpcServer>> {
        if *path != self.path {
            return None;
        }
        let server = self.server.get_or_init(|| {
            debug!(%path, "Constructing server on first request");
            (self.factory)()
        });
        Some(Arc::clone(server))
    }
}
