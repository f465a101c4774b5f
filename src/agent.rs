//! Caller-owned connection policy handle.
//!
//! An [`Agent`] bundles the TLS connector with a cache of HTTP/2 send
//! handles keyed by origin, so concurrent and sequential fetches sharing
//! an agent multiplex onto one connection per HTTPS origin. HTTP/1.1
//! connections are not kept alive; each dispatch uses a fresh one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use h2::client::SendRequest;
use tokio::sync::RwLock;
use url::Url;

use crate::transport::connector::Connector;

/// Shareable connection policy: clone freely, clones refer to the same
/// pool.
#[derive(Clone, Default)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

#[derive(Default)]
struct AgentInner {
    connector: Connector,
    h2_pool: RwLock<HashMap<PoolKey, SendRequest<Bytes>>>,
}

/// Origin key for pooled HTTP/2 connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    https: bool,
    host: String,
    port: u16,
}

impl PoolKey {
    pub(crate) fn from_url(url: &Url) -> Self {
        let https = url.scheme() == "https";
        Self {
            https,
            host: url.host_str().unwrap_or_default().to_owned(),
            port: url.port().unwrap_or(if https { 443 } else { 80 }),
        }
    }
}

impl Agent {
    /// Create an agent with its own connection pool.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connector(&self) -> Connector {
        self.inner.connector
    }

    /// A pooled HTTP/2 handle for the origin, if one is cached.
    pub(crate) async fn h2_handle(&self, key: &PoolKey) -> Option<SendRequest<Bytes>> {
        self.inner.h2_pool.read().await.get(key).cloned()
    }

    /// Cache an HTTP/2 handle for the origin.
    pub(crate) async fn store_h2(&self, key: PoolKey, handle: SendRequest<Bytes>) {
        self.inner.h2_pool.write().await.insert(key, handle);
    }

    /// Drop a cached handle whose connection failed.
    pub(crate) async fn evict_h2(&self, key: &PoolKey) {
        self.inner.h2_pool.write().await.remove(key);
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").finish_non_exhaustive()
    }
}
