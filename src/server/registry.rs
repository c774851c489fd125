//! Listener registry.
//!
//! Tracks which addresses have a running supervisor. The registry is an
//! ordinary value owned by the caller and shared by `Arc`; supervisors
//! started with the same registry cannot listen on the same address.
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(ListenerRegistry::new());
//!
//! let first = Supervisor::builder()
//!     .address("127.0.0.1:9000")
//!     .registry(Arc::clone(&registry))
//!     .start()
//!     .await?;
//!
//! // Fails with Error::ListenerExists before any socket is bound.
//! let second = Supervisor::builder()
//!     .address("127.0.0.1:9000")
//!     .registry(Arc::clone(&registry))
//!     .start()
//!     .await;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// ListenerRegistry
// ============================================================================

/// Registry of active listen addresses.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: RwLock<FxHashMap<SocketAddr, watch::Sender<bool>>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr` and returns the stop signal of its accept loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerExists`] if `addr` is already registered.
    pub(crate) fn register(&self, addr: SocketAddr) -> Result<watch::Receiver<bool>> {
        let mut listeners = self.listeners.write();

        if listeners.contains_key(&addr) {
            return Err(Error::ListenerExists { addr });
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        listeners.insert(addr, stop_tx);

        debug!(%addr, "Listener registered");
        Ok(stop_rx)
    }

    /// Removes `addr` and stops its accept loop.
    ///
    /// Returns `true` if the address was registered.
    pub fn unregister(&self, addr: SocketAddr) -> bool {
        let removed = self.listeners.write().remove(&addr);

        match removed {
            Some(stop) => {
                stop.send_replace(true);
                debug!(%addr, "Listener unregistered");
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `addr` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.listeners.read().contains_key(addr)
    }

    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns `true` if no listener is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Returns the registered addresses.
    #[must_use]
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.listeners.read().keys().copied().collect()
    }

    /// Stops every accept loop and clears the registry.
    ///
    /// Connections already running are not affected.
    pub fn shutdown_all(&self) {
        let listeners: Vec<_> = {
            let mut map = self.listeners.write();
            map.drain().collect()
        };

        for (addr, stop) in listeners {
            stop.send_replace(true);
            debug!(%addr, "Listener stopped");
        }
    }
}

// ============================================================================
// Address Parsing
// ============================================================================

/// Resolves a listen address.
///
/// Accepts `host:port`, `ip:port` and the `:port` shorthand, which listens
/// on all IPv4 interfaces.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] if the address cannot be resolved.
pub async fn resolve_listen_addr(address: &str) -> Result<SocketAddr> {
    let address = address.trim();

    if let Some(port) = address.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|_| Error::invalid_address(address))?;
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }

    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }

    tokio::net::lookup_host(address)
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::invalid_address(address))
}

// ============================================================================
// Tests
// ============================================================================
