//! Connection supervisor.
//!
//! Accepts raw connections on one listening endpoint, upgrades them and
//! launches a relay pair plus the application handler for each.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Supervisor                    │
//! │  accept loop ──► handshake (with timeout)   │
//! │                   │                         │
//! │                   ▼                         │
//! │  ConnectionId=1 → Connection + handler task │
//! │  ConnectionId=2 → Connection + handler task │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The accept loop never waits on a single connection: every accepted
//! socket is handled in its own task.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferPool, PoolStats};
use crate::config::RelayOptions;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::relay::{CloseCause, CloseHandle, Connection};
use crate::server::builder::SupervisorBuilder;
use crate::server::handler::StreamHandler;
use crate::server::registry::ListenerRegistry;
use crate::transport::Handshake;

// ============================================================================
// Constants
// ============================================================================

/// Pause after a failed accept, so a persistent failure does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

// ============================================================================
// Supervisor
// ============================================================================

/// Accepts connections on one address and runs a relay pair for each.
///
/// # Example
///
/// ```ignore
/// let supervisor = Supervisor::builder()
///     .address("127.0.0.1:0")
///     .handler(Echo)
///     .start()
///     .await?;
///
/// println!("listening on {}", supervisor.ws_url());
/// supervisor.shutdown().await;
/// ```
pub struct Supervisor {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    local_addr: SocketAddr,
    registry: Arc<ListenerRegistry>,
    options: RelayOptions,
    pool: BufferPool,
    handler: Arc<dyn StreamHandler>,
    handshake: Arc<dyn Handshake>,
    connections: RwLock<FxHashMap<ConnectionId, CloseHandle>>,
    shutdown: AtomicBool,
}

// ============================================================================
// Supervisor - Constructor
// ============================================================================

impl Supervisor {
    /// Returns a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    /// Starts an echo supervisor with default options on `address`.
    ///
    /// # Errors
    ///
    /// See [`SupervisorBuilder::start`].
    pub async fn listen(address: &str) -> Result<Self> {
        Self::builder().address(address).start().await
    }

    /// Spawns the accept loop over an already bound listener.
    pub(crate) fn launch(
        listener: TcpListener,
        local_addr: SocketAddr,
        stop: watch::Receiver<bool>,
        registry: Arc<ListenerRegistry>,
        options: RelayOptions,
        handler: Arc<dyn StreamHandler>,
        handshake: Arc<dyn Handshake>,
    ) -> Self {
        let pool = BufferPool::for_bytes(
            options.buffer_min_size,
            options.pool_max_idle,
            options.pool_max_retained,
        );

        let inner = Arc::new(Inner {
            local_addr,
            registry,
            options,
            pool,
            handler,
            handshake,
            connections: RwLock::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&inner).accept_loop(listener, stop));

        info!(addr = %local_addr, "Supervisor started");

        Self { inner }
    }
}

// ============================================================================
// Supervisor - Public API
// ============================================================================

impl Supervisor {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Returns the WebSocket URL clients connect to.
    ///
    /// An unspecified bind address is reported as loopback.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let mut addr = self.inner.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
        }
        format!("ws://{addr}")
    }

    /// Returns the number of active connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// Returns the options connections are created with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &RelayOptions {
        &self.inner.options
    }

    /// Returns buffer pool activity.
    #[inline]
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Returns the registry this supervisor is listed in.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.inner.registry
    }

    /// Stops accepting, closes every active connection and waits until each
    /// has handed out its teardown.
    pub async fn shutdown(&self) {
        info!(addr = %self.inner.local_addr, "Supervisor shutting down");

        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.registry.unregister(self.inner.local_addr);

        let handles: Vec<_> = self.inner.connections.read().values().cloned().collect();

        for handle in &handles {
            handle.close_with(CloseCause::Cancelled);
        }
        for handle in &handles {
            handle.closed().await;
        }

        info!(
            addr = %self.inner.local_addr,
            closed = handles.len(),
            "Supervisor shutdown complete"
        );
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("local_addr", &self.inner.local_addr)
            .field("connections", &self.connection_count())
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

impl Inner {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut stop: watch::Receiver<bool>) {
        debug!(addr = %self.local_addr, "Accept loop started");

        loop {
            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let inner = Arc::clone(&self);
                        tokio::spawn(inner.handle_connection(stream, peer));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        debug!(addr = %self.local_addr, "Accept loop terminated");
    }

    /// Upgrades one socket and runs its connection to completion.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "TCP connection accepted");

        let handshake_timeout = self.options.handshake_timeout();
        let upgraded = match timeout(handshake_timeout, self.handshake.handshake(stream)).await {
            Ok(upgraded) => upgraded,
            Err(_) => Err(Error::handshake_timeout(handshake_timeout.as_millis() as u64)),
        };

        let (reader, writer) = match upgraded {
            Ok(halves) => halves,
            Err(e) => {
                warn!(%peer, error = %e, "Handshake failed");
                return;
            }
        };

        let id = ConnectionId::next();
        let (connection, session) = Connection::spawn(
            id,
            peer,
            reader,
            writer,
            &self.options,
            self.pool.clone(),
        );

        self.connections.write().insert(id, connection.close_handle());

        // shutdown may have run while the handshake was in flight
        if self.shutdown.load(Ordering::SeqCst) {
            connection.close_handle().close_with(CloseCause::Cancelled);
        }

        info!(conn = %id, %peer, "Connection established");

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            match handler.handle(session).await {
                Ok(()) => debug!(conn = %id, "Handler finished"),
                Err(Error::ConnectionClosed) => debug!(conn = %id, "Handler saw connection close"),
                Err(e) => warn!(conn = %id, error = %e, "Handler failed"),
            }
        });

        let summary = connection.join().await;
        self.connections.write().remove(&id);

        info!(conn = %id, %peer, cause = %summary.cause, "Connection finished");
    }
}

// ============================================================================
// Tests
// ============================================================================
