//! Builder for [`Supervisor`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wsrelay::{Echo, ListenerRegistry, RelayOptions, Supervisor};
//!
//! let registry = Arc::new(ListenerRegistry::new());
//!
//! let supervisor = Supervisor::builder()
//!     .address(":8080")
//!     .options(RelayOptions::new().with_max_payload_size(1 << 20))
//!     .registry(registry)
//!     .handler(Echo)
//!     .start()
//!     .await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::RelayOptions;
use crate::error::{Error, Result};
use crate::server::handler::{Echo, StreamHandler};
use crate::server::registry::{ListenerRegistry, resolve_listen_addr};
use crate::server::supervisor::Supervisor;
use crate::transport::{Handshake, WebSocketHandshake};

// ============================================================================
// SupervisorBuilder
// ============================================================================

/// Builder for configuring a [`Supervisor`].
///
/// Use [`Supervisor::builder()`] to create one.
#[derive(Default)]
pub struct SupervisorBuilder {
    /// Listen address.
    address: Option<String>,
    /// Per-connection options.
    options: RelayOptions,
    /// Shared listener registry.
    registry: Option<Arc<ListenerRegistry>>,
    /// Application handler.
    handler: Option<Arc<dyn StreamHandler>>,
    /// Protocol upgrade.
    handshake: Option<Arc<dyn Handshake>>,
}

impl fmt::Debug for SupervisorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorBuilder")
            .field("address", &self.address)
            .field("options", &self.options)
            .field("registry", &self.registry)
            .field("custom_handler", &self.handler.is_some())
            .field("custom_handshake", &self.handshake.is_some())
            .finish()
    }
}

// ============================================================================
// SupervisorBuilder Implementation
// ============================================================================

impl SupervisorBuilder {
    /// Creates a builder with default options and no address.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listen address.
    ///
    /// # Arguments
    ///
    /// * `address` - `host:port`, `ip:port` or `:port`
    #[inline]
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the per-connection options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: RelayOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers the supervisor in a shared registry.
    ///
    /// Without one, the supervisor gets a private registry.
    #[inline]
    #[must_use]
    pub fn registry(mut self, registry: Arc<ListenerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the application handler. Defaults to [`Echo`].
    #[inline]
    #[must_use]
    pub fn handler(mut self, handler: impl StreamHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Replaces the protocol upgrade. Defaults to [`WebSocketHandshake`]
    /// configured from the options.
    #[inline]
    #[must_use]
    pub fn handshake(mut self, handshake: impl Handshake + 'static) -> Self {
        self.handshake = Some(Arc::new(handshake));
        self
    }

    /// Validates the configuration, binds the listener and starts the
    /// accept loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the address is missing or options are invalid
    /// - [`Error::InvalidAddress`] if the address cannot be resolved
    /// - [`Error::ListenerExists`] if the registry already holds the address
    /// - [`Error::Io`] if binding fails
    pub async fn start(self) -> Result<Supervisor> {
        self.options.validate()?;

        let address = self.address.as_deref().ok_or_else(|| {
            Error::config(
                "Listen address is required. Use .address() to set it.\n\
                 Example: Supervisor::builder().address(\"127.0.0.1:8080\")",
            )
        })?;
        let addr = resolve_listen_addr(address).await?;

        let registry = self.registry.unwrap_or_default();

        // a fixed port is claimed before binding; port 0 once it is known
        let early_stop = if addr.port() != 0 {
            Some(registry.register(addr)?)
        } else {
            None
        };

        let bound = async {
            let listener = TcpListener::bind(addr).await?;
            let local_addr = listener.local_addr()?;
            Ok::<_, Error>((listener, local_addr))
        }
        .await;

        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                if early_stop.is_some() {
                    registry.unregister(addr);
                }
                return Err(e);
            }
        };

        let stop = match early_stop {
            Some(stop) => stop,
            None => registry.register(local_addr)?,
        };

        let handshake = self
            .handshake
            .unwrap_or_else(|| Arc::new(WebSocketHandshake::new(&self.options)));
        let handler = self.handler.unwrap_or_else(|| Arc::new(Echo));

        Ok(Supervisor::launch(
            listener,
            addr_key(addr, local_addr),
            stop,
            registry,
            self.options,
            handler,
            handshake,
        ))
    }
}

/// Address the supervisor is registered under.
fn addr_key(requested: SocketAddr, bound: SocketAddr) -> SocketAddr {
    if requested.port() != 0 { requested } else { bound }
}

// ============================================================================
// Tests
// ============================================================================
