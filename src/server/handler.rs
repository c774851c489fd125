//! Application handlers.
//!
//! A [`StreamHandler`] receives the [`Session`] of every connection a
//! supervisor accepts and runs in its own task.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;

use async_trait::async_trait;

use crate::error::Result;
use crate::relay::Session;

// ============================================================================
// StreamHandler
// ============================================================================

/// Consumes and produces the byte stream of one connection.
///
/// Returning, or dropping the session, ends the outbound side once queued
/// chunks are written. An error is logged by the supervisor.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    /// Handles one connection.
    async fn handle(&self, session: Session) -> Result<()>;
}

// ============================================================================
// Echo
// ============================================================================

/// Sends every inbound chunk straight back to the peer.
///
/// Chunks are forwarded without copying: the buffer the inbound relay
/// filled is the one the outbound relay writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

#[async_trait]
impl StreamHandler for Echo {
    async fn handle(&self, mut session: Session) -> Result<()> {
        while let Some(chunk) = session.recv().await {
            session.send_chunk(chunk).await?;
        }
        Ok(())
    }
}

// ============================================================================
// handler_fn
// ============================================================================

/// Handler built from a closure. See [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps an async closure as a [`StreamHandler`].
///
/// ```ignore
/// let greeter = handler_fn(|session: Session| async move {
///     session.send(b"hello").await
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> StreamHandler for HandlerFn<F>
where
    F: Fn(Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, session: Session) -> Result<()> {
        (self.f)(session).await
    }
}

// ============================================================================
// Tests
// ============================================================================
