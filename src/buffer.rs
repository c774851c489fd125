//! Reusable buffer pool.
//!
//! Relays check a buffer out of the pool for each frame they handle and
//! hand it back when the chunk is dropped, which keeps allocation off the
//! hot read/write paths. Correctness never depends on reuse: an empty pool
//! simply allocates.
//!
//! # Ownership
//!
//! A [`Pooled`] item is owned by exactly one holder at a time. It can move
//! between tasks (for instance through the stream channel) but is never
//! shared; dropping it returns the item to the pool.
//!
//! ```ignore
//! let pool = BufferPool::for_bytes(400, 256, 64 * 1024);
//!
//! let mut buf = pool.acquire();
//! buf.extend_from_slice(b"ping");
//! drop(buf); // cleared and returned for reuse
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

// ============================================================================
// Recycle
// ============================================================================

/// Items that can be reset and reused by a [`Pool`].
///
/// `Default` must be cheap: it is the placeholder left behind when an item
/// is handed back.
pub trait Recycle: Default + Send + 'static {
    /// Resets the item before it goes back to the pool.
    ///
    /// Contents need not be zeroed.
    fn recycle(&mut self);

    /// Memory held by the item, used to decide whether it is worth keeping.
    fn footprint(&self) -> usize;
}

impl Recycle for Vec<u8> {
    #[inline]
    fn recycle(&mut self) {
        self.clear();
    }

    #[inline]
    fn footprint(&self) -> usize {
        self.capacity()
    }
}

// ============================================================================
// Types
// ============================================================================

/// Pool of byte buffers.
pub type BufferPool = Pool<Vec<u8>>;

/// Byte buffer checked out of a [`BufferPool`].
///
/// This is also the chunk type carried by stream channels.
pub type PooledBuffer = Pooled<Vec<u8>>;

/// Factory used when the pool is empty.
type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Items created by the factory.
    pub allocated: u64,
    /// Acquisitions served from idle items.
    pub reused: u64,
    /// Items currently idle in the pool.
    pub idle: usize,
}

// ============================================================================
// Pool
// ============================================================================

/// Thread-safe pool of reusable items.
///
/// Cloning the pool yields another handle to the same storage.
pub struct Pool<T: Recycle> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    idle: Mutex<Vec<T>>,
    factory: Factory<T>,
    max_idle: usize,
    max_retained: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl<T: Recycle> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Recycle> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("max_idle", &self.shared.max_idle)
            .field("max_retained", &self.shared.max_retained)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: Recycle> Pool<T> {
    /// Creates a pool.
    ///
    /// # Arguments
    ///
    /// * `factory` - Builds a new item when no idle one is available
    /// * `max_idle` - Idle items kept; extra releases are dropped
    /// * `max_retained` - Items with a larger [`Recycle::footprint`] are dropped
    pub fn new(
        factory: impl Fn() -> T + Send + Sync + 'static,
        max_idle: usize,
        max_retained: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(Vec::with_capacity(max_idle.min(64))),
                factory: Box::new(factory),
                max_idle,
                max_retained,
                allocated: AtomicU64::new(0),
                reused: AtomicU64::new(0),
            }),
        }
    }

    /// Checks an item out of the pool, allocating if none is idle.
    pub fn acquire(&self) -> Pooled<T> {
        let item = self.shared.idle.lock().pop();

        let item = match item {
            Some(item) => {
                self.shared.reused.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.shared.allocated.fetch_add(1, Ordering::Relaxed);
                (self.shared.factory)()
            }
        };

        Pooled {
            item,
            pool: Arc::clone(&self.shared),
        }
    }

    /// Returns a snapshot of pool activity.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.shared.allocated.load(Ordering::Relaxed),
            reused: self.shared.reused.load(Ordering::Relaxed),
            idle: self.shared.idle.lock().len(),
        }
    }
}

impl Pool<Vec<u8>> {
    /// Creates a byte buffer pool whose fresh buffers hold at least
    /// `min_size` bytes.
    #[must_use]
    pub fn for_bytes(min_size: usize, max_idle: usize, max_retained: usize) -> Self {
        Self::new(move || Vec::with_capacity(min_size), max_idle, max_retained)
    }
}

impl<T: Recycle> Shared<T> {
    fn put_back(&self, mut item: T) {
        if item.footprint() > self.max_retained {
            return;
        }

        item.recycle();

        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }
}

// ============================================================================
// Pooled
// ============================================================================

/// An item checked out of a [`Pool`].
///
/// Dereferences to the item; returns it to the pool on drop.
pub struct Pooled<T: Recycle> {
    item: T,
    pool: Arc<Shared<T>>,
}

impl<T: Recycle> Pooled<T> {
    /// Returns the item to the pool now.
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        self.pool.put_back(mem::take(&mut self.item));
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.item, f)
    }
}

impl AsRef<[u8]> for Pooled<Vec<u8>> {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.item
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_meets_min_capacity() {
        let pool = BufferPool::for_bytes(400, 4, 4096);
        let buf = pool.acquire();
        assert!(buf.capacity() >= 400);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_release_reuses_buffer() {
        let pool = BufferPool::for_bytes(16, 4, 4096);

        let mut buf = pool.acquire();
        buf.extend_from_slice(b"hello");
        buf.release();

        let buf = pool.acquire();
        assert!(buf.is_empty(), "released buffer must be cleared");

        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn test_oversized_buffer_not_retained() {
        let pool = BufferPool::for_bytes(16, 4, 64);

        let mut buf = pool.acquire();
        buf.resize(1024, 0);
        drop(buf);

        assert_eq!(pool.stats().idle, 0);
    }

    #[test]
    fn test_idle_limit() {
        let pool = BufferPool::for_bytes(16, 2, 4096);

        let held: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(held);

        assert_eq!(pool.stats().idle, 2);
        assert_eq!(pool.stats().allocated, 5);
    }

    #[test]
    fn test_pool_outlives_handle() {
        let pool = BufferPool::for_bytes(16, 4, 4096);
        let buf = pool.acquire();
        drop(pool);
        // Releasing after the last pool handle is gone must not panic.
        drop(buf);
    }

    #[test]
    fn test_generic_item() {
        #[derive(Default)]
        struct Scratch(String);

        impl Recycle for Scratch {
            fn recycle(&mut self) {
                self.0.clear();
            }

            fn footprint(&self) -> usize {
                self.0.capacity()
            }
        }

        let pool = Pool::new(Scratch::default, 1, 1024);
        let mut item = pool.acquire();
        item.0.push_str("abc");
        drop(item);

        assert_eq!(pool.acquire().0, "");
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = BufferPool::for_bytes(64, 32, 4096);

        std::thread::scope(|scope| {
            for t in 0..8u8 {
                let pool = pool.clone();
                scope.spawn(move || {
                    for i in 0..1000u32 {
                        let mut buf = pool.acquire();
                        assert!(buf.is_empty());
                        buf.push(t);
                        buf.extend_from_slice(&i.to_le_bytes());
                    }
                });
            }
        });

        let stats = pool.stats();
        assert_eq!(stats.allocated + stats.reused, 8000);
        // at most one buffer per thread is ever outstanding
        assert!(stats.allocated <= 8);
    }
}
