//! Bounded decode pool.
//!
//! One pool is shared by every resource and scene of a session. It bounds how
//! many pool-eligible decodes (LZW-compressed levels, see
//! [`ImageInfo::uses_pool`](super::ImageInfo::uses_pool)) run at once.
//! Waiters are served first come, first served; there are no priorities and
//! running decodes are never preempted.
//!
//! ```text
//! decode A ──► acquire ─┐
//! decode B ──► acquire ─┼──► Semaphore(size) ──► spawn_blocking(decode)
//! decode C ──► acquire ─┘     (FIFO waiters)       permit dropped on completion
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::CogError;

/// Lower bound on the pool size.
pub const MIN_DECODE_WORKERS: usize = 1;

/// Fallback worker count when the parallelism of the host is unknown.
pub const FALLBACK_DECODE_WORKERS: usize = 4;

/// Session-wide limiter for pooled decodes.
#[derive(Debug)]
pub struct DecodePool {
    semaphore: Arc<Semaphore>,
    size: usize,
    /// Decodes currently holding a permit.
    /// Shared with permits so they can be moved into spawned tasks.
    in_flight: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl DecodePool {
    /// Create a pool running at most `size` decodes at once.
    pub fn new(size: usize) -> Self {
        let size = size.max(MIN_DECODE_WORKERS);
        tracing::info!(size, "Created decode pool");
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            in_flight: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a pool sized to the host's available parallelism.
    pub fn with_defaults() -> Self {
        Self::new(default_workers())
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<DecodePermit, CogError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CogError::Task("decode pool closed".to_string()))?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Ok(DecodePermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
            completed: Arc::clone(&self.completed),
        })
    }

    /// Maximum number of concurrent pooled decodes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Pooled decodes currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Pooled decodes finished since the pool was created.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}

impl Default for DecodePool {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Worker count derived from the host's available parallelism.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(FALLBACK_DECODE_WORKERS)
}

/// A slot in the decode pool, released when dropped.
pub struct DecodePermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl Drop for DecodePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}
