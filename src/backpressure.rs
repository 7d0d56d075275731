//! Bounded send-queue accounting.
//!
//! The channel's queued send path counts messages that were accepted but not
//! yet handed to the slot. [`BackpressureController`] caps that count so a
//! producer faster than the peer cannot grow the queue without bound, and
//! reports when the count falls back to zero so the channel can fire its
//! drained notification.
//!
//! # Configuration
//!
//! - `max_pending`: Maximum number of queued messages (default: 1024)
//! - Timeout: How long `enqueue` waits for room (default: 5s)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{GroupwireError, Result};

/// Default maximum queued messages before backpressure kicks in.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Default backpressure timeout (how long to wait for room in the queue).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between reservation attempts on a full queue.
const RETRY_INTERVAL: Duration = Duration::from_micros(100);

/// Lock-free counter of queued messages, shared by all handles.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl BackpressureController {
    /// Create a controller with the default timeout.
    pub fn new(max_pending: usize) -> Self {
        Self::with_timeout(max_pending, DEFAULT_TIMEOUT)
    }

    /// Create a controller with a custom timeout.
    pub fn with_timeout(max_pending: usize, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: max_pending.max(1),
            timeout,
        }
    }

    /// True while the queue is full.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Messages accepted but not yet sent.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Maximum pending limit.
    #[inline]
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Try to reserve a queue entry without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` if the queue is full.
    pub fn try_reserve(&self) -> Result<()> {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_pending).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|_| GroupwireError::BackpressureTimeout)
    }

    /// Reserve a queue entry, waiting up to the timeout for room.
    pub async fn reserve(&self) -> Result<BackpressureGuard> {
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.try_reserve() {
                Ok(()) => {
                    return Ok(BackpressureGuard {
                        controller: self.clone(),
                        armed: true,
                    })
                }
                Err(e) if Instant::now() >= deadline => {
                    tracing::warn!(
                        pending = self.pending_count(),
                        max_pending = self.max_pending,
                        "Send queue full"
                    );
                    return Err(e);
                }
                Err(_) => tokio::time::sleep(RETRY_INTERVAL).await,
            }
        }
    }

    /// Release one entry. Returns `true` if the queue just became empty.
    #[inline]
    pub fn release(&self) -> bool {
        self.pending.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

/// Reservation that is given back on drop unless disarmed.
///
/// `enqueue` holds one while handing the message to the drain task; if that
/// fails the entry is returned automatically.
pub struct BackpressureGuard {
    controller: BackpressureController,
    armed: bool,
}

impl BackpressureGuard {
    /// Keep the reservation; the drain task releases it after sending.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BackpressureGuard {
    fn drop(&mut self) {
        if self.armed {
            self.controller.release();
        }
    }
}
