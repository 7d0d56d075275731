//! Send arbitration for the single outgoing slot.
//!
//! Two paths lead to the slot:
//!
//! ```text
//! send() ───────────────────────────────┐
//!                                        ├─► fair gate ─► wait IDLE ─► Slot
//! enqueue() ─► mpsc ─► Drain Task ───────┘
//! ```
//!
//! - **Direct**: the caller waits for its turn and for the slot, bounded by
//!   its own timeout, and gets the outcome back.
//! - **Queued**: the caller returns once the message is accepted; a drain
//!   task hands messages to the slot one per idle opportunity.
//!
//! The gate is a `tokio::sync::Mutex`, which grants the lock in FIFO order,
//! so neither path can starve the other. It only decides who writes next;
//! once admitted, the writer owns the buffer through the handshake alone.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::backpressure::BackpressureController;
use crate::error::{GroupwireError, Result};
use crate::protocol::{encode_group, encoded_group_len, BoxedPayload, BufferWriter, Packet};
use crate::transport::{signal, wait_until, PollConfig, Slot};

/// Callback fired when the send queue drains to empty.
pub type DrainedCallback = Arc<dyn Fn() + Send + Sync>;

/// A message on its way to the slot.
pub enum Outbound {
    /// Raw bytes, copied as they are.
    Bytes(Bytes),
    /// A packet group, encoded straight into the slot buffer.
    Packets(Vec<Packet<BoxedPayload>>),
}

impl Outbound {
    /// Bytes this message occupies in the slot.
    pub fn encoded_len(&self) -> usize {
        match self {
            Outbound::Bytes(bytes) => bytes.len(),
            Outbound::Packets(packets) => encoded_group_len(packets),
        }
    }

    fn write_into(self, writer: &mut BufferWriter<'_>) -> Result<()> {
        match self {
            Outbound::Bytes(bytes) => writer.append(&bytes),
            Outbound::Packets(packets) => encode_group(packets, writer).map(|_| ()),
        }
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outbound::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Outbound::Packets(packets) => f.debug_tuple("Packets").field(&packets.len()).finish(),
        }
    }
}

/// Serializes writers on one outgoing slot.
pub struct SendArbiter {
    slot: Arc<Slot>,
    gate: Mutex<()>,
    closing: Arc<AtomicBool>,
    poll: PollConfig,
}

impl SendArbiter {
    /// Create an arbiter for `slot`. Sends fail fast once `closing` is set.
    pub fn new(slot: Arc<Slot>, closing: Arc<AtomicBool>, poll: PollConfig) -> Self {
        Self {
            slot,
            gate: Mutex::new(()),
            closing,
            poll,
        }
    }

    /// Reject a message that can never be sent.
    pub fn check(&self, message: &Outbound) -> Result<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(GroupwireError::ShuttingDown);
        }
        let len = message.encoded_len();
        if len > self.slot.capacity() {
            return Err(GroupwireError::PayloadTooLarge {
                len,
                capacity: self.slot.capacity(),
            });
        }
        Ok(())
    }

    /// Wait for a turn and an idle slot, then publish.
    ///
    /// Oversized messages and sends during teardown fail before waiting.
    /// A peer that never releases the slot yields `Timeout`.
    pub async fn send(&self, message: Outbound, timeout: Duration) -> Result<usize> {
        self.check(&message)?;
        let deadline = Instant::now() + timeout;

        let _turn = tokio::time::timeout(timeout, self.gate.lock())
            .await
            .map_err(|_| GroupwireError::Timeout(timeout))?;
        self.wait_idle(deadline).await?;

        self.slot.publish_with(|writer| message.write_into(writer))
    }

    /// Raise the ERROR status once the slot is free.
    pub async fn signal_error(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let _turn = tokio::time::timeout(timeout, self.gate.lock())
            .await
            .map_err(|_| GroupwireError::Timeout(timeout))?;
        self.wait_idle(deadline).await?;

        self.slot.store_signal(signal::ERROR);
        Ok(())
    }

    async fn wait_idle(&self, deadline: Instant) -> Result<()> {
        let slot = &self.slot;
        wait_until(|| slot.is_idle(), self.poll, deadline, &self.closing)
            .await
            .map_err(|e| {
                if let GroupwireError::Timeout(waited) = &e {
                    tracing::warn!(?waited, state = ?slot.state(), "Peer did not release the slot");
                }
                e
            })
    }
}

/// Handle for queueing messages to the drain task.
#[derive(Clone)]
pub struct SendQueue {
    tx: mpsc::Sender<Outbound>,
    arbiter: Arc<SendArbiter>,
    backpressure: BackpressureController,
}

impl SendQueue {
    /// Accept a message for later sending.
    ///
    /// Waits while the queue is full, up to the backpressure timeout.
    pub async fn enqueue(&self, message: Outbound) -> Result<()> {
        self.arbiter.check(&message)?;
        let reservation = self.backpressure.reserve().await?;

        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => GroupwireError::BackpressureTimeout,
            mpsc::error::TrySendError::Closed(_) => GroupwireError::ShuttingDown,
        })?;
        reservation.disarm();
        Ok(())
    }

    /// Messages accepted but not yet handed to the slot.
    #[inline]
    pub fn pending(&self) -> usize {
        self.backpressure.pending_count()
    }

    /// Check if the queue is full.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.backpressure.is_active()
    }
}

/// Spawn the drain task.
///
/// Each queued message gets `send_timeout` to reach the slot; failures are
/// logged and the message is dropped. `on_drained` fires once every time the
/// queue goes from non-empty to empty.
pub fn spawn_drain_task(
    arbiter: Arc<SendArbiter>,
    backpressure: BackpressureController,
    send_timeout: Duration,
    on_drained: Option<DrainedCallback>,
) -> (SendQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(backpressure.max_pending());
    let queue = SendQueue {
        tx,
        arbiter: arbiter.clone(),
        backpressure: backpressure.clone(),
    };
    let task = tokio::spawn(drain_loop(rx, arbiter, backpressure, send_timeout, on_drained));
    (queue, task)
}

async fn drain_loop(
    mut rx: mpsc::Receiver<Outbound>,
    arbiter: Arc<SendArbiter>,
    backpressure: BackpressureController,
    send_timeout: Duration,
    on_drained: Option<DrainedCallback>,
) {
    while let Some(message) = rx.recv().await {
        match arbiter.send(message, send_timeout).await {
            Ok(len) => tracing::trace!(len, "Queued message sent"),
            Err(GroupwireError::ShuttingDown) => {
                tracing::debug!("Dropping queued message during shutdown")
            }
            Err(e) => tracing::warn!(error = %e, "Dropping queued message"),
        }

        if backpressure.release() {
            if let Some(callback) = &on_drained {
                if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                    tracing::error!("Drained callback panicked");
                }
            }
        }
    }
}
