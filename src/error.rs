//! Error types for groupwire.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all groupwire operations.
#[derive(Debug, Error)]
pub enum GroupwireError {
    /// Encode target is too small. The caller must enlarge the region or
    /// abandon the send.
    #[error("Capacity error: need {needed} bytes, {remaining} remaining")]
    Capacity {
        /// Bytes the operation tried to write.
        needed: usize,
        /// Bytes left in the target region.
        remaining: usize,
    },

    /// A payload could not serialize itself (e.g. unsupported pixel layout).
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Structurally inconsistent frame. The frame is discarded and the
    /// stream continues.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Truncation after all length checks passed. Indicates an internal
    /// defect, not a stream condition.
    #[error("Incomplete frame: {0}")]
    IncompleteFrame(String),

    /// Peeked header is malformed; frame boundaries can no longer be trusted
    /// and the decoder has been reset.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The peer did not release the slot before the deadline.
    #[error("Handshake timeout after {0:?}")]
    Timeout(Duration),

    /// Outgoing message exceeds the declared capacity of the direction.
    #[error("Payload of {len} bytes exceeds slot capacity {capacity}")]
    PayloadTooLarge {
        /// Message length.
        len: usize,
        /// Declared slot capacity.
        capacity: usize,
    },

    /// The outgoing slot still holds a message the peer has not consumed.
    #[error("Slot is busy")]
    SlotBusy,

    /// Send attempted while the channel is being torn down.
    #[error("Channel is shutting down")]
    ShuttingDown,

    /// Send queue stayed full past the backpressure timeout.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Shared memory region name is not of the form `/name`.
    #[error("Invalid region name: {0}")]
    InvalidRegionName(String),

    /// Region layout read from the control block is unusable.
    #[error("Invalid region layout: {0}")]
    InvalidLayout(String),

    /// Channel settings that cannot work (e.g. a zero-length send queue).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The peer process could not be started.
    #[error("Peer launch failed: {0}")]
    Launch(String),

    /// I/O error from the operating system (shm_open, mmap, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (metadata, config, attach info).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GroupwireError {
    /// Build a capacity error.
    pub fn capacity(needed: usize, remaining: usize) -> Self {
        Self::Capacity { needed, remaining }
    }

    /// True for errors produced by the shared-memory handshake.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::SlotBusy
                | Self::PayloadTooLarge { .. }
                | Self::ShuttingDown
                | Self::BackpressureTimeout
        )
    }
}

/// Result type alias using GroupwireError.
pub type Result<T> = std::result::Result<T, GroupwireError>;
