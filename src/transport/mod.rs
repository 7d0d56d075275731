//! Transport module - single-slot shared-memory handshake.
//!
//! Provides:
//! - Memory regions (heap for in-process pairs, POSIX shared memory)
//! - The per-direction slot handshake
//! - Adaptive poll scheduling
//! - Paired and cross-process region layouts

mod endpoint;
mod paired;
mod poll;
mod process;
mod region;
mod shm;
mod slot;

pub use endpoint::{Endpoint, Role};
pub use paired::{paired, PAIRED_CONTROL_SIZE};
pub(crate) use poll::duration_ms;
pub use poll::{
    wait_until, PollConfig, PollSchedule, PollState, DEFAULT_BUSY_INTERVAL, DEFAULT_BUSY_POLLS,
    DEFAULT_IDLE_INTERVAL,
};
pub use process::{
    create_process_link, open_process_link, open_with_info, ProcessLinkConfig,
    CONTROL_BLOCK_SIZE, DEFAULT_ACCEPTOR_TO_CREATOR_CAPACITY,
    DEFAULT_CREATOR_TO_ACCEPTOR_CAPACITY, MAX_DECLARED_CAPACITY,
};
pub use region::{HeapRegion, RegionMemory};
pub use shm::ShmSegment;
pub use slot::{signal, Incoming, LengthField, Slot, SlotLayout, SlotState};
