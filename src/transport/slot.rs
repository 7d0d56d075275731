//! One direction of the single-slot handshake.
//!
//! ```text
//!   sender                          receiver
//!   ──────                          ────────
//!   wait signal == IDLE
//!   write buffer, store length
//!   signal := DATA_READY  ───────▶  see DATA_READY
//!                                   load length, copy buffer out
//!                                   signal := IDLE
//!   (slot free again)     ◀───────
//! ```
//!
//! Only the sender moves `IDLE -> DATA_READY`; only the receiver moves
//! `DATA_READY -> IDLE`. The length word is stored before the signal with
//! release ordering and loaded after it with acquire ordering, so a receiver
//! that sees `DATA_READY` always sees the matching length and bytes.
//!
//! Within a process, writers to one slot are serialized by a claim flag
//! shared by every handle to it: a second concurrent `publish` gets
//! `SlotBusy` instead of writing the buffer. Each direction must have
//! exactly one sending process.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use super::region::{atomic_i32_at, atomic_u32_at, atomic_u64_at, check_span, RegionMemory};
use crate::error::{GroupwireError, Result};
use crate::protocol::BufferWriter;

/// Signal word values.
pub mod signal {
    /// Slot is free; the sender may write.
    pub const IDLE: i32 = 0;
    /// A message is waiting for the receiver.
    pub const DATA_READY: i32 = 1;
    /// The creator asks the acceptor to stop.
    pub const SHUTDOWN: i32 = 99;
    /// The peer reports a failure.
    pub const ERROR: i32 = -1;
}

/// Decoded signal word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Slot is free.
    Idle,
    /// A message is waiting.
    DataReady,
    /// Shutdown requested.
    Shutdown,
    /// Peer reported an error.
    Error,
    /// Unrecognized value.
    Unknown(i32),
}

impl From<i32> for SlotState {
    fn from(code: i32) -> Self {
        match code {
            signal::IDLE => SlotState::Idle,
            signal::DATA_READY => SlotState::DataReady,
            signal::SHUTDOWN => SlotState::Shutdown,
            signal::ERROR => SlotState::Error,
            other => SlotState::Unknown(other),
        }
    }
}

/// Width and position of a length word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    /// 32-bit length at this offset.
    U32(usize),
    /// 64-bit length at this offset.
    U64(usize),
}

/// Where one direction's words and buffer live inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    /// Offset of the signal word.
    pub signal_offset: usize,
    /// Length word.
    pub length: LengthField,
    /// Offset of the data buffer.
    pub data_offset: usize,
    /// Size of the data buffer.
    pub capacity: usize,
}

enum LengthWord {
    Narrow(*const AtomicU32),
    Wide(*const AtomicU64),
}

/// What the receiving side found in the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Nothing waiting.
    Empty,
    /// A message, copied out of the buffer. Call `release` afterwards.
    Message(Bytes),
    /// `DATA_READY` with a length of zero or beyond the capacity.
    InvalidLength(u64),
    /// Shutdown command.
    Shutdown,
    /// Error status from the peer.
    PeerError,
    /// Unrecognized signal value.
    Unknown(i32),
}

/// One direction of a region: signal word, length word, data buffer.
pub struct Slot {
    // Keeps the pointers below valid.
    _region: Arc<dyn RegionMemory>,
    signal: *const AtomicI32,
    length: LengthWord,
    data: *mut u8,
    capacity: usize,
    // Held while a publish owns the buffer.
    writing: AtomicBool,
}

/// Releases the writer claim, also when `fill` panics.
struct WriteClaim<'a>(&'a AtomicBool);

impl Drop for WriteClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// SAFETY: all pointers target `_region`, which is Send + Sync and outlives
// the slot. Control words are atomics; buffer access follows the handshake.
unsafe impl Send for Slot {}
unsafe impl Sync for Slot {}

impl Slot {
    /// Bind a slot to a region, checking bounds and alignment.
    pub fn new(region: Arc<dyn RegionMemory>, layout: SlotLayout) -> Result<Self> {
        let signal = atomic_i32_at(&*region, layout.signal_offset)? as *const AtomicI32;
        let length = match layout.length {
            LengthField::U32(offset) => {
                if layout.capacity > u32::MAX as usize {
                    return Err(GroupwireError::InvalidLayout(format!(
                        "capacity {} does not fit a 32-bit length",
                        layout.capacity
                    )));
                }
                LengthWord::Narrow(atomic_u32_at(&*region, offset)? as *const AtomicU32)
            }
            LengthField::U64(offset) => {
                LengthWord::Wide(atomic_u64_at(&*region, offset)? as *const AtomicU64)
            }
        };
        let data = check_span(&*region, layout.data_offset, layout.capacity, 1)?;

        Ok(Self {
            _region: region,
            signal,
            length,
            data,
            capacity: layout.capacity,
            writing: AtomicBool::new(false),
        })
    }

    fn signal_word(&self) -> &AtomicI32 {
        // SAFETY: validated in `new`, kept alive by `_region`.
        unsafe { &*self.signal }
    }

    /// Data buffer size.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raw signal value.
    #[inline]
    pub fn raw_signal(&self) -> i32 {
        self.signal_word().load(Ordering::Acquire)
    }

    /// Decoded signal value.
    #[inline]
    pub fn state(&self) -> SlotState {
        SlotState::from(self.raw_signal())
    }

    /// True if the sender may write.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.raw_signal() == signal::IDLE
    }

    /// Overwrite the signal word.
    pub(crate) fn store_signal(&self, code: i32) {
        self.signal_word().store(code, Ordering::Release);
    }

    fn store_len(&self, len: usize) {
        // SAFETY: validated in `new`, kept alive by `_region`.
        unsafe {
            match self.length {
                LengthWord::Narrow(word) => (*word).store(len as u32, Ordering::Release),
                LengthWord::Wide(word) => (*word).store(len as u64, Ordering::Release),
            }
        }
    }

    fn load_len(&self) -> u64 {
        // SAFETY: validated in `new`, kept alive by `_region`.
        unsafe {
            match self.length {
                LengthWord::Narrow(word) => u64::from((*word).load(Ordering::Acquire)),
                LengthWord::Wide(word) => (*word).load(Ordering::Acquire),
            }
        }
    }

    /// Fill the buffer through a writer and publish what was written.
    ///
    /// Fails with `SlotBusy` if the slot is not idle or another publish on
    /// it is in progress, leaving `fill` uncalled. Nothing is published if
    /// `fill` fails or writes zero bytes.
    pub fn publish_with<F>(&self, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut BufferWriter<'_>) -> Result<()>,
    {
        if self.writing.swap(true, Ordering::Acquire) {
            return Err(GroupwireError::SlotBusy);
        }
        let _claim = WriteClaim(&self.writing);

        if !self.is_idle() {
            return Err(GroupwireError::SlotBusy);
        }

        // SAFETY: the claim excludes every other writer in this process and
        // the slot is IDLE, so the receiver does not touch the buffer until
        // we store DATA_READY.
        let buf = unsafe { std::slice::from_raw_parts_mut(self.data, self.capacity) };
        let mut writer = BufferWriter::new(buf);
        fill(&mut writer)?;

        let len = writer.size();
        if len == 0 {
            return Err(GroupwireError::Encoding(
                "refusing to publish an empty message".to_string(),
            ));
        }

        self.store_len(len);
        self.store_signal(signal::DATA_READY);
        Ok(len)
    }

    /// Copy `data` into the buffer and publish it.
    pub fn publish(&self, data: &[u8]) -> Result<usize> {
        if data.len() > self.capacity {
            return Err(GroupwireError::PayloadTooLarge {
                len: data.len(),
                capacity: self.capacity,
            });
        }
        self.publish_with(|writer| writer.append(data))
    }

    /// Inspect the slot from the receiving side.
    ///
    /// A `Message` is copied out; the slot stays `DATA_READY` until
    /// `release` is called.
    pub fn take(&self) -> Incoming {
        match self.state() {
            SlotState::Idle => Incoming::Empty,
            SlotState::DataReady => {
                let len = self.load_len();
                if len == 0 || len > self.capacity as u64 {
                    return Incoming::InvalidLength(len);
                }
                // SAFETY: DATA_READY was observed with acquire ordering after
                // the sender's release store, and the sender does not write
                // until we store IDLE.
                let bytes = unsafe { std::slice::from_raw_parts(self.data, len as usize) };
                Incoming::Message(Bytes::copy_from_slice(bytes))
            }
            SlotState::Shutdown => Incoming::Shutdown,
            SlotState::Error => Incoming::PeerError,
            SlotState::Unknown(code) => Incoming::Unknown(code),
        }
    }

    /// Hand the slot back to the sender.
    #[inline]
    pub fn release(&self) {
        self.store_signal(signal::IDLE);
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("state", &self.state())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HeapRegion;

    fn slot_pair(capacity: usize) -> (Slot, Slot) {
        let region: Arc<dyn RegionMemory> = Arc::new(HeapRegion::new(16 + capacity).unwrap());
        let layout = SlotLayout {
            signal_offset: 0,
            length: LengthField::U64(8),
            data_offset: 16,
            capacity,
        };
        (
            Slot::new(region.clone(), layout).unwrap(),
            Slot::new(region, layout).unwrap(),
        )
    }

    #[test]
    fn test_handshake_round_trip() {
        let (sender, receiver) = slot_pair(32);
        assert_eq!(receiver.take(), Incoming::Empty);

        assert_eq!(sender.publish(b"hello").unwrap(), 5);
        assert_eq!(sender.state(), SlotState::DataReady);
        assert_eq!(receiver.take(), Incoming::Message(Bytes::from_static(b"hello")));

        receiver.release();
        assert!(sender.is_idle());
    }

    #[test]
    fn test_publish_while_busy() {
        let (sender, _receiver) = slot_pair(32);
        sender.publish(b"one").unwrap();

        let mut called = false;
        let result = sender.publish_with(|_| {
            called = true;
            Ok(())
        });
        assert!(matches!(result, Err(GroupwireError::SlotBusy)));
        assert!(!called);
    }

    #[test]
    fn test_second_writer_is_refused_while_filling() {
        let (sender, receiver) = slot_pair(32);
        let sender = Arc::new(sender);
        let second = sender.clone();

        let len = sender
            .publish_with(|writer| {
                assert!(matches!(second.publish(b"intruder"), Err(GroupwireError::SlotBusy)));
                writer.append(b"first")
            })
            .unwrap();
        assert_eq!(len, 5);
        assert_eq!(receiver.take(), Incoming::Message(Bytes::from_static(b"first")));
        receiver.release();

        // The claim is dropped once the publish returns.
        assert_eq!(second.publish(b"second").unwrap(), 6);
    }

    #[test]
    fn test_panicking_fill_releases_claim() {
        let (sender, _receiver) = slot_pair(32);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = sender.publish_with(|_| panic!("fill failed"));
        }));
        assert!(result.is_err());
        assert!(sender.is_idle());
        assert_eq!(sender.publish(b"ok").unwrap(), 2);
    }

    #[test]
    fn test_racing_writers_never_tear() {
        let (sender, receiver) = slot_pair(4096);
        let sender = Arc::new(sender);
        let per_writer = 200;

        let writers: Vec<_> = [0xAAu8, 0x55u8]
            .into_iter()
            .map(|fill| {
                let sender = sender.clone();
                std::thread::spawn(move || {
                    let msg = vec![fill; 4096];
                    let mut sent = 0;
                    while sent < per_writer {
                        match sender.publish(&msg) {
                            Ok(_) => sent += 1,
                            Err(GroupwireError::SlotBusy) => std::thread::yield_now(),
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                })
            })
            .collect();

        let mut received = 0;
        while received < 2 * per_writer {
            if let Incoming::Message(bytes) = receiver.take() {
                assert_eq!(bytes.len(), 4096);
                assert!(bytes.iter().all(|&b| b == bytes[0]), "message torn");
                received += 1;
                receiver.release();
            } else {
                std::thread::yield_now();
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }
    }

    #[test]
    fn test_oversized_payload_rejected_synchronously() {
        let (sender, receiver) = slot_pair(4);
        let err = sender.publish(b"too long").unwrap_err();
        assert!(matches!(
            err,
            GroupwireError::PayloadTooLarge { len: 8, capacity: 4 }
        ));
        assert_eq!(receiver.take(), Incoming::Empty);
    }

    #[test]
    fn test_failed_fill_publishes_nothing() {
        let (sender, receiver) = slot_pair(8);
        let result = sender.publish_with(|writer| writer.append(&[0u8; 9]));
        assert!(matches!(result, Err(GroupwireError::Capacity { .. })));
        assert!(sender.is_idle());
        assert_eq!(receiver.take(), Incoming::Empty);

        assert!(matches!(
            sender.publish(b""),
            Err(GroupwireError::Encoding(_))
        ));
        assert!(sender.is_idle());
    }

    #[test]
    fn test_invalid_length_reported() {
        let (sender, receiver) = slot_pair(8);
        sender.store_len(100);
        sender.store_signal(signal::DATA_READY);
        assert_eq!(receiver.take(), Incoming::InvalidLength(100));
    }

    #[test]
    fn test_status_codes() {
        let (sender, receiver) = slot_pair(8);

        sender.store_signal(signal::SHUTDOWN);
        assert_eq!(receiver.take(), Incoming::Shutdown);
        sender.store_signal(signal::ERROR);
        assert_eq!(receiver.take(), Incoming::PeerError);
        sender.store_signal(42);
        assert_eq!(receiver.take(), Incoming::Unknown(42));
        assert_eq!(receiver.state(), SlotState::Unknown(42));
    }

    #[test]
    fn test_narrow_length_capacity_limit() {
        let region: Arc<dyn RegionMemory> = Arc::new(HeapRegion::new(64).unwrap());
        let layout = SlotLayout {
            signal_offset: 0,
            length: LengthField::U32(4),
            data_offset: 8,
            capacity: 100,
        };
        assert!(matches!(
            Slot::new(region, layout),
            Err(GroupwireError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_concurrent_handshake_preserves_every_message() {
        let (sender, receiver) = slot_pair(64);
        let sender = Arc::new(sender);

        let producer = {
            let sender = sender.clone();
            std::thread::spawn(move || {
                for i in 0u32..500 {
                    let msg = i.to_be_bytes();
                    loop {
                        match sender.publish(&msg) {
                            Ok(_) => break,
                            Err(GroupwireError::SlotBusy) => std::thread::yield_now(),
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 500 {
            if let Incoming::Message(bytes) = receiver.take() {
                seen.push(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
                receiver.release();
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();

        assert_eq!(seen, (0u32..500).collect::<Vec<_>>());
    }
}
