//! Incremental packet-group decoder.
//!
//! Bytes arrive in arbitrary chunks. The decoder keeps them in a `BytesMut`
//! and runs a two-phase state machine:
//! - `HeaderWait`: need at least 18 bytes to peek a header
//! - `FrameWait`: header validated, need `18 + data_length` bytes in total
//!
//! Complete frames are split off the buffer (zero-copy freeze), parsed, and
//! appended to their open group. Every packet is reported to
//! [`DecodeSink::on_packet`]; a packet with the end-of-group bit also hands
//! the whole group to [`DecodeSink::on_group`] and closes it.
//!
//! Failure handling is tiered:
//! - a structurally bad frame (metadata length past data length, non-UTF-8
//!   metadata, data length 1..=3) is discarded by consuming exactly its
//!   claimed length; decoding continues with the next frame
//! - a bad header (reserved prop bits, data length above the maximum) means
//!   frame boundaries are lost: the decoder resets completely and returns
//!   `InvalidHeader`
//! - a failing or panicking callback is logged and the packet still counts
//!   as delivered
//!
//! # Example
//!
//! ```
//! use groupwire::protocol::{build_frame, tags, FnSink, GroupDecoder, HybridData, Packet};
//!
//! let frame = build_frame(
//!     Packet::new(tags::TEXT, 11, 301, HybridData::from_binary(&b"Done"[..])).with_end_of_group(true),
//! )
//! .unwrap();
//!
//! let mut groups = Vec::new();
//! let mut sink = FnSink::new(
//!     |_packet| Ok(()),
//!     |group_id, group| {
//!         groups.push((group_id, group.len()));
//!         Ok(())
//!     },
//! );
//!
//! let mut decoder = GroupDecoder::new();
//! decoder.process(&frame[..10], &mut sink).unwrap();
//! decoder.process(&frame[10..], &mut sink).unwrap();
//! drop(sink);
//! assert_eq!(groups, vec![(301, 1)]);
//! ```

use std::collections::HashMap;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};

use bytes::{Bytes, BytesMut};

use super::packet::{Packet, PacketGroup};
use super::payload::HybridData;
use super::wire_format::{
    read_u32_be, Header, DEFAULT_MAX_DATA_LENGTH, HEADER_SIZE, METADATA_LEN_SIZE,
};
use crate::error::{GroupwireError, Result};

/// Error a sink callback may return.
pub type CallbackError = Box<dyn StdError + Send + Sync>;

/// Result of a sink callback.
pub type CallbackResult = std::result::Result<(), CallbackError>;

/// Receiver of decoded packets and completed groups.
pub trait DecodeSink {
    /// Called once per decoded packet, after it joined its group.
    fn on_packet(&mut self, packet: &Packet) -> CallbackResult;

    /// Called once per completed group, which is handed over by value.
    fn on_group(&mut self, group_id: u32, group: PacketGroup) -> CallbackResult;
}

/// [`DecodeSink`] built from two closures.
pub struct FnSink<P, G> {
    on_packet: P,
    on_group: G,
}

impl<P, G> FnSink<P, G>
where
    P: FnMut(&Packet) -> CallbackResult,
    G: FnMut(u32, PacketGroup) -> CallbackResult,
{
    /// Create a sink from a packet callback and a group callback.
    pub fn new(on_packet: P, on_group: G) -> Self {
        Self {
            on_packet,
            on_group,
        }
    }
}

impl<P, G> DecodeSink for FnSink<P, G>
where
    P: FnMut(&Packet) -> CallbackResult,
    G: FnMut(u32, PacketGroup) -> CallbackResult,
{
    fn on_packet(&mut self, packet: &Packet) -> CallbackResult {
        (self.on_packet)(packet)
    }

    fn on_group(&mut self, group_id: u32, group: PacketGroup) -> CallbackResult {
        (self.on_group)(group_id, group)
    }
}

impl<S: DecodeSink + ?Sized> DecodeSink for &mut S {
    fn on_packet(&mut self, packet: &Packet) -> CallbackResult {
        (**self).on_packet(packet)
    }

    fn on_group(&mut self, group_id: u32, group: PacketGroup) -> CallbackResult {
        (**self).on_group(group_id, group)
    }
}

impl<S: DecodeSink + ?Sized> DecodeSink for Box<S> {
    fn on_packet(&mut self, packet: &Packet) -> CallbackResult {
        (**self).on_packet(packet)
    }

    fn on_group(&mut self, group_id: u32, group: PacketGroup) -> CallbackResult {
        (**self).on_group(group_id, group)
    }
}

/// Decoder phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Fewer than 18 bytes buffered.
    HeaderWait,
    /// A validated header is buffered, the rest of its frame is not.
    FrameWait {
        /// The peeked header.
        header: Header,
    },
}

/// What one `process` call did.
#[derive(Debug, Default)]
pub struct DecodeReport {
    /// Packets delivered to `on_packet`.
    pub packets: usize,
    /// Groups delivered to `on_group`.
    pub groups: usize,
    /// Frames discarded as structurally invalid.
    pub discarded: usize,
    /// Per-frame errors, in stream order.
    pub errors: Vec<GroupwireError>,
}

impl DecodeReport {
    /// True if no frame was discarded.
    pub fn is_clean(&self) -> bool {
        self.discarded == 0
    }
}

/// Incremental decoder for a byte stream of packet groups.
pub struct GroupDecoder {
    buffer: BytesMut,
    phase: Phase,
    open_groups: HashMap<u32, PacketGroup>,
    max_data_length: u32,
}

impl GroupDecoder {
    /// Create a decoder with the default 64 MB data length limit.
    pub fn new() -> Self {
        Self::with_max_data_length(DEFAULT_MAX_DATA_LENGTH)
    }

    /// Create a decoder with a custom data length limit.
    pub fn with_max_data_length(max_data_length: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            phase: Phase::HeaderWait,
            open_groups: HashMap::new(),
            max_data_length,
        }
    }

    /// Feed bytes and deliver everything that became complete.
    ///
    /// The result is the same however the stream is chunked.
    ///
    /// # Errors
    ///
    /// `InvalidHeader` when a peeked header fails validation. The decoder is
    /// reset before returning: buffered bytes and open groups are dropped.
    /// Frames decoded earlier in the same call have already reached the
    /// sink, but no report is returned for them; a caller that needs exact
    /// counts should tally them in its sink.
    pub fn process<S: DecodeSink + ?Sized>(
        &mut self,
        data: &[u8],
        sink: &mut S,
    ) -> Result<DecodeReport> {
        self.buffer.extend_from_slice(data);

        let mut report = DecodeReport::default();
        loop {
            match self.try_decode_one(sink, &mut report) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        buffered = self.buffer.len(),
                        open_groups = self.open_groups.len(),
                        "Resetting decoder after invalid header"
                    );
                    self.reset();
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    /// Consume one frame if possible. `Ok(false)` means more data is needed.
    fn try_decode_one<S: DecodeSink + ?Sized>(
        &mut self,
        sink: &mut S,
        report: &mut DecodeReport,
    ) -> Result<bool> {
        let header = match self.phase {
            Phase::HeaderWait => {
                let Some(header) = Header::decode(&self.buffer) else {
                    return Ok(false);
                };
                header.validate(self.max_data_length)?;
                self.phase = Phase::FrameWait { header };
                header
            }
            Phase::FrameWait { header } => header,
        };

        let frame_len = header.frame_len();
        if self.buffer.len() < frame_len {
            return Ok(false);
        }

        let frame = self.buffer.split_to(frame_len).freeze();
        self.phase = Phase::HeaderWait;

        match parse_frame(&frame, header.data_length) {
            Ok((header, payload)) => self.deliver(header, payload, sink, report),
            Err(e) => {
                if matches!(e, GroupwireError::IncompleteFrame(_)) {
                    tracing::error!(error = %e, "Frame truncated after length checks");
                } else {
                    tracing::warn!(
                        error = %e,
                        tag = %header.tag_str(),
                        group_id = header.group_id,
                        frame_len,
                        "Discarding frame"
                    );
                }
                report.discarded += 1;
                report.errors.push(e);
            }
        }

        Ok(true)
    }

    fn deliver<S: DecodeSink + ?Sized>(
        &mut self,
        header: Header,
        payload: Option<HybridData>,
        sink: &mut S,
        report: &mut DecodeReport,
    ) {
        let group_id = header.group_id;
        let group = self.open_groups.entry(group_id).or_default();
        group.push(Packet {
            group_id,
            target_id: header.target_id,
            tag: header.tag,
            end_of_group: header.is_end_of_group(),
            payload,
        });
        report.packets += 1;

        if let Some(packet) = group.last() {
            guarded("on_packet", || sink.on_packet(packet));
        }

        if header.is_end_of_group() {
            if let Some(group) = self.open_groups.remove(&group_id) {
                report.groups += 1;
                guarded("on_group", || sink.on_group(group_id, group));
            }
        }
    }

    /// Drop buffered bytes and open groups.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.open_groups.clear();
        self.phase = Phase::HeaderWait;
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Bytes buffered but not yet decoded.
    #[inline]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Groups that have received packets but no end-of-group yet.
    #[inline]
    pub fn open_group_count(&self) -> usize {
        self.open_groups.len()
    }

    /// True if nothing is buffered and no group is open.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.open_groups.is_empty()
    }
}

impl Default for GroupDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a complete frame. `frame` holds exactly `18 + expected_len` bytes.
fn parse_frame(frame: &Bytes, expected_len: u32) -> Result<(Header, Option<HybridData>)> {
    let header = Header::decode(frame)
        .ok_or_else(|| GroupwireError::IncompleteFrame("header cut short".to_string()))?;
    if header.data_length != expected_len {
        return Err(GroupwireError::Decoding(format!(
            "data length changed from {} to {} while buffering",
            expected_len, header.data_length
        )));
    }

    let data = frame.slice(HEADER_SIZE..);
    let payload = parse_payload(data, header.data_length as usize)?;
    Ok((header, payload))
}

fn parse_payload(data: Bytes, data_length: usize) -> Result<Option<HybridData>> {
    if data_length == 0 {
        return Ok(None);
    }
    if data_length < METADATA_LEN_SIZE {
        return Err(GroupwireError::Decoding(format!(
            "data length {} cannot hold a metadata length",
            data_length
        )));
    }
    if data.len() < METADATA_LEN_SIZE {
        return Err(GroupwireError::IncompleteFrame(
            "metadata length cut short".to_string(),
        ));
    }

    let metadata_len = read_u32_be(&data[..METADATA_LEN_SIZE]) as usize;
    let metadata_end = METADATA_LEN_SIZE
        .checked_add(metadata_len)
        .filter(|&end| end <= data_length)
        .ok_or_else(|| {
            GroupwireError::Decoding(format!(
                "metadata length {} exceeds data length {}",
                metadata_len, data_length
            ))
        })?;
    if data.len() < data_length {
        return Err(GroupwireError::IncompleteFrame(format!(
            "have {} of {} data bytes",
            data.len(),
            data_length
        )));
    }

    let metadata = std::str::from_utf8(&data[METADATA_LEN_SIZE..metadata_end])
        .map_err(|e| GroupwireError::Decoding(format!("metadata is not UTF-8: {}", e)))?
        .to_owned();
    let binary = data.slice(metadata_end..data_length);

    Ok(Some(HybridData { metadata, binary }))
}

/// Run a sink callback, logging errors and panics instead of propagating.
fn guarded<F>(name: &'static str, f: F)
where
    F: FnOnce() -> CallbackResult,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(callback = name, error = %e, "Decode callback failed"),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(callback = name, panic = %message, "Decode callback panicked");
        }
    }
}
