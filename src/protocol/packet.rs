//! Packets and packet groups.
//!
//! A packet is one header plus an optional payload. Packets sharing a
//! `group_id` form a group; the last one carries the end-of-group bit.
//!
//! # Example
//!
//! ```
//! use groupwire::protocol::{encode_group, encoded_group_len, tags, BufferWriter, HybridData, Packet};
//!
//! let group = vec![
//!     Packet::new(tags::TEXT, 1, 7, HybridData::from_metadata("first")),
//!     Packet::new(tags::TEXT, 1, 7, HybridData::from_metadata("second")),
//! ];
//! let mut buf = vec![0u8; encoded_group_len(&group)];
//! let written = encode_group(group, &mut BufferWriter::new(&mut buf)).unwrap();
//! assert_eq!(written, buf.len());
//! ```

use bytes::Bytes;

use super::payload::{BoxedPayload, HybridData, PayloadSource};
use super::wire_format::{prop, Header, PacketType, HEADER_SIZE};
use super::BufferWriter;
use crate::error::{GroupwireError, Result};

/// A single packet.
///
/// Outgoing packets are generic over their payload source; decoded packets
/// always carry [`HybridData`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<P = HybridData> {
    /// Group this packet belongs to.
    pub group_id: u32,
    /// Application-defined addressee.
    pub target_id: u32,
    /// Packet type tag.
    pub tag: PacketType,
    /// Last packet of its group.
    pub end_of_group: bool,
    /// Payload, absent for zero-length frames.
    pub payload: Option<P>,
}

/// Ordered packets sharing a group id.
pub type PacketGroup<P = HybridData> = Vec<Packet<P>>;

impl<P> Packet<P> {
    /// Create a packet with a payload.
    pub fn new(tag: PacketType, target_id: u32, group_id: u32, payload: P) -> Self {
        Self {
            group_id,
            target_id,
            tag,
            end_of_group: false,
            payload: Some(payload),
        }
    }

    /// Create a packet without payload (encodes with data_length 0).
    pub fn empty(tag: PacketType, target_id: u32, group_id: u32) -> Self {
        Self {
            group_id,
            target_id,
            tag,
            end_of_group: false,
            payload: None,
        }
    }

    /// Set or clear the end-of-group flag.
    pub fn with_end_of_group(mut self, end: bool) -> Self {
        self.end_of_group = end;
        self
    }

    /// The `prop` field this packet encodes with.
    #[inline]
    pub fn prop(&self) -> u32 {
        if self.end_of_group {
            prop::END_OF_GROUP
        } else {
            0
        }
    }
}

impl<P: PayloadSource> Packet<P> {
    /// Bytes following the header.
    pub fn data_length(&self) -> usize {
        self.payload.as_ref().map_or(0, PayloadSource::encoded_size)
    }

    /// Total encoded size, header included.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.data_length()
    }

    /// Header this packet encodes with.
    pub fn header(&self) -> Result<Header> {
        let data_length = self.data_length();
        let data_length = u32::try_from(data_length).map_err(|_| {
            GroupwireError::Encoding(format!("payload of {} bytes too large", data_length))
        })?;
        Ok(Header::new(
            self.tag,
            self.prop(),
            self.target_id,
            self.group_id,
            data_length,
        ))
    }

    /// Encode header and payload, consuming the packet.
    ///
    /// Capacity is checked for the whole packet before anything is written.
    /// Returns the number of bytes written.
    pub fn encode(self, writer: &mut BufferWriter<'_>) -> Result<usize> {
        let header = self.header()?;
        let total = header.frame_len();
        if !writer.can_write(total) {
            return Err(GroupwireError::capacity(total, writer.remaining()));
        }

        header.encode(writer)?;
        if let Some(payload) = &self.payload {
            payload.encode(writer)?;
        }
        Ok(total)
    }

    /// Erase the payload type.
    pub fn into_boxed(self) -> Packet<BoxedPayload>
    where
        P: Send + 'static,
    {
        Packet {
            group_id: self.group_id,
            target_id: self.target_id,
            tag: self.tag,
            end_of_group: self.end_of_group,
            payload: self
                .payload
                .map(|p| Box::new(p) as BoxedPayload),
        }
    }
}

impl Packet<HybridData> {
    /// Metadata of the payload, empty when there is none.
    pub fn metadata(&self) -> &str {
        self.payload.as_ref().map_or("", |p| p.metadata.as_str())
    }

    /// Binary part of the payload, empty when there is none.
    pub fn binary(&self) -> Bytes {
        self.payload
            .as_ref()
            .map_or_else(Bytes::new, |p| p.binary.clone())
    }
}

/// Total encoded size of a group.
pub fn encoded_group_len<P: PayloadSource>(packets: &[Packet<P>]) -> usize {
    packets.iter().map(Packet::encoded_len).sum()
}

/// Encode a group in order.
///
/// The end-of-group bit is forced on the last packet and cleared on all
/// others. An empty group writes nothing.
pub fn encode_group<P: PayloadSource>(
    packets: Vec<Packet<P>>,
    writer: &mut BufferWriter<'_>,
) -> Result<usize> {
    let needed = encoded_group_len(&packets);
    if !writer.can_write(needed) {
        return Err(GroupwireError::capacity(needed, writer.remaining()));
    }

    let last = packets.len().saturating_sub(1);
    let mut written = 0;
    for (i, packet) in packets.into_iter().enumerate() {
        written += packet.with_end_of_group(i == last).encode(writer)?;
    }
    Ok(written)
}

/// Encode a single packet into a fresh `Vec`.
pub fn build_frame<P: PayloadSource>(packet: Packet<P>) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; packet.encoded_len()];
    packet.encode(&mut BufferWriter::new(&mut buf))?;
    Ok(buf)
}
