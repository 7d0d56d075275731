//! Wire format encoding and decoding.
//!
//! Implements the 18-byte header format:
//! ```text
//! ┌────────┬──────────┬───────────┬──────────┬─────────────┐
//! │ Tag    │ Prop     │ Target ID │ Group ID │ Data length │
//! │ 2 bytes│ 4 bytes  │ 4 bytes   │ 4 bytes  │ 4 bytes     │
//! │ raw    │ uint32 BE│ uint32 BE │ uint32 BE│ uint32 BE   │
//! └────────┴──────────┴───────────┴──────────┴─────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. The tag is two opaque bytes.

use super::BufferWriter;
use crate::error::{GroupwireError, Result};

/// Header size in bytes (fixed, exactly 18).
pub const HEADER_SIZE: usize = 18;

/// Size of the metadata length prefix at the start of every payload.
pub const METADATA_LEN_SIZE: usize = 4;

/// Default maximum data length accepted by the decoder (64 MB).
pub const DEFAULT_MAX_DATA_LENGTH: u32 = 64 * 1024 * 1024;

/// Two raw bytes identifying the packet type.
pub type PacketType = [u8; 2];

/// Well-known packet type tags.
pub mod tags {
    use super::PacketType;

    /// Text or command sent to a worker.
    pub const TEXT: PacketType = *b"TX";
    /// Image frame.
    pub const IMAGE: PacketType = *b"IM";
    /// Acknowledgement.
    pub const ACK: PacketType = *b"AK";
    /// Bytes relayed back from a cross-process peer.
    pub const PEER_RESPONSE: PacketType = *b"PR";
}

/// Bits of the `prop` field.
pub mod prop {
    /// End-of-group: last packet of its group.
    pub const END_OF_GROUP: u32 = 0x0000_0001;

    /// Reserved bits (everything except end-of-group). Must be zero.
    pub const RESERVED_MASK: u32 = !END_OF_GROUP;

    /// Check if a specific bit is set.
    #[inline]
    pub fn has(prop: u32, bit: u32) -> bool {
        prop & bit != 0
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Group this packet belongs to.
    pub group_id: u32,
    /// Application-defined addressee.
    pub target_id: u32,
    /// Packet type tag.
    pub tag: PacketType,
    /// Property bitfield (see `prop`).
    pub prop: u32,
    /// Bytes following the header.
    pub data_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(tag: PacketType, prop: u32, target_id: u32, group_id: u32, data_length: u32) -> Self {
        Self {
            group_id,
            target_id,
            tag,
            prop,
            data_length,
        }
    }

    /// Encode header into a writer.
    ///
    /// Fails with a capacity error, writing nothing, if fewer than
    /// `HEADER_SIZE` bytes remain.
    ///
    /// # Example
    ///
    /// ```
    /// use groupwire::protocol::{BufferWriter, Header, prop};
    ///
    /// let header = Header::new(*b"TX", prop::END_OF_GROUP, 11, 301, 8);
    /// let mut buf = [0u8; 18];
    /// header.encode(&mut BufferWriter::new(&mut buf)).unwrap();
    /// assert_eq!(&buf[..2], b"TX");
    /// ```
    pub fn encode(&self, writer: &mut BufferWriter<'_>) -> Result<()> {
        let buf = writer.claim_space(HEADER_SIZE)?;
        self.encode_into(buf);
        Ok(())
    }

    /// Encode header to a fixed array.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.tag);
        buf[2..6].copy_from_slice(&self.prop.to_be_bytes());
        buf[6..10].copy_from_slice(&self.target_id.to_be_bytes());
        buf[10..14].copy_from_slice(&self.group_id.to_be_bytes());
        buf[14..18].copy_from_slice(&self.data_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            tag: [buf[0], buf[1]],
            prop: read_u32_be(&buf[2..6]),
            target_id: read_u32_be(&buf[6..10]),
            group_id: read_u32_be(&buf[10..14]),
            data_length: read_u32_be(&buf[14..18]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Reserved prop bits are 0
    /// - Data length doesn't exceed max
    pub fn validate(&self, max_data_length: u32) -> Result<()> {
        if self.prop & prop::RESERVED_MASK != 0 {
            return Err(GroupwireError::InvalidHeader(format!(
                "reserved prop bits set: {:#010x}",
                self.prop
            )));
        }

        if self.data_length > max_data_length {
            return Err(GroupwireError::InvalidHeader(format!(
                "data length {} exceeds maximum {}",
                self.data_length, max_data_length
            )));
        }

        Ok(())
    }

    /// Check if this is the last packet of its group.
    #[inline]
    pub fn is_end_of_group(&self) -> bool {
        prop::has(self.prop, prop::END_OF_GROUP)
    }

    /// Full frame size (header plus data).
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.data_length as usize
    }

    /// Tag as text, lossy for non-ASCII bytes. For logging.
    pub fn tag_str(&self) -> String {
        tag_display(self.tag)
    }
}

/// Render a tag for log output.
pub fn tag_display(tag: PacketType) -> String {
    String::from_utf8_lossy(&tag).into_owned()
}

#[inline]
pub(crate) fn read_u32_be(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}
