//! Protocol module - wire format, payloads, packets, and decoding.
//!
//! This module implements the packet-group wire protocol:
//! - Bounds-checked append writer over caller-owned regions
//! - 18-byte header encoding/decoding
//! - Payload sources (metadata + binary, pixel conversion)
//! - Packets and groups
//! - Incremental group decoder

mod buffer_writer;
mod decoder;
mod packet;
mod payload;
mod wire_format;

pub use buffer_writer::BufferWriter;
pub use decoder::{
    CallbackError, CallbackResult, DecodeReport, DecodeSink, FnSink, GroupDecoder, Phase,
};
pub use packet::{build_frame, encode_group, encoded_group_len, Packet, PacketGroup};
pub use payload::{
    BoxedPayload, HybridData, PayloadSource, PixelFormat, PixelLayout, PixelPayload,
};
pub use wire_format::{
    prop, tag_display, tags, Header, PacketType, DEFAULT_MAX_DATA_LENGTH, HEADER_SIZE,
    METADATA_LEN_SIZE,
};
