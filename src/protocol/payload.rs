//! Payload sources.
//!
//! A payload is a UTF-8 metadata string followed by a binary blob:
//! ```text
//! ┌────────────┬──────────────┬──────────────────────────────┐
//! │ Meta len   │ Metadata     │ Binary                       │
//! │ uint32 BE  │ meta len B   │ rest of data_length          │
//! └────────────┴──────────────┴──────────────────────────────┘
//! ```
//!
//! [`PayloadSource`] separates "how big am I" from "write my binary part",
//! so a source can stream a foreign format straight into the target region
//! (see [`PixelPayload`]) instead of materializing it first.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::wire_format::METADATA_LEN_SIZE;
use super::BufferWriter;
use crate::error::{GroupwireError, Result};

/// Something that can be written as a payload.
pub trait PayloadSource {
    /// Metadata string (conventionally JSON).
    fn metadata(&self) -> &str;

    /// Exact number of binary bytes `write_binary` will produce.
    fn binary_len(&self) -> usize;

    /// Write the binary part. Must write exactly `binary_len()` bytes.
    fn write_binary(&self, writer: &mut BufferWriter<'_>) -> Result<()>;

    /// Encoded payload size: 4 + metadata length + binary length.
    fn encoded_size(&self) -> usize {
        METADATA_LEN_SIZE + self.metadata().len() + self.binary_len()
    }

    /// Encode metadata length, metadata, then the binary part.
    fn encode(&self, writer: &mut BufferWriter<'_>) -> Result<()> {
        let size = self.encoded_size();
        if !writer.can_write(size) {
            return Err(GroupwireError::capacity(size, writer.remaining()));
        }

        let metadata = self.metadata();
        let metadata_len = u32::try_from(metadata.len()).map_err(|_| {
            GroupwireError::Encoding(format!("metadata of {} bytes too long", metadata.len()))
        })?;
        writer.append_u32_be(metadata_len)?;
        writer.append_str(metadata)?;

        let before = writer.size();
        self.write_binary(writer)?;
        let written = writer.size() - before;
        if written != self.binary_len() {
            return Err(GroupwireError::Encoding(format!(
                "binary writer produced {} bytes, declared {}",
                written,
                self.binary_len()
            )));
        }
        Ok(())
    }
}

/// Type-erased payload, used for heterogeneous groups and queued sends.
pub type BoxedPayload = Box<dyn PayloadSource + Send>;

impl<T: PayloadSource + ?Sized> PayloadSource for Box<T> {
    fn metadata(&self) -> &str {
        (**self).metadata()
    }

    fn binary_len(&self) -> usize {
        (**self).binary_len()
    }

    fn write_binary(&self, writer: &mut BufferWriter<'_>) -> Result<()> {
        (**self).write_binary(writer)
    }

    fn encoded_size(&self) -> usize {
        (**self).encoded_size()
    }
}

impl<T: PayloadSource + ?Sized> PayloadSource for &T {
    fn metadata(&self) -> &str {
        (**self).metadata()
    }

    fn binary_len(&self) -> usize {
        (**self).binary_len()
    }

    fn write_binary(&self, writer: &mut BufferWriter<'_>) -> Result<()> {
        (**self).write_binary(writer)
    }

    fn encoded_size(&self) -> usize {
        (**self).encoded_size()
    }
}

/// Metadata string plus an owned binary blob.
///
/// This is both the default outgoing payload and what the decoder produces.
/// The blob is a `Bytes`, so decoded payloads share the decoder's frame
/// allocation instead of copying.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HybridData {
    /// UTF-8 metadata.
    pub metadata: String,
    /// Binary bytes following the metadata.
    pub binary: Bytes,
}

impl HybridData {
    /// Create a payload from metadata and binary parts.
    pub fn new(metadata: impl Into<String>, binary: impl Into<Bytes>) -> Self {
        Self {
            metadata: metadata.into(),
            binary: binary.into(),
        }
    }

    /// Metadata only, empty binary part.
    pub fn from_metadata(metadata: impl Into<String>) -> Self {
        Self::new(metadata, Bytes::new())
    }

    /// Binary only, empty metadata.
    pub fn from_binary(binary: impl Into<Bytes>) -> Self {
        Self::new(String::new(), binary)
    }

    /// Serialize `value` as JSON metadata.
    pub fn with_json_metadata<T: Serialize>(value: &T, binary: impl Into<Bytes>) -> Result<Self> {
        Ok(Self::new(serde_json::to_string(value)?, binary))
    }

    /// Parse the metadata as JSON.
    ///
    /// A malformed document is a decoding error.
    pub fn metadata_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.metadata)
            .map_err(|e| GroupwireError::Decoding(format!("metadata is not valid JSON: {}", e)))
    }
}

impl PayloadSource for HybridData {
    fn metadata(&self) -> &str {
        &self.metadata
    }

    fn binary_len(&self) -> usize {
        self.binary.len()
    }

    fn write_binary(&self, writer: &mut BufferWriter<'_>) -> Result<()> {
        writer.append(&self.binary)
    }
}

/// Pixel layout of a source image (8-bit channels unless noted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelLayout {
    /// One 8-bit channel.
    Gray8,
    /// Three 8-bit channels.
    Rgb8,
    /// Four 8-bit channels.
    Rgba8,
    /// One 16-bit channel. Only the raw format supports it.
    Gray16,
}

impl PixelLayout {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
            PixelLayout::Gray16 => 2,
        }
    }

    /// Channel count.
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Gray8 | PixelLayout::Gray16 => 1,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }
}

/// Wire format of the binary part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    /// Pixels copied as they are.
    #[serde(rename = "raw")]
    Raw,
    /// Pixels expanded to 4 channels, alpha 255 where the source has none.
    #[serde(rename = "raw_rgba")]
    Rgba,
}

#[derive(Serialize)]
struct ImageMetadata {
    width: usize,
    height: usize,
    channels: usize,
    layout: PixelLayout,
    format: PixelFormat,
}

/// Image payload that converts its pixel layout while encoding.
///
/// The converted pixels are written directly into the claimed region of the
/// target writer; no converted copy is ever held in memory.
#[derive(Debug, Clone)]
pub struct PixelPayload {
    metadata: String,
    pixels: Bytes,
    width: usize,
    height: usize,
    layout: PixelLayout,
    format: PixelFormat,
}

impl PixelPayload {
    /// Create an image payload.
    ///
    /// Fails with an encoding error if `pixels` does not hold exactly
    /// `width * height` pixels of `layout`.
    pub fn new(
        pixels: impl Into<Bytes>,
        width: usize,
        height: usize,
        layout: PixelLayout,
        format: PixelFormat,
    ) -> Result<Self> {
        let pixels = pixels.into();
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(layout.bytes_per_pixel()))
            .ok_or_else(|| GroupwireError::Encoding("image dimensions overflow".to_string()))?;
        if pixels.len() != expected {
            return Err(GroupwireError::Encoding(format!(
                "{}x{} {:?} image needs {} bytes, got {}",
                width,
                height,
                layout,
                expected,
                pixels.len()
            )));
        }

        let metadata = serde_json::to_string(&ImageMetadata {
            width,
            height,
            channels: layout.channels(),
            layout,
            format,
        })?;

        Ok(Self {
            metadata,
            pixels,
            width,
            height,
            layout,
            format,
        })
    }

    /// Image width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

impl PayloadSource for PixelPayload {
    fn metadata(&self) -> &str {
        &self.metadata
    }

    fn binary_len(&self) -> usize {
        match self.format {
            PixelFormat::Raw => self.pixels.len(),
            PixelFormat::Rgba => self.pixel_count() * 4,
        }
    }

    fn write_binary(&self, writer: &mut BufferWriter<'_>) -> Result<()> {
        let dst = writer.claim_space(self.binary_len())?;
        match (self.format, self.layout) {
            (PixelFormat::Raw, _) | (PixelFormat::Rgba, PixelLayout::Rgba8) => {
                dst.copy_from_slice(&self.pixels);
            }
            (PixelFormat::Rgba, PixelLayout::Gray8) => {
                for (out, &v) in dst.chunks_exact_mut(4).zip(self.pixels.iter()) {
                    out.copy_from_slice(&[v, v, v, 255]);
                }
            }
            (PixelFormat::Rgba, PixelLayout::Rgb8) => {
                for (out, px) in dst.chunks_exact_mut(4).zip(self.pixels.chunks_exact(3)) {
                    out[..3].copy_from_slice(px);
                    out[3] = 255;
                }
            }
            (PixelFormat::Rgba, PixelLayout::Gray16) => {
                return Err(GroupwireError::Encoding(
                    "cannot expand 16-bit gray to 8-bit RGBA".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_to_vec<P: PayloadSource>(payload: &P) -> Vec<u8> {
        let mut buf = vec![0u8; payload.encoded_size()];
        let mut writer = BufferWriter::new(&mut buf);
        payload.encode(&mut writer).unwrap();
        assert_eq!(writer.remaining(), 0);
        buf
    }

    #[test]
    fn test_hybrid_known_bytes() {
        let payload = HybridData::from_binary(&b"Done"[..]);
        assert_eq!(payload.encoded_size(), 8);
        assert_eq!(
            encode_to_vec(&payload),
            [0x00, 0x00, 0x00, 0x00, 0x44, 0x6F, 0x6E, 0x65]
        );
    }

    #[test]
    fn test_hybrid_metadata_and_binary() {
        let payload = HybridData::new("{\"a\":1}", vec![9u8, 8]);
        let bytes = encode_to_vec(&payload);
        assert_eq!(&bytes[..4], &7u32.to_be_bytes());
        assert_eq!(&bytes[4..11], b"{\"a\":1}");
        assert_eq!(&bytes[11..], &[9, 8]);
    }

    #[test]
    fn test_encode_checks_capacity_once_up_front() {
        let payload = HybridData::new("meta", vec![1u8; 10]);
        let mut buf = [0u8; 12];
        let mut writer = BufferWriter::new(&mut buf);

        let err = payload.encode(&mut writer).unwrap_err();
        assert!(matches!(err, GroupwireError::Capacity { needed: 18, .. }));
        assert_eq!(writer.size(), 0);
    }

    #[test]
    fn test_json_metadata_helpers() {
        #[derive(Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Meta {
            received: bool,
        }

        let payload = HybridData::with_json_metadata(&Meta { received: true }, Bytes::new()).unwrap();
        assert_eq!(payload.metadata, "{\"received\":true}");
        assert_eq!(payload.metadata_json::<Meta>().unwrap(), Meta { received: true });

        let bad = HybridData::from_metadata("not json");
        assert!(matches!(
            bad.metadata_json::<Meta>(),
            Err(GroupwireError::Decoding(_))
        ));
    }

    #[test]
    fn test_boxed_payload_forwards() {
        let boxed: BoxedPayload = Box::new(HybridData::new("m", vec![1u8, 2, 3]));
        assert_eq!(boxed.encoded_size(), 8);
        assert_eq!(encode_to_vec(&boxed), encode_to_vec(&HybridData::new("m", vec![1u8, 2, 3])));
    }

    #[test]
    fn test_pixel_gray_to_rgba() {
        let payload =
            PixelPayload::new(vec![10u8, 20], 2, 1, PixelLayout::Gray8, PixelFormat::Rgba).unwrap();
        assert_eq!(payload.binary_len(), 8);

        let bytes = encode_to_vec(&payload);
        let meta_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let binary = &bytes[4 + meta_len..];
        assert_eq!(binary, &[10, 10, 10, 255, 20, 20, 20, 255]);
    }

    #[test]
    fn test_pixel_rgb_to_rgba() {
        let payload =
            PixelPayload::new(vec![1u8, 2, 3], 1, 1, PixelLayout::Rgb8, PixelFormat::Rgba).unwrap();
        let bytes = encode_to_vec(&payload);
        assert_eq!(&bytes[bytes.len() - 4..], &[1, 2, 3, 255]);
    }

    #[test]
    fn test_pixel_raw_copies_as_is() {
        let pixels = vec![7u8; 2 * 2 * 2];
        let payload =
            PixelPayload::new(pixels.clone(), 2, 2, PixelLayout::Gray16, PixelFormat::Raw).unwrap();
        assert_eq!(payload.binary_len(), 8);
        let bytes = encode_to_vec(&payload);
        assert_eq!(&bytes[bytes.len() - 8..], &pixels[..]);
    }

    #[test]
    fn test_pixel_metadata_describes_image() {
        let payload =
            PixelPayload::new(vec![0u8; 12], 2, 2, PixelLayout::Rgb8, PixelFormat::Rgba).unwrap();
        let meta: serde_json::Value = serde_json::from_str(payload.metadata()).unwrap();
        assert_eq!(meta["width"], 2);
        assert_eq!(meta["height"], 2);
        assert_eq!(meta["channels"], 3);
        assert_eq!(meta["format"], "raw_rgba");
    }

    #[test]
    fn test_pixel_unsupported_conversion_is_encoding_error() {
        let payload =
            PixelPayload::new(vec![0u8; 4], 2, 1, PixelLayout::Gray16, PixelFormat::Rgba).unwrap();
        let mut buf = vec![0u8; payload.encoded_size()];
        let mut writer = BufferWriter::new(&mut buf);
        assert!(matches!(
            payload.encode(&mut writer),
            Err(GroupwireError::Encoding(_))
        ));
    }

    #[test]
    fn test_pixel_size_mismatch_rejected() {
        let result = PixelPayload::new(vec![0u8; 5], 2, 1, PixelLayout::Rgb8, PixelFormat::Raw);
        assert!(matches!(result, Err(GroupwireError::Encoding(_))));
    }
}
