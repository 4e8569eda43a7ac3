//! Frame message types shared between the transport shim and the writer.
//!
//! A frame arrives already encoded by an upstream compression stage; the
//! engine never inspects the payload beyond its length. Pixel geometry and
//! element type travel alongside the payload because the first frame routed
//! to a container determines the shape of its primary dataset.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Encoding tag stamped on payloads by the upstream bitshuffle-LZ4 stage.
pub const BITSHUFFLE_LZ4_ENCODING: &str = "bs16-lz4<";

/// Byte length of the bitshuffle-LZ4 payload prologue: a big-endian i64
/// total-element-bytes field followed by a big-endian i32 block size.
pub const BITSHUFFLE_PROLOGUE_LEN: usize = 12;

/// Two-dimensional pixel geometry of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    /// Number of pixel rows (slow axis).
    pub rows: u32,
    /// Number of pixel columns (fast axis).
    pub cols: u32,
}

impl FrameShape {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }

    /// Total number of pixels in one frame.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.rows) * u64::from(self.cols)
    }
}

/// Fixed-width scalar element type of a frame's pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    UInt8,
    UInt16,
    UInt32,
    Int16,
    Int32,
    Float32,
    Float64,
}

impl PixelType {
    /// Size of one element in bytes.
    pub fn item_size(&self) -> u64 {
        match self {
            PixelType::UInt8 => 1,
            PixelType::UInt16 | PixelType::Int16 => 2,
            PixelType::UInt32 | PixelType::Int32 | PixelType::Float32 => 4,
            PixelType::Float64 => 8,
        }
    }

    /// Little-endian type descriptor as recorded in container metadata.
    pub fn type_descriptor(&self) -> &'static str {
        match self {
            PixelType::UInt8 => "|u1",
            PixelType::UInt16 => "<u2",
            PixelType::UInt32 => "<u4",
            PixelType::Int16 => "<i2",
            PixelType::Int32 => "<i4",
            PixelType::Float32 => "<f4",
            PixelType::Float64 => "<f8",
        }
    }
}

/// One unit of streamed detector data.
///
/// The payload is opaque, pre-encoded bytes; it is written into storage
/// verbatim (the direct-chunk-write path). `Bytes` keeps the hot path free
/// of copies between the transport and the writer.
#[derive(Debug, Clone)]
pub struct FrameMessage {
    /// Global, non-negative frame index assigned by the source.
    pub frame_index: u64,
    /// Pixel geometry of the frame.
    pub shape: FrameShape,
    /// Element type of the frame's pixels.
    pub pixel_type: PixelType,
    /// Payload encoding tag as reported by the upstream stage, if any.
    pub encoding: Option<String>,
    /// Pre-encoded payload bytes.
    pub data: Bytes,
}

impl FrameMessage {
    /// Uncompressed byte length implied by shape and element type.
    pub fn raw_frame_len(&self) -> u64 {
        self.shape.pixel_count() * self.pixel_type.item_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_sizes() {
        assert_eq!(PixelType::UInt8.item_size(), 1);
        assert_eq!(PixelType::UInt16.item_size(), 2);
        assert_eq!(PixelType::Int32.item_size(), 4);
        assert_eq!(PixelType::Float64.item_size(), 8);
    }

    #[test]
    fn test_type_descriptors_are_little_endian() {
        assert_eq!(PixelType::UInt16.type_descriptor(), "<u2");
        assert_eq!(PixelType::Float32.type_descriptor(), "<f4");
        // Single-byte types carry no byte order.
        assert_eq!(PixelType::UInt8.type_descriptor(), "|u1");
    }

    #[test]
    fn test_pixel_type_serde_names() {
        assert_eq!(
            serde_json::to_string(&PixelType::UInt16).unwrap(),
            "\"uint16\""
        );
        let parsed: PixelType = serde_json::from_str("\"float32\"").unwrap();
        assert_eq!(parsed, PixelType::Float32);
    }

    #[test]
    fn test_raw_frame_len() {
        let frame = FrameMessage {
            frame_index: 0,
            shape: FrameShape::new(512, 1024),
            pixel_type: PixelType::UInt16,
            encoding: Some(BITSHUFFLE_LZ4_ENCODING.to_string()),
            data: Bytes::from_static(&[0u8; 16]),
        };
        assert_eq!(frame.raw_frame_len(), 512 * 1024 * 2);
    }
}
