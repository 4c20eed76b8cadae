//! Exposure frame data and metadata (specification §3 "Frame", §4.3).

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binning factor applied by the sensor readout, stored as (x, y) so
/// asymmetric binning is representable even though most adapters only use
/// symmetric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binning {
    pub x: u16,
    pub y: u16,
}

impl Binning {
    pub const ONE_BY_ONE: Binning = Binning { x: 1, y: 1 };
}

/// Metadata describing a captured frame, independent of the pixel payload so
/// it can be logged, persisted, or sent over IPC without the (large) buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub is_bayer: bool,
    pub pixel_pitch_um: f32,
    pub binning: Binning,
    pub exposure_duration_s: f64,
    pub start_timestamp: DateTime<Utc>,
}

/// A captured frame: metadata plus the raw pixel buffer.
///
/// `pixels` is a `Bytes` rather than `Vec<u8>` so downstream consumers
/// (IPC serialization, disk writers, in-process subscribers) can clone a
/// frame cheaply — cloning only bumps a refcount, never copies the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub metadata: FrameMetadata,
    pub pixels: Bytes,
}

impl Frame {
    /// Expected pixel buffer length for `metadata`, given `bit_depth` is
    /// always stored in whole bytes per pixel (8 or 16).
    pub fn expected_pixel_bytes(metadata: &FrameMetadata) -> usize {
        let bytes_per_pixel = if metadata.bit_depth > 8 { 2 } else { 1 };
        metadata.width as usize * metadata.height as usize * bytes_per_pixel
    }

    /// Construct a frame, validating that `pixels` matches the size implied
    /// by `metadata`.
    pub fn new(metadata: FrameMetadata, pixels: Bytes) -> Result<Self, String> {
        let expected = Self::expected_pixel_bytes(&metadata);
        if pixels.len() != expected {
            return Err(format!(
                "pixel buffer length {} does not match expected {expected} for {}x{} @ {}bpp",
                pixels.len(),
                metadata.width,
                metadata.height,
                metadata.bit_depth
            ));
        }
        Ok(Self { metadata, pixels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(bit_depth: u8) -> FrameMetadata {
        FrameMetadata {
            width: 4,
            height: 2,
            bit_depth,
            is_bayer: false,
            pixel_pitch_um: 3.76,
            binning: Binning::ONE_BY_ONE,
            exposure_duration_s: 1.0,
            start_timestamp: Utc::now(),
        }
    }

    #[test]
    fn accepts_correctly_sized_8bit_buffer() {
        let meta = metadata(8);
        let pixels = Bytes::from(vec![0u8; 8]);
        assert!(Frame::new(meta, pixels).is_ok());
    }

    #[test]
    fn accepts_correctly_sized_16bit_buffer() {
        let meta = metadata(16);
        let pixels = Bytes::from(vec![0u8; 16]);
        assert!(Frame::new(meta, pixels).is_ok());
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let meta = metadata(16);
        let pixels = Bytes::from(vec![0u8; 4]);
        assert!(Frame::new(meta, pixels).is_err());
    }
}
