//! Frame types moving from the device callback to the analyzer.

use crate::device::DeviceRole;
use chrono::{DateTime, Utc};
use std::time::Instant;

/// Raw YUV-family buffer copied out of a device callback.
///
/// The driver reuses its backing storage once the callback returns, so the
/// bytes are always copied, never aliased.
#[derive(Clone)]
pub struct RawFrame {
    /// Copied driver bytes.
    bytes: Vec<u8>,
    /// Role of the stream the frame came from.
    role: DeviceRole,
    /// Monotonic per-role sequence number.
    sequence: u64,
    /// Wall-clock arrival time.
    arrived_at: DateTime<Utc>,
    /// Monotonic arrival time.
    received: Instant,
}

impl RawFrame {
    /// Copies `buffer` into a new frame.
    pub fn copy_from(role: DeviceRole, sequence: u64, buffer: &[u8]) -> Self {
        Self {
            bytes: buffer.to_vec(),
            role,
            sequence,
            arrived_at: Utc::now(),
            received: Instant::now(),
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wall-clock arrival time.
    #[inline]
    pub fn arrived_at(&self) -> DateTime<Utc> {
        self.arrived_at
    }

    /// Monotonic arrival time.
    #[inline]
    pub fn received(&self) -> Instant {
        self.received
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("role", &self.role)
            .field("sequence", &self.sequence)
            .field("arrived_at", &self.arrived_at)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Packed RGB24 frame decoded from exactly one [`RawFrame`].
///
/// Not `Clone`: it is moved into the analyzer and consumed there.
pub struct DecodedFrame {
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    sequence: u64,
    role: DeviceRole,
}

impl DecodedFrame {
    pub fn new(rgb: Vec<u8>, width: u32, height: u32, sequence: u64, role: DeviceRole) -> Self {
        Self {
            rgb,
            width,
            height,
            sequence,
            role,
        }
    }

    /// Packed RGB bytes, row-major.
    #[inline]
    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    /// Consumes the frame, returning its pixel buffer.
    pub fn into_rgb(self) -> Vec<u8> {
        self.rgb
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Validates that the buffer holds three bytes per pixel.
    pub fn is_valid(&self) -> bool {
        self.rgb.len() == self.pixel_count() * 3
    }
}

impl std::fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("role", &self.role)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("rgb_bytes", &self.rgb.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_frame_copies_buffer() {
        let mut driver_buffer = vec![7u8; 16];
        let frame = RawFrame::copy_from(DeviceRole::LeftInfrared, 3, &driver_buffer);

        // driver reuses its storage
        driver_buffer.fill(0);

        assert_eq!(frame.bytes(), &[7u8; 16][..]);
        assert_eq!(frame.sequence(), 3);
        assert_eq!(frame.role(), DeviceRole::LeftInfrared);
    }

    #[test]
    fn test_decoded_frame_validity() {
        let frame = DecodedFrame::new(vec![0u8; 4 * 2 * 3], 4, 2, 1, DeviceRole::RightVisible);
        assert!(frame.is_valid());

        let short = DecodedFrame::new(vec![0u8; 5], 4, 2, 1, DeviceRole::RightVisible);
        assert!(!short.is_valid());
    }
}
