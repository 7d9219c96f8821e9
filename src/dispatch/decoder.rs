//! Raw YUV buffer to packed RGB conversion.

use crate::capture::{nv21_len, DecodedFrame, RawFrame};
use thiserror::Error;

/// Errors raised while decoding a raw frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer holds {actual} bytes but {width}x{height} needs {expected}")]
    BufferTooSmall {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Stateless conversion from a raw buffer to RGB24.
pub trait PixelDecoder: Send + Sync {
    fn decode(&self, frame: &RawFrame, width: u32, height: u32) -> Result<DecodedFrame, DecodeError>;
}

/// NV21 (YUV420 semi-planar, interleaved V/U) decoder using integer BT.601.
#[derive(Debug, Default, Clone, Copy)]
pub struct Yuv420SpDecoder;

impl Yuv420SpDecoder {
    /// Bytes in a YUV420SP frame of the given size.
    pub fn frame_len(width: u32, height: u32) -> usize {
        nv21_len(width, height)
    }
}

#[inline]
fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

impl PixelDecoder for Yuv420SpDecoder {
    fn decode(&self, frame: &RawFrame, width: u32, height: u32) -> Result<DecodedFrame, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::InvalidDimensions { width, height });
        }

        let expected = Self::frame_len(width, height);
        let bytes = frame.bytes();
        if bytes.len() < expected {
            return Err(DecodeError::BufferTooSmall {
                width,
                height,
                expected,
                actual: bytes.len(),
            });
        }

        let (w, h) = (width as usize, height as usize);
        // one V/U pair per 2x2 block, last block may be partial
        let stride = 2 * w.div_ceil(2);
        let (y_plane, vu_plane) = bytes[..expected].split_at(w * h);
        let mut rgb = Vec::with_capacity(w * h * 3);

        for row in 0..h {
            let y_row = &y_plane[row * w..(row + 1) * w];
            let vu_row = &vu_plane[(row / 2) * stride..(row / 2 + 1) * stride];
            for (col, &luma) in y_row.iter().enumerate() {
                let pair = col & !1;
                let v = vu_row[pair] as i32 - 128;
                let u = vu_row[pair + 1] as i32 - 128;
                let y = luma as i32;

                rgb.push(clamp(y + ((1404 * v) >> 10)));
                rgb.push(clamp(y - ((345 * u + 715 * v) >> 10)));
                rgb.push(clamp(y + ((1774 * u) >> 10)));
            }
        }

        Ok(DecodedFrame::new(rgb, width, height, frame.sequence(), frame.role()))
    }
}
