//! Decoded video frames.

use crate::error::ModelError;

/// Bytes per RGBA8 pixel.
pub const RGBA_BYTES: usize = 4;

/// A tightly packed RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl VideoFrame {
    /// Wrap an RGBA8 buffer, checking its length.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ModelError> {
        let expected = width as usize * height as usize * RGBA_BYTES;
        if data.len() != expected {
            return Err(ModelError::frame(format!(
                "{width}x{height} RGBA needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// An all-black, opaque frame.
    pub fn blank(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; width as usize * height as usize * RGBA_BYTES];
        for px in data.chunks_exact_mut(RGBA_BYTES) {
            px[3] = 0xff;
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// A frame filled with one color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * RGBA_BYTES)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * RGBA_BYTES
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.stride() + x as usize * RGBA_BYTES;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[offset..offset + RGBA_BYTES]);
        px
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let offset = y as usize * self.stride() + x as usize * RGBA_BYTES;
        self.data[offset..offset + RGBA_BYTES].copy_from_slice(&rgba);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
