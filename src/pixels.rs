use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::{LuminaError, LuminaResult};

/// Element type of a pixel buffer. All buffers are 4-channel RGBA, tightly
/// packed, row-major, with no row padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit unsigned normalized per channel (4 bytes per texel).
    Rgba8,
    /// Half-precision float per channel (8 bytes per texel).
    RgbaHalf,
}

impl PixelFormat {
    /// Bytes occupied by one RGBA texel.
    pub fn bytes_per_texel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::RgbaHalf => 8,
        }
    }
}

/// Backing storage for a [`PixelBuffer`], discriminated by element type.
#[derive(Clone, Debug)]
pub enum PixelData {
    Byte(Vec<u8>),
    Half(Vec<f16>),
}

/// A rendered (or accumulating) RGBA frame.
///
/// This is the unit of exchange between a backend and the presentation path:
/// backends write into it, [`crate::display::DisplayPipeline::blit`] uploads
/// sub-regions of it.
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: PixelData,
}

impl PixelBuffer {
    /// Allocate a zero-filled buffer of the given format and size.
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        let texels = width as usize * height as usize * 4;
        let data = match format {
            PixelFormat::Rgba8 => PixelData::Byte(vec![0; texels]),
            PixelFormat::RgbaHalf => PixelData::Half(vec![f16::ZERO; texels]),
        };
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

    pub fn format(&self) -> PixelFormat {
        match self.data {
            PixelData::Byte(_) => PixelFormat::Rgba8,
            PixelData::Half(_) => PixelFormat::RgbaHalf,
        }
    }

    /// Total byte length of the backing storage.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format().bytes_per_texel()
    }

    /// The whole buffer as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            PixelData::Byte(v) => v,
            PixelData::Half(v) => bytemuck::cast_slice(v),
        }
    }

    /// The whole buffer as raw mutable bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.data {
            PixelData::Byte(v) => v,
            PixelData::Half(v) => bytemuck::cast_slice_mut(v),
        }
    }

    /// Raw bytes of a sub-region starting `row_offset` rows into the buffer
    /// and spanning `height` rows of `width` texels. The region's row stride
    /// is `width * 4` elements, so `width` must equal the buffer width.
    pub fn region_bytes(&self, row_offset: u32, width: u32, height: u32) -> LuminaResult<&[u8]> {
        if width != self.width {
            return Err(LuminaError::validation(format!(
                "region width {} does not match buffer width {}",
                width, self.width
            )));
        }
        if row_offset + height > self.height {
            return Err(LuminaError::validation(format!(
                "region rows {}..{} exceed buffer height {}",
                row_offset,
                row_offset + height,
                self.height
            )));
        }
        let texel = self.format().bytes_per_texel();
        let start = row_offset as usize * width as usize * texel;
        let len = height as usize * width as usize * texel;
        Ok(&self.as_bytes()[start..start + len])
    }
}
