//! frame — decoded image buffers handed between pipeline stages
//!
//! Pixels are stored interleaved and row-major, blue/green/red for three
//! channel frames.  Rows may carry padding, so every access goes through
//! `stride` rather than `width * channels`.

use std::fmt;

use crate::error::{Result, TrackError};

/// Storage depth of a single channel sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDepth {
    U8,
    U16,
}

impl SampleDepth {
    pub fn bytes(self) -> usize {
        match self {
            SampleDepth::U8 => 1,
            SampleDepth::U16 => 2,
        }
    }
}

/// Geometry used to decide whether two buffers are interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Bytes per row, padding included.
    pub stride: usize,
}

impl FrameShape {
    pub fn component_count(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{} (stride {})",
            self.width, self.height, self.channels, self.stride
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub stride: usize,
    pub depth: SampleDepth,
}

impl Frame {
    /// A zeroed, tightly packed 8-bit frame.
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        let stride = width as usize * channels as usize;
        Self {
            data: vec![0u8; stride * height as usize],
            width,
            height,
            channels,
            stride,
            depth: SampleDepth::U8,
        }
    }

    /// Wrap tightly packed 8-bit samples.
    pub fn from_raw(width: u32, height: u32, channels: u32, data: Vec<u8>) -> Result<Self> {
        let stride = width as usize * channels as usize;
        Self::from_raw_with_stride(width, height, channels, stride, data)
    }

    /// Wrap 8-bit samples whose rows are `stride` bytes apart.
    pub fn from_raw_with_stride(
        width: u32,
        height: u32,
        channels: u32,
        stride: usize,
        data: Vec<u8>,
    ) -> Result<Self> {
        let row_len = width as usize * channels as usize;
        let expected = stride * height as usize;
        if stride < row_len || data.len() < expected {
            return Err(TrackError::BufferSize {
                expected: expected.max(row_len * height as usize),
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
            stride,
            depth: SampleDepth::U8,
        })
    }

    pub fn shape(&self) -> FrameShape {
        FrameShape {
            width: self.width,
            height: self.height,
            channels: self.channels,
            stride: self.stride,
        }
    }

    pub fn component_count(&self) -> usize {
        self.shape().component_count()
    }

    /// Fails unless samples are 8 bits wide.
    pub fn ensure_u8(&self) -> Result<()> {
        match self.depth {
            SampleDepth::U8 => Ok(()),
            other => Err(TrackError::UnsupportedDepth(other)),
        }
    }

    /// Fails unless `self` and `other` agree on rows, columns, channels and stride.
    pub fn ensure_compatible(&self, other: &Frame) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(TrackError::ShapeMismatch {
                expected: self.shape(),
                found: other.shape(),
            });
        }
        Ok(())
    }

    /// Samples of row `y`, padding excluded.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * self.channels as usize]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let len = self.width as usize * self.channels as usize;
        &mut self.data[start..start + len]
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels as usize;
        let start = x as usize * c;
        &self.row(y)[start..start + c]
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let c = self.channels as usize;
        let start = x as usize * c;
        &mut self.row_mut(y)[start..start + c]
    }
}
