//! Decoded video frame value types.
//!
//! Frames are what flows between the decode stage and presentation. They are
//! plain owned buffers: the pipeline clones nothing on the hot path, frames
//! move through the queues and into the history ring by value.

use crate::timestamp::Timestamp;
use bitflags::bitflags;
use std::fmt;

/// Pixel format for decoded frames.
///
/// Only the formats the pipeline actually moves: planar YUV out of decoders,
/// packed RGBA after conversion for presentation, and grayscale for
/// single-plane analysis input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, 12bpp.
    Yuv420p,
    /// Planar YUV 4:4:4, 24bpp.
    Yuv444p,
    /// Y plane plus interleaved UV plane.
    Nv12,
    /// Packed RGBA, 32bpp.
    Rgba,
    /// Grayscale, 8bpp.
    Gray8,
}

impl PixelFormat {
    /// Number of planes for this pixel format.
    pub fn num_planes(&self) -> usize {
        match self {
            Self::Yuv420p | Self::Yuv444p => 3,
            Self::Nv12 => 2,
            Self::Rgba | Self::Gray8 => 1,
        }
    }

    /// Chroma subsampling factors (horizontal, vertical).
    pub fn chroma_subsampling(&self) -> (u32, u32) {
        match self {
            Self::Yuv420p | Self::Nv12 => (2, 2),
            _ => (1, 1),
        }
    }

    /// Bytes per sample in a given plane's row, per pixel of that plane.
    fn bytes_per_sample(&self, plane: usize) -> usize {
        match self {
            Self::Rgba => 4,
            Self::Nv12 if plane == 1 => 2,
            _ => 1,
        }
    }

    /// Row stride in bytes of a plane at the given frame width.
    pub fn plane_stride(&self, plane: usize, width: u32) -> usize {
        let (hsub, _) = self.chroma_subsampling();
        let w = if plane == 0 {
            width as usize
        } else {
            (width as usize).div_ceil(hsub as usize)
        };
        w * self.bytes_per_sample(plane)
    }

    /// Number of rows of a plane at the given frame height.
    pub fn plane_rows(&self, plane: usize, height: u32) -> usize {
        let (_, vsub) = self.chroma_subsampling();
        if plane == 0 {
            height as usize
        } else {
            (height as usize).div_ceil(vsub as usize)
        }
    }
}

bitflags! {
    /// Flags for frame properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u32 {
        /// Decoded from a keyframe.
        const KEYFRAME = 0x0001;
        /// Decoder reported corruption in this frame.
        const CORRUPT = 0x0002;
    }
}

/// Owned planar pixel storage.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
    planes: Vec<Vec<u8>>,
}

impl FrameBuffer {
    /// Allocate a zero-filled buffer for the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let planes = (0..format.num_planes())
            .map(|p| vec![0u8; format.plane_stride(p, width) * format.plane_rows(p, height)])
            .collect();
        Self {
            width,
            height,
            format,
            planes,
        }
    }

    /// Number of planes.
    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Read access to a plane.
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        self.planes.get(index).map(|p| p.as_slice())
    }

    /// Write access to a plane.
    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.planes.get_mut(index).map(|p| p.as_mut_slice())
    }

    /// Row stride in bytes of a plane.
    pub fn stride(&self, plane: usize) -> usize {
        self.format.plane_stride(plane, self.width)
    }

    /// Total payload size in bytes across all planes.
    pub fn total_size(&self) -> usize {
        self.planes.iter().map(|p| p.len()).sum()
    }

    /// Fill every plane with a constant byte.
    pub fn fill(&mut self, value: u8) {
        for plane in &mut self.planes {
            plane.fill(value);
        }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.total_size())
            .finish()
    }
}

/// A decoded, presentation-timestamped video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    buffer: FrameBuffer,
    /// Presentation timestamp.
    pub pts: Timestamp,
    /// Frame flags.
    pub flags: FrameFlags,
}

impl Frame {
    /// Create a new zero-filled frame.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            buffer: FrameBuffer::new(width, height, format),
            pts: Timestamp::none(),
            flags: FrameFlags::empty(),
        }
    }

    /// Wrap an existing buffer.
    pub fn from_buffer(buffer: FrameBuffer) -> Self {
        Self {
            buffer,
            pts: Timestamp::none(),
            flags: FrameFlags::empty(),
        }
    }

    /// Set the presentation timestamp (builder style).
    pub fn with_pts(mut self, pts: Timestamp) -> Self {
        self.pts = pts;
        self
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.buffer.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.buffer.height
    }

    /// Pixel format.
    pub fn format(&self) -> PixelFormat {
        self.buffer.format
    }

    /// Check if this frame came from a keyframe.
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(FrameFlags::KEYFRAME)
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Mutable access to the underlying buffer.
    pub fn buffer_mut(&mut self) -> &mut FrameBuffer {
        &mut self.buffer
    }

    /// Read access to a plane.
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        self.buffer.plane(index)
    }

    /// Write access to a plane.
    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.buffer.plane_mut(index)
    }

    /// Row stride in bytes of a plane.
    pub fn stride(&self, plane: usize) -> usize {
        self.buffer.stride(plane)
    }

    /// Total payload size in bytes, used as queue weight.
    pub fn total_size(&self) -> usize {
        self.buffer.total_size()
    }
}
