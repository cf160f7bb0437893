//! Pixel formats as the GL upload path sees them.

use gl::types::GLenum;

/// Client-side pixel layout plus the GL internal format used for storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    /// Channel layout of client data (`gl::RGBA`, `gl::BGRA`, `gl::RED`, ...).
    pub layout: GLenum,
    /// Component type of client data (`gl::UNSIGNED_BYTE`, `gl::FLOAT`, ...).
    pub data_type: GLenum,
    /// Sized internal format (`gl::RGBA8`, ...), or the compressed format
    /// enum when `compressed` is set.
    pub internal_format: GLenum,
    /// Bytes per pixel of client data. Zero for compressed formats.
    pub bytes_per_pixel: u32,
    pub compressed: bool,
}

impl PixelFormat {
    pub const fn rgba8() -> Self {
        Self::uncompressed(gl::RGBA, gl::UNSIGNED_BYTE, gl::RGBA8, 4)
    }

    pub const fn bgra8() -> Self {
        Self::uncompressed(gl::BGRA, gl::UNSIGNED_BYTE, gl::RGBA8, 4)
    }

    pub const fn rgb8() -> Self {
        Self::uncompressed(gl::RGB, gl::UNSIGNED_BYTE, gl::RGB8, 3)
    }

    pub const fn red8() -> Self {
        Self::uncompressed(gl::RED, gl::UNSIGNED_BYTE, gl::R8, 1)
    }

    pub const fn rgba32f() -> Self {
        Self::uncompressed(gl::RGBA, gl::FLOAT, gl::RGBA32F, 16)
    }

    pub const fn depth24_stencil8() -> Self {
        Self::uncompressed(gl::DEPTH_STENCIL, gl::UNSIGNED_INT_24_8, gl::DEPTH24_STENCIL8, 4)
    }

    pub const fn uncompressed(
        layout: GLenum,
        data_type: GLenum,
        internal_format: GLenum,
        bytes_per_pixel: u32,
    ) -> Self {
        Self {
            layout,
            data_type,
            internal_format,
            bytes_per_pixel,
            compressed: false,
        }
    }

    /// A block-compressed format; data is uploaded as one opaque blob.
    pub const fn compressed(internal_format: GLenum) -> Self {
        Self {
            layout: 0,
            data_type: 0,
            internal_format,
            bytes_per_pixel: 0,
            compressed: true,
        }
    }

    /// Bytes in one tightly packed row of `width` pixels.
    pub fn row_bytes(&self, width: u32) -> usize {
        width as usize * self.bytes_per_pixel as usize
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgba8()
    }
}
