//! The GPU command surface the mirror objects are written against.
//!
//! Everything in this crate issues GPU work through [`GpuCommands`] rather
//! than calling `gl` directly, so the same mirror logic runs on a real
//! context ([`GlCommands`](crate::GlCommands)) and under test. Every method
//! must be called from the thread that owns the corresponding context.

use gl::types::{GLbitfield, GLenum, GLint, GLuint};
use render_core::Rect;

/// Opaque GPU fence. For GL this is a `GLsync` stored as an address.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct GpuFence(usize);

impl GpuFence {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Result of polling or waiting on a [`GpuFence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    Pending,
    Failed,
}

/// Create/destroy/bind/upload primitives for textures, buffers, framebuffers,
/// renderbuffers and vertex arrays, plus fences.
///
/// Handles returned by the `create_*` methods are zero on failure.
pub trait GpuCommands {
    // -- textures ----------------------------------------------------------

    fn create_texture(&self) -> GLuint;
    fn delete_texture(&self, texture: GLuint);
    fn active_texture(&self, unit: u32);
    fn bind_texture(&self, target: GLenum, texture: GLuint);
    fn tex_parameter(&self, target: GLenum, pname: GLenum, value: GLint);
    fn pixel_store(&self, pname: GLenum, value: GLint);
    fn tex_image_1d(
        &self,
        level: GLint,
        internal_format: GLenum,
        width: u32,
        layout: GLenum,
        data_type: GLenum,
        data: Option<&[u8]>,
    );
    fn tex_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        internal_format: GLenum,
        width: u32,
        height: u32,
        layout: GLenum,
        data_type: GLenum,
        data: Option<&[u8]>,
    );
    fn tex_image_3d(
        &self,
        level: GLint,
        internal_format: GLenum,
        size: (u32, u32, u32),
        layout: GLenum,
        data_type: GLenum,
        data: Option<&[u8]>,
    );
    fn tex_image_2d_multisample(
        &self,
        samples: u32,
        internal_format: GLenum,
        width: u32,
        height: u32,
    );
    fn compressed_tex_image_2d(
        &self,
        level: GLint,
        internal_format: GLenum,
        width: u32,
        height: u32,
        data: &[u8],
    );
    /// `data` starts at the first texel of `rect`; rows are spaced by the
    /// current `UNPACK_ROW_LENGTH`.
    fn tex_sub_image_1d(&self, rect: Rect, layout: GLenum, data_type: GLenum, data: &[u8]);
    fn tex_sub_image_2d(
        &self,
        target: GLenum,
        rect: Rect,
        layout: GLenum,
        data_type: GLenum,
        data: &[u8],
    );
    fn tex_sub_image_3d(&self, rect: Rect, layout: GLenum, data_type: GLenum, data: &[u8]);
    fn generate_mipmap(&self, target: GLenum);

    // -- buffers -----------------------------------------------------------

    fn create_buffer(&self) -> GLuint;
    fn delete_buffer(&self, buffer: GLuint);
    fn bind_buffer(&self, target: GLenum, buffer: GLuint);
    fn buffer_data(&self, target: GLenum, size: usize, data: Option<&[u8]>, usage: GLenum);
    fn buffer_sub_data(&self, target: GLenum, offset: usize, data: &[u8]);
    /// Null on failure.
    fn map_buffer_range(
        &self,
        target: GLenum,
        offset: usize,
        length: usize,
        access: GLbitfield,
    ) -> *mut u8;
    /// `offset` is relative to the start of the mapped range.
    fn flush_mapped_buffer_range(&self, target: GLenum, offset: usize, length: usize);
    fn unmap_buffer(&self, target: GLenum) -> bool;

    // -- framebuffers / renderbuffers ----------------------------------------

    fn create_framebuffer(&self) -> GLuint;
    fn delete_framebuffer(&self, framebuffer: GLuint);
    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint);
    fn framebuffer_texture(&self, target: GLenum, attachment: GLenum, texture: GLuint, level: GLint);
    fn framebuffer_renderbuffer(&self, target: GLenum, attachment: GLenum, renderbuffer: GLuint);
    fn check_framebuffer_status(&self, target: GLenum) -> GLenum;

    fn create_renderbuffer(&self) -> GLuint;
    fn delete_renderbuffer(&self, renderbuffer: GLuint);
    fn bind_renderbuffer(&self, renderbuffer: GLuint);
    fn renderbuffer_storage(&self, samples: u32, internal_format: GLenum, width: u32, height: u32);

    // -- vertex arrays / programs --------------------------------------------

    fn create_vertex_array(&self) -> GLuint;
    fn delete_vertex_array(&self, vertex_array: GLuint);
    fn bind_vertex_array(&self, vertex_array: GLuint);
    fn use_program(&self, program: GLuint);
    /// Negative when the program has no active attribute of that name.
    fn attrib_location(&self, program: GLuint, name: &str) -> GLint;
    fn enable_vertex_attrib(&self, location: GLuint);
    fn disable_vertex_attrib(&self, location: GLuint);
    fn vertex_attrib_pointer(
        &self,
        location: GLuint,
        components: GLint,
        data_type: GLenum,
        normalized: bool,
        stride: usize,
        offset: usize,
    );

    // -- synchronisation -------------------------------------------------------

    fn fence_sync(&self) -> Option<GpuFence>;
    /// Wait up to `timeout_ns`; zero polls without blocking.
    fn client_wait_sync(&self, fence: &GpuFence, timeout_ns: u64) -> FenceStatus;
    fn delete_sync(&self, fence: GpuFence);
    fn flush(&self);

    fn get_error(&self) -> GLenum;
}
