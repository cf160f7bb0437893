//! [`GpuCommands`] on top of the raw `gl` bindings.

use std::ffi::{c_void, CString};
use std::sync::Once;

use anyhow::{bail, Result};
use gl::types::{GLbitfield, GLenum, GLint, GLsizei, GLsizeiptr, GLintptr, GLsync, GLuint};
use render_core::Rect;
use tracing::debug;

use crate::commands::{FenceStatus, GpuCommands, GpuFence};

pub(crate) static GL_INIT_ONCE: Once = Once::new();

/// Issues commands on whatever GL context is current on the calling thread.
#[derive(Debug)]
pub struct GlCommands {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl GlCommands {
    /// Load GL function pointers (once per process) through `gl_loader` and
    /// wrap the current context.
    pub fn load() -> Result<Self> {
        GL_INIT_ONCE.call_once(|| {
            gl_loader::init_gl();
            gl::load_with(|s| gl_loader::get_proc_address(s).cast());
        });
        Self::check_loaded()
    }

    /// Load GL function pointers through a host-provided resolver.
    pub fn load_with(loader: impl FnMut(&'static str) -> *const c_void) -> Result<Self> {
        gl::load_with(loader);
        Self::check_loaded()
    }

    fn check_loaded() -> Result<Self> {
        if !gl::GenTextures::is_loaded() || !gl::FenceSync::is_loaded() {
            bail!("OpenGL function pointers could not be loaded");
        }
        debug!("GL command surface ready");
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

fn data_ptr(data: Option<&[u8]>) -> *const c_void {
    data.map_or(std::ptr::null(), |d| d.as_ptr().cast())
}

fn gen(f: unsafe fn(GLsizei, *mut GLuint)) -> GLuint {
    let mut name: GLuint = 0;
    unsafe { f(1, &mut name) };
    name
}

// SAFETY (all methods): the caller guarantees a current GL context on this
// thread, which `GlCommands` being !Send keeps true for its lifetime.
impl GpuCommands for GlCommands {
    fn create_texture(&self) -> GLuint {
        gen(gl::GenTextures)
    }

    fn delete_texture(&self, texture: GLuint) {
        unsafe { gl::DeleteTextures(1, &texture) };
    }

    fn active_texture(&self, unit: u32) {
        unsafe { gl::ActiveTexture(gl::TEXTURE0 + unit) };
    }

    fn bind_texture(&self, target: GLenum, texture: GLuint) {
        unsafe { gl::BindTexture(target, texture) };
    }

    fn tex_parameter(&self, target: GLenum, pname: GLenum, value: GLint) {
        unsafe { gl::TexParameteri(target, pname, value) };
    }

    fn pixel_store(&self, pname: GLenum, value: GLint) {
        unsafe { gl::PixelStorei(pname, value) };
    }

    fn tex_image_1d(
        &self,
        level: GLint,
        internal_format: GLenum,
        width: u32,
        layout: GLenum,
        data_type: GLenum,
        data: Option<&[u8]>,
    ) {
        unsafe {
            gl::TexImage1D(
                gl::TEXTURE_1D,
                level,
                internal_format as GLint,
                width as GLsizei,
                0,
                layout,
                data_type,
                data_ptr(data),
            )
        };
    }

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
    ) {
        unsafe {
            gl::TexImage2D(
                target,
                level,
                internal_format as GLint,
                width as GLsizei,
                height as GLsizei,
                0,
                layout,
                data_type,
                data_ptr(data),
            )
        };
    }

    fn tex_image_3d(
        &self,
        level: GLint,
        internal_format: GLenum,
        (width, height, depth): (u32, u32, u32),
        layout: GLenum,
        data_type: GLenum,
        data: Option<&[u8]>,
    ) {
        unsafe {
            gl::TexImage3D(
                gl::TEXTURE_3D,
                level,
                internal_format as GLint,
                width as GLsizei,
                height as GLsizei,
                depth as GLsizei,
                0,
                layout,
                data_type,
                data_ptr(data),
            )
        };
    }

    fn tex_image_2d_multisample(&self, samples: u32, internal_format: GLenum, width: u32, height: u32) {
        unsafe {
            gl::TexImage2DMultisample(
                gl::TEXTURE_2D_MULTISAMPLE,
                samples as GLsizei,
                internal_format,
                width as GLsizei,
                height as GLsizei,
                gl::TRUE,
            )
        };
    }

    fn compressed_tex_image_2d(
        &self,
        level: GLint,
        internal_format: GLenum,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        unsafe {
            gl::CompressedTexImage2D(
                gl::TEXTURE_2D,
                level,
                internal_format,
                width as GLsizei,
                height as GLsizei,
                0,
                data.len() as GLsizei,
                data.as_ptr().cast(),
            )
        };
    }

    fn tex_sub_image_1d(&self, rect: Rect, layout: GLenum, data_type: GLenum, data: &[u8]) {
        unsafe {
            gl::TexSubImage1D(
                gl::TEXTURE_1D,
                0,
                rect.x as GLint,
                rect.width as GLsizei,
                layout,
                data_type,
                data.as_ptr().cast(),
            )
        };
    }

    fn tex_sub_image_2d(
        &self,
        target: GLenum,
        rect: Rect,
        layout: GLenum,
        data_type: GLenum,
        data: &[u8],
    ) {
        unsafe {
            gl::TexSubImage2D(
                target,
                0,
                rect.x as GLint,
                rect.y as GLint,
                rect.width as GLsizei,
                rect.height as GLsizei,
                layout,
                data_type,
                data.as_ptr().cast(),
            )
        };
    }

    fn tex_sub_image_3d(&self, rect: Rect, layout: GLenum, data_type: GLenum, data: &[u8]) {
        unsafe {
            gl::TexSubImage3D(
                gl::TEXTURE_3D,
                0,
                rect.x as GLint,
                rect.y as GLint,
                rect.z as GLint,
                rect.width as GLsizei,
                rect.height as GLsizei,
                rect.depth as GLsizei,
                layout,
                data_type,
                data.as_ptr().cast(),
            )
        };
    }

    fn generate_mipmap(&self, target: GLenum) {
        unsafe { gl::GenerateMipmap(target) };
    }

    fn create_buffer(&self) -> GLuint {
        gen(gl::GenBuffers)
    }

    fn delete_buffer(&self, buffer: GLuint) {
        unsafe { gl::DeleteBuffers(1, &buffer) };
    }

    fn bind_buffer(&self, target: GLenum, buffer: GLuint) {
        unsafe { gl::BindBuffer(target, buffer) };
    }

    fn buffer_data(&self, target: GLenum, size: usize, data: Option<&[u8]>, usage: GLenum) {
        unsafe { gl::BufferData(target, size as GLsizeiptr, data_ptr(data), usage) };
    }

    fn buffer_sub_data(&self, target: GLenum, offset: usize, data: &[u8]) {
        unsafe {
            gl::BufferSubData(
                target,
                offset as GLintptr,
                data.len() as GLsizeiptr,
                data.as_ptr().cast(),
            )
        };
    }

    fn map_buffer_range(
        &self,
        target: GLenum,
        offset: usize,
        length: usize,
        access: GLbitfield,
    ) -> *mut u8 {
        unsafe {
            gl::MapBufferRange(target, offset as GLintptr, length as GLsizeiptr, access).cast()
        }
    }

    fn flush_mapped_buffer_range(&self, target: GLenum, offset: usize, length: usize) {
        unsafe { gl::FlushMappedBufferRange(target, offset as GLintptr, length as GLsizeiptr) };
    }

    fn unmap_buffer(&self, target: GLenum) -> bool {
        unsafe { gl::UnmapBuffer(target) == gl::TRUE }
    }

    fn create_framebuffer(&self) -> GLuint {
        gen(gl::GenFramebuffers)
    }

    fn delete_framebuffer(&self, framebuffer: GLuint) {
        unsafe { gl::DeleteFramebuffers(1, &framebuffer) };
    }

    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        unsafe { gl::BindFramebuffer(target, framebuffer) };
    }

    fn framebuffer_texture(&self, target: GLenum, attachment: GLenum, texture: GLuint, level: GLint) {
        unsafe { gl::FramebufferTexture(target, attachment, texture, level) };
    }

    fn framebuffer_renderbuffer(&self, target: GLenum, attachment: GLenum, renderbuffer: GLuint) {
        unsafe { gl::FramebufferRenderbuffer(target, attachment, gl::RENDERBUFFER, renderbuffer) };
    }

    fn check_framebuffer_status(&self, target: GLenum) -> GLenum {
        unsafe { gl::CheckFramebufferStatus(target) }
    }

    fn create_renderbuffer(&self) -> GLuint {
        gen(gl::GenRenderbuffers)
    }

    fn delete_renderbuffer(&self, renderbuffer: GLuint) {
        unsafe { gl::DeleteRenderbuffers(1, &renderbuffer) };
    }

    fn bind_renderbuffer(&self, renderbuffer: GLuint) {
        unsafe { gl::BindRenderbuffer(gl::RENDERBUFFER, renderbuffer) };
    }

    fn renderbuffer_storage(&self, samples: u32, internal_format: GLenum, width: u32, height: u32) {
        unsafe {
            gl::RenderbufferStorageMultisample(
                gl::RENDERBUFFER,
                samples as GLsizei,
                internal_format,
                width as GLsizei,
                height as GLsizei,
            )
        };
    }

    fn create_vertex_array(&self) -> GLuint {
        gen(gl::GenVertexArrays)
    }

    fn delete_vertex_array(&self, vertex_array: GLuint) {
        unsafe { gl::DeleteVertexArrays(1, &vertex_array) };
    }

    fn bind_vertex_array(&self, vertex_array: GLuint) {
        unsafe { gl::BindVertexArray(vertex_array) };
    }

    fn use_program(&self, program: GLuint) {
        unsafe { gl::UseProgram(program) };
    }

    fn attrib_location(&self, program: GLuint, name: &str) -> GLint {
        let Ok(name) = CString::new(name) else {
            return -1;
        };
        unsafe { gl::GetAttribLocation(program, name.as_ptr()) }
    }

    fn enable_vertex_attrib(&self, location: GLuint) {
        unsafe { gl::EnableVertexAttribArray(location) };
    }

    fn disable_vertex_attrib(&self, location: GLuint) {
        unsafe { gl::DisableVertexAttribArray(location) };
    }

    fn vertex_attrib_pointer(
        &self,
        location: GLuint,
        components: GLint,
        data_type: GLenum,
        normalized: bool,
        stride: usize,
        offset: usize,
    ) {
        unsafe {
            gl::VertexAttribPointer(
                location,
                components,
                data_type,
                if normalized { gl::TRUE } else { gl::FALSE },
                stride as GLsizei,
                offset as *const c_void,
            )
        };
    }

    fn fence_sync(&self) -> Option<GpuFence> {
        let sync = unsafe { gl::FenceSync(gl::SYNC_GPU_COMMANDS_COMPLETE, 0) };
        (!sync.is_null()).then(|| GpuFence::from_raw(sync as usize))
    }

    fn client_wait_sync(&self, fence: &GpuFence, timeout_ns: u64) -> FenceStatus {
        let result =
            unsafe { gl::ClientWaitSync(fence.raw() as GLsync, gl::SYNC_FLUSH_COMMANDS_BIT, timeout_ns) };
        match result {
            gl::ALREADY_SIGNALED | gl::CONDITION_SATISFIED => FenceStatus::Signaled,
            gl::TIMEOUT_EXPIRED => FenceStatus::Pending,
            _ => FenceStatus::Failed,
        }
    }

    fn delete_sync(&self, fence: GpuFence) {
        unsafe { gl::DeleteSync(fence.raw() as GLsync) };
    }

    fn flush(&self) {
        unsafe { gl::Flush() };
    }

    fn get_error(&self) -> GLenum {
        unsafe { gl::GetError() }
    }
}
