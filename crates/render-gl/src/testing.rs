//! A [`GpuCommands`] implementation that records calls instead of talking to
//! a driver.
//!
//! Handles are handed out from one increasing counter, buffer mappings point
//! into real memory, and fence/framebuffer status and attribute locations can
//! be steered by the test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use gl::types::{GLbitfield, GLenum, GLint, GLuint};
use parking_lot::Mutex;
use render_core::Rect;

use crate::commands::{FenceStatus, GpuCommands, GpuFence};

/// One recorded command. Pixel payloads are recorded by length; the bytes of
/// texture uploads are kept separately (see [`RecordingCommands::uploads`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateTexture(GLuint),
    DeleteTexture(GLuint),
    ActiveTexture(u32),
    BindTexture(GLenum, GLuint),
    TexParameter(GLenum, GLenum, GLint),
    PixelStore(GLenum, GLint),
    TexImage1D { width: u32, data_len: Option<usize> },
    TexImage2D { target: GLenum, internal_format: GLenum, width: u32, height: u32, data_len: Option<usize> },
    TexImage3D { size: (u32, u32, u32), data_len: Option<usize> },
    TexImage2DMultisample { samples: u32, width: u32, height: u32 },
    CompressedTexImage2D { width: u32, height: u32, data_len: usize },
    TexSubImage1D { rect: Rect, data_len: usize },
    TexSubImage2D { target: GLenum, rect: Rect, data_len: usize },
    TexSubImage3D { rect: Rect, data_len: usize },
    GenerateMipmap(GLenum),
    CreateBuffer(GLuint),
    DeleteBuffer(GLuint),
    BindBuffer(GLenum, GLuint),
    BufferData { target: GLenum, size: usize, has_data: bool, usage: GLenum },
    BufferSubData { target: GLenum, offset: usize, len: usize },
    MapBufferRange { target: GLenum, offset: usize, length: usize, access: GLbitfield },
    FlushMappedBufferRange { target: GLenum, offset: usize, length: usize },
    UnmapBuffer(GLenum),
    CreateFramebuffer(GLuint),
    DeleteFramebuffer(GLuint),
    BindFramebuffer(GLenum, GLuint),
    FramebufferTexture { target: GLenum, attachment: GLenum, texture: GLuint, level: GLint },
    FramebufferRenderbuffer { target: GLenum, attachment: GLenum, renderbuffer: GLuint },
    CheckFramebufferStatus(GLenum),
    CreateRenderbuffer(GLuint),
    DeleteRenderbuffer(GLuint),
    BindRenderbuffer(GLuint),
    RenderbufferStorage { samples: u32, internal_format: GLenum, width: u32, height: u32 },
    CreateVertexArray(GLuint),
    DeleteVertexArray(GLuint),
    BindVertexArray(GLuint),
    UseProgram(GLuint),
    AttribLocation(GLuint, String),
    EnableVertexAttrib(GLuint),
    DisableVertexAttrib(GLuint),
    VertexAttribPointer { location: GLuint, components: GLint, data_type: GLenum, normalized: bool, stride: usize, offset: usize },
    FenceSync(usize),
    ClientWaitSync(usize),
    DeleteSync(usize),
    Flush,
}

impl Call {
    /// Whether the call creates, deletes or writes GPU storage (as opposed to
    /// binding or querying).
    pub fn is_upload(&self) -> bool {
        matches!(
            self,
            Call::TexImage1D { .. }
                | Call::TexImage2D { .. }
                | Call::TexImage3D { .. }
                | Call::TexImage2DMultisample { .. }
                | Call::CompressedTexImage2D { .. }
                | Call::TexSubImage1D { .. }
                | Call::TexSubImage2D { .. }
                | Call::TexSubImage3D { .. }
                | Call::BufferData { .. }
                | Call::BufferSubData { .. }
                | Call::RenderbufferStorage { .. }
        )
    }
}

/// Bytes passed to a texture upload, with the texture bound at the time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureUpload {
    pub texture: GLuint,
    pub rect: Rect,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct Storage {
    calls: Vec<Call>,
    bound_textures: HashMap<GLenum, GLuint>,
    bound_buffers: HashMap<GLenum, GLuint>,
    buffers: HashMap<GLuint, Vec<u8>>,
    uploads: Vec<TextureUpload>,
    attrib_locations: HashMap<String, GLint>,
    live_fences: Vec<usize>,
}

pub struct RecordingCommands {
    storage: Mutex<Storage>,
    next_handle: AtomicU32,
    next_fence: AtomicUsize,
    fence_status: Mutex<FenceStatus>,
    framebuffer_status: Mutex<GLenum>,
    fail_creation: Mutex<bool>,
}

impl Default for RecordingCommands {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingCommands {
    pub fn new() -> Self {
        Self {
            storage: Mutex::new(Storage::default()),
            next_handle: AtomicU32::new(1),
            next_fence: AtomicUsize::new(0x1000),
            fence_status: Mutex::new(FenceStatus::Signaled),
            framebuffer_status: Mutex::new(gl::FRAMEBUFFER_COMPLETE),
            fail_creation: Mutex::new(false),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.storage.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.storage.lock().calls)
    }

    pub fn clear_calls(&self) {
        self.storage.lock().calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.storage.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn uploads(&self) -> Vec<TextureUpload> {
        self.storage.lock().uploads.clone()
    }

    /// Bytes of the most recent upload into `texture`.
    pub fn last_upload(&self, texture: GLuint) -> Option<Vec<u8>> {
        self.storage
            .lock()
            .uploads
            .iter()
            .rev()
            .find(|u| u.texture == texture)
            .map(|u| u.bytes.clone())
    }

    /// Fences created and not yet deleted.
    pub fn live_fences(&self) -> usize {
        self.storage.lock().live_fences.len()
    }

    pub fn set_fence_status(&self, status: FenceStatus) {
        *self.fence_status.lock() = status;
    }

    pub fn set_framebuffer_status(&self, status: GLenum) {
        *self.framebuffer_status.lock() = status;
    }

    pub fn set_attrib_location(&self, name: &str, location: GLint) {
        self.storage.lock().attrib_locations.insert(name.to_owned(), location);
    }

    /// Make every `create_*` return zero.
    pub fn set_fail_creation(&self, fail: bool) {
        *self.fail_creation.lock() = fail;
    }

    /// Current content of a buffer's backing store.
    pub fn buffer_contents(&self, buffer: GLuint) -> Option<Vec<u8>> {
        self.storage.lock().buffers.get(&buffer).cloned()
    }

    fn record(&self, call: Call) {
        self.storage.lock().calls.push(call);
    }

    fn create(&self, wrap: impl FnOnce(GLuint) -> Call) -> GLuint {
        if *self.fail_creation.lock() {
            return 0;
        }
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.record(wrap(handle));
        handle
    }

    fn record_upload(&self, target: GLenum, rect: Rect, data: &[u8]) {
        let mut storage = self.storage.lock();
        let texture = storage.bound_textures.get(&target).copied().unwrap_or(0);
        storage.uploads.push(TextureUpload {
            texture,
            rect,
            bytes: data.to_vec(),
        });
    }

    fn bound_buffer(&self, target: GLenum) -> GLuint {
        self.storage.lock().bound_buffers.get(&target).copied().unwrap_or(0)
    }
}

impl GpuCommands for RecordingCommands {
    fn create_texture(&self) -> GLuint {
        self.create(Call::CreateTexture)
    }

    fn delete_texture(&self, texture: GLuint) {
        self.record(Call::DeleteTexture(texture));
    }

    fn active_texture(&self, unit: u32) {
        self.record(Call::ActiveTexture(unit));
    }

    fn bind_texture(&self, target: GLenum, texture: GLuint) {
        let mut storage = self.storage.lock();
        storage.bound_textures.insert(target, texture);
        storage.calls.push(Call::BindTexture(target, texture));
    }

    fn tex_parameter(&self, target: GLenum, pname: GLenum, value: GLint) {
        self.record(Call::TexParameter(target, pname, value));
    }

    fn pixel_store(&self, pname: GLenum, value: GLint) {
        self.record(Call::PixelStore(pname, value));
    }

    fn tex_image_1d(&self, _level: GLint, _internal: GLenum, width: u32, _layout: GLenum, _ty: GLenum, data: Option<&[u8]>) {
        if let Some(data) = data {
            self.record_upload(gl::TEXTURE_1D, Rect::new(0, 0, width, 1), data);
        }
        self.record(Call::TexImage1D {
            width,
            data_len: data.map(<[u8]>::len),
        });
    }

    fn tex_image_2d(
        &self,
        target: GLenum,
        _level: GLint,
        internal_format: GLenum,
        width: u32,
        height: u32,
        _layout: GLenum,
        _ty: GLenum,
        data: Option<&[u8]>,
    ) {
        if let Some(data) = data {
            self.record_upload(target, Rect::new(0, 0, width, height), data);
        }
        self.record(Call::TexImage2D {
            target,
            internal_format,
            width,
            height,
            data_len: data.map(<[u8]>::len),
        });
    }

    fn tex_image_3d(&self, _level: GLint, _internal: GLenum, size: (u32, u32, u32), _layout: GLenum, _ty: GLenum, data: Option<&[u8]>) {
        if let Some(data) = data {
            self.record_upload(gl::TEXTURE_3D, Rect::new_3d(0, 0, 0, size.0, size.1, size.2), data);
        }
        self.record(Call::TexImage3D {
            size,
            data_len: data.map(<[u8]>::len),
        });
    }

    fn tex_image_2d_multisample(&self, samples: u32, _internal: GLenum, width: u32, height: u32) {
        self.record(Call::TexImage2DMultisample { samples, width, height });
    }

    fn compressed_tex_image_2d(&self, _level: GLint, _internal: GLenum, width: u32, height: u32, data: &[u8]) {
        self.record_upload(gl::TEXTURE_2D, Rect::new(0, 0, width, height), data);
        self.record(Call::CompressedTexImage2D {
            width,
            height,
            data_len: data.len(),
        });
    }

    fn tex_sub_image_1d(&self, rect: Rect, _layout: GLenum, _ty: GLenum, data: &[u8]) {
        self.record_upload(gl::TEXTURE_1D, rect, data);
        self.record(Call::TexSubImage1D { rect, data_len: data.len() });
    }

    fn tex_sub_image_2d(&self, target: GLenum, rect: Rect, _layout: GLenum, _ty: GLenum, data: &[u8]) {
        self.record_upload(target, rect, data);
        self.record(Call::TexSubImage2D {
            target,
            rect,
            data_len: data.len(),
        });
    }

    fn tex_sub_image_3d(&self, rect: Rect, _layout: GLenum, _ty: GLenum, data: &[u8]) {
        self.record_upload(gl::TEXTURE_3D, rect, data);
        self.record(Call::TexSubImage3D { rect, data_len: data.len() });
    }

    fn generate_mipmap(&self, target: GLenum) {
        self.record(Call::GenerateMipmap(target));
    }

    fn create_buffer(&self) -> GLuint {
        self.create(Call::CreateBuffer)
    }

    fn delete_buffer(&self, buffer: GLuint) {
        let mut storage = self.storage.lock();
        storage.buffers.remove(&buffer);
        storage.calls.push(Call::DeleteBuffer(buffer));
    }

    fn bind_buffer(&self, target: GLenum, buffer: GLuint) {
        let mut storage = self.storage.lock();
        storage.bound_buffers.insert(target, buffer);
        storage.calls.push(Call::BindBuffer(target, buffer));
    }

    fn buffer_data(&self, target: GLenum, size: usize, data: Option<&[u8]>, usage: GLenum) {
        let buffer = self.bound_buffer(target);
        let mut storage = self.storage.lock();
        let mut contents = vec![0u8; size];
        if let Some(data) = data {
            let len = data.len().min(size);
            contents[..len].copy_from_slice(&data[..len]);
        }
        storage.buffers.insert(buffer, contents);
        storage.calls.push(Call::BufferData {
            target,
            size,
            has_data: data.is_some(),
            usage,
        });
    }

    fn buffer_sub_data(&self, target: GLenum, offset: usize, data: &[u8]) {
        let buffer = self.bound_buffer(target);
        let mut storage = self.storage.lock();
        if let Some(contents) = storage.buffers.get_mut(&buffer) {
            if let Some(dst) = contents.get_mut(offset..offset + data.len()) {
                dst.copy_from_slice(data);
            }
        }
        storage.calls.push(Call::BufferSubData {
            target,
            offset,
            len: data.len(),
        });
    }

    fn map_buffer_range(&self, target: GLenum, offset: usize, length: usize, access: GLbitfield) -> *mut u8 {
        let buffer = self.bound_buffer(target);
        let mut storage = self.storage.lock();
        storage.calls.push(Call::MapBufferRange {
            target,
            offset,
            length,
            access,
        });
        match storage.buffers.get_mut(&buffer) {
            Some(contents) if offset + length <= contents.len() => contents[offset..].as_mut_ptr(),
            _ => std::ptr::null_mut(),
        }
    }

    fn flush_mapped_buffer_range(&self, target: GLenum, offset: usize, length: usize) {
        self.record(Call::FlushMappedBufferRange { target, offset, length });
    }

    fn unmap_buffer(&self, target: GLenum) -> bool {
        self.record(Call::UnmapBuffer(target));
        true
    }

    fn create_framebuffer(&self) -> GLuint {
        self.create(Call::CreateFramebuffer)
    }

    fn delete_framebuffer(&self, framebuffer: GLuint) {
        self.record(Call::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        self.record(Call::BindFramebuffer(target, framebuffer));
    }

    fn framebuffer_texture(&self, target: GLenum, attachment: GLenum, texture: GLuint, level: GLint) {
        self.record(Call::FramebufferTexture {
            target,
            attachment,
            texture,
            level,
        });
    }

    fn framebuffer_renderbuffer(&self, target: GLenum, attachment: GLenum, renderbuffer: GLuint) {
        self.record(Call::FramebufferRenderbuffer {
            target,
            attachment,
            renderbuffer,
        });
    }

    fn check_framebuffer_status(&self, target: GLenum) -> GLenum {
        self.record(Call::CheckFramebufferStatus(target));
        *self.framebuffer_status.lock()
    }

    fn create_renderbuffer(&self) -> GLuint {
        self.create(Call::CreateRenderbuffer)
    }

    fn delete_renderbuffer(&self, renderbuffer: GLuint) {
        self.record(Call::DeleteRenderbuffer(renderbuffer));
    }

    fn bind_renderbuffer(&self, renderbuffer: GLuint) {
        self.record(Call::BindRenderbuffer(renderbuffer));
    }

    fn renderbuffer_storage(&self, samples: u32, internal_format: GLenum, width: u32, height: u32) {
        self.record(Call::RenderbufferStorage {
            samples,
            internal_format,
            width,
            height,
        });
    }

    fn create_vertex_array(&self) -> GLuint {
        self.create(Call::CreateVertexArray)
    }

    fn delete_vertex_array(&self, vertex_array: GLuint) {
        self.record(Call::DeleteVertexArray(vertex_array));
    }

    fn bind_vertex_array(&self, vertex_array: GLuint) {
        self.record(Call::BindVertexArray(vertex_array));
    }

    fn use_program(&self, program: GLuint) {
        self.record(Call::UseProgram(program));
    }

    fn attrib_location(&self, program: GLuint, name: &str) -> GLint {
        let mut storage = self.storage.lock();
        storage.calls.push(Call::AttribLocation(program, name.to_owned()));
        storage.attrib_locations.get(name).copied().unwrap_or(-1)
    }

    fn enable_vertex_attrib(&self, location: GLuint) {
        self.record(Call::EnableVertexAttrib(location));
    }

    fn disable_vertex_attrib(&self, location: GLuint) {
        self.record(Call::DisableVertexAttrib(location));
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
        self.record(Call::VertexAttribPointer {
            location,
            components,
            data_type,
            normalized,
            stride,
            offset,
        });
    }

    fn fence_sync(&self) -> Option<GpuFence> {
        let raw = self.next_fence.fetch_add(1, Ordering::Relaxed);
        let mut storage = self.storage.lock();
        storage.live_fences.push(raw);
        storage.calls.push(Call::FenceSync(raw));
        Some(GpuFence::from_raw(raw))
    }

    fn client_wait_sync(&self, fence: &GpuFence, _timeout_ns: u64) -> FenceStatus {
        self.record(Call::ClientWaitSync(fence.raw()));
        *self.fence_status.lock()
    }

    fn delete_sync(&self, fence: GpuFence) {
        let mut storage = self.storage.lock();
        storage.live_fences.retain(|f| *f != fence.raw());
        storage.calls.push(Call::DeleteSync(fence.raw()));
    }

    fn flush(&self) {
        self.record(Call::Flush);
    }

    fn get_error(&self) -> GLenum {
        gl::NO_ERROR
    }
}
