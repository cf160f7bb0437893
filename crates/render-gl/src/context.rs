//! Per-render-thread GPU object tables.
//!
//! Raw GPU handles are only meaningful inside the context that created them,
//! so every render thread owns one [`RenderContextGL`] holding its own mirror
//! of each descriptor it has touched. Mirrors keep only the descriptor's
//! [`ResourceId`]; descriptors are resolved through the [`RenderManager`] on
//! every use and a failed lookup means "deleted meanwhile".

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use gl::types::{GLbitfield, GLuint};
use render_core::{
    Attachment, Buffer, BufferTarget, FrameBuffer, RenderBuffer, RenderManager, Resource, ResourceId, Texture,
    VertexArray,
};
use tracing::{debug, trace, warn};

use crate::buffer::BufferGL;
use crate::commands::GpuCommands;
use crate::executor::CommandExecutor;
use crate::frame_buffer::FrameBufferGL;
use crate::render_buffer::RenderBufferGL;
use crate::state::StateGL;
use crate::texture::TextureGL;
use crate::vertex_array::VertexArrayGL;

/// What code running on a render thread needs to issue GPU work there.
#[derive(Clone, Copy)]
pub struct ThreadContext<'a> {
    pub index: usize,
    pub gl: &'a dyn GpuCommands,
    pub executor: &'a Arc<CommandExecutor>,
}

/// Mirrors that framebuffers and vertex arrays resolve their references into.
#[derive(Default)]
struct Mirrors {
    textures: HashMap<ResourceId, TextureGL>,
    buffers: HashMap<ResourceId, BufferGL>,
    render_buffers: HashMap<ResourceId, RenderBufferGL>,
}

impl Mirrors {
    fn texture(
        &mut self,
        gl: &dyn GpuCommands,
        state: &mut StateGL,
        executor: Option<&CommandExecutor>,
        texture: &Texture,
        expiration: Duration,
    ) -> Option<GLuint> {
        let mirror = self
            .textures
            .entry(texture.id())
            .or_insert_with(|| TextureGL::new(texture.id(), expiration, state.frame_time()));
        mirror.upload(gl, state, texture, executor);
        non_zero(mirror.handle())
    }

    fn buffer(&mut self, gl: &dyn GpuCommands, state: &mut StateGL, buffer: &Buffer, expiration: Duration) -> Option<GLuint> {
        let mirror = self
            .buffers
            .entry(buffer.id())
            .or_insert_with(|| BufferGL::new(buffer.id(), expiration, state.frame_time()));
        if !mirror.sync(gl, state, buffer) {
            return None;
        }
        non_zero(mirror.handle())
    }

    fn render_buffer(
        &mut self,
        gl: &dyn GpuCommands,
        state: &StateGL,
        render_buffer: &RenderBuffer,
        expiration: Duration,
    ) -> Option<GLuint> {
        let mirror = self
            .render_buffers
            .entry(render_buffer.id())
            .or_insert_with(|| RenderBufferGL::new(render_buffer.id(), expiration, state.frame_time()));
        mirror.sync(gl, state, render_buffer);
        non_zero(mirror.handle())
    }
}

fn non_zero(handle: GLuint) -> Option<GLuint> {
    (handle != 0).then_some(handle)
}

pub struct RenderContextGL {
    index: usize,
    gl: Arc<dyn GpuCommands>,
    manager: Arc<RenderManager>,
    state: StateGL,
    executor: Arc<CommandExecutor>,
    expiration: Duration,
    async_uploads: bool,
    mirrors: Mirrors,
    frame_buffers: HashMap<ResourceId, FrameBufferGL>,
    vertex_arrays: HashMap<ResourceId, VertexArrayGL>,
}

impl RenderContextGL {
    /// Create the tables for render thread `index`. Must be called on that
    /// thread with its context current.
    pub fn new(index: usize, gl: Arc<dyn GpuCommands>, manager: Arc<RenderManager>) -> Self {
        let config = manager.config();
        if index >= config.max_render_threads {
            warn!(
                index,
                max = config.max_render_threads,
                "render thread index beyond configured thread count"
            );
        }
        let state = StateGL::new(index, config);
        let expiration = config.default_expiration;
        let async_uploads = config.async_texture_upload;
        debug!(index, async_uploads, "render context created");
        Self {
            index,
            gl,
            manager,
            state,
            executor: CommandExecutor::new(index),
            expiration,
            async_uploads,
            mirrors: Mirrors::default(),
            frame_buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn gl(&self) -> &dyn GpuCommands {
        self.gl.as_ref()
    }

    pub fn manager(&self) -> &Arc<RenderManager> {
        &self.manager
    }

    pub fn state(&self) -> &StateGL {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StateGL {
        &mut self.state
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    pub fn thread_context(&self) -> ThreadContext<'_> {
        ThreadContext {
            index: self.index,
            gl: self.gl.as_ref(),
            executor: &self.executor,
        }
    }

    /// Number of live mirror objects of every kind.
    pub fn mirror_count(&self) -> usize {
        self.mirrors.textures.len()
            + self.mirrors.buffers.len()
            + self.mirrors.render_buffers.len()
            + self.frame_buffers.len()
            + self.vertex_arrays.len()
    }

    pub fn available_upload_bytes(&self) -> u64 {
        self.state.available_upload_bytes()
    }

    fn refresh_frame_time(&mut self) -> u64 {
        let now = self.manager.frame_time();
        self.state.set_frame_time(now);
        now
    }

    // -- textures --------------------------------------------------------------

    pub fn sync_texture(&mut self, texture: &Texture) -> Option<GLuint> {
        self.refresh_frame_time();
        let executor = self.async_uploads.then_some(&*self.executor);
        self.mirrors
            .texture(self.gl.as_ref(), &mut self.state, executor, texture, self.expiration)
    }

    /// Sync `texture`, wait for any deferred upload into it, and bind it to
    /// `unit`.
    pub fn bind_texture(&mut self, unit: u32, texture: &Texture) -> bool {
        if self.sync_texture(texture).is_none() {
            return false;
        }
        let Some(mirror) = self.mirrors.textures.get_mut(&texture.id()) else {
            return false;
        };
        mirror.sync(self.gl.as_ref(), &mut self.state, &self.executor);
        mirror.bind(self.gl.as_ref(), &mut self.state, unit)
    }

    pub fn texture_handle(&self, id: ResourceId) -> Option<GLuint> {
        self.mirrors.textures.get(&id).and_then(|m| non_zero(m.handle()))
    }

    // -- buffers ---------------------------------------------------------------

    pub fn sync_buffer(&mut self, buffer: &Buffer) -> Option<GLuint> {
        self.refresh_frame_time();
        self.mirrors.buffer(self.gl.as_ref(), &mut self.state, buffer, self.expiration)
    }

    pub fn bind_buffer(&mut self, target: BufferTarget, buffer: &Buffer) -> bool {
        if self.sync_buffer(buffer).is_none() {
            return false;
        }
        let Some(mirror) = self.mirrors.buffers.get_mut(&buffer.id()) else {
            return false;
        };
        mirror.bind(self.gl.as_ref(), &self.state, target.gl_target());
        true
    }

    pub fn map_buffer(
        &mut self,
        buffer: &Buffer,
        target: BufferTarget,
        offset: usize,
        length: usize,
        access: GLbitfield,
    ) -> Option<NonNull<u8>> {
        self.sync_buffer(buffer)?;
        let mirror = self.mirrors.buffers.get_mut(&buffer.id())?;
        mirror.map(self.gl.as_ref(), &mut self.state, target.gl_target(), offset, length, access)
    }

    pub fn flush_buffer(&mut self, buffer: &Buffer, offset: usize, length: usize) -> bool {
        let Some(mirror) = self.mirrors.buffers.get_mut(&buffer.id()) else {
            return false;
        };
        mirror.flush(self.gl.as_ref(), &self.state, offset, length)
    }

    pub fn unmap_buffer(&mut self, buffer: &Buffer) -> bool {
        let Some(mirror) = self.mirrors.buffers.get_mut(&buffer.id()) else {
            return false;
        };
        mirror.unmap(self.gl.as_ref(), &mut self.state)
    }

    // -- render targets --------------------------------------------------------

    pub fn sync_render_buffer(&mut self, render_buffer: &RenderBuffer) -> Option<GLuint> {
        self.refresh_frame_time();
        self.mirrors
            .render_buffer(self.gl.as_ref(), &self.state, render_buffer, self.expiration)
    }

    pub fn sync_frame_buffer(&mut self, frame_buffer: &FrameBuffer) -> bool {
        self.refresh_frame_time();
        let Self {
            gl,
            manager,
            state,
            executor,
            async_uploads,
            mirrors,
            frame_buffers,
            expiration,
            ..
        } = self;
        let gl: &dyn GpuCommands = &**gl;
        let executor = async_uploads.then_some(&**executor);
        let expiration = *expiration;
        let mirror = frame_buffers
            .entry(frame_buffer.id())
            .or_insert_with(|| FrameBufferGL::new(frame_buffer.id(), expiration, state.frame_time()));
        mirror.sync(gl, state, frame_buffer, |state, attachment| match attachment {
            Attachment::Texture { id, .. } => {
                let texture = manager.get::<Texture>(*id)?;
                mirrors.texture(gl, state, executor, &texture, expiration)
            }
            Attachment::RenderBuffer { id } => {
                let render_buffer = manager.get::<RenderBuffer>(*id)?;
                mirrors.render_buffer(gl, state, &render_buffer, expiration)
            }
        })
    }

    /// Sync and bind `frame_buffer`, or bind the default framebuffer for
    /// `None`.
    pub fn bind_frame_buffer(&mut self, frame_buffer: Option<&FrameBuffer>) -> bool {
        let Some(frame_buffer) = frame_buffer else {
            if self.state.set_framebuffer(gl::FRAMEBUFFER, 0) {
                self.gl.bind_framebuffer(gl::FRAMEBUFFER, 0);
            }
            return true;
        };
        if !self.sync_frame_buffer(frame_buffer) {
            return false;
        }
        match self.frame_buffers.get_mut(&frame_buffer.id()) {
            Some(mirror) => mirror.bind(self.gl.as_ref(), &mut self.state),
            None => false,
        }
    }

    // -- vertex arrays / programs ------------------------------------------------

    /// Sync every buffer `vertex_array` references and bind it for `program`
    /// (0 for none).
    pub fn bind_vertex_array(&mut self, vertex_array: &VertexArray, program: GLuint) -> bool {
        self.refresh_frame_time();
        let Self {
            gl,
            manager,
            state,
            mirrors,
            vertex_arrays,
            expiration,
            ..
        } = self;
        let gl: &dyn GpuCommands = &**gl;
        let expiration = *expiration;
        let mirror = vertex_arrays
            .entry(vertex_array.id())
            .or_insert_with(|| VertexArrayGL::new(vertex_array.id(), expiration, state.frame_time()));
        mirror.upload(gl, state, vertex_array, program, |state, id| {
            let buffer = manager.get::<Buffer>(id)?;
            mirrors.buffer(gl, state, &buffer, expiration)
        })
    }

    pub fn unbind_vertex_array(&mut self) {
        if self.state.set_vertex_array(0) {
            self.gl.bind_vertex_array(0);
        }
    }

    pub fn use_program(&mut self, program: GLuint) {
        if self.state.set_program(program) {
            self.gl.use_program(program);
        }
    }

    // -- frame lifecycle -----------------------------------------------------------

    /// Forget cached bindings after foreign code used the context.
    pub fn reset_state(&mut self) {
        self.state.reset();
    }

    /// Drain deferred GPU commands queued for this thread.
    pub fn run_executor(&mut self) -> usize {
        let ran = self.executor.run(self.gl.as_ref());
        if ran > 0 {
            self.state.invalidate_textures();
        }
        ran
    }

    /// Destroy mirrors that sat idle past their expiration or whose
    /// descriptor no longer exists. Returns how many were destroyed.
    pub fn release_expired(&mut self) -> usize {
        let now = self.refresh_frame_time();
        let manager = &self.manager;
        let gl = self.gl.as_ref();
        let state = &mut self.state;
        let keep = |id: ResourceId, expired: bool| manager.contains(id) && !expired;

        let mut released = 0;
        released += sweep(&mut self.mirrors.textures, |id, m| keep(id, m.expired(now)), |m| m.destroy(gl, state));
        released += sweep(&mut self.frame_buffers, |id, m| keep(id, m.expired(now)), |m| m.destroy(gl, state));
        released += sweep(&mut self.vertex_arrays, |id, m| keep(id, m.expired(now)), |m| m.destroy(gl, state));
        released += sweep(&mut self.mirrors.buffers, |id, m| keep(id, m.expired(now)), |m| m.destroy(gl, state));
        released += sweep(&mut self.mirrors.render_buffers, |id, m| keep(id, m.expired(now)), |m| m.destroy(gl));
        if released > 0 {
            debug!(thread = self.index, released, "released idle GPU objects");
        }
        released
    }

    /// Per-frame housekeeping: flush, run deferred commands, reset the upload
    /// budget and drop idle mirrors.
    pub fn end_frame(&mut self) {
        self.gl.flush();
        self.run_executor();
        trace!(thread = self.index, uploaded = self.state.uploaded_bytes(), "frame finished");
        self.state.clear_uploaded_bytes();
        self.release_expired();
    }

    /// Destroy every GPU object owned by this context. Call on the owning
    /// thread before its context goes away.
    pub fn shutdown(&mut self) {
        self.run_executor();
        let gl = self.gl.as_ref();
        let state = &mut self.state;
        let count = sweep(&mut self.mirrors.textures, |_, _| false, |m| m.destroy(gl, state))
            + sweep(&mut self.frame_buffers, |_, _| false, |m| m.destroy(gl, state))
            + sweep(&mut self.vertex_arrays, |_, _| false, |m| m.destroy(gl, state))
            + sweep(&mut self.mirrors.buffers, |_, _| false, |m| m.destroy(gl, state))
            + sweep(&mut self.mirrors.render_buffers, |_, _| false, |m| m.destroy(gl));
        // commands queued by teardown of other objects
        self.run_executor();
        debug!(thread = self.index, destroyed = count, "render context shut down");
    }
}

impl Drop for RenderContextGL {
    fn drop(&mut self) {
        let live = self.mirror_count();
        if live > 0 {
            warn!(
                thread = self.index,
                live,
                "render context dropped with live GPU objects; call shutdown() on its thread"
            );
        }
    }
}

impl std::fmt::Debug for RenderContextGL {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContextGL")
            .field("index", &self.index)
            .field("mirrors", &self.mirror_count())
            .field("executor", &self.executor)
            .finish()
    }
}

/// Remove and destroy every entry `keep` rejects.
fn sweep<M>(
    table: &mut HashMap<ResourceId, M>,
    keep: impl Fn(ResourceId, &M) -> bool,
    mut destroy: impl FnMut(&mut M),
) -> usize {
    let dead: Vec<ResourceId> = table
        .iter()
        .filter(|(id, mirror)| !keep(**id, mirror))
        .map(|(id, _)| *id)
        .collect();
    for id in &dead {
        if let Some(mut mirror) = table.remove(id) {
            destroy(&mut mirror);
        }
    }
    dead.len()
}
