use std::time::Duration;

use gl::types::{GLint, GLuint};
use render_core::vertex_array::VertexArrayState;
use render_core::{ResourceId, VertexArray};
use tracing::{debug, error, trace, warn};

use crate::commands::GpuCommands;
use crate::handle::ResourceHandleGL;
use crate::state::StateGL;

/// GPU mirror of a [`VertexArray`].
///
/// Attribute locations depend on the program, so the mirror re-specifies its
/// attribute pointers whenever it is uploaded for a different program, and
/// whenever a referenced buffer comes back under a different GPU handle.
#[derive(Debug)]
pub struct VertexArrayGL {
    id: ResourceId,
    handle: ResourceHandleGL,
    generation: Option<u64>,
    program: GLuint,
    /// Resolved handles of the vertex buffers, then the index buffer (0 when
    /// absent).
    buffers: Vec<GLuint>,
    /// Attribute locations enabled on the GPU array, sorted.
    enabled: Vec<GLuint>,
}

impl VertexArrayGL {
    pub fn new(id: ResourceId, expiration: Duration, frame_time: u64) -> Self {
        Self {
            id,
            handle: ResourceHandleGL::new(expiration, frame_time),
            generation: None,
            program: 0,
            buffers: Vec::new(),
            enabled: Vec::new(),
        }
    }

    pub fn handle(&self) -> GLuint {
        self.handle.handle()
    }

    pub fn expired(&self, frame_time: u64) -> bool {
        self.handle.expired(frame_time)
    }

    /// Bind the array, syncing every referenced buffer through `resolve` and
    /// re-specifying attributes if anything they depend on changed.
    ///
    /// With `program == 0` attributes are assigned consecutive locations in
    /// declaration order; otherwise locations are looked up by name and
    /// attributes the program does not use are skipped.
    pub fn upload(
        &mut self,
        gl: &dyn GpuCommands,
        state: &mut StateGL,
        vertex_array: &VertexArray,
        program: GLuint,
        mut resolve: impl FnMut(&mut StateGL, ResourceId) -> Option<GLuint>,
    ) -> bool {
        self.handle.touch(state.frame_time());
        let desc = vertex_array.state();

        let mut buffers: Vec<GLuint> = desc
            .bindings
            .iter()
            .map(|binding| resolve(state, binding.buffer).unwrap_or(0))
            .collect();
        buffers.push(desc.index_buffer.and_then(|id| resolve(state, id)).unwrap_or(0));

        if self.handle() != 0
            && self.generation == Some(desc.generation)
            && self.program == program
            && self.buffers == buffers
        {
            return true;
        }

        if self.handle() == 0 {
            let handle = gl.create_vertex_array();
            if handle == 0 {
                error!(vertex_array = %self.id, "failed to create vertex array");
                return false;
            }
            self.handle.set_handle(handle);
        }
        if state.set_vertex_array(self.handle()) {
            gl.bind_vertex_array(self.handle());
        }
        if program != 0 && state.set_program(program) {
            gl.use_program(program);
        }

        self.specify(gl, &desc, program, &buffers);
        self.generation = Some(desc.generation);
        self.program = program;
        self.buffers = buffers;
        true
    }

    fn specify(&mut self, gl: &dyn GpuCommands, desc: &VertexArrayState, program: GLuint, buffers: &[GLuint]) {
        let mut next_location: GLuint = 0;
        let mut enabled = Vec::new();
        for (binding, &buffer) in desc.bindings.iter().zip(buffers) {
            if buffer == 0 {
                warn!(vertex_array = %self.id, buffer = %binding.buffer, "vertex buffer is gone, binding skipped");
                next_location += binding.description.attributes.len() as GLuint;
                continue;
            }
            gl.bind_buffer(gl::ARRAY_BUFFER, buffer);
            for attribute in &binding.description.attributes {
                let location = if program == 0 {
                    let location = next_location as GLint;
                    next_location += 1;
                    location
                } else {
                    gl.attrib_location(program, &attribute.name)
                };
                if location < 0 {
                    trace!(vertex_array = %self.id, name = %attribute.name, "attribute not used by program");
                    continue;
                }
                gl.enable_vertex_attrib(location as GLuint);
                enabled.push(location as GLuint);
                gl.vertex_attrib_pointer(
                    location as GLuint,
                    attribute.components,
                    attribute.data_type,
                    attribute.normalized,
                    binding.description.vertex_size,
                    attribute.offset,
                );
            }
        }
        enabled.sort_unstable();
        enabled.dedup();
        // locations only the previous program used
        for &stale in self.enabled.iter().filter(|&&l| enabled.binary_search(&l).is_err()) {
            gl.disable_vertex_attrib(stale);
        }
        self.enabled = enabled;

        // captured by the bound vertex array
        let index = buffers.last().copied().unwrap_or(0);
        gl.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, index);
        debug!(vertex_array = %self.id, bindings = desc.bindings.len(), program, "vertex array specified");
    }

    pub fn destroy(&mut self, gl: &dyn GpuCommands, state: &mut StateGL) {
        let handle = self.handle.take_handle();
        if handle != 0 {
            if state.vertex_array() == handle {
                state.set_vertex_array(0);
                gl.bind_vertex_array(0);
            }
            gl.delete_vertex_array(handle);
        }
        self.generation = None;
        self.buffers.clear();
        self.enabled.clear();
    }
}
