use std::time::Duration;

use gl::types::{GLenum, GLuint};
use render_core::{RenderBuffer, ResourceId};
use tracing::{debug, error};

use crate::commands::GpuCommands;
use crate::handle::ResourceHandleGL;
use crate::state::StateGL;

/// GPU mirror of a [`RenderBuffer`]. Any storage change recreates the
/// renderbuffer, which in turn makes framebuffers referencing it reattach.
#[derive(Debug)]
pub struct RenderBufferGL {
    id: ResourceId,
    handle: ResourceHandleGL,
    generation: Option<u64>,
    storage: Option<(u32, u32, GLenum, u32)>,
}

impl RenderBufferGL {
    pub fn new(id: ResourceId, expiration: Duration, frame_time: u64) -> Self {
        Self {
            id,
            handle: ResourceHandleGL::new(expiration, frame_time),
            generation: None,
            storage: None,
        }
    }

    pub fn handle(&self) -> GLuint {
        self.handle.handle()
    }

    pub fn expired(&self, frame_time: u64) -> bool {
        self.handle.expired(frame_time)
    }

    pub fn sync(&mut self, gl: &dyn GpuCommands, state: &StateGL, render_buffer: &RenderBuffer) -> bool {
        self.handle.touch(state.frame_time());
        let current = render_buffer.state();
        if self.generation == Some(current.generation) && self.handle() != 0 {
            return true;
        }

        let storage = (current.width, current.height, current.internal_format, current.samples);
        if self.storage != Some(storage) || self.handle() == 0 {
            self.release_handle(gl);
            if current.width == 0 || current.height == 0 {
                self.generation = Some(current.generation);
                return false;
            }
            let handle = gl.create_renderbuffer();
            if handle == 0 {
                error!(render_buffer = %self.id, "failed to create renderbuffer");
                return false;
            }
            self.handle.set_handle(handle);
            gl.bind_renderbuffer(handle);
            gl.renderbuffer_storage(current.samples, current.internal_format, current.width, current.height);
            gl.bind_renderbuffer(0);
            self.storage = Some(storage);
            debug!(
                render_buffer = %self.id,
                width = current.width,
                height = current.height,
                samples = current.samples,
                "renderbuffer allocated"
            );
        }
        self.generation = Some(current.generation);
        true
    }

    fn release_handle(&mut self, gl: &dyn GpuCommands) {
        let handle = self.handle.take_handle();
        if handle != 0 {
            gl.delete_renderbuffer(handle);
        }
        self.storage = None;
    }

    pub fn destroy(&mut self, gl: &dyn GpuCommands) {
        self.release_handle(gl);
        self.generation = None;
    }
}

#[cfg(test)]
mod tests {
    use render_core::{RenderConfig, RenderManager, Resource};

    use super::*;
    use crate::testing::{Call, RecordingCommands};

    #[test]
    fn storage_change_recreates() {
        let manager = RenderManager::new(RenderConfig::default());
        let gl = RecordingCommands::new();
        let state = StateGL::new(0, manager.config());
        let rb = RenderBuffer::new(&manager);
        rb.set_storage(64, 64, gl::DEPTH24_STENCIL8, 0);

        let mut mirror = RenderBufferGL::new(rb.id(), Duration::ZERO, 0);
        assert!(mirror.sync(&gl, &state, &rb));
        let first = mirror.handle();
        gl.clear_calls();
        assert!(mirror.sync(&gl, &state, &rb));
        assert!(gl.calls().is_empty());

        rb.set_storage(128, 64, gl::DEPTH24_STENCIL8, 4);
        assert!(mirror.sync(&gl, &state, &rb));
        assert_ne!(mirror.handle(), first);
        assert!(gl.calls().contains(&Call::DeleteRenderbuffer(first)));
        assert!(gl.calls().contains(&Call::RenderbufferStorage {
            samples: 4,
            internal_format: gl::DEPTH24_STENCIL8,
            width: 128,
            height: 64
        }));
    }
}
