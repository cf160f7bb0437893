//! Render buffer descriptor: storage-only images used as framebuffer
//! attachments.

use std::sync::Arc;

use gl::types::GLenum;
use parking_lot::Mutex;

use crate::manager::RenderManager;
use crate::resource::{RenderResource, Resource, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderBufferState {
    pub width: u32,
    pub height: u32,
    pub internal_format: GLenum,
    pub samples: u32,
    pub generation: u64,
}

pub struct RenderBuffer {
    resource: RenderResource,
    state: Mutex<RenderBufferState>,
}

impl RenderBuffer {
    pub fn new(manager: &Arc<RenderManager>) -> Arc<Self> {
        let rb = Arc::new(Self {
            resource: RenderResource::new(manager, ResourceKind::RenderBuffer),
            state: Mutex::new(RenderBufferState {
                width: 0,
                height: 0,
                internal_format: gl::RGBA8,
                samples: 0,
                generation: 0,
            }),
        });
        manager.register(rb.id(), ResourceKind::RenderBuffer, &rb);
        rb
    }

    pub fn set_storage(&self, width: u32, height: u32, internal_format: GLenum, samples: u32) {
        let mut state = self.state.lock();
        if (state.width, state.height, state.internal_format, state.samples)
            != (width, height, internal_format, samples)
        {
            state.width = width;
            state.height = height;
            state.internal_format = internal_format;
            state.samples = samples;
            state.generation += 1;
        }
    }

    pub fn state(&self) -> RenderBufferState {
        *self.state.lock()
    }
}

impl Resource for RenderBuffer {
    const KIND: ResourceKind = ResourceKind::RenderBuffer;

    fn resource(&self) -> &RenderResource {
        &self.resource
    }

    fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

impl std::fmt::Debug for RenderBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderBuffer")
            .field("id", &self.resource.id())
            .field("state", &*self.state.lock())
            .finish()
    }
}
