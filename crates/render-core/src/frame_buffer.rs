//! Framebuffer descriptor.
//!
//! Attachments are kept in a map ordered by attachment slot so GPU mirrors can
//! diff them against their own snapshot with a single merge pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use gl::types::GLenum;
use parking_lot::Mutex;

use crate::manager::RenderManager;
use crate::render_buffer::RenderBuffer;
use crate::resource::{RenderResource, Resource, ResourceId, ResourceKind};
use crate::texture::Texture;

/// What is attached at one slot. Only ids are stored; the GPU side resolves
/// them through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Texture { id: ResourceId, level: i32 },
    RenderBuffer { id: ResourceId },
}

impl Attachment {
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Texture { id, .. } | Self::RenderBuffer { id } => *id,
        }
    }
}

/// Which framebuffer binding point(s) a bind affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameBufferTarget {
    Read,
    Draw,
    #[default]
    Both,
}

impl FrameBufferTarget {
    pub fn gl_target(self) -> GLenum {
        match self {
            Self::Read => gl::READ_FRAMEBUFFER,
            Self::Draw => gl::DRAW_FRAMEBUFFER,
            Self::Both => gl::FRAMEBUFFER,
        }
    }

    pub fn reads(self) -> bool {
        matches!(self, Self::Read | Self::Both)
    }

    pub fn draws(self) -> bool {
        matches!(self, Self::Draw | Self::Both)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameBufferState {
    pub attachments: BTreeMap<GLenum, Attachment>,
    pub target: FrameBufferTarget,
    pub size: (u32, u32),
    pub generation: u64,
}

pub struct FrameBuffer {
    resource: RenderResource,
    state: Mutex<FrameBufferState>,
}

impl FrameBuffer {
    pub fn new(manager: &Arc<RenderManager>) -> Arc<Self> {
        let fb = Arc::new(Self {
            resource: RenderResource::new(manager, ResourceKind::FrameBuffer),
            state: Mutex::new(FrameBufferState::default()),
        });
        manager.register(fb.id(), ResourceKind::FrameBuffer, &fb);
        fb
    }

    pub fn attach_texture(&self, slot: GLenum, texture: &Texture, level: i32) {
        self.attach(slot, Attachment::Texture { id: texture.id(), level });
    }

    pub fn attach_render_buffer(&self, slot: GLenum, rb: &RenderBuffer) {
        self.attach(slot, Attachment::RenderBuffer { id: rb.id() });
    }

    fn attach(&self, slot: GLenum, attachment: Attachment) {
        let mut state = self.state.lock();
        if state.attachments.insert(slot, attachment) != Some(attachment) {
            state.generation += 1;
        }
    }

    pub fn detach(&self, slot: GLenum) {
        let mut state = self.state.lock();
        if state.attachments.remove(&slot).is_some() {
            state.generation += 1;
        }
    }

    pub fn set_target(&self, target: FrameBufferTarget) {
        let mut state = self.state.lock();
        if state.target != target {
            state.target = target;
            state.generation += 1;
        }
    }

    pub fn set_size(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        if state.size != (width, height) {
            state.size = (width, height);
            state.generation += 1;
        }
    }

    pub fn state(&self) -> FrameBufferState {
        self.state.lock().clone()
    }
}

impl Resource for FrameBuffer {
    const KIND: ResourceKind = ResourceKind::FrameBuffer;

    fn resource(&self) -> &RenderResource {
        &self.resource
    }

    fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FrameBuffer")
            .field("id", &self.resource.id())
            .field("attachments", &state.attachments.len())
            .field("generation", &state.generation)
            .finish()
    }
}
