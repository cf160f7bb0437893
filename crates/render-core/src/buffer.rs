//! CPU-side buffer descriptor.

use std::sync::Arc;

use gl::types::GLenum;
use parking_lot::{Mutex, MutexGuard};
use tracing::error;

use crate::manager::RenderManager;
use crate::region::{ByteRanges, PerThread};
use crate::resource::{RenderResource, Resource, ResourceKind};

/// Expected update frequency, mapped to a GL usage hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferUsage {
    #[default]
    Static,
    Dynamic,
    Stream,
}

impl BufferUsage {
    pub fn gl_usage(self) -> GLenum {
        match self {
            Self::Static => gl::STATIC_DRAW,
            Self::Dynamic => gl::DYNAMIC_DRAW,
            Self::Stream => gl::STREAM_DRAW,
        }
    }
}

/// Binding point a buffer is used through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Vertex,
    Index,
    Uniform,
    PixelUnpack,
    PixelPack,
    ShaderStorage,
}

impl BufferTarget {
    pub fn gl_target(self) -> GLenum {
        match self {
            Self::Vertex => gl::ARRAY_BUFFER,
            Self::Index => gl::ELEMENT_ARRAY_BUFFER,
            Self::Uniform => gl::UNIFORM_BUFFER,
            Self::PixelUnpack => gl::PIXEL_UNPACK_BUFFER,
            Self::PixelPack => gl::PIXEL_PACK_BUFFER,
            Self::ShaderStorage => gl::SHADER_STORAGE_BUFFER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferState {
    /// Allocation size in bytes. May exceed `data.len()` for buffers the GPU
    /// writes into.
    pub size: usize,
    pub data: Option<Arc<[u8]>>,
    pub usage: BufferUsage,
    pub generation: u64,
}

struct Inner {
    state: BufferState,
    dirty: PerThread<ByteRanges>,
}

pub struct Buffer {
    resource: RenderResource,
    inner: Mutex<Inner>,
}

impl Buffer {
    pub fn new(manager: &Arc<RenderManager>, usage: BufferUsage) -> Arc<Self> {
        let buffer = Arc::new(Self {
            resource: RenderResource::new(manager, ResourceKind::Buffer),
            inner: Mutex::new(Inner {
                state: BufferState {
                    size: 0,
                    data: None,
                    usage,
                    generation: 0,
                },
                dirty: PerThread::new(manager.config().max_render_threads),
            }),
        });
        manager.register(buffer.id(), ResourceKind::Buffer, &buffer);
        buffer
    }

    pub fn state(&self) -> BufferState {
        self.inner.lock().state.clone()
    }

    pub fn lock(&self) -> BufferLock<'_> {
        BufferLock {
            inner: self.inner.lock(),
        }
    }

    /// Replace the whole content. A size change reallocates the GPU buffer.
    pub fn set_data(&self, data: Arc<[u8]>) {
        let mut inner = self.inner.lock();
        let len = data.len();
        inner.state.size = len;
        inner.state.data = Some(data);
        inner.state.generation += 1;
        inner.dirty.for_each(|ranges| {
            *ranges = ByteRanges::new();
            ranges.add(0..len);
        });
    }

    /// Allocate `size` bytes without client data.
    pub fn allocate(&self, size: usize) {
        let mut inner = self.inner.lock();
        inner.state.size = size;
        inner.state.data = None;
        inner.state.generation += 1;
        inner.dirty.clear();
    }

    /// Overwrite `bytes.len()` bytes at `offset`; only that range is uploaded
    /// on the next sync.
    pub fn update_range(&self, offset: usize, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        let Some(end) = offset.checked_add(bytes.len()) else {
            error!(buffer = %self.resource.id(), offset, len = bytes.len(), "update_range overflows");
            return;
        };
        let Some(data) = inner.state.data.as_ref() else {
            error!(buffer = %self.resource.id(), "update_range on a buffer without client data");
            return;
        };
        if end > data.len() {
            error!(
                buffer = %self.resource.id(),
                offset,
                len = bytes.len(),
                size = data.len(),
                "update_range out of bounds"
            );
            return;
        }
        let mut copy = data.to_vec();
        copy[offset..end].copy_from_slice(bytes);
        inner.state.data = Some(copy.into());
        inner.state.generation += 1;
        inner.dirty.for_each(|ranges| ranges.add(offset..end));
    }

    pub fn set_usage(&self, usage: BufferUsage) {
        let mut inner = self.inner.lock();
        if inner.state.usage != usage {
            inner.state.usage = usage;
            inner.state.generation += 1;
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().state.size
    }
}

impl Resource for Buffer {
    const KIND: ResourceKind = ResourceKind::Buffer;

    fn resource(&self) -> &RenderResource {
        &self.resource
    }

    fn generation(&self) -> u64 {
        self.inner.lock().state.generation
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Buffer")
            .field("id", &self.resource.id())
            .field("size", &inner.state.size)
            .field("generation", &inner.state.generation)
            .finish()
    }
}

pub struct BufferLock<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl BufferLock<'_> {
    pub fn state(&self) -> &BufferState {
        &self.inner.state
    }

    pub fn take_dirty_ranges(&mut self, thread: usize) -> ByteRanges {
        self.inner.dirty.take(thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;

    #[test]
    fn update_range_records_dirty_bytes() {
        let manager = RenderManager::new(RenderConfig::default());
        let buffer = Buffer::new(&manager, BufferUsage::Dynamic);
        buffer.set_data(vec![0u8; 16].into());
        buffer.lock().take_dirty_ranges(0);

        buffer.update_range(4, &[1, 2, 3, 4]);
        buffer.update_range(6, &[9, 9, 9]);
        let state = buffer.state();
        assert_eq!(&state.data.unwrap()[4..9], &[1, 2, 9, 9, 9]);
        assert_eq!(buffer.lock().take_dirty_ranges(0).ranges(), &[4..9]);
        assert_eq!(buffer.generation(), 3);
    }

    #[test]
    fn out_of_bounds_update_is_ignored() {
        let manager = RenderManager::new(RenderConfig::default());
        let buffer = Buffer::new(&manager, BufferUsage::Static);
        buffer.set_data(vec![0u8; 4].into());
        buffer.update_range(2, &[1, 2, 3]);
        buffer.update_range(usize::MAX, &[1]);
        assert_eq!(buffer.generation(), 1);
        assert_eq!(&buffer.state().data.unwrap()[..], &[0; 4]);
    }
}
