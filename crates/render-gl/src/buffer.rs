use std::ptr::NonNull;
use std::time::Duration;

use gl::types::{GLbitfield, GLenum, GLuint};
use render_core::{Buffer, BufferUsage, Resource, ResourceId};
use tracing::{debug, error, warn};

use crate::commands::GpuCommands;
use crate::handle::ResourceHandleGL;
use crate::state::{BufferMapping, StateGL};

/// Uploads go through a binding point no vertex array or draw call reads, so
/// syncing never disturbs the bindings captured by a bound VAO.
const UPLOAD_TARGET: GLenum = gl::COPY_WRITE_BUFFER;

/// GPU mirror of a [`Buffer`] on one render thread.
#[derive(Debug)]
pub struct BufferGL {
    id: ResourceId,
    handle: ResourceHandleGL,
    generation: Option<u64>,
    size: usize,
    usage: BufferUsage,
}

impl BufferGL {
    pub fn new(id: ResourceId, expiration: Duration, frame_time: u64) -> Self {
        Self {
            id,
            handle: ResourceHandleGL::new(expiration, frame_time),
            generation: None,
            size: 0,
            usage: BufferUsage::Static,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn handle(&self) -> GLuint {
        self.handle.handle()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn expired(&self, frame_time: u64) -> bool {
        self.handle.expired(frame_time)
    }

    /// Bring the GPU buffer up to date with `buffer`.
    ///
    /// Reallocates with `buffer_data` when size or usage changed, otherwise
    /// uploads only the byte ranges dirtied since this thread's last sync.
    pub fn sync(&mut self, gl: &dyn GpuCommands, state: &mut StateGL, buffer: &Buffer) -> bool {
        self.handle.touch(state.frame_time());
        let generation = buffer.generation();
        if self.generation == Some(generation) && self.handle() != 0 {
            return true;
        }

        let (snapshot, ranges) = {
            let mut lock = buffer.lock();
            let ranges = lock.take_dirty_ranges(state.thread_index());
            (lock.state().clone(), ranges)
        };

        if self.handle() == 0 {
            let handle = gl.create_buffer();
            if handle == 0 {
                error!(buffer = %self.id, "failed to create GPU buffer");
                return false;
            }
            self.handle.set_handle(handle);
        }
        if state.buffer_mapping(self.handle()).is_some() {
            warn!(buffer = %self.id, "buffer synced while mapped, unmapping first");
            self.unmap(gl, state);
        }

        gl.bind_buffer(UPLOAD_TARGET, self.handle());
        let reallocate = self.generation.is_none() || self.size != snapshot.size || self.usage != snapshot.usage;
        if reallocate {
            let data = snapshot.data.as_deref().filter(|d| d.len() >= snapshot.size);
            gl.buffer_data(UPLOAD_TARGET, snapshot.size, data.map(|d| &d[..snapshot.size]), snapshot.usage.gl_usage());
            self.size = snapshot.size;
            self.usage = snapshot.usage;
            state.consume_upload_bytes(snapshot.size as u64);
            debug!(buffer = %self.id, size = snapshot.size, "buffer allocated");
        } else if let Some(data) = snapshot.data.as_deref() {
            for range in ranges.ranges() {
                let Some(bytes) = data.get(range.clone()) else {
                    error!(buffer = %self.id, ?range, "dirty range outside buffer data");
                    continue;
                };
                gl.buffer_sub_data(UPLOAD_TARGET, range.start, bytes);
                state.consume_upload_bytes(bytes.len() as u64);
            }
        }
        gl.bind_buffer(UPLOAD_TARGET, 0);
        self.generation = Some(generation);
        true
    }

    pub fn bind(&mut self, gl: &dyn GpuCommands, state: &StateGL, target: GLenum) {
        self.handle.touch(state.frame_time());
        gl.bind_buffer(target, self.handle());
    }

    /// Map `length` bytes at `offset` through `target`.
    ///
    /// Only one mapping per buffer may be outstanding. Asking again with the
    /// same parameters returns the existing pointer; different parameters
    /// unmap the old range first.
    pub fn map(
        &mut self,
        gl: &dyn GpuCommands,
        state: &mut StateGL,
        target: GLenum,
        offset: usize,
        length: usize,
        access: GLbitfield,
    ) -> Option<NonNull<u8>> {
        let handle = self.handle();
        if handle == 0 {
            error!(buffer = %self.id, "map on a buffer that was never synced");
            return None;
        }
        if length == 0 || offset.checked_add(length).map_or(true, |end| end > self.size) {
            error!(buffer = %self.id, offset, length, size = self.size, "invalid buffer map range");
            debug_assert!(false, "invalid buffer map range");
            return None;
        }
        if access & (gl::MAP_READ_BIT | gl::MAP_WRITE_BIT) == 0 {
            error!(buffer = %self.id, access, "buffer map without read or write access");
            debug_assert!(false, "buffer map without read or write access");
            return None;
        }

        if let Some(mapping) = state.buffer_mapping(handle) {
            if mapping.matches(target, offset, length, access) {
                return Some(mapping.ptr);
            }
            self.unmap(gl, state);
        }

        self.handle.touch(state.frame_time());
        gl.bind_buffer(target, handle);
        let Some(ptr) = NonNull::new(gl.map_buffer_range(target, offset, length, access)) else {
            error!(buffer = %self.id, gl_error = gl.get_error(), "map_buffer_range failed");
            return None;
        };
        state.insert_buffer_mapping(
            handle,
            BufferMapping {
                target,
                offset,
                length,
                access,
                ptr,
            },
        );
        Some(ptr)
    }

    /// Flush part of an explicitly flushed mapping. `offset` is relative to
    /// the mapped range.
    pub fn flush(&mut self, gl: &dyn GpuCommands, state: &StateGL, offset: usize, length: usize) -> bool {
        let Some(mapping) = state.buffer_mapping(self.handle()) else {
            error!(buffer = %self.id, "flush on an unmapped buffer");
            return false;
        };
        if mapping.access & gl::MAP_FLUSH_EXPLICIT_BIT == 0 {
            error!(buffer = %self.id, "flush on a mapping without MAP_FLUSH_EXPLICIT_BIT");
            return false;
        }
        if offset.checked_add(length).map_or(true, |end| end > mapping.length) {
            error!(buffer = %self.id, offset, length, mapped = mapping.length, "flush range outside mapping");
            return false;
        }
        gl.bind_buffer(mapping.target, self.handle());
        gl.flush_mapped_buffer_range(mapping.target, offset, length);
        true
    }

    pub fn unmap(&mut self, gl: &dyn GpuCommands, state: &mut StateGL) -> bool {
        let Some(mapping) = state.remove_buffer_mapping(self.handle()) else {
            debug!(buffer = %self.id, "unmap on a buffer that is not mapped");
            return false;
        };
        gl.bind_buffer(mapping.target, self.handle());
        if !gl.unmap_buffer(mapping.target) {
            // the store was lost (e.g. display mode change); force a full re-upload
            warn!(buffer = %self.id, "buffer contents were corrupted while mapped");
            self.generation = None;
        }
        true
    }

    pub fn destroy(&mut self, gl: &dyn GpuCommands, state: &mut StateGL) {
        if state.buffer_mapping(self.handle()).is_some() {
            self.unmap(gl, state);
        }
        let handle = self.handle.take_handle();
        if handle != 0 {
            gl.delete_buffer(handle);
        }
        self.generation = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use render_core::{RenderConfig, RenderManager};

    use super::*;
    use crate::testing::{Call, RecordingCommands};

    fn setup() -> (Arc<RenderManager>, RecordingCommands, StateGL) {
        let manager = RenderManager::new(RenderConfig::default());
        let state = StateGL::new(0, manager.config());
        (manager, RecordingCommands::new(), state)
    }

    #[test]
    fn second_sync_without_changes_issues_nothing() {
        let (manager, gl, mut state) = setup();
        let buffer = Buffer::new(&manager, BufferUsage::Static);
        buffer.set_data(vec![1u8; 32].into());

        let mut mirror = BufferGL::new(buffer.id(), Duration::ZERO, 0);
        assert!(mirror.sync(&gl, &mut state, &buffer));
        assert_eq!(gl.count(|c| matches!(c, Call::BufferData { size: 32, has_data: true, .. })), 1);

        gl.clear_calls();
        assert!(mirror.sync(&gl, &mut state, &buffer));
        assert!(gl.calls().is_empty());
    }

    #[test]
    fn range_update_uploads_only_dirty_bytes() {
        let (manager, gl, mut state) = setup();
        let buffer = Buffer::new(&manager, BufferUsage::Dynamic);
        buffer.set_data(vec![0u8; 64].into());
        let mut mirror = BufferGL::new(buffer.id(), Duration::ZERO, 0);
        mirror.sync(&gl, &mut state, &buffer);
        gl.clear_calls();

        buffer.update_range(8, &[1, 2, 3, 4]);
        buffer.update_range(10, &[5, 6, 7, 8]);
        mirror.sync(&gl, &mut state, &buffer);

        let uploads: Vec<_> = gl.calls().into_iter().filter(Call::is_upload).collect();
        assert_eq!(
            uploads,
            vec![Call::BufferSubData {
                target: UPLOAD_TARGET,
                offset: 8,
                len: 6
            }]
        );
        let contents = gl.buffer_contents(mirror.handle()).unwrap();
        assert_eq!(&contents[8..14], &[1, 2, 5, 6, 7, 8]);
    }

    #[test]
    fn usage_change_reallocates() {
        let (manager, gl, mut state) = setup();
        let buffer = Buffer::new(&manager, BufferUsage::Static);
        buffer.set_data(vec![0u8; 16].into());
        let mut mirror = BufferGL::new(buffer.id(), Duration::ZERO, 0);
        mirror.sync(&gl, &mut state, &buffer);

        buffer.set_usage(BufferUsage::Stream);
        gl.clear_calls();
        mirror.sync(&gl, &mut state, &buffer);
        assert_eq!(
            gl.count(|c| matches!(c, Call::BufferData { usage, .. } if *usage == gl::STREAM_DRAW)),
            1
        );
    }

    #[test]
    fn identical_map_requests_share_one_mapping() {
        let (manager, gl, mut state) = setup();
        let buffer = Buffer::new(&manager, BufferUsage::Dynamic);
        buffer.allocate(128);
        let mut mirror = BufferGL::new(buffer.id(), Duration::ZERO, 0);
        mirror.sync(&gl, &mut state, &buffer);

        let access = gl::MAP_WRITE_BIT;
        let first = mirror.map(&gl, &mut state, gl::ARRAY_BUFFER, 0, 64, access).unwrap();
        let second = mirror.map(&gl, &mut state, gl::ARRAY_BUFFER, 0, 64, access).unwrap();
        assert_eq!(first, second);
        assert_eq!(gl.count(|c| matches!(c, Call::MapBufferRange { .. })), 1);

        mirror.map(&gl, &mut state, gl::ARRAY_BUFFER, 64, 64, access).unwrap();
        assert_eq!(gl.count(|c| matches!(c, Call::UnmapBuffer(_))), 1);
        assert_eq!(gl.count(|c| matches!(c, Call::MapBufferRange { .. })), 2);

        assert!(mirror.unmap(&gl, &mut state));
        assert!(!mirror.unmap(&gl, &mut state));
    }

    #[test]
    fn flush_requires_explicit_flush_mapping() {
        let (manager, gl, mut state) = setup();
        let buffer = Buffer::new(&manager, BufferUsage::Dynamic);
        buffer.allocate(32);
        let mut mirror = BufferGL::new(buffer.id(), Duration::ZERO, 0);
        mirror.sync(&gl, &mut state, &buffer);

        mirror.map(&gl, &mut state, gl::ARRAY_BUFFER, 0, 32, gl::MAP_WRITE_BIT).unwrap();
        assert!(!mirror.flush(&gl, &state, 0, 8));
        mirror.unmap(&gl, &mut state);

        let access = gl::MAP_WRITE_BIT | gl::MAP_FLUSH_EXPLICIT_BIT;
        mirror.map(&gl, &mut state, gl::ARRAY_BUFFER, 16, 16, access).unwrap();
        assert!(mirror.flush(&gl, &state, 0, 8));
        assert!(!mirror.flush(&gl, &state, 8, 16));
    }
}
