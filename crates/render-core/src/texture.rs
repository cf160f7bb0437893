//! CPU-side texture descriptor.

use std::sync::Arc;
use std::time::Duration;

use gl::types::GLenum;
use parking_lot::{Mutex, MutexGuard};
use tracing::error;

use crate::format::PixelFormat;
use crate::manager::RenderManager;
use crate::region::{PerThread, Rect, Region};
use crate::resource::{RenderResource, Resource, ResourceKind};

/// Sampler state applied to the GPU texture on (re)allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerParams {
    pub min_filter: GLenum,
    pub mag_filter: GLenum,
    pub wrap: GLenum,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            min_filter: gl::LINEAR,
            mag_filter: gl::LINEAR,
            wrap: gl::CLAMP_TO_EDGE,
        }
    }
}

/// Everything about a texture except its pending dirty regions.
#[derive(Debug, Clone)]
pub struct TextureState {
    /// 1, 2 or 3. Zero until data or a size is set.
    pub dimensions: u8,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: PixelFormat,
    /// Sample count; above 1 the texture is multisampled and takes no data.
    pub samples: u32,
    pub data: Option<Arc<[u8]>>,
    /// Row length of `data` in pixels, or 0 when rows are tightly packed.
    pub line_size: u32,
    pub mipmaps: bool,
    pub sampler: SamplerParams,
    /// Overrides the render config's default when set.
    pub expiration: Option<Duration>,
    pub generation: u64,
}

impl TextureState {
    pub fn size(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.depth)
    }

    pub fn is_multisampled(&self) -> bool {
        self.samples > 1
    }

    /// Bytes of pixel data a full upload moves.
    pub fn data_size(&self) -> usize {
        if self.format.compressed {
            return self.data.as_ref().map_or(0, |d| d.len());
        }
        self.format.row_bytes(self.width) * self.height.max(1) as usize * self.depth.max(1) as usize
    }
}

struct Inner {
    state: TextureState,
    dirty: PerThread<Region>,
}

/// A texture as the application sees it.
///
/// Every content- or format-affecting setter bumps the generation counter;
/// the GPU mirror for each render thread compares generations and never looks
/// at the data to decide whether it is stale.
pub struct Texture {
    resource: RenderResource,
    inner: Mutex<Inner>,
}

impl Texture {
    pub fn new(manager: &Arc<RenderManager>) -> Arc<Self> {
        let threads = manager.config().max_render_threads;
        let texture = Arc::new(Self {
            resource: RenderResource::new(manager, ResourceKind::Texture),
            inner: Mutex::new(Inner {
                state: TextureState {
                    dimensions: 0,
                    width: 0,
                    height: 0,
                    depth: 0,
                    format: PixelFormat::default(),
                    samples: 0,
                    data: None,
                    line_size: 0,
                    mipmaps: false,
                    sampler: SamplerParams::default(),
                    expiration: None,
                    generation: 0,
                },
                dirty: PerThread::new(threads),
            }),
        });
        manager.register(texture.id(), ResourceKind::Texture, &texture);
        texture
    }

    /// Snapshot of the descriptor state.
    pub fn state(&self) -> TextureState {
        self.inner.lock().state.clone()
    }

    /// Lock the descriptor so a mirror can read a consistent state and take
    /// its dirty region in one step.
    pub fn lock(&self) -> TextureLock<'_> {
        TextureLock {
            inner: self.inner.lock(),
        }
    }

    pub fn set_data_1d(&self, width: u32, format: PixelFormat, data: Option<Arc<[u8]>>) {
        self.set_data(1, (width, 1, 1), format, data);
    }

    pub fn set_data_2d(&self, width: u32, height: u32, format: PixelFormat, data: Option<Arc<[u8]>>) {
        self.set_data(2, (width, height, 1), format, data);
    }

    pub fn set_data_3d(
        &self,
        width: u32,
        height: u32,
        depth: u32,
        format: PixelFormat,
        data: Option<Arc<[u8]>>,
    ) {
        self.set_data(3, (width, height, depth), format, data);
    }

    fn set_data(&self, dimensions: u8, size: (u32, u32, u32), format: PixelFormat, data: Option<Arc<[u8]>>) {
        let mut inner = self.inner.lock();
        let state = &mut inner.state;
        if let Some(bytes) = &data {
            if !format.compressed {
                let needed = format.row_bytes(size.0) * size.1 as usize * size.2 as usize;
                if bytes.len() < needed {
                    error!(
                        texture = %self.resource.id(),
                        got = bytes.len(),
                        needed,
                        "texture data too short for its size"
                    );
                    return;
                }
            }
        }
        state.dimensions = dimensions;
        (state.width, state.height, state.depth) = size;
        state.format = format;
        state.data = data;
        state.line_size = 0;
        state.generation += 1;
        // mirrors that keep their allocation re-upload everything
        let full = Rect::new_3d(0, 0, 0, size.0, size.1, size.2);
        inner.dirty.for_each(|region| {
            region.clear();
            region.add(full);
        });
    }

    /// Mark content inside `rect` as changed. `data` must already hold the new
    /// pixels (replace it first with [`replace_data`](Self::replace_data) if
    /// needed).
    pub fn add_dirty_rect(&self, rect: Rect) {
        let mut inner = self.inner.lock();
        let Some(rect) = rect.clamped(inner.state.size()) else {
            return;
        };
        inner.dirty.for_each(|region| region.add(rect));
        inner.state.generation += 1;
    }

    /// Swap in new pixel data of the same size and format without
    /// invalidating the GPU allocation. Pair with
    /// [`add_dirty_rect`](Self::add_dirty_rect).
    pub fn replace_data(&self, data: Arc<[u8]>) {
        let mut inner = self.inner.lock();
        inner.state.data = Some(data);
    }

    pub fn set_line_size(&self, pixels: u32) {
        let mut inner = self.inner.lock();
        inner.state.line_size = pixels;
        inner.state.generation += 1;
    }

    pub fn set_samples(&self, samples: u32) {
        let mut inner = self.inner.lock();
        if inner.state.samples != samples {
            inner.state.samples = samples;
            inner.state.generation += 1;
        }
    }

    pub fn set_format(&self, format: PixelFormat) {
        let mut inner = self.inner.lock();
        if inner.state.format != format {
            inner.state.format = format;
            inner.state.generation += 1;
        }
    }

    /// Declare storage without data, e.g. for render targets.
    pub fn set_size_2d(&self, width: u32, height: u32) {
        let mut inner = self.inner.lock();
        let state = &mut inner.state;
        if state.dimensions != 2 || state.width != width || state.height != height {
            state.dimensions = 2;
            (state.width, state.height, state.depth) = (width, height, 1);
            state.data = None;
            state.generation += 1;
        }
    }

    pub fn set_mipmaps(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        if inner.state.mipmaps != enabled {
            inner.state.mipmaps = enabled;
            inner.state.generation += 1;
        }
    }

    pub fn set_sampler(&self, sampler: SamplerParams) {
        let mut inner = self.inner.lock();
        if inner.state.sampler != sampler {
            inner.state.sampler = sampler;
            inner.state.generation += 1;
        }
    }

    pub fn set_expiration(&self, expiration: Option<Duration>) {
        self.inner.lock().state.expiration = expiration;
    }

    pub fn size(&self) -> (u32, u32, u32) {
        self.inner.lock().state.size()
    }
}

impl Resource for Texture {
    const KIND: ResourceKind = ResourceKind::Texture;

    fn resource(&self) -> &RenderResource {
        &self.resource
    }

    fn generation(&self) -> u64 {
        self.inner.lock().state.generation
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Texture")
            .field("id", &self.resource.id())
            .field("size", &inner.state.size())
            .field("generation", &inner.state.generation)
            .finish()
    }
}

/// Locked view of a [`Texture`].
pub struct TextureLock<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl TextureLock<'_> {
    pub fn state(&self) -> &TextureState {
        &self.inner.state
    }

    /// Take (and clear) the changes recorded for render thread `thread`.
    pub fn take_dirty_region(&mut self, thread: usize) -> Region {
        self.inner.dirty.take(thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;

    fn pixels(len: usize) -> Arc<[u8]> {
        vec![7u8; len].into()
    }

    #[test]
    fn setters_bump_generation_only_on_change() {
        let manager = RenderManager::new(RenderConfig::default());
        let tex = Texture::new(&manager);
        assert_eq!(tex.generation(), 0);

        tex.set_data_2d(4, 4, PixelFormat::rgba8(), Some(pixels(64)));
        assert_eq!(tex.generation(), 1);

        tex.set_format(PixelFormat::rgba8());
        tex.set_samples(0);
        assert_eq!(tex.generation(), 1);

        tex.set_format(PixelFormat::bgra8());
        assert_eq!(tex.generation(), 2);
    }

    #[test]
    fn short_data_is_rejected() {
        let manager = RenderManager::new(RenderConfig::default());
        let tex = Texture::new(&manager);
        tex.set_data_2d(4, 4, PixelFormat::rgba8(), Some(pixels(10)));
        assert_eq!(tex.generation(), 0);
        assert!(tex.state().data.is_none());
    }

    #[test]
    fn dirty_rects_are_clamped_and_per_thread() {
        let manager = RenderManager::new(RenderConfig {
            max_render_threads: 2,
            ..RenderConfig::default()
        });
        let tex = Texture::new(&manager);
        tex.set_data_2d(8, 8, PixelFormat::red8(), Some(pixels(64)));
        {
            let mut lock = tex.lock();
            assert_eq!(lock.take_dirty_region(0).volume(), 64);
            lock.take_dirty_region(1);
        }
        tex.add_dirty_rect(Rect::new(6, 6, 10, 10));
        tex.add_dirty_rect(Rect::new(20, 20, 1, 1));

        let mut lock = tex.lock();
        assert_eq!(lock.take_dirty_region(0).volume(), 4);
        assert!(lock.take_dirty_region(0).is_empty());
        assert_eq!(lock.take_dirty_region(1).volume(), 4);
    }

    #[test]
    fn registry_forgets_dropped_textures() {
        let manager = RenderManager::new(RenderConfig::default());
        let tex = Texture::new(&manager);
        let id = tex.id();
        assert!(manager.get::<Texture>(id).is_some());
        drop(tex);
        assert!(manager.get::<Texture>(id).is_none());
        assert_eq!(manager.resource_count(), 0);
    }
}
