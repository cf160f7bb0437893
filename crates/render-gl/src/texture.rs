//! GPU mirror of a [`Texture`].
//!
//! A sync either reallocates (dimensions, size, format, sample count or
//! mipmap flag changed) and uploads everything, or uploads only the dirty
//! rectangles this render thread has not seen yet. 2D sub-image uploads can
//! be deferred onto the thread's [`CommandExecutor`]; [`TextureGL::sync`]
//! waits for those before the texture may be bound.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gl::types::{GLenum, GLint, GLuint};
use parking_lot::Mutex;
use render_core::{PixelFormat, Rect, Region, Resource, ResourceId, SamplerParams, Texture, TextureState};
use tracing::{debug, error, trace, warn};

use crate::commands::{FenceStatus, GpuCommands, GpuFence};
use crate::executor::CommandExecutor;
use crate::handle::ResourceHandleGL;
use crate::state::StateGL;

const ASYNC_WAIT_TIMEOUT_NS: u64 = 1_000_000_000;

/// The attributes whose change forces a new GPU allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Allocation {
    dimensions: u8,
    size: (u32, u32, u32),
    format: PixelFormat,
    samples: u32,
    mipmaps: bool,
}

impl Allocation {
    fn of(state: &TextureState) -> Self {
        Self {
            dimensions: state.dimensions,
            size: state.size(),
            format: state.format,
            samples: state.samples,
            mipmaps: state.mipmaps,
        }
    }

    fn target(&self) -> GLenum {
        match self.dimensions {
            1 => gl::TEXTURE_1D,
            3 => gl::TEXTURE_3D,
            _ if self.samples > 1 => gl::TEXTURE_2D_MULTISAMPLE,
            _ => gl::TEXTURE_2D,
        }
    }
}

#[derive(Debug)]
pub struct TextureGL {
    id: ResourceId,
    handle: ResourceHandleGL,
    generation: Option<u64>,
    allocation: Option<Allocation>,
    sampler: Option<SamplerParams>,
    pending_uploads: Arc<AtomicUsize>,
    /// Bumped whenever the GPU handle goes away; deferred uploads queued for
    /// an older epoch are dropped.
    epoch: Arc<AtomicU64>,
    fences: Arc<Mutex<Vec<GpuFence>>>,
}

impl TextureGL {
    pub fn new(id: ResourceId, expiration: Duration, frame_time: u64) -> Self {
        Self {
            id,
            handle: ResourceHandleGL::new(expiration, frame_time),
            generation: None,
            allocation: None,
            sampler: None,
            pending_uploads: Arc::new(AtomicUsize::new(0)),
            epoch: Arc::new(AtomicU64::new(0)),
            fences: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn handle(&self) -> GLuint {
        self.handle.handle()
    }

    /// Bind target of the current allocation, or `TEXTURE_2D` before the
    /// first upload.
    pub fn target(&self) -> GLenum {
        self.allocation.map_or(gl::TEXTURE_2D, |a| a.target())
    }

    pub fn expired(&self, frame_time: u64) -> bool {
        self.handle.expired(frame_time)
    }

    pub fn set_expiration(&mut self, expiration: Duration) {
        self.handle.set_expiration(expiration);
    }

    /// Number of deferred uploads not yet executed.
    pub fn pending_uploads(&self) -> usize {
        self.pending_uploads.load(Ordering::Acquire)
    }

    /// Upload whatever changed in `texture` since the last call on this
    /// thread. With an `executor`, 2D sub-image uploads are queued on it
    /// instead of running inline.
    pub fn upload(
        &mut self,
        gl: &dyn GpuCommands,
        state: &mut StateGL,
        texture: &Texture,
        executor: Option<&CommandExecutor>,
    ) -> bool {
        self.handle.touch(state.frame_time());
        if self.generation == Some(texture.generation()) && self.handle() != 0 {
            return true;
        }

        let (snapshot, region) = {
            let mut lock = texture.lock();
            let region = lock.take_dirty_region(state.thread_index());
            (lock.state().clone(), region)
        };
        if let Some(expiration) = snapshot.expiration {
            self.handle.set_expiration(expiration);
        }
        if snapshot.dimensions == 0 {
            trace!(texture = %self.id, "texture has no storage yet");
            self.generation = Some(snapshot.generation);
            return false;
        }

        let allocation = Allocation::of(&snapshot);
        let ok = if self.allocation != Some(allocation) || self.handle() == 0 {
            self.reallocate(gl, state, &snapshot, allocation, executor)
        } else {
            self.bind_for_upload(gl, state);
            self.apply_sampler(gl, &snapshot);
            self.upload_region(gl, state, &snapshot, &region, executor)
        };
        if ok {
            self.generation = Some(snapshot.generation);
        }
        ok
    }

    fn bind_for_upload(&self, gl: &dyn GpuCommands, state: &mut StateGL) {
        let target = self.target();
        if state.set_texture(target, self.handle()) {
            gl.bind_texture(target, self.handle());
        }
    }

    fn apply_sampler(&mut self, gl: &dyn GpuCommands, snapshot: &TextureState) {
        let Some(allocation) = self.allocation else {
            return;
        };
        if allocation.samples > 1 || self.sampler == Some(snapshot.sampler) {
            return;
        }
        let target = allocation.target();
        let sampler = snapshot.sampler;
        let min_filter = if allocation.mipmaps && sampler.min_filter == gl::LINEAR {
            gl::LINEAR_MIPMAP_LINEAR
        } else {
            sampler.min_filter
        };
        gl.tex_parameter(target, gl::TEXTURE_MIN_FILTER, min_filter as GLint);
        gl.tex_parameter(target, gl::TEXTURE_MAG_FILTER, sampler.mag_filter as GLint);
        gl.tex_parameter(target, gl::TEXTURE_WRAP_S, sampler.wrap as GLint);
        if allocation.dimensions >= 2 {
            gl.tex_parameter(target, gl::TEXTURE_WRAP_T, sampler.wrap as GLint);
        }
        if allocation.dimensions == 3 {
            gl.tex_parameter(target, gl::TEXTURE_WRAP_R, sampler.wrap as GLint);
        }
        self.sampler = Some(sampler);
    }

    fn reallocate(
        &mut self,
        gl: &dyn GpuCommands,
        state: &mut StateGL,
        snapshot: &TextureState,
        allocation: Allocation,
        executor: Option<&CommandExecutor>,
    ) -> bool {
        let data = snapshot.data.as_deref();
        if let Some(data) = data.filter(|_| !snapshot.format.compressed && allocation.samples <= 1) {
            if !image_fits(snapshot, data) {
                error!(
                    texture = %self.id,
                    len = data.len(),
                    size = ?snapshot.size(),
                    line_size = snapshot.line_size,
                    "texture data too short for its format and row length"
                );
                return false;
            }
        }

        self.wait_pending(gl, state);
        self.release_handle(gl, state);

        let handle = gl.create_texture();
        if handle == 0 {
            error!(texture = %self.id, "failed to create GPU texture");
            return false;
        }
        self.handle.set_handle(handle);
        self.allocation = Some(allocation);
        self.sampler = None;
        self.bind_for_upload(gl, state);
        self.apply_sampler(gl, snapshot);

        let format = snapshot.format;
        let (width, height, depth) = snapshot.size();
        debug!(
            texture = %self.id,
            handle,
            width,
            height,
            depth,
            samples = snapshot.samples,
            "texture allocated"
        );

        if allocation.samples > 1 {
            if data.is_some() {
                error!(texture = %self.id, "pixel data ignored for a multisampled texture");
            }
            if allocation.dimensions != 2 {
                error!(texture = %self.id, dimensions = allocation.dimensions, "only 2D textures can be multisampled");
                return false;
            }
            gl.tex_image_2d_multisample(snapshot.samples, format.internal_format, width, height);
            return true;
        }

        if format.compressed {
            let Some(blob) = data else {
                error!(texture = %self.id, "compressed texture without data");
                return false;
            };
            if allocation.dimensions != 2 {
                error!(texture = %self.id, "compressed textures must be 2D");
                return false;
            }
            gl.compressed_tex_image_2d(0, format.internal_format, width, height, blob);
            state.consume_upload_bytes(blob.len() as u64);
        } else {
            let deferred = executor.filter(|_| allocation.dimensions == 2 && data.is_some());
            // deferred uploads allocate empty storage here and fill it later
            let inline_data = if deferred.is_some() { None } else { data };
            let row_length = set_row_length(gl, snapshot, inline_data.is_some());
            match allocation.dimensions {
                1 => gl.tex_image_1d(0, format.internal_format, width, format.layout, format.data_type, inline_data),
                2 => gl.tex_image_2d(
                    gl::TEXTURE_2D,
                    0,
                    format.internal_format,
                    width,
                    height,
                    format.layout,
                    format.data_type,
                    inline_data,
                ),
                _ => gl.tex_image_3d(
                    0,
                    format.internal_format,
                    (width, height, depth),
                    format.layout,
                    format.data_type,
                    inline_data,
                ),
            }
            reset_row_length(gl, row_length);
            if inline_data.is_some() {
                state.consume_upload_bytes(snapshot.data_size() as u64);
            }
            if let Some(executor) = deferred {
                let mut full = Region::new();
                full.add(Rect::new(0, 0, width, height));
                self.queue_upload(state, snapshot, &full, executor);
            }
        }

        if allocation.mipmaps && data.is_some() {
            gl.generate_mipmap(allocation.target());
        }
        true
    }

    fn upload_region(
        &mut self,
        gl: &dyn GpuCommands,
        state: &mut StateGL,
        snapshot: &TextureState,
        region: &Region,
        executor: Option<&CommandExecutor>,
    ) -> bool {
        if region.is_empty() {
            return true;
        }
        let Some(allocation) = self.allocation else {
            return false;
        };
        if allocation.samples > 1 {
            error!(texture = %self.id, "content upload to a multisampled texture");
            return false;
        }
        let Some(data) = snapshot.data.as_deref() else {
            trace!(texture = %self.id, "dirty region without pixel data");
            return true;
        };

        if snapshot.format.compressed {
            // no sub-region path: re-send the whole blob
            let (width, height, _) = snapshot.size();
            gl.compressed_tex_image_2d(0, snapshot.format.internal_format, width, height, data);
            state.consume_upload_bytes(data.len() as u64);
            return true;
        }

        if let Some(executor) = executor.filter(|_| allocation.dimensions == 2) {
            self.queue_upload(state, snapshot, region, executor);
            return true;
        }

        let row_length = set_row_length(gl, snapshot, true);
        for rect in region.rects() {
            let Some(bytes) = rect_bytes(snapshot, data, rect) else {
                error!(texture = %self.id, ?rect, "dirty rect outside texture data");
                continue;
            };
            let format = snapshot.format;
            match allocation.dimensions {
                1 => gl.tex_sub_image_1d(*rect, format.layout, format.data_type, bytes),
                2 => gl.tex_sub_image_2d(gl::TEXTURE_2D, *rect, format.layout, format.data_type, bytes),
                _ => gl.tex_sub_image_3d(*rect, format.layout, format.data_type, bytes),
            }
            state.consume_upload_bytes(format.row_bytes(rect.width) as u64 * rect.height as u64 * rect.depth as u64);
        }
        reset_row_length(gl, row_length);
        if allocation.mipmaps {
            gl.generate_mipmap(allocation.target());
        }
        true
    }

    /// Defer the sub-image calls for `region` onto `executor`.
    fn queue_upload(&self, state: &mut StateGL, snapshot: &TextureState, region: &Region, executor: &CommandExecutor) {
        let Some(data) = snapshot.data.clone() else {
            return;
        };
        let handle = self.handle();
        let id = self.id;
        let rects = region.rects().to_vec();
        let snapshot = snapshot.clone();
        let pending = self.pending_uploads.clone();
        let epoch = self.epoch.clone();
        let queued_epoch = epoch.load(Ordering::Acquire);
        let fences = self.fences.clone();
        let mipmaps = self.allocation.is_some_and(|a| a.mipmaps);

        let bytes: u64 = rects
            .iter()
            .map(|r| snapshot.format.row_bytes(r.width) as u64 * r.height as u64)
            .sum();
        state.consume_upload_bytes(bytes);
        pending.fetch_add(1, Ordering::AcqRel);
        executor.submit(move |gl| {
            if epoch.load(Ordering::Acquire) != queued_epoch {
                trace!(texture = %id, handle, "deferred upload dropped, texture was reallocated");
                pending.fetch_sub(1, Ordering::AcqRel);
                return;
            }
            gl.bind_texture(gl::TEXTURE_2D, handle);
            let row_length = set_row_length(gl, &snapshot, true);
            for rect in &rects {
                match rect_bytes(&snapshot, &data, rect) {
                    Some(bytes) => gl.tex_sub_image_2d(
                        gl::TEXTURE_2D,
                        *rect,
                        snapshot.format.layout,
                        snapshot.format.data_type,
                        bytes,
                    ),
                    None => error!(texture = %id, ?rect, "dirty rect outside texture data"),
                }
            }
            reset_row_length(gl, row_length);
            if mipmaps {
                gl.generate_mipmap(gl::TEXTURE_2D);
            }
            if let Some(fence) = gl.fence_sync() {
                fences.lock().push(fence);
            }
            pending.fetch_sub(1, Ordering::AcqRel);
        });
        trace!(texture = %id, rects = region.rects().len(), "texture upload deferred");
    }

    /// Block until deferred uploads have been issued and completed on the GPU.
    /// Must run on the thread that owns `executor`.
    pub fn sync(&mut self, gl: &dyn GpuCommands, state: &mut StateGL, executor: &CommandExecutor) {
        if self.pending_uploads() > 0 {
            executor.run(gl);
            // deferred commands bind textures behind the cache's back
            state.invalidate_textures();
        }
        self.wait_fences(gl);
    }

    fn wait_pending(&mut self, gl: &dyn GpuCommands, state: &mut StateGL) {
        if self.pending_uploads() > 0 {
            debug!(
                texture = %self.id,
                pending = self.pending_uploads(),
                "reallocating, queued uploads will be dropped"
            );
            state.invalidate_textures();
        }
        self.wait_fences(gl);
    }

    fn wait_fences(&mut self, gl: &dyn GpuCommands) {
        let fences = std::mem::take(&mut *self.fences.lock());
        for fence in fences {
            if gl.client_wait_sync(&fence, ASYNC_WAIT_TIMEOUT_NS) != FenceStatus::Signaled {
                warn!(texture = %self.id, "timed out waiting for a deferred texture upload");
            }
            gl.delete_sync(fence);
        }
    }

    /// Bind to texture unit `unit`, skipping calls the state cache proves
    /// redundant.
    pub fn bind(&mut self, gl: &dyn GpuCommands, state: &mut StateGL, unit: u32) -> bool {
        if self.handle() == 0 {
            return false;
        }
        self.handle.touch(state.frame_time());
        if state.set_texture_unit(unit) {
            gl.active_texture(unit);
        }
        self.bind_for_upload(gl, state);
        true
    }

    fn release_handle(&mut self, gl: &dyn GpuCommands, state: &mut StateGL) {
        let handle = self.handle.take_handle();
        if handle != 0 {
            self.epoch.fetch_add(1, Ordering::AcqRel);
            gl.delete_texture(handle);
            state.invalidate_textures();
        }
        self.allocation = None;
        self.sampler = None;
    }

    pub fn destroy(&mut self, gl: &dyn GpuCommands, state: &mut StateGL) {
        self.wait_fences(gl);
        self.release_handle(gl, state);
        self.generation = None;
    }
}

/// Slice of `data` starting at the first texel of `rect`, long enough for the
/// last texel of its last row when rows are `row_length` texels apart.
fn rect_bytes<'a>(state: &TextureState, data: &'a [u8], rect: &Rect) -> Option<&'a [u8]> {
    if rect.is_empty() {
        return None;
    }
    let bpp = state.format.bytes_per_pixel as usize;
    let row = row_length(state) as usize;
    let image = row.checked_mul(state.height.max(1) as usize)?;
    let texel = |z: u32, y: u32, x: u64| -> Option<usize> {
        (z as usize)
            .checked_mul(image)?
            .checked_add((y as usize).checked_mul(row)?)?
            .checked_add(usize::try_from(x).ok()?)?
            .checked_mul(bpp)
    };
    let first = texel(rect.z, rect.y, rect.x as u64)?;
    let last = texel(
        rect.z.checked_add(rect.depth - 1)?,
        rect.y.checked_add(rect.height - 1)?,
        rect.x as u64 + rect.width as u64,
    )?;
    data.get(first..last)
}

/// Whether `data` covers everything a full-image upload reads with the
/// unpack row length and image height [`set_row_length`] sets.
fn image_fits(state: &TextureState, data: &[u8]) -> bool {
    let (width, height, depth) = state.size();
    let full = Rect::new_3d(0, 0, 0, width, height.max(1), depth.max(1));
    full.is_empty() || rect_bytes(state, data, &full).is_some()
}

fn row_length(state: &TextureState) -> u32 {
    if state.line_size > 0 {
        state.line_size
    } else {
        state.width
    }
}

/// Returns whether the unpack state was changed and must be reset.
fn set_row_length(gl: &dyn GpuCommands, state: &TextureState, has_data: bool) -> bool {
    if !has_data {
        return false;
    }
    gl.pixel_store(gl::UNPACK_ALIGNMENT, 1);
    gl.pixel_store(gl::UNPACK_ROW_LENGTH, row_length(state) as GLint);
    if state.dimensions == 3 {
        gl.pixel_store(gl::UNPACK_IMAGE_HEIGHT, state.height as GLint);
    }
    true
}

fn reset_row_length(gl: &dyn GpuCommands, changed: bool) {
    if changed {
        gl.pixel_store(gl::UNPACK_ROW_LENGTH, 0);
        gl.pixel_store(gl::UNPACK_IMAGE_HEIGHT, 0);
        gl.pixel_store(gl::UNPACK_ALIGNMENT, 4);
    }
}

#[cfg(test)]
mod tests {
    use render_core::{RenderConfig, RenderManager};

    use super::*;
    use crate::testing::{Call, RecordingCommands};

    fn setup() -> (Arc<RenderManager>, RecordingCommands, StateGL) {
        let manager = RenderManager::new(RenderConfig::default());
        let state = StateGL::new(0, manager.config());
        (manager, RecordingCommands::new(), state)
    }

    fn gradient(width: u32, height: u32) -> Arc<[u8]> {
        (0..width * height).map(|i| i as u8).collect::<Vec<_>>().into()
    }

    #[test]
    fn rect_bytes_start_at_rect_origin() {
        let manager = RenderManager::new(RenderConfig::default());
        let tex = Texture::new(&manager);
        tex.set_data_2d(8, 4, PixelFormat::red8(), Some(gradient(8, 4)));
        let state = tex.state();
        let data = state.data.clone().unwrap();
        let bytes = rect_bytes(&state, &data, &Rect::new(2, 1, 3, 2)).unwrap();
        assert_eq!(bytes.first(), Some(&10));
        assert_eq!(bytes.len(), 8 + 3);
        assert!(rect_bytes(&state, &data, &Rect::new(6, 3, 4, 1)).is_none());
    }

    #[test]
    fn dirty_rects_upload_sub_images_only() {
        let (manager, gl, mut state) = setup();
        let tex = Texture::new(&manager);
        tex.set_data_2d(16, 16, PixelFormat::red8(), Some(gradient(16, 16)));
        let mut mirror = TextureGL::new(tex.id(), Duration::ZERO, 0);
        assert!(mirror.upload(&gl, &mut state, &tex, None));
        assert_eq!(gl.count(|c| matches!(c, Call::TexImage2D { data_len: Some(256), .. })), 1);

        gl.clear_calls();
        tex.add_dirty_rect(Rect::new(0, 0, 4, 4));
        tex.add_dirty_rect(Rect::new(8, 8, 2, 2));
        assert!(mirror.upload(&gl, &mut state, &tex, None));
        let subs: Vec<Rect> = gl
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::TexSubImage2D { rect, .. } => Some(rect),
                _ => None,
            })
            .collect();
        assert_eq!(subs.iter().map(Rect::volume).sum::<u64>(), 20);
        assert_eq!(gl.count(|c| matches!(c, Call::TexImage2D { .. } | Call::CreateTexture(_))), 0);
    }

    #[test]
    fn multisampled_texture_rejects_content() {
        let (manager, gl, mut state) = setup();
        let tex = Texture::new(&manager);
        tex.set_size_2d(32, 32);
        tex.set_samples(4);
        let mut mirror = TextureGL::new(tex.id(), Duration::ZERO, 0);
        assert!(mirror.upload(&gl, &mut state, &tex, None));
        assert_eq!(mirror.target(), gl::TEXTURE_2D_MULTISAMPLE);
        assert_eq!(
            gl.count(|c| matches!(c, Call::TexImage2DMultisample { samples: 4, .. })),
            1
        );

        tex.add_dirty_rect(Rect::new(0, 0, 4, 4));
        assert!(!mirror.upload(&gl, &mut state, &tex, None));
        assert_eq!(gl.count(|c| matches!(c, Call::TexSubImage2D { .. })), 0);
    }

    #[test]
    fn compressed_texture_uploads_one_blob() {
        let (manager, gl, mut state) = setup();
        let tex = Texture::new(&manager);
        let blob: Arc<[u8]> = vec![0xAB; 128].into();
        tex.set_data_2d(16, 16, PixelFormat::compressed(0x83F1), Some(blob));
        let mut mirror = TextureGL::new(tex.id(), Duration::ZERO, 0);
        assert!(mirror.upload(&gl, &mut state, &tex, None));
        assert_eq!(gl.count(|c| matches!(c, Call::CompressedTexImage2D { data_len: 128, .. })), 1);
        assert_eq!(gl.count(|c| matches!(c, Call::TexSubImage2D { .. })), 0);
    }

    #[test]
    fn format_change_without_new_data_is_not_uploaded() {
        let (manager, gl, mut state) = setup();
        let tex = Texture::new(&manager);
        tex.set_data_2d(4, 4, PixelFormat::red8(), Some(gradient(4, 4)));
        let mut mirror = TextureGL::new(tex.id(), Duration::ZERO, 0);
        assert!(mirror.upload(&gl, &mut state, &tex, None));
        let handle = mirror.handle();

        // 16 bytes of red8 cannot fill a 4x4 rgba8 image
        gl.clear_calls();
        tex.set_format(PixelFormat::rgba8());
        assert!(!mirror.upload(&gl, &mut state, &tex, None));
        assert_eq!(gl.count(|c| matches!(c, Call::TexImage2D { .. } | Call::DeleteTexture(_))), 0);
        assert_eq!(mirror.handle(), handle);

        tex.set_data_2d(4, 4, PixelFormat::rgba8(), Some(vec![7; 64].into()));
        assert!(mirror.upload(&gl, &mut state, &tex, None));
        assert_eq!(gl.count(|c| matches!(c, Call::TexImage2D { data_len: Some(64), .. })), 1);
    }

    #[test]
    fn row_length_beyond_data_is_not_uploaded() {
        let (manager, gl, mut state) = setup();
        let tex = Texture::new(&manager);
        tex.set_data_2d(4, 4, PixelFormat::red8(), Some(gradient(4, 4)));
        tex.set_line_size(64);
        let mut mirror = TextureGL::new(tex.id(), Duration::ZERO, 0);
        assert!(!mirror.upload(&gl, &mut state, &tex, None));
        assert_eq!(gl.count(|c| matches!(c, Call::TexImage2D { .. } | Call::PixelStore(..))), 0);

        // three padded rows of 8 plus a last row of 4
        let padded: Arc<[u8]> = vec![1; 8 * 3 + 4].into();
        tex.set_data_2d(4, 4, PixelFormat::red8(), Some(padded));
        tex.set_line_size(8);
        assert!(mirror.upload(&gl, &mut state, &tex, None));
        assert!(gl.calls().contains(&Call::PixelStore(gl::UNPACK_ROW_LENGTH, 8)));
        assert_eq!(gl.count(|c| matches!(c, Call::TexImage2D { data_len: Some(28), .. })), 1);
    }

    #[test]
    fn reallocation_drops_uploads_queued_for_the_old_handle() {
        let (manager, gl, mut state) = setup();
        let executor = CommandExecutor::new(0);
        let tex = Texture::new(&manager);
        tex.set_data_2d(4, 4, PixelFormat::red8(), Some(gradient(4, 4)));
        let mut mirror = TextureGL::new(tex.id(), Duration::ZERO, 0);
        assert!(mirror.upload(&gl, &mut state, &tex, Some(&executor)));
        let old = mirror.handle();
        assert_eq!(mirror.pending_uploads(), 1);

        tex.set_data_2d(8, 8, PixelFormat::red8(), None);
        assert!(mirror.upload(&gl, &mut state, &tex, Some(&executor)));
        assert_ne!(mirror.handle(), old);
        assert_eq!(executor.run(&gl), 1);
        assert_eq!(mirror.pending_uploads(), 0);

        let calls = gl.calls();
        let deleted = calls.iter().position(|c| *c == Call::DeleteTexture(old)).unwrap();
        assert!(!calls[deleted..]
            .iter()
            .any(|c| matches!(c, Call::BindTexture(_, h) if *h == old) || matches!(c, Call::TexSubImage2D { .. })));
    }

    #[test]
    fn deferred_upload_runs_on_executor_and_sync_waits() {
        let (manager, gl, mut state) = setup();
        let executor = CommandExecutor::new(0);
        let tex = Texture::new(&manager);
        tex.set_data_2d(4, 4, PixelFormat::red8(), Some(gradient(4, 4)));
        let mut mirror = TextureGL::new(tex.id(), Duration::ZERO, 0);

        assert!(mirror.upload(&gl, &mut state, &tex, Some(&executor)));
        assert_eq!(gl.count(|c| matches!(c, Call::TexImage2D { data_len: None, .. })), 1);
        assert_eq!(mirror.pending_uploads(), 1);
        assert_eq!(gl.count(|c| matches!(c, Call::TexSubImage2D { .. })), 0);

        mirror.sync(&gl, &mut state, &executor);
        assert_eq!(mirror.pending_uploads(), 0);
        assert_eq!(gl.last_upload(mirror.handle()).unwrap(), gradient(4, 4).to_vec());
        assert_eq!(gl.live_fences(), 0);
    }
}
