//! One texture shared by a foreign device.
//!
//! Every render thread gets its own [`Context`] that settles, on first use,
//! into one of two modes: the texture is registered with the thread's GL
//! context and used in place, or it is copied across in two hops. The first
//! hop runs on the task queue (device copy into a staging texture, then a
//! CPU read). The second runs on the render thread's [`CommandExecutor`]
//! (sub-image upload plus a fence).
//!
//! Lock order is context, then refs, then device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gl::types::{GLenum, GLint, GLuint};
use parking_lot::Mutex;
use render_core::Rect;
use render_gl::{CommandExecutor, FenceStatus, GpuCommands, GpuFence, ThreadContext};
use tracing::{debug, error, info, trace, warn};

use crate::backend::{
    ForeignTexture, InteropDevice, InteropObject, MappedTexture, SharedHandle, SharedTextureBackend,
    StagingTexture, TextureDesc,
};
use crate::config::SharedTextureConfig;
use crate::error::{InteropError, InteropResult};
use crate::task_queue::TaskQueue;

const KEYED_MUTEX_KEY: u64 = 0;
const COPY_POLL_INTERVAL: Duration = Duration::from_micros(250);

/// How a render thread gets at the shared texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Not used on this thread yet.
    Unknown,
    /// Registered with the thread's GL context, no copy.
    Dx,
    /// Copied through a staging texture.
    Copy,
    /// An unexpected native failure; nothing more is attempted.
    Failed,
}

/// GL texture holding the shared content for one render thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedTextureGL {
    pub handle: GLuint,
    pub width: u32,
    pub height: u32,
}

struct Interop {
    device: Box<dyn InteropDevice>,
    object: InteropObject,
    texture: GLuint,
    locks: usize,
}

impl Interop {
    fn destroy(self, gl: &dyn GpuCommands) {
        if self.locks > 0 {
            if let Err(err) = self.device.unlock(self.object) {
                warn!(%err, "failed to unlock interop texture on teardown");
            }
        }
        self.device.unregister(self.object);
        gl.delete_texture(self.texture);
    }
}

#[derive(Default)]
struct CopyTarget {
    texture: GLuint,
    allocated: Option<TextureDesc>,
    /// Producer frame the texture content matches. Zero when nothing was
    /// copied yet.
    copied_frame: u64,
    /// Set from the moment a copy is queued until its fence resolves.
    copying: bool,
    fence: Option<(GpuFence, u64)>,
}

struct Context {
    mode: ContextMode,
    interop: Option<Interop>,
    copy: CopyTarget,
    interest: u32,
    executor: Option<Arc<CommandExecutor>>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            mode: ContextMode::Unknown,
            interop: None,
            copy: CopyTarget::default(),
            interest: 0,
            executor: None,
        }
    }
}

#[derive(Default)]
struct RefState {
    acquired: bool,
    /// An [`acquire`](DxSharedTexture::acquire) is waiting on the keyed mutex.
    acquiring: bool,
    refs: usize,
    release_pending: bool,
}

struct Device {
    texture: Box<dyn ForeignTexture>,
    /// One staging texture per render thread, created on its first copy.
    staging: Vec<Option<Box<dyn StagingTexture>>>,
}

/// A shared texture handle, its keyed mutex and one [`Context`] per render
/// thread.
///
/// The keyed mutex is acquired once per producer frame by
/// [`acquire`](Self::acquire). [`release`](Self::release) hands it back, but
/// only once no reference taken with [`add_ref`](Self::add_ref) is left;
/// otherwise the release is deferred to the last [`unref`](Self::unref).
pub struct DxSharedTexture {
    handle: SharedHandle,
    desc: TextureDesc,
    backend: Arc<dyn SharedTextureBackend>,
    queue: Arc<dyn TaskQueue>,
    config: SharedTextureConfig,
    device: Mutex<Device>,
    refs: Mutex<RefState>,
    frame: AtomicU64,
    contexts: Vec<Mutex<Context>>,
    last_used: Mutex<Instant>,
}

impl DxSharedTexture {
    /// Duplicate `handle` and open the texture behind it. The caller keeps
    /// ownership of `handle`.
    pub fn new(
        handle: SharedHandle,
        backend: Arc<dyn SharedTextureBackend>,
        queue: Arc<dyn TaskQueue>,
        config: SharedTextureConfig,
        render_threads: usize,
    ) -> InteropResult<Arc<Self>> {
        let owned = backend.duplicate_handle(handle)?;
        let texture = match backend.open_texture(owned) {
            Ok(texture) => texture,
            Err(err) => {
                backend.close_handle(owned);
                return Err(err);
            }
        };
        let desc = texture.desc();
        debug!(handle = owned.raw(), width = desc.width, height = desc.height, "shared texture opened");
        Ok(Arc::new(Self {
            handle: owned,
            desc,
            backend,
            queue,
            config,
            device: Mutex::new(Device {
                texture,
                staging: (0..render_threads).map(|_| None).collect(),
            }),
            refs: Mutex::new(RefState::default()),
            frame: AtomicU64::new(0),
            contexts: (0..render_threads).map(|_| Mutex::new(Context::default())).collect(),
            last_used: Mutex::new(Instant::now()),
        }))
    }

    /// The duplicated handle owned by this texture.
    pub fn handle(&self) -> SharedHandle {
        self.handle
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    /// Number of producer frames acquired so far.
    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    pub fn mode(&self, thread: usize) -> Option<ContextMode> {
        self.contexts.get(thread).map(|ctx| ctx.lock().mode)
    }

    pub fn is_acquired(&self) -> bool {
        self.refs.lock().acquired
    }

    pub fn ref_count(&self) -> usize {
        self.refs.lock().refs
    }

    // -- keyed mutex -----------------------------------------------------------

    /// Take the keyed mutex for a new producer frame. Already holding it only
    /// cancels a deferred release.
    ///
    /// The wait for the keyed mutex happens without the reference lock, so
    /// render threads calling [`add_ref`](Self::add_ref) meanwhile fail fast
    /// instead of stalling. A concurrent second acquire returns false.
    pub fn acquire(&self) -> bool {
        {
            let mut refs = self.refs.lock();
            if refs.acquired {
                refs.release_pending = false;
                return true;
            }
            if refs.acquiring {
                debug!(handle = self.handle.raw(), "shared texture acquire already in progress");
                return false;
            }
            refs.acquiring = true;
        }
        let result = self
            .device
            .lock()
            .texture
            .acquire_sync(KEYED_MUTEX_KEY, self.config.acquire_timeout);

        let mut refs = self.refs.lock();
        refs.acquiring = false;
        match result {
            Ok(()) => {
                refs.acquired = true;
                refs.release_pending = false;
                let frame = self.frame.fetch_add(1, Ordering::AcqRel) + 1;
                trace!(handle = self.handle.raw(), frame, "shared texture acquired");
                true
            }
            Err(InteropError::Timeout) => {
                debug!(handle = self.handle.raw(), "keyed mutex busy");
                false
            }
            Err(err) => {
                error!(handle = self.handle.raw(), %err, "failed to acquire shared texture");
                false
            }
        }
    }

    /// Hand the keyed mutex back to the producer. While references are held
    /// the release is deferred, unless `force` is set. Returns whether the
    /// native release happened now.
    pub fn release(&self, force: bool) -> bool {
        let mut refs = self.refs.lock();
        self.release_locked(&mut refs, force)
    }

    fn release_locked(&self, refs: &mut RefState, force: bool) -> bool {
        if !refs.acquired {
            refs.release_pending = false;
            return false;
        }
        if refs.refs > 0 && !force {
            refs.release_pending = true;
            trace!(handle = self.handle.raw(), refs = refs.refs, "release deferred");
            return false;
        }
        if let Err(err) = self.device.lock().texture.release_sync(KEYED_MUTEX_KEY) {
            error!(handle = self.handle.raw(), %err, "failed to release shared texture");
        }
        refs.acquired = false;
        refs.release_pending = false;
        trace!(handle = self.handle.raw(), "shared texture released");
        true
    }

    // -- references ------------------------------------------------------------

    /// Pin the acquired frame. Fails when the keyed mutex is not held.
    ///
    /// With a render thread, a zero-copy context also locks its interop
    /// registration for GL use; this must then run on that render thread.
    pub fn add_ref(&self, thread: Option<usize>) -> bool {
        let Some(thread) = thread else {
            return self.add_source_ref();
        };
        let Some(slot) = self.contexts.get(thread) else {
            debug_assert!(false, "render thread {thread} out of range");
            error!(thread, "render thread index out of range");
            return false;
        };
        let mut guard = slot.lock();
        let ctx = &mut *guard;
        if !self.add_source_ref() {
            return false;
        }
        let Some(interop) = ctx.interop.as_mut().filter(|_| ctx.mode == ContextMode::Dx) else {
            return true;
        };
        if interop.locks == 0 {
            let locked = {
                let _device = self.device.lock();
                interop.device.lock(interop.object)
            };
            if let Err(err) = locked {
                error!(thread, %err, "failed to lock interop texture");
                ctx.mode = ContextMode::Failed;
                self.remove_source_ref();
                return false;
            }
        }
        interop.locks += 1;
        true
    }

    /// Drop a reference taken by [`add_ref`](Self::add_ref). The last one
    /// performs a deferred release.
    pub fn unref(&self, thread: Option<usize>) {
        if let Some(slot) = thread.and_then(|thread| self.contexts.get(thread)) {
            let mut ctx = slot.lock();
            if let Some(interop) = ctx.interop.as_mut().filter(|interop| interop.locks > 0) {
                interop.locks -= 1;
                if interop.locks == 0 {
                    let _device = self.device.lock();
                    if let Err(err) = interop.device.unlock(interop.object) {
                        error!(?thread, %err, "failed to unlock interop texture");
                    }
                }
            }
        }
        self.remove_source_ref();
    }

    /// [`add_ref`](Self::add_ref) with an [`unref`](Self::unref) when the
    /// guard drops.
    pub fn lock_for_render(&self, thread: usize) -> Option<SharedTextureLock<'_>> {
        self.add_ref(Some(thread)).then_some(SharedTextureLock { texture: self, thread })
    }

    fn add_source_ref(&self) -> bool {
        let mut refs = self.refs.lock();
        if !refs.acquired {
            return false;
        }
        refs.refs += 1;
        true
    }

    fn remove_source_ref(&self) {
        let mut refs = self.refs.lock();
        if refs.refs == 0 {
            debug_assert!(false, "unref without matching ref");
            error!(handle = self.handle.raw(), "unbalanced shared texture unref");
            return;
        }
        refs.refs -= 1;
        if refs.refs == 0 && refs.release_pending {
            self.release_locked(&mut refs, false);
        }
    }

    // -- render thread access ----------------------------------------------------

    /// GL texture with the current content for the calling render thread.
    ///
    /// Never blocks. In copy mode this returns `None` while no copy of the
    /// latest producer frame is ready, and starts one if `copy_if_needed` is
    /// set and none is running.
    pub fn texture(self: &Arc<Self>, tc: &ThreadContext<'_>, copy_if_needed: bool) -> Option<SharedTextureGL> {
        let Some(slot) = self.contexts.get(tc.index) else {
            error!(thread = tc.index, "render thread index out of range");
            return None;
        };
        *self.last_used.lock() = Instant::now();
        let mut guard = slot.lock();
        let ctx = &mut *guard;
        ctx.interest = self.config.interest_frames;
        if ctx.executor.is_none() {
            ctx.executor = Some(Arc::clone(tc.executor));
        }
        if ctx.mode == ContextMode::Unknown {
            ctx.mode = self.open_interop(ctx, tc);
        }
        match ctx.mode {
            ContextMode::Dx => ctx.interop.as_ref().map(|interop| self.view(interop.texture)),
            ContextMode::Copy => self.copied_texture(ctx, tc, copy_if_needed),
            ContextMode::Unknown | ContextMode::Failed => None,
        }
    }

    fn view(&self, handle: GLuint) -> SharedTextureGL {
        SharedTextureGL {
            handle,
            width: self.desc.width,
            height: self.desc.height,
        }
    }

    fn open_interop(&self, ctx: &mut Context, tc: &ThreadContext<'_>) -> ContextMode {
        let device = match self.backend.open_interop_device() {
            Ok(device) => device,
            Err(err) => return self.interop_unavailable(tc.index, "open device", err),
        };
        let texture = tc.gl.create_texture();
        if texture == 0 {
            error!(thread = tc.index, "failed to create interop texture");
            return ContextMode::Failed;
        }
        let registered = {
            let foreign = self.device.lock();
            device.register(foreign.texture.as_ref(), texture)
        };
        match registered {
            Ok(object) => {
                debug!(thread = tc.index, texture, "shared texture registered for interop");
                ctx.interop = Some(Interop {
                    device,
                    object,
                    texture,
                    locks: 0,
                });
                ContextMode::Dx
            }
            Err(err) => {
                tc.gl.delete_texture(texture);
                self.interop_unavailable(tc.index, "register texture", err)
            }
        }
    }

    fn interop_unavailable(&self, thread: usize, step: &str, err: InteropError) -> ContextMode {
        if err.is_structural() {
            info!(thread, step, %err, "interop unavailable, copying shared texture instead");
            ContextMode::Copy
        } else {
            error!(thread, step, %err, "interop failed");
            ContextMode::Failed
        }
    }

    fn copied_texture(
        self: &Arc<Self>,
        ctx: &mut Context,
        tc: &ThreadContext<'_>,
        copy_if_needed: bool,
    ) -> Option<SharedTextureGL> {
        let copy = &mut ctx.copy;
        if let Some((fence, frame)) = copy.fence.take() {
            match tc.gl.client_wait_sync(&fence, 0) {
                FenceStatus::Signaled => {
                    tc.gl.delete_sync(fence);
                    copy.copied_frame = frame;
                    copy.copying = false;
                }
                FenceStatus::Pending => copy.fence = Some((fence, frame)),
                FenceStatus::Failed => {
                    tc.gl.delete_sync(fence);
                    copy.copying = false;
                    error!(thread = tc.index, frame, "waiting on shared texture copy failed");
                }
            }
        }

        let frame = self.frame();
        if copy.texture != 0 && copy.copied_frame == frame {
            return Some(self.view(copy.texture));
        }
        if !copy_if_needed || copy.copying {
            return None;
        }
        if !self.add_source_ref() {
            trace!(thread = tc.index, "shared texture not acquired, nothing to copy");
            return None;
        }
        copy.copying = true;
        let this = Arc::clone(self);
        let thread = tc.index;
        let executor = Arc::clone(tc.executor);
        self.queue
            .spawn(Box::new(move || this.stage_copy(thread, frame, executor)));
        trace!(thread, frame, "shared texture copy queued");
        None
    }

    // -- copy pipeline -------------------------------------------------------------

    fn stage_copy(self: Arc<Self>, thread: usize, frame: u64, executor: Arc<CommandExecutor>) {
        let queued = self.queue_device_copy(thread);
        // the device copy is ordered before any release, so the producer may
        // take the source back from here on
        self.remove_source_ref();
        match queued.and_then(|()| self.read_staging(thread)) {
            Ok(pixels) => {
                let desc = self.desc;
                executor.submit(move |gl| self.finish_copy(gl, thread, frame, desc, &pixels));
            }
            Err(err) => self.copy_failed(thread, err),
        }
    }

    fn queue_device_copy(&self, thread: usize) -> InteropResult<()> {
        let mut guard = self.device.lock();
        let device = &mut *guard;
        let slot = &mut device.staging[thread];
        let staging = match slot.take() {
            Some(staging) => staging,
            None => device.texture.create_staging()?,
        };
        let staging = slot.insert(staging);
        device.texture.copy_to_staging(&mut **staging)
    }

    fn read_staging(&self, thread: usize) -> InteropResult<Vec<u8>> {
        let start = Instant::now();
        loop {
            let done = match self.device.lock().staging[thread].as_mut() {
                Some(staging) => staging.poll()?,
                None => return Err(InteropError::Api("staging texture missing".into())),
            };
            if done {
                break;
            }
            if start.elapsed() > self.config.copy_wait_timeout {
                return Err(InteropError::Timeout);
            }
            thread::sleep(COPY_POLL_INTERVAL);
        }

        let mut device = self.device.lock();
        let Some(staging) = device.staging[thread].as_mut() else {
            return Err(InteropError::Api("staging texture missing".into()));
        };
        let mapped = staging.map()?;
        let pixels = pack_rows(&mapped, self.desc.row_bytes(), self.desc.height as usize);
        staging.unmap();
        pixels
    }

    fn copy_failed(&self, thread: usize, err: InteropError) {
        let mut ctx = self.contexts[thread].lock();
        ctx.copy.copying = false;
        match err {
            InteropError::Timeout => warn!(thread, "device copy timed out, frame dropped"),
            err if err.is_structural() => info!(thread, %err, "shared texture cannot be copied"),
            err => {
                error!(thread, %err, "shared texture copy failed");
                ctx.mode = ContextMode::Failed;
            }
        }
    }

    /// Second hop, on the render thread: upload the staged pixels and fence.
    fn finish_copy(&self, gl: &dyn GpuCommands, thread: usize, frame: u64, desc: TextureDesc, pixels: &[u8]) {
        let mut guard = self.contexts[thread].lock();
        let ctx = &mut *guard;
        let copy = &mut ctx.copy;
        if ctx.mode != ContextMode::Copy {
            copy.copying = false;
            return;
        }

        if copy.texture == 0 || copy.allocated != Some(desc) {
            if copy.texture != 0 {
                gl.delete_texture(copy.texture);
            }
            copy.allocated = None;
            copy.copied_frame = 0;
            copy.texture = gl.create_texture();
            if copy.texture == 0 {
                error!(thread, "failed to create shared texture copy");
                copy.copying = false;
                return;
            }
            gl.bind_texture(gl::TEXTURE_2D, copy.texture);
            let params: [(GLenum, GLenum); 4] = [
                (gl::TEXTURE_MIN_FILTER, gl::LINEAR),
                (gl::TEXTURE_MAG_FILTER, gl::LINEAR),
                (gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE),
                (gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE),
            ];
            for (pname, value) in params {
                gl.tex_parameter(gl::TEXTURE_2D, pname, value as GLint);
            }
            gl.tex_image_2d(
                gl::TEXTURE_2D,
                0,
                desc.format.internal_format,
                desc.width,
                desc.height,
                desc.format.layout,
                desc.format.data_type,
                None,
            );
            copy.allocated = Some(desc);
            debug!(thread, texture = copy.texture, width = desc.width, height = desc.height, "shared texture copy allocated");
        } else {
            gl.bind_texture(gl::TEXTURE_2D, copy.texture);
        }

        gl.tex_sub_image_2d(
            gl::TEXTURE_2D,
            Rect::new(0, 0, desc.width, desc.height),
            desc.format.layout,
            desc.format.data_type,
            pixels,
        );
        match gl.fence_sync() {
            Some(fence) => {
                if let Some((stale, _)) = copy.fence.replace((fence, frame)) {
                    gl.delete_sync(stale);
                }
            }
            None => {
                copy.copied_frame = frame;
                copy.copying = false;
            }
        }
        trace!(thread, frame, "shared texture copy uploaded");
    }

    // -- bag bookkeeping -------------------------------------------------------------

    pub(crate) fn decay_interest(&self) {
        for slot in &self.contexts {
            let mut ctx = slot.lock();
            ctx.interest = ctx.interest.saturating_sub(1);
        }
    }

    pub fn interest(&self, thread: usize) -> u32 {
        self.contexts.get(thread).map_or(0, |ctx| ctx.lock().interest)
    }

    /// Whether no render thread that still wants this texture is copying it
    /// or lagging behind the latest frame.
    pub fn ready_for_release(&self) -> bool {
        let frame = self.frame();
        self.contexts.iter().all(|slot| {
            let ctx = slot.lock();
            ctx.interest == 0
                || (!ctx.copy.copying && (ctx.mode != ContextMode::Copy || ctx.copy.copied_frame == frame))
        })
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock())
    }
}

fn pack_rows(mapped: &MappedTexture<'_>, row_bytes: usize, rows: usize) -> InteropResult<Vec<u8>> {
    if rows == 0 {
        return Ok(Vec::new());
    }
    let needed = mapped.row_pitch * (rows - 1) + row_bytes;
    if mapped.row_pitch < row_bytes || mapped.data.len() < needed {
        return Err(InteropError::Api(format!(
            "mapped staging texture too small: {} bytes, pitch {}",
            mapped.data.len(),
            mapped.row_pitch
        )));
    }
    let mut pixels = Vec::with_capacity(row_bytes * rows);
    for row in mapped.data.chunks(mapped.row_pitch).take(rows) {
        pixels.extend_from_slice(&row[..row_bytes]);
    }
    Ok(pixels)
}

impl Drop for DxSharedTexture {
    fn drop(&mut self) {
        let refs = self.refs.get_mut();
        if refs.acquired {
            if let Err(err) = self.device.get_mut().texture.release_sync(KEYED_MUTEX_KEY) {
                warn!(%err, "failed to release shared texture on drop");
            }
            refs.acquired = false;
        }

        for slot in &mut self.contexts {
            let ctx = slot.get_mut();
            let interop = ctx.interop.take();
            let texture = std::mem::take(&mut ctx.copy.texture);
            let fence = ctx.copy.fence.take();
            if interop.is_none() && texture == 0 && fence.is_none() {
                continue;
            }
            match ctx.executor.take() {
                Some(executor) => executor.submit(move |gl| {
                    if let Some(interop) = interop {
                        interop.destroy(gl);
                    }
                    if texture != 0 {
                        gl.delete_texture(texture);
                    }
                    if let Some((fence, _)) = fence {
                        gl.delete_sync(fence);
                    }
                }),
                None => warn!(handle = self.handle.raw(), "no render thread to delete shared texture GL objects on"),
            }
        }

        self.backend.close_handle(self.handle);
        debug!(handle = self.handle.raw(), "shared texture closed");
    }
}

/// Reference on a [`DxSharedTexture`] held for the duration of a render.
pub struct SharedTextureLock<'a> {
    texture: &'a DxSharedTexture,
    thread: usize,
}

impl SharedTextureLock<'_> {
    pub fn texture(&self) -> &DxSharedTexture {
        self.texture
    }
}

impl Drop for SharedTextureLock<'_> {
    fn drop(&mut self) {
        self.texture.unref(Some(self.thread));
    }
}
