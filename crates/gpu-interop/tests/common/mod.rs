//! In-memory foreign device for driving shared textures through every stage.

#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gl::types::GLuint;
use gpu_interop::{
    ForeignTexture, InteropDevice, InteropError, InteropObject, InteropResult, MappedTexture, SharedHandle,
    SharedTextureBackend, StagingTexture, TextureDesc,
};
use parking_lot::Mutex;
use render_core::PixelFormat;
use render_gl::testing::RecordingCommands;
use render_gl::{CommandExecutor, ThreadContext};

/// Padding the mock adds to every staging row.
const ROW_PADDING: usize = 12;

struct Object {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    held: bool,
    busy: bool,
}

#[derive(Default)]
struct State {
    next_handle: usize,
    /// Handle value to object index.
    handles: HashMap<usize, usize>,
    objects: Vec<Object>,
    open_duplicates: usize,
    interop: Option<InteropError>,
    register: Option<InteropError>,
    interop_opens: usize,
    interop_locks: usize,
    interop_lock_calls: usize,
    copy_latency: usize,
    acquire_delay: Duration,
    acquire_attempts: usize,
    acquires: usize,
    releases: usize,
    release_errors: usize,
}

/// A foreign device. Interop is supported unless told otherwise.
#[derive(Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
    /// References the test holds right now; a release while non-zero counts
    /// as a violation.
    pub in_use: Arc<AtomicUsize>,
    pub violations: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        render_core::logging::init();
        let backend = Self::default();
        backend.state.lock().next_handle = 0x100;
        Arc::new(backend)
    }

    /// A new shared RGBA8 texture, as the producer would create it.
    pub fn share(&self, width: u32, height: u32) -> SharedHandle {
        let mut state = self.state.lock();
        state.objects.push(Object {
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
            held: false,
            busy: false,
        });
        let object = state.objects.len() - 1;
        Self::new_handle(&mut state, object)
    }

    /// Another handle value for the object behind `handle`.
    pub fn alias(&self, handle: SharedHandle) -> SharedHandle {
        let mut state = self.state.lock();
        let object = state.handles[&handle.raw()];
        Self::new_handle(&mut state, object)
    }

    fn new_handle(state: &mut State, object: usize) -> SharedHandle {
        let raw = state.next_handle;
        state.next_handle += 4;
        state.handles.insert(raw, object);
        SharedHandle::from_raw(raw)
    }

    fn object(&self, handle: SharedHandle) -> usize {
        self.state.lock().handles[&handle.raw()]
    }

    /// Producer writes a frame.
    pub fn write(&self, handle: SharedHandle, pixels: Vec<u8>) {
        let object = self.object(handle);
        let mut state = self.state.lock();
        assert!(!state.objects[object].held, "producer wrote while the consumer held the texture");
        state.objects[object].pixels = pixels;
    }

    /// Keyed mutex held by the producer.
    pub fn set_busy(&self, handle: SharedHandle, busy: bool) {
        let object = self.object(handle);
        self.state.lock().objects[object].busy = busy;
    }

    /// Make opening the interop device fail.
    pub fn fail_interop(&self, err: InteropError) {
        self.state.lock().interop = Some(err);
    }

    /// Make registering a texture for interop fail.
    pub fn fail_register(&self, err: InteropError) {
        self.state.lock().register = Some(err);
    }

    /// Polls a staged copy reports pending before it completes.
    pub fn set_copy_latency(&self, polls: usize) {
        self.state.lock().copy_latency = polls;
    }

    /// Make every keyed mutex wait take `delay` before it resolves.
    pub fn set_acquire_delay(&self, delay: Duration) {
        self.state.lock().acquire_delay = delay;
    }

    /// Keyed mutex waits started, whether or not they succeeded.
    pub fn acquire_attempts(&self) -> usize {
        self.state.lock().acquire_attempts
    }

    pub fn acquires(&self) -> usize {
        self.state.lock().acquires
    }

    pub fn releases(&self) -> usize {
        self.state.lock().releases
    }

    pub fn release_errors(&self) -> usize {
        self.state.lock().release_errors
    }

    pub fn open_duplicates(&self) -> usize {
        self.state.lock().open_duplicates
    }

    pub fn interop_opens(&self) -> usize {
        self.state.lock().interop_opens
    }

    /// Interop objects currently locked for GL.
    pub fn interop_locks(&self) -> usize {
        self.state.lock().interop_locks
    }

    pub fn interop_lock_calls(&self) -> usize {
        self.state.lock().interop_lock_calls
    }
}

impl SharedTextureBackend for MockBackend {
    fn duplicate_handle(&self, handle: SharedHandle) -> InteropResult<SharedHandle> {
        let mut state = self.state.lock();
        let Some(&object) = state.handles.get(&handle.raw()) else {
            return Err(InteropError::Api("invalid handle".into()));
        };
        state.open_duplicates += 1;
        Ok(Self::new_handle(&mut state, object))
    }

    fn close_handle(&self, handle: SharedHandle) {
        let mut state = self.state.lock();
        assert!(state.handles.remove(&handle.raw()).is_some(), "closed an unknown handle");
        state.open_duplicates -= 1;
    }

    fn compare_handles(&self, a: SharedHandle, b: SharedHandle) -> bool {
        let state = self.state.lock();
        matches!((state.handles.get(&a.raw()), state.handles.get(&b.raw())), (Some(x), Some(y)) if x == y)
    }

    fn open_texture(&self, handle: SharedHandle) -> InteropResult<Box<dyn ForeignTexture>> {
        let state = self.state.lock();
        let object = state.handles[&handle.raw()];
        let desc = TextureDesc {
            width: state.objects[object].width,
            height: state.objects[object].height,
            format: PixelFormat::rgba8(),
        };
        Ok(Box::new(MockTexture {
            state: Arc::clone(&self.state),
            object,
            desc,
            in_use: Arc::clone(&self.in_use),
            violations: Arc::clone(&self.violations),
        }))
    }

    fn open_interop_device(&self) -> InteropResult<Box<dyn InteropDevice>> {
        let mut state = self.state.lock();
        state.interop_opens += 1;
        match state.interop.clone() {
            Some(err) => Err(err),
            None => Ok(Box::new(MockInterop {
                state: Arc::clone(&self.state),
            })),
        }
    }
}

struct MockTexture {
    state: Arc<Mutex<State>>,
    object: usize,
    desc: TextureDesc,
    in_use: Arc<AtomicUsize>,
    violations: Arc<AtomicUsize>,
}

impl ForeignTexture for MockTexture {
    fn desc(&self) -> TextureDesc {
        self.desc
    }

    fn acquire_sync(&self, _key: u64, _timeout: Duration) -> InteropResult<()> {
        let delay = {
            let mut state = self.state.lock();
            state.acquire_attempts += 1;
            state.acquire_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock();
        let object = &mut state.objects[self.object];
        if object.busy {
            return Err(InteropError::Timeout);
        }
        if object.held {
            return Err(InteropError::Api("acquired twice".into()));
        }
        object.held = true;
        state.acquires += 1;
        Ok(())
    }

    fn release_sync(&self, _key: u64) -> InteropResult<()> {
        if self.in_use.load(Ordering::SeqCst) > 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        let mut state = self.state.lock();
        if !state.objects[self.object].held {
            state.release_errors += 1;
            return Err(InteropError::Api("released twice".into()));
        }
        state.objects[self.object].held = false;
        state.releases += 1;
        Ok(())
    }

    fn create_staging(&self) -> InteropResult<Box<dyn StagingTexture>> {
        Ok(Box::new(MockStaging {
            row_bytes: self.desc.row_bytes(),
            data: Vec::new(),
            polls_left: 0,
            mapped: false,
        }))
    }

    fn copy_to_staging(&self, staging: &mut dyn StagingTexture) -> InteropResult<()> {
        let staging = staging
            .as_any_mut()
            .downcast_mut::<MockStaging>()
            .ok_or_else(|| InteropError::Api("foreign staging texture".into()))?;
        let state = self.state.lock();
        let pixels = &state.objects[self.object].pixels;
        staging.data = pixels
            .chunks(staging.row_bytes)
            .flat_map(|row| row.iter().copied().chain(std::iter::repeat(0xEE).take(ROW_PADDING)))
            .collect();
        staging.polls_left = state.copy_latency;
        Ok(())
    }

    fn raw(&self) -> *mut c_void {
        self.object as *mut c_void
    }
}

struct MockStaging {
    row_bytes: usize,
    data: Vec<u8>,
    polls_left: usize,
    mapped: bool,
}

impl StagingTexture for MockStaging {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn poll(&mut self) -> InteropResult<bool> {
        if self.polls_left > 0 {
            self.polls_left -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn map(&mut self) -> InteropResult<MappedTexture<'_>> {
        assert!(!self.mapped, "mapped twice");
        self.mapped = true;
        Ok(MappedTexture {
            data: &self.data,
            row_pitch: self.row_bytes + ROW_PADDING,
        })
    }

    fn unmap(&mut self) {
        assert!(self.mapped, "unmapped without map");
        self.mapped = false;
    }
}

struct MockInterop {
    state: Arc<Mutex<State>>,
}

impl InteropDevice for MockInterop {
    fn register(&self, texture: &dyn ForeignTexture, _gl_texture: GLuint) -> InteropResult<InteropObject> {
        match self.state.lock().register.clone() {
            Some(err) => Err(err),
            None => Ok(InteropObject::from_raw(texture.raw() as usize + 1)),
        }
    }

    fn unregister(&self, _object: InteropObject) {}

    fn lock(&self, _object: InteropObject) -> InteropResult<()> {
        let mut state = self.state.lock();
        state.interop_locks += 1;
        state.interop_lock_calls += 1;
        Ok(())
    }

    fn unlock(&self, _object: InteropObject) -> InteropResult<()> {
        let mut state = self.state.lock();
        assert!(state.interop_locks > 0, "unlocked an interop object that was not locked");
        state.interop_locks -= 1;
        Ok(())
    }
}

/// One render thread: its GL surface and deferred-command executor.
pub struct RenderThread {
    pub index: usize,
    pub gl: RecordingCommands,
    pub executor: Arc<CommandExecutor>,
}

impl RenderThread {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            gl: RecordingCommands::new(),
            executor: CommandExecutor::new(index),
        }
    }

    pub fn ctx(&self) -> ThreadContext<'_> {
        ThreadContext {
            index: self.index,
            gl: &self.gl,
            executor: &self.executor,
        }
    }

    pub fn run_executor(&self) -> usize {
        self.executor.run(&self.gl)
    }
}

/// Frame content that differs per `seed`.
pub fn frame(width: u32, height: u32, seed: u8) -> Vec<u8> {
    (0..width * height * 4).map(|i| (i as u8).wrapping_mul(3).wrapping_add(seed)).collect()
}
