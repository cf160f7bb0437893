mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::{frame, MockBackend, RenderThread};
use gpu_interop::{
    ContextMode, DxSharedTexture, DxSharedTextureBag, InteropError, ManualQueue, SharedTextureBackend,
    SharedTextureConfig, TaskQueue,
};

fn open(backend: &Arc<MockBackend>, queue: &Arc<ManualQueue>, threads: usize) -> Arc<DxSharedTexture> {
    let handle = backend.share(4, 4);
    DxSharedTexture::new(
        handle,
        backend.clone() as Arc<dyn SharedTextureBackend>,
        queue.clone() as Arc<dyn TaskQueue>,
        SharedTextureConfig::default(),
        threads,
    )
    .unwrap()
}

fn bag(backend: &Arc<MockBackend>, queue: &Arc<ManualQueue>, threads: usize) -> Arc<DxSharedTextureBag> {
    DxSharedTextureBag::new(
        backend.clone() as Arc<dyn SharedTextureBackend>,
        queue.clone() as Arc<dyn TaskQueue>,
        SharedTextureConfig::default(),
        threads,
    )
}

#[test]
fn native_release_waits_for_last_unref() {
    let backend = MockBackend::new();
    let queue = Arc::new(ManualQueue::new());
    let texture = open(&backend, &queue, 1);
    assert!(!texture.add_ref(None), "refs need the keyed mutex");

    assert!(texture.acquire());
    assert_eq!(texture.frame(), 1);
    for _ in 0..3 {
        assert!(texture.add_ref(None));
    }
    assert!(!texture.release(false));
    assert_eq!(backend.releases(), 0);

    texture.unref(None);
    texture.unref(None);
    assert_eq!(backend.releases(), 0);
    assert!(texture.is_acquired());

    texture.unref(None);
    assert_eq!(backend.releases(), 1);
    assert!(!texture.is_acquired());
    assert!(!texture.add_ref(None));
}

#[test]
fn reacquire_cancels_a_deferred_release() {
    let backend = MockBackend::new();
    let queue = Arc::new(ManualQueue::new());
    let texture = open(&backend, &queue, 1);
    assert!(texture.acquire());
    assert!(texture.add_ref(None));
    assert!(!texture.release(false));

    // still held, so no new frame
    assert!(texture.acquire());
    assert_eq!(texture.frame(), 1);
    assert_eq!(backend.acquires(), 1);

    texture.unref(None);
    assert_eq!(backend.releases(), 0);
    assert!(texture.release(false));
    assert_eq!(backend.releases(), 1);
    assert!(!texture.release(false));
    assert_eq!(backend.release_errors(), 0);
}

#[test]
fn forced_release_ignores_refs() {
    let backend = MockBackend::new();
    let queue = Arc::new(ManualQueue::new());
    let texture = open(&backend, &queue, 1);
    texture.acquire();
    texture.add_ref(None);
    assert!(texture.release(true));
    texture.unref(None);
    assert_eq!(backend.releases(), 1);
    assert_eq!(backend.release_errors(), 0);
}

#[test]
fn busy_keyed_mutex_does_not_advance_the_frame() {
    let backend = MockBackend::new();
    let queue = Arc::new(ManualQueue::new());
    let handle = backend.share(2, 2);
    let texture = DxSharedTexture::new(
        handle,
        backend.clone() as Arc<dyn SharedTextureBackend>,
        queue.clone() as Arc<dyn TaskQueue>,
        SharedTextureConfig::default(),
        1,
    )
    .unwrap();
    backend.set_busy(handle, true);
    assert!(!texture.acquire());
    assert_eq!(texture.frame(), 0);
    backend.set_busy(handle, false);
    assert!(texture.acquire());
    assert_eq!(texture.frame(), 1);
}

#[test]
fn waiting_for_the_keyed_mutex_does_not_block_render_threads() {
    let backend = MockBackend::new();
    let queue = Arc::new(ManualQueue::new());
    let texture = open(&backend, &queue, 1);
    backend.set_acquire_delay(Duration::from_millis(300));

    let producer = {
        let texture = texture.clone();
        thread::spawn(move || texture.acquire())
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while backend.acquire_attempts() == 0 {
        assert!(Instant::now() < deadline, "acquire never started");
        thread::sleep(Duration::from_millis(1));
    }

    let started = Instant::now();
    assert!(!texture.add_ref(None));
    assert!(!texture.add_ref(Some(0)));
    assert_eq!(texture.ref_count(), 0);
    assert!(!texture.is_acquired());
    // a second producer does not queue behind the first
    assert!(!texture.acquire());
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(backend.acquire_attempts(), 1);

    assert!(producer.join().unwrap());
    assert!(texture.is_acquired());
    assert_eq!(texture.frame(), 1);
    assert!(texture.add_ref(None));
    texture.unref(None);
}

#[test]
fn concurrent_refs_release_exactly_once() {
    let backend = MockBackend::new();
    let queue = Arc::new(ManualQueue::new());
    let texture = open(&backend, &queue, 1);
    texture.acquire();

    let workers = 4;
    let start = Arc::new(Barrier::new(workers + 1));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let texture = Arc::clone(&texture);
            let start = Arc::clone(&start);
            let in_use = Arc::clone(&backend.in_use);
            thread::spawn(move || {
                start.wait();
                for _ in 0..2000 {
                    if texture.add_ref(None) {
                        in_use.fetch_add(1, Ordering::SeqCst);
                        thread::yield_now();
                        in_use.fetch_sub(1, Ordering::SeqCst);
                        texture.unref(None);
                    }
                }
            })
        })
        .collect();

    start.wait();
    thread::sleep(Duration::from_millis(1));
    texture.release(false);
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(backend.releases(), 1);
    assert_eq!(backend.release_errors(), 0);
    assert_eq!(backend.violations.load(Ordering::SeqCst), 0);
    assert_eq!(texture.ref_count(), 0);
    assert!(!texture.is_acquired());
}

#[test]
fn interop_returns_the_same_texture_without_copying() {
    let backend = MockBackend::new();
    let queue = Arc::new(ManualQueue::new());
    let bag = bag(&backend, &queue, 1);
    let rt = RenderThread::new(0);
    let texture = bag.add_shared_handle(backend.share(8, 8)).unwrap();

    let first = bag.texture(&rt.ctx()).unwrap();
    let second = bag.texture(&rt.ctx()).unwrap();
    assert_eq!(first, second);
    assert_eq!((first.width, first.height), (8, 8));
    assert_eq!(texture.mode(0), Some(ContextMode::Dx));
    assert_eq!(queue.pending(), 0);
    assert_eq!(backend.interop_opens(), 1);

    {
        let _outer = texture.lock_for_render(0).unwrap();
        let _inner = texture.lock_for_render(0).unwrap();
        assert_eq!(backend.interop_locks(), 1);
        assert_eq!(backend.interop_lock_calls(), 1);
        assert_eq!(texture.ref_count(), 2);
    }
    assert_eq!(backend.interop_locks(), 0);
    assert_eq!(texture.ref_count(), 0);
}

#[test]
fn interop_lock_defers_release_until_render_finishes() {
    let backend = MockBackend::new();
    let queue = Arc::new(ManualQueue::new());
    let bag = bag(&backend, &queue, 1);
    let rt = RenderThread::new(0);
    let texture = bag.add_shared_handle(backend.share(8, 8)).unwrap();
    bag.texture(&rt.ctx()).unwrap();

    let guard = texture.lock_for_render(0).unwrap();
    assert!(!texture.release(false));
    assert_eq!(backend.releases(), 0);
    drop(guard);
    assert_eq!(backend.interop_locks(), 0);
    assert_eq!(backend.releases(), 1);
    assert!(texture.lock_for_render(0).is_none());
}

#[test]
fn cross_device_copy_arrives_after_both_hops() {
    let backend = MockBackend::new();
    backend.fail_register(InteropError::DifferentDevice);
    let queue = Arc::new(ManualQueue::new());
    let bag = bag(&backend, &queue, 1);
    let rt = RenderThread::new(0);
    let handle = backend.share(4, 2);
    let pixels = frame(4, 2, 7);
    backend.write(handle, pixels.clone());
    let texture = bag.add_shared_handle(handle).unwrap();

    assert_eq!(bag.texture(&rt.ctx()), None);
    assert_eq!(texture.mode(0), Some(ContextMode::Copy));
    assert_eq!(queue.pending(), 1);
    assert_eq!(texture.ref_count(), 1);
    // a copy is in flight; asking again does not start another
    assert_eq!(bag.texture(&rt.ctx()), None);
    assert_eq!(queue.pending(), 1);

    // first hop: device copy and CPU read
    assert_eq!(queue.run_all(), 1);
    assert_eq!(texture.ref_count(), 0);
    assert_eq!(bag.texture(&rt.ctx()), None);

    // second hop: upload and fence on the render thread
    assert_eq!(rt.run_executor(), 1);
    let copy = bag.texture(&rt.ctx()).unwrap();
    assert_eq!((copy.width, copy.height), (4, 2));
    assert_eq!(rt.gl.last_upload(copy.handle), Some(pixels));
    assert_eq!(rt.gl.live_fences(), 0);

    // nothing changed since, so the copy is reused
    assert_eq!(bag.texture(&rt.ctx()), Some(copy));
    assert_eq!(queue.pending(), 0);
    assert_eq!(backend.interop_opens(), 1);
}

#[test]
fn slow_device_copy_is_polled_until_done() {
    let backend = MockBackend::new();
    backend.fail_interop(InteropError::Unsupported("no extension".into()));
    backend.set_copy_latency(5);
    let queue = Arc::new(ManualQueue::new());
    let bag = bag(&backend, &queue, 1);
    let rt = RenderThread::new(0);
    let handle = backend.share(2, 2);
    backend.write(handle, frame(2, 2, 1));
    bag.add_shared_handle(handle).unwrap();

    assert_eq!(bag.texture(&rt.ctx()), None);
    queue.run_all();
    rt.run_executor();
    let copy = bag.texture(&rt.ctx()).unwrap();
    assert_eq!(rt.gl.last_upload(copy.handle), Some(frame(2, 2, 1)));
}

#[test]
fn stale_copy_is_never_returned() {
    let backend = MockBackend::new();
    backend.fail_interop(InteropError::DifferentDevice);
    let queue = Arc::new(ManualQueue::new());
    let bag = bag(&backend, &queue, 1);
    let rt = RenderThread::new(0);
    let handle = backend.share(2, 2);
    backend.write(handle, frame(2, 2, 1));
    let texture = bag.add_shared_handle(handle).unwrap();

    bag.texture(&rt.ctx());
    queue.run_all();
    rt.run_executor();
    let first = bag.texture(&rt.ctx()).unwrap();

    // the producer renders the next frame into the same texture
    assert!(texture.release(false));
    backend.write(handle, frame(2, 2, 2));
    bag.add_shared_handle(handle).unwrap();
    assert_eq!(texture.frame(), 2);

    assert_eq!(bag.texture(&rt.ctx()), None);
    assert_eq!(queue.pending(), 1);
    queue.run_all();
    assert_eq!(bag.texture(&rt.ctx()), None);
    rt.run_executor();
    let second = bag.texture(&rt.ctx()).unwrap();
    assert_eq!(second.handle, first.handle);
    assert_eq!(rt.gl.last_upload(second.handle), Some(frame(2, 2, 2)));
}

#[test]
fn structural_interop_failure_falls_back_to_copy_for_good() {
    let backend = MockBackend::new();
    backend.fail_interop(InteropError::Unsupported("no extension".into()));
    let queue = Arc::new(ManualQueue::new());
    let bag = bag(&backend, &queue, 2);
    let first = RenderThread::new(0);
    let second = RenderThread::new(1);
    let texture = bag.add_shared_handle(backend.share(2, 2)).unwrap();

    for _ in 0..3 {
        bag.texture(&first.ctx());
    }
    assert_eq!(texture.mode(0), Some(ContextMode::Copy));
    assert_eq!(texture.mode(1), Some(ContextMode::Unknown));
    assert_eq!(backend.interop_opens(), 1);

    bag.texture(&second.ctx());
    assert_eq!(texture.mode(1), Some(ContextMode::Copy));
    assert_eq!(backend.interop_opens(), 2);
}

#[test]
fn unexpected_interop_failure_is_sticky() {
    let backend = MockBackend::new();
    backend.fail_register(InteropError::Api("E_FAIL".into()));
    let queue = Arc::new(ManualQueue::new());
    let bag = bag(&backend, &queue, 1);
    let rt = RenderThread::new(0);
    let texture = bag.add_shared_handle(backend.share(2, 2)).unwrap();

    for _ in 0..3 {
        assert_eq!(bag.texture(&rt.ctx()), None);
    }
    assert_eq!(texture.mode(0), Some(ContextMode::Failed));
    assert_eq!(backend.interop_opens(), 1);
    assert_eq!(queue.pending(), 0);
    // the texture created for registration was deleted again
    assert_eq!(rt.gl.count(|c| matches!(c, render_gl::testing::Call::DeleteTexture(_))), 1);
}

#[test]
fn dropping_a_copied_texture_cleans_up_on_its_render_thread() {
    let backend = MockBackend::new();
    backend.fail_interop(InteropError::DifferentDevice);
    let queue = Arc::new(ManualQueue::new());
    let rt = RenderThread::new(0);
    let texture = open(&backend, &queue, 1);
    texture.acquire();
    texture.texture(&rt.ctx(), true);
    queue.run_all();
    rt.run_executor();
    let copy = texture.texture(&rt.ctx(), false).unwrap();
    assert_eq!(backend.open_duplicates(), 1);

    drop(texture);
    assert_eq!(backend.open_duplicates(), 0);
    assert_eq!(backend.releases(), 1);
    assert_eq!(rt.run_executor(), 1);
    assert!(rt.gl.calls().contains(&render_gl::testing::Call::DeleteTexture(copy.handle)));
}

#[test]
fn copy_outlives_eviction_of_its_texture() {
    let backend = MockBackend::new();
    backend.fail_interop(InteropError::DifferentDevice);
    let queue = Arc::new(ManualQueue::new());
    let rt = RenderThread::new(0);
    let texture = open(&backend, &queue, 1);
    texture.acquire();
    assert_eq!(texture.texture(&rt.ctx(), true), None);

    // released while the copy still holds its reference
    assert!(!texture.release(false));
    drop(texture);
    assert_eq!(backend.open_duplicates(), 1);

    queue.run_all();
    assert_eq!(backend.releases(), 1);
    // the upload held the last reference; teardown is queued behind it and
    // runs in the same drain
    assert_eq!(rt.run_executor(), 2);
    assert_eq!(backend.open_duplicates(), 0);
    assert_eq!(rt.gl.live_fences(), 0);
    assert_eq!(rt.gl.count(|c| matches!(c, render_gl::testing::Call::DeleteTexture(_))), 1);
}
