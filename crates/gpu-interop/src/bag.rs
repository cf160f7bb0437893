use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use render_gl::ThreadContext;
use tracing::{debug, error, trace};

use crate::backend::{SharedHandle, SharedTextureBackend};
use crate::config::SharedTextureConfig;
use crate::shared_texture::{DxSharedTexture, SharedTextureGL};
use crate::task_queue::TaskQueue;

/// The shared textures one producer has handed out, oldest first.
///
/// A producer usually cycles through a few handles. Entries are matched by
/// OS object identity rather than handle value, so the list is searched
/// linearly; it stays in the single digits.
pub struct DxSharedTextureBag {
    backend: Arc<dyn SharedTextureBackend>,
    queue: Arc<dyn TaskQueue>,
    config: SharedTextureConfig,
    render_threads: usize,
    textures: RwLock<Vec<Arc<DxSharedTexture>>>,
}

impl DxSharedTextureBag {
    pub fn new(
        backend: Arc<dyn SharedTextureBackend>,
        queue: Arc<dyn TaskQueue>,
        config: SharedTextureConfig,
        render_threads: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            queue,
            config,
            render_threads,
            textures: RwLock::new(Vec::new()),
        })
    }

    /// Record that the producer published a frame in `handle`.
    ///
    /// A known handle is moved to the back and re-acquired; an unknown one is
    /// opened and appended. Returns `None` when the handle cannot be opened.
    pub fn add_shared_handle(&self, handle: SharedHandle) -> Option<Arc<DxSharedTexture>> {
        let mut textures = self.textures.write();
        let known = textures
            .iter()
            .position(|texture| self.backend.compare_handles(texture.handle(), handle));
        if let Some(index) = known {
            let texture = textures.remove(index);
            textures.push(Arc::clone(&texture));
            texture.acquire();
            trace!(handle = handle.raw(), frame = texture.frame(), "shared handle reused");
            return Some(texture);
        }

        let texture = match DxSharedTexture::new(
            handle,
            Arc::clone(&self.backend),
            Arc::clone(&self.queue),
            self.config.clone(),
            self.render_threads,
        ) {
            Ok(texture) => texture,
            Err(err) => {
                error!(handle = handle.raw(), %err, "failed to open shared texture");
                return None;
            }
        };
        texture.acquire();
        textures.push(Arc::clone(&texture));
        debug!(handle = handle.raw(), textures = textures.len(), "shared handle added");
        Some(texture)
    }

    /// Newest texture with content ready for the calling render thread.
    ///
    /// Only the newest entry may start a copy, so at most one copy pipeline
    /// runs per bag; older entries are fallbacks while it is in flight.
    pub fn texture(&self, tc: &ThreadContext<'_>) -> Option<SharedTextureGL> {
        let textures = self.textures.read();
        textures
            .iter()
            .rev()
            .enumerate()
            .find_map(|(i, texture)| texture.texture(tc, i == 0))
    }

    pub fn latest(&self) -> Option<Arc<DxSharedTexture>> {
        self.textures.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.textures.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.read().is_empty()
    }

    pub fn clean_old_textures(&self) -> usize {
        self.clean_old_textures_at(Instant::now())
    }

    /// Release and evict superseded textures. Returns how many were evicted.
    ///
    /// The newest entry is always kept. Any other entry is released once no
    /// interested render thread still needs it, and evicted if its size
    /// differs from the newest or it sat unused past the idle timeout.
    pub fn clean_old_textures_at(&self, now: Instant) -> usize {
        let mut textures = self.textures.write();
        let Some(newest) = textures.last().cloned() else {
            return 0;
        };
        let before = textures.len();
        textures.retain(|texture| {
            if Arc::ptr_eq(texture, &newest) {
                return true;
            }
            texture.decay_interest();
            if !texture.ready_for_release() {
                return true;
            }
            texture.release(false);
            let resized = !texture.desc().same_size(&newest.desc());
            let idle = texture.idle_for(now) > self.config.idle_timeout;
            !(resized || idle)
        });
        let evicted = before - textures.len();
        if evicted > 0 {
            debug!(evicted, textures = textures.len(), "old shared textures evicted");
        }
        evicted
    }
}
