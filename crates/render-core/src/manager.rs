//! Process-wide registry of descriptors and the shared frame clock.
//!
//! A [`RenderManager`] is created at renderer-driver startup and torn down at
//! shutdown. GPU-side mirror objects never hold descriptor pointers; they
//! keep a [`ResourceId`] and resolve it here on every use, treating a failed
//! lookup as "deleted concurrently".

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::RenderConfig;
use crate::resource::{ResourceId, ResourceKind};

type Entry = (ResourceKind, Weak<dyn Any + Send + Sync>);

static GLOBAL: RwLock<Option<Arc<RenderManager>>> = RwLock::new(None);

pub struct RenderManager {
    config: RenderConfig,
    resources: Mutex<HashMap<ResourceId, Entry>>,
    started: Instant,
    /// Milliseconds since `started`, sampled once per frame.
    frame_time: AtomicU64,
    frame_number: AtomicU64,
}

impl RenderManager {
    pub fn new(config: RenderConfig) -> Arc<Self> {
        debug!(threads = config.max_render_threads, "render manager created");
        Arc::new(Self {
            config,
            resources: Mutex::new(HashMap::new()),
            started: Instant::now(),
            frame_time: AtomicU64::new(0),
            frame_number: AtomicU64::new(0),
        })
    }

    /// Make `manager` the process-wide instance. Replaces (and returns) any
    /// previously installed one.
    pub fn install(manager: Arc<Self>) -> Option<Arc<Self>> {
        let previous = GLOBAL.write().replace(manager);
        if previous.is_some() {
            warn!("replacing an already installed render manager");
        }
        previous
    }

    /// The process-wide instance, if the driver has started.
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.read().clone()
    }

    /// Uninstall the process-wide instance.
    pub fn shutdown() -> Option<Arc<Self>> {
        let previous = GLOBAL.write().take();
        if let Some(manager) = &previous {
            debug!(
                live = manager.resource_count(),
                "render manager shut down"
            );
        }
        previous
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub(crate) fn register<T: Any + Send + Sync>(&self, id: ResourceId, kind: ResourceKind, resource: &Arc<T>) {
        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(resource) as Weak<dyn Any + Send + Sync>;
        self.resources.lock().insert(id, (kind, weak));
    }

    pub(crate) fn remove_resource(&self, id: ResourceId) {
        self.resources.lock().remove(&id);
    }

    /// Resolve `id` to a live descriptor of type `T`.
    ///
    /// Returns `None` when the descriptor has been dropped (possibly by
    /// another thread a moment ago) or when `id` names a different type.
    pub fn get<T: Any + Send + Sync>(&self, id: ResourceId) -> Option<Arc<T>> {
        let weak = {
            let resources = self.resources.lock();
            resources.get(&id)?.1.clone()
        };
        weak.upgrade()?.downcast::<T>().ok()
    }

    pub fn kind_of(&self, id: ResourceId) -> Option<ResourceKind> {
        self.resources.lock().get(&id).map(|(kind, _)| *kind)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.lock().contains_key(&id)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.lock().len()
    }

    /// Sample the monotonic clock. Called once per rendered frame by the
    /// driver.
    pub fn update_frame_time(&self) -> u64 {
        let now = self.started.elapsed().as_millis() as u64;
        // never step backwards, even if set_frame_time ran ahead
        let time = self.frame_time.fetch_max(now, Ordering::AcqRel).max(now);
        self.frame_number.fetch_add(1, Ordering::AcqRel);
        time
    }

    /// Force the frame time. Used by hosts that drive their own clock.
    pub fn set_frame_time(&self, millis: u64) {
        self.frame_time.store(millis, Ordering::Release);
        self.frame_number.fetch_add(1, Ordering::AcqRel);
    }

    /// Milliseconds since startup, as of the last frame update.
    pub fn frame_time(&self) -> u64 {
        self.frame_time.load(Ordering::Acquire)
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RenderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderManager")
            .field("resources", &self.resource_count())
            .field("frame_time", &self.frame_time())
            .finish()
    }
}
