//! Stable identities for CPU-side resource descriptors.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::manager::RenderManager;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique identifier of a descriptor.
///
/// Ids come from a monotonic counter and are never reused while the process
/// runs. They are not meant to be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What kind of descriptor an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Buffer,
    RenderBuffer,
    FrameBuffer,
    VertexArray,
}

/// Identity shared by every descriptor: its id, kind and the registry it is
/// listed in. Dropping it removes the descriptor from that registry.
pub struct RenderResource {
    id: ResourceId,
    kind: ResourceKind,
    manager: Weak<RenderManager>,
}

impl RenderResource {
    pub(crate) fn new(manager: &Arc<RenderManager>, kind: ResourceKind) -> Self {
        Self {
            id: ResourceId::next(),
            kind,
            manager: Arc::downgrade(manager),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn manager(&self) -> Option<Arc<RenderManager>> {
        self.manager.upgrade()
    }
}

impl fmt::Debug for RenderResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderResource")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for RenderResource {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_resource(self.id);
        }
    }
}

/// Implemented by every descriptor type that can be looked up through the
/// [`RenderManager`].
pub trait Resource: Send + Sync + 'static {
    const KIND: ResourceKind;

    fn resource(&self) -> &RenderResource;

    fn id(&self) -> ResourceId {
        self.resource().id()
    }

    /// Current generation; bumped on every mutation that invalidates GPU
    /// copies.
    fn generation(&self) -> u64;
}
