//! The foreign-device surface [`DxSharedTexture`](crate::DxSharedTexture) is
//! written against.
//!
//! A backend opens textures that another device (usually another process)
//! shares through an OS handle, stages them into CPU-readable copies and,
//! where the driver allows it, registers them directly with the consuming GL
//! context.

use std::any::Any;
use std::ffi::c_void;
use std::time::Duration;

use gl::types::GLuint;
use render_core::PixelFormat;

use crate::error::InteropResult;

/// Raw OS handle value of a shared texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedHandle(usize);

impl SharedHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }
}

/// Registration of a foreign texture with a GL context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InteropObject(usize);

impl InteropObject {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl TextureDesc {
    pub fn same_size(&self, other: &TextureDesc) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Bytes of one tightly packed row.
    pub fn row_bytes(&self) -> usize {
        self.format.row_bytes(self.width)
    }
}

/// Entry point into a foreign graphics device.
pub trait SharedTextureBackend: Send + Sync {
    /// Duplicate `handle` into a handle owned by the caller.
    fn duplicate_handle(&self, handle: SharedHandle) -> InteropResult<SharedHandle>;
    fn close_handle(&self, handle: SharedHandle);
    /// Whether both handles refer to the same OS object.
    fn compare_handles(&self, a: SharedHandle, b: SharedHandle) -> bool;
    fn open_texture(&self, handle: SharedHandle) -> InteropResult<Box<dyn ForeignTexture>>;
    /// Open an interop device for the GL context current on the calling
    /// thread.
    fn open_interop_device(&self) -> InteropResult<Box<dyn InteropDevice>>;
}

/// A shared texture opened on the backend's device.
pub trait ForeignTexture: Send {
    fn desc(&self) -> TextureDesc;
    /// Acquire the keyed mutex. A zero timeout only tries.
    fn acquire_sync(&self, key: u64, timeout: Duration) -> InteropResult<()>;
    fn release_sync(&self, key: u64) -> InteropResult<()>;
    /// CPU-readable texture of the same size and format on the same device.
    fn create_staging(&self) -> InteropResult<Box<dyn StagingTexture>>;
    /// Queue a copy into `staging` followed by a completion event.
    fn copy_to_staging(&self, staging: &mut dyn StagingTexture) -> InteropResult<()>;
    /// Native texture pointer, for interop registration.
    fn raw(&self) -> *mut c_void;
}

/// CPU view of a mapped staging texture.
#[derive(Debug)]
pub struct MappedTexture<'a> {
    pub data: &'a [u8],
    pub row_pitch: usize,
}

pub trait StagingTexture: Send {
    /// For backends to recover their own staging type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Whether the last queued copy has finished on the device.
    fn poll(&mut self) -> InteropResult<bool>;
    fn map(&mut self) -> InteropResult<MappedTexture<'_>>;
    fn unmap(&mut self);
}

/// Zero-copy bridge between the backend's device and one GL context. Every
/// method must be called on the thread owning that context.
pub trait InteropDevice: Send {
    fn register(&self, texture: &dyn ForeignTexture, gl_texture: GLuint) -> InteropResult<InteropObject>;
    fn unregister(&self, object: InteropObject);
    fn lock(&self, object: InteropObject) -> InteropResult<()>;
    fn unlock(&self, object: InteropObject) -> InteropResult<()>;
}
