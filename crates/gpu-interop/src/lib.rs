//! Textures shared by a foreign graphics device, brought into the render
//! threads' GL contexts.
//!
//! A producer publishes frames through OS shared-texture handles. A
//! [`DxSharedTextureBag`] tracks the handles one producer cycles through and
//! hands every render thread the newest texture that is ready for it, either
//! registered for zero-copy interop or copied across through a staging
//! texture on a background [`TaskQueue`].
//!
//! The foreign device is reached through the traits in [`backend`]. On
//! Windows, [`dx11::Dx11Backend`] implements them with D3D11 and
//! `WGL_NV_DX_interop2`.

pub mod backend;
pub mod bag;
pub mod config;
pub mod error;
pub mod shared_texture;
pub mod sweeper;
pub mod task_queue;

#[cfg(target_os = "windows")]
pub mod dx11;

pub use backend::{
    ForeignTexture, InteropDevice, InteropObject, MappedTexture, SharedHandle, SharedTextureBackend, StagingTexture,
    TextureDesc,
};
pub use bag::DxSharedTextureBag;
pub use config::SharedTextureConfig;
pub use error::{InteropError, InteropResult};
pub use shared_texture::{ContextMode, DxSharedTexture, SharedTextureGL, SharedTextureLock};
pub use sweeper::SharedTextureSweeper;
pub use task_queue::{ManualQueue, Task, TaskQueue, ThreadPoolQueue};
