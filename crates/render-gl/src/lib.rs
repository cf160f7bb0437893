#![allow(clippy::too_many_arguments)]

//! GPU-side mirrors of the `render-core` descriptors.
//!
//! Each render thread owns a [`RenderContextGL`]: one GPU context, one
//! [`StateGL`] binding cache and one table per mirror kind. Mirrors compare
//! their cached generation with the descriptor's and then reallocate, upload
//! dirty sub-regions, or do nothing at all.
//!
//! # Overview
//!
//! - [`GpuCommands`] is the command surface every mirror is written against;
//!   [`GlCommands`] issues the calls on the current GL context.
//! - [`ResourceHandleGL`] holds a raw handle and its idle expiration.
//! - [`TextureGL`], [`BufferGL`], [`RenderBufferGL`], [`FrameBufferGL`] and
//!   [`VertexArrayGL`] are the mirror objects.
//! - [`CommandExecutor`] runs GPU work produced on other threads on the
//!   render thread that owns the context.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod executor;
pub mod frame_buffer;
pub mod gl_commands;
pub mod handle;
pub mod render_buffer;
pub mod state;
pub mod texture;
pub mod vertex_array;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use buffer::BufferGL;
pub use commands::{FenceStatus, GpuCommands, GpuFence};
pub use context::{RenderContextGL, ThreadContext};
pub use executor::CommandExecutor;
pub use frame_buffer::FrameBufferGL;
pub use gl_commands::GlCommands;
pub use handle::ResourceHandleGL;
pub use render_buffer::RenderBufferGL;
pub use state::{BufferMapping, StateGL};
pub use texture::TextureGL;
pub use vertex_array::VertexArrayGL;
