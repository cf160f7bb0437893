//! CPU-side render resources.
//!
//! Descriptors ([`Texture`], [`Buffer`], [`RenderBuffer`], [`FrameBuffer`],
//! [`VertexArray`]) are owned by application code and shared with every
//! render thread through `Arc`. Each carries a [`ResourceId`] registered in
//! the [`RenderManager`] and a generation counter that GPU-side mirrors
//! compare against to decide what to upload.

pub mod buffer;
pub mod config;
pub mod format;
pub mod frame_buffer;
pub mod logging;
pub mod manager;
pub mod region;
pub mod render_buffer;
pub mod resource;
pub mod texture;
pub mod vertex_array;

pub use buffer::{Buffer, BufferTarget, BufferUsage};
pub use config::RenderConfig;
pub use format::PixelFormat;
pub use frame_buffer::{Attachment, FrameBuffer, FrameBufferTarget};
pub use manager::RenderManager;
pub use region::{ByteRanges, Rect, Region};
pub use render_buffer::RenderBuffer;
pub use resource::{RenderResource, Resource, ResourceId, ResourceKind};
pub use texture::{SamplerParams, Texture, TextureState};
pub use vertex_array::{VertexArray, VertexAttribute, VertexDescription};
