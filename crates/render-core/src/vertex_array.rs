//! Vertex array descriptor: which buffers feed which named attributes.

use std::sync::Arc;

use gl::types::GLenum;
use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::manager::RenderManager;
use crate::resource::{RenderResource, Resource, ResourceId, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input name, resolved to a location against the bound program.
    pub name: String,
    /// Components per vertex (1..=4).
    pub components: i32,
    pub data_type: GLenum,
    pub normalized: bool,
    /// Byte offset inside one vertex.
    pub offset: usize,
}

/// Interleaved vertex layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexDescription {
    pub attributes: Vec<VertexAttribute>,
    /// Stride in bytes.
    pub vertex_size: usize,
}

impl VertexDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute right after the previous one.
    pub fn add_attribute(mut self, name: &str, components: i32, data_type: GLenum, normalized: bool) -> Self {
        let offset = self.vertex_size;
        self.vertex_size += components as usize * component_size(data_type);
        self.attributes.push(VertexAttribute {
            name: name.to_owned(),
            components,
            data_type,
            normalized,
            offset,
        });
        self
    }

    pub fn find(&self, name: &str) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

fn component_size(data_type: GLenum) -> usize {
    match data_type {
        gl::BYTE | gl::UNSIGNED_BYTE => 1,
        gl::SHORT | gl::UNSIGNED_SHORT | gl::HALF_FLOAT => 2,
        gl::DOUBLE => 8,
        _ => 4,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBinding {
    pub buffer: ResourceId,
    pub description: VertexDescription,
}

#[derive(Debug, Clone, Default)]
pub struct VertexArrayState {
    pub bindings: Vec<VertexBinding>,
    pub index_buffer: Option<ResourceId>,
    pub generation: u64,
}

pub struct VertexArray {
    resource: RenderResource,
    state: Mutex<VertexArrayState>,
}

impl VertexArray {
    pub fn new(manager: &Arc<RenderManager>) -> Arc<Self> {
        let vao = Arc::new(Self {
            resource: RenderResource::new(manager, ResourceKind::VertexArray),
            state: Mutex::new(VertexArrayState::default()),
        });
        manager.register(vao.id(), ResourceKind::VertexArray, &vao);
        vao
    }

    pub fn add_binding(&self, buffer: &Buffer, description: VertexDescription) {
        let mut state = self.state.lock();
        state.bindings.push(VertexBinding {
            buffer: buffer.id(),
            description,
        });
        state.generation += 1;
    }

    pub fn set_index_buffer(&self, buffer: Option<&Buffer>) {
        let mut state = self.state.lock();
        let id = buffer.map(|b| b.id());
        if state.index_buffer != id {
            state.index_buffer = id;
            state.generation += 1;
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.bindings.clear();
        state.index_buffer = None;
        state.generation += 1;
    }

    pub fn state(&self) -> VertexArrayState {
        self.state.lock().clone()
    }
}

impl Resource for VertexArray {
    const KIND: ResourceKind = ResourceKind::VertexArray;

    fn resource(&self) -> &RenderResource {
        &self.resource
    }

    fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

impl std::fmt::Debug for VertexArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VertexArray")
            .field("id", &self.resource.id())
            .field("bindings", &state.bindings.len())
            .field("generation", &state.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_are_packed_in_order() {
        let desc = VertexDescription::new()
            .add_attribute("position", 3, gl::FLOAT, false)
            .add_attribute("color", 4, gl::UNSIGNED_BYTE, true)
            .add_attribute("uv", 2, gl::HALF_FLOAT, false);
        assert_eq!(desc.vertex_size, 12 + 4 + 4);
        assert_eq!(desc.find("color").unwrap().offset, 12);
        assert_eq!(desc.find("uv").unwrap().offset, 16);
        assert!(desc.find("normal").is_none());
    }
}
