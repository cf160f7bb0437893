//! Per-context cache of GPU binding state and the per-frame upload budget.
//!
//! A `StateGL` belongs to exactly one render thread. The `set_*` methods
//! update the cache and report whether the value changed; only then does the
//! caller issue the real binding call.

use std::collections::HashMap;
use std::ptr::NonNull;

use gl::types::{GLbitfield, GLenum, GLuint};
use render_core::RenderConfig;

/// An outstanding `map_buffer_range` on one buffer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMapping {
    pub target: GLenum,
    pub offset: usize,
    pub length: usize,
    pub access: GLbitfield,
    pub ptr: NonNull<u8>,
}

impl BufferMapping {
    pub fn matches(&self, target: GLenum, offset: usize, length: usize, access: GLbitfield) -> bool {
        self.target == target && self.offset == offset && self.length == length && self.access == access
    }
}

#[derive(Debug)]
pub struct StateGL {
    thread_index: usize,
    frame_time: u64,
    program: GLuint,
    vertex_array: GLuint,
    read_framebuffer: GLuint,
    draw_framebuffer: GLuint,
    active_unit: u32,
    /// (target, texture) bound on each texture unit.
    textures: Vec<(GLenum, GLuint)>,
    upload_limit: u64,
    upload_margin: u64,
    fps: f64,
    uploaded_bytes: u64,
    buffer_maps: HashMap<GLuint, BufferMapping>,
}

impl StateGL {
    pub fn new(thread_index: usize, config: &RenderConfig) -> Self {
        Self {
            thread_index,
            frame_time: 0,
            program: 0,
            vertex_array: 0,
            read_framebuffer: 0,
            draw_framebuffer: 0,
            active_unit: 0,
            textures: Vec::new(),
            upload_limit: config.upload_limit,
            upload_margin: config.upload_margin,
            fps: config.target_fps,
            uploaded_bytes: 0,
            buffer_maps: HashMap::new(),
        }
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    pub fn frame_time(&self) -> u64 {
        self.frame_time
    }

    pub fn set_frame_time(&mut self, frame_time: u64) {
        self.frame_time = frame_time;
    }

    pub fn set_program(&mut self, program: GLuint) -> bool {
        replace(&mut self.program, program)
    }

    pub fn program(&self) -> GLuint {
        self.program
    }

    pub fn set_vertex_array(&mut self, vertex_array: GLuint) -> bool {
        replace(&mut self.vertex_array, vertex_array)
    }

    pub fn vertex_array(&self) -> GLuint {
        self.vertex_array
    }

    /// `target` is `READ_FRAMEBUFFER`, `DRAW_FRAMEBUFFER` or `FRAMEBUFFER`
    /// (both).
    pub fn set_framebuffer(&mut self, target: GLenum, framebuffer: GLuint) -> bool {
        match target {
            gl::READ_FRAMEBUFFER => replace(&mut self.read_framebuffer, framebuffer),
            gl::DRAW_FRAMEBUFFER => replace(&mut self.draw_framebuffer, framebuffer),
            _ => {
                let read = replace(&mut self.read_framebuffer, framebuffer);
                let draw = replace(&mut self.draw_framebuffer, framebuffer);
                read || draw
            }
        }
    }

    pub fn framebuffers(&self) -> (GLuint, GLuint) {
        (self.read_framebuffer, self.draw_framebuffer)
    }

    /// Select the active texture unit.
    pub fn set_texture_unit(&mut self, unit: u32) -> bool {
        replace(&mut self.active_unit, unit)
    }

    pub fn texture_unit(&self) -> u32 {
        self.active_unit
    }

    /// Record `texture` as bound to `target` on the active unit.
    pub fn set_texture(&mut self, target: GLenum, texture: GLuint) -> bool {
        let unit = self.active_unit as usize;
        if self.textures.len() <= unit {
            self.textures.resize(unit + 1, (0, 0));
        }
        replace(&mut self.textures[unit], (target, texture))
    }

    /// Forget texture bindings, e.g. after commands ran outside this cache.
    pub fn invalidate_textures(&mut self) {
        self.textures.clear();
    }

    /// Forget every cached binding. Call after foreign code touched the
    /// context.
    pub fn reset(&mut self) {
        self.program = 0;
        self.vertex_array = 0;
        self.read_framebuffer = 0;
        self.draw_framebuffer = 0;
        self.active_unit = 0;
        self.textures.clear();
    }

    // -- upload budget ---------------------------------------------------------

    /// Bytes that may still be uploaded this frame. Never below the per-frame
    /// margin, so some progress is always possible.
    pub fn available_upload_bytes(&self) -> u64 {
        let margin = (self.upload_margin as f64 / self.fps) as u64;
        let budget = (self.upload_limit as f64 / self.fps) as u64;
        margin.max(budget.saturating_sub(self.uploaded_bytes))
    }

    pub fn consume_upload_bytes(&mut self, bytes: u64) {
        self.uploaded_bytes = self.uploaded_bytes.saturating_add(bytes);
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn clear_uploaded_bytes(&mut self) {
        self.uploaded_bytes = 0;
    }

    // -- buffer mapping side table ----------------------------------------------

    pub fn buffer_mapping(&self, buffer: GLuint) -> Option<BufferMapping> {
        self.buffer_maps.get(&buffer).copied()
    }

    pub(crate) fn insert_buffer_mapping(&mut self, buffer: GLuint, mapping: BufferMapping) {
        self.buffer_maps.insert(buffer, mapping);
    }

    pub(crate) fn remove_buffer_mapping(&mut self, buffer: GLuint) -> Option<BufferMapping> {
        self.buffer_maps.remove(&buffer)
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> StateGL {
        StateGL::new(
            0,
            &RenderConfig {
                upload_limit: 6000,
                upload_margin: 600,
                target_fps: 60.0,
                ..RenderConfig::default()
            },
        )
    }

    #[test]
    fn bindings_report_changes_only() {
        let mut s = state();
        assert!(s.set_program(3));
        assert!(!s.set_program(3));
        assert!(s.set_vertex_array(1));
        assert!(!s.set_vertex_array(1));
        assert!(s.set_texture_unit(2));
        assert!(s.set_texture(gl::TEXTURE_2D, 9));
        assert!(!s.set_texture(gl::TEXTURE_2D, 9));
        s.set_texture_unit(0);
        assert!(s.set_texture(gl::TEXTURE_2D, 9));
    }

    #[test]
    fn framebuffer_targets_are_tracked_separately() {
        let mut s = state();
        assert!(s.set_framebuffer(gl::READ_FRAMEBUFFER, 4));
        assert!(s.set_framebuffer(gl::DRAW_FRAMEBUFFER, 4));
        assert!(!s.set_framebuffer(gl::FRAMEBUFFER, 4));
        assert!(s.set_framebuffer(gl::DRAW_FRAMEBUFFER, 5));
        assert!(s.set_framebuffer(gl::FRAMEBUFFER, 5));
        assert_eq!(s.framebuffers(), (5, 5));
        s.reset();
        assert_eq!(s.framebuffers(), (0, 0));
    }

    #[test]
    fn upload_budget_never_drops_below_margin() {
        let mut s = state();
        assert_eq!(s.available_upload_bytes(), 100);
        s.consume_upload_bytes(50);
        assert_eq!(s.available_upload_bytes(), 50);
        s.consume_upload_bytes(500);
        assert_eq!(s.available_upload_bytes(), 10);
        s.clear_uploaded_bytes();
        assert_eq!(s.available_upload_bytes(), 100);
    }
}
