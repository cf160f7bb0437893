//! GPU mirror of a [`FrameBuffer`].
//!
//! The descriptor's attachments and the mirror's cached attachments are both
//! ordered by slot, so they are diffed with one merge pass: slots only on the
//! descriptor side are attached, slots only on the cached side are detached,
//! and shared slots are re-attached when the attachment or the resolved GPU
//! handle changed.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::time::Duration;

use gl::types::{GLenum, GLuint};
use render_core::{Attachment, FrameBuffer, FrameBufferTarget, ResourceId};
use tracing::{debug, error, trace};

use crate::commands::GpuCommands;
use crate::handle::ResourceHandleGL;
use crate::state::StateGL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AttachedGL {
    attachment: Attachment,
    handle: GLuint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Attach(GLenum, AttachedGL),
    Detach(GLenum, Attachment),
}

#[derive(Debug)]
pub struct FrameBufferGL {
    id: ResourceId,
    handle: ResourceHandleGL,
    generation: Option<u64>,
    attached: BTreeMap<GLenum, AttachedGL>,
    target: FrameBufferTarget,
    complete: bool,
}

impl FrameBufferGL {
    pub fn new(id: ResourceId, expiration: Duration, frame_time: u64) -> Self {
        Self {
            id,
            handle: ResourceHandleGL::new(expiration, frame_time),
            generation: None,
            attached: BTreeMap::new(),
            target: FrameBufferTarget::Both,
            complete: false,
        }
    }

    pub fn handle(&self) -> GLuint {
        self.handle.handle()
    }

    pub fn target(&self) -> FrameBufferTarget {
        self.target
    }

    pub fn expired(&self, frame_time: u64) -> bool {
        self.handle.expired(frame_time)
    }

    /// Slots currently attached on the GPU object.
    pub fn attached_slots(&self) -> impl Iterator<Item = GLenum> + '_ {
        self.attached.keys().copied()
    }

    /// Bring attachments in line with `frame_buffer`.
    ///
    /// `resolve` syncs the texture or renderbuffer behind an attachment and
    /// returns its GPU handle, or `None` when the descriptor is gone. It is
    /// called for every attachment on every sync, because an attachment may
    /// have been reallocated under a new handle without the framebuffer's own
    /// generation changing.
    pub fn sync(
        &mut self,
        gl: &dyn GpuCommands,
        state: &mut StateGL,
        frame_buffer: &FrameBuffer,
        mut resolve: impl FnMut(&mut StateGL, &Attachment) -> Option<GLuint>,
    ) -> bool {
        self.handle.touch(state.frame_time());
        let desired = frame_buffer.state();

        let mut changes = Vec::new();
        let mut wanted = desired.attachments.iter().peekable();
        let mut cached = self.attached.iter().peekable();
        loop {
            match order(&mut wanted, &mut cached) {
                Some(Ordering::Less) => {
                    let Some((&slot, attachment)) = wanted.next() else { break };
                    if let Some(handle) = resolve(state, attachment) {
                        changes.push(Change::Attach(slot, AttachedGL { attachment: *attachment, handle }));
                    } else {
                        trace!(frame_buffer = %self.id, slot, "attachment source is gone");
                    }
                }
                Some(Ordering::Greater) => {
                    let Some((&slot, old)) = cached.next() else { break };
                    changes.push(Change::Detach(slot, old.attachment));
                }
                Some(Ordering::Equal) => {
                    let (Some((&slot, attachment)), Some((_, old))) = (wanted.next(), cached.next()) else {
                        break;
                    };
                    match resolve(state, attachment) {
                        Some(handle) => {
                            let now = AttachedGL { attachment: *attachment, handle };
                            if now != *old {
                                changes.push(Change::Attach(slot, now));
                            }
                        }
                        None => changes.push(Change::Detach(slot, old.attachment)),
                    }
                }
                None => break,
            }
        }

        let retarget = self.target != desired.target;
        let unchanged = changes.is_empty() && !retarget && self.handle() != 0;
        self.generation = Some(desired.generation);
        if unchanged {
            return self.complete;
        }

        if self.handle() == 0 {
            let handle = gl.create_framebuffer();
            if handle == 0 {
                error!(frame_buffer = %self.id, "failed to create framebuffer");
                return false;
            }
            self.handle.set_handle(handle);
        }
        self.target = desired.target;
        let target = self.target.gl_target();
        if state.set_framebuffer(target, self.handle()) {
            gl.bind_framebuffer(target, self.handle());
        }

        for change in changes {
            match change {
                Change::Attach(slot, attached) => {
                    attach(gl, target, slot, attached.attachment, attached.handle);
                    self.attached.insert(slot, attached);
                }
                Change::Detach(slot, attachment) => {
                    attach(gl, target, slot, attachment, 0);
                    self.attached.remove(&slot);
                }
            }
        }

        let status = gl.check_framebuffer_status(target);
        self.complete = status == gl::FRAMEBUFFER_COMPLETE;
        if self.complete {
            debug!(frame_buffer = %self.id, attachments = self.attached.len(), "framebuffer updated");
        } else {
            error!(frame_buffer = %self.id, status, "framebuffer incomplete");
        }
        self.complete
    }

    /// Bind for the descriptor's target mode.
    pub fn bind(&mut self, gl: &dyn GpuCommands, state: &mut StateGL) -> bool {
        if self.handle() == 0 {
            return false;
        }
        self.handle.touch(state.frame_time());
        let target = self.target.gl_target();
        if state.set_framebuffer(target, self.handle()) {
            gl.bind_framebuffer(target, self.handle());
        }
        true
    }

    pub fn destroy(&mut self, gl: &dyn GpuCommands, state: &mut StateGL) {
        let handle = self.handle.take_handle();
        if handle != 0 {
            let (read, draw) = state.framebuffers();
            if read == handle || draw == handle {
                state.set_framebuffer(gl::FRAMEBUFFER, 0);
                gl.bind_framebuffer(gl::FRAMEBUFFER, 0);
            }
            gl.delete_framebuffer(handle);
        }
        self.attached.clear();
        self.generation = None;
        self.complete = false;
    }
}

/// Compare the heads of both iterators by slot. `Less` means the desired side
/// comes first (or the cached side is exhausted).
fn order<'a, A: 'a, B: 'a>(
    wanted: &mut Peekable<impl Iterator<Item = (&'a GLenum, A)>>,
    cached: &mut Peekable<impl Iterator<Item = (&'a GLenum, B)>>,
) -> Option<Ordering> {
    match (wanted.peek(), cached.peek()) {
        (Some((a, _)), Some((b, _))) => Some(a.cmp(b)),
        (Some(_), None) => Some(Ordering::Less),
        (None, Some(_)) => Some(Ordering::Greater),
        (None, None) => None,
    }
}

fn attach(gl: &dyn GpuCommands, target: GLenum, slot: GLenum, attachment: Attachment, handle: GLuint) {
    match attachment {
        Attachment::Texture { level, .. } => gl.framebuffer_texture(target, slot, handle, level),
        Attachment::RenderBuffer { .. } => gl.framebuffer_renderbuffer(target, slot, handle),
    }
}
