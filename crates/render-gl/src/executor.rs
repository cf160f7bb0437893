//! Deferred GPU commands for one render thread.
//!
//! Work that has to run on the thread owning a GPU context, but is produced
//! elsewhere (background copy tasks, async texture uploads, teardown of GPU
//! objects dropped on another thread), is queued here and drained by the
//! owning render thread after it flushes.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::commands::GpuCommands;

pub type GpuCommand = Box<dyn FnOnce(&dyn GpuCommands) + Send>;

#[derive(Default)]
pub struct CommandExecutor {
    thread_index: usize,
    queue: Mutex<VecDeque<GpuCommand>>,
}

impl CommandExecutor {
    pub fn new(thread_index: usize) -> Arc<Self> {
        Arc::new(Self {
            thread_index,
            queue: Mutex::new(VecDeque::new()),
        })
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    /// Queue `command`. Safe from any thread.
    pub fn submit(&self, command: impl FnOnce(&dyn GpuCommands) + Send + 'static) {
        self.queue.lock().push_back(Box::new(command));
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued commands on the owning thread until the queue is empty,
    /// including commands queued while running. Returns how many ran.
    pub fn run(&self, gl: &dyn GpuCommands) -> usize {
        let mut ran = 0;
        loop {
            // lock released before running so commands can queue more work
            let Some(command) = self.queue.lock().pop_front() else {
                break;
            };
            command(gl);
            ran += 1;
        }
        if ran > 0 {
            trace!(thread = self.thread_index, ran, "ran deferred GPU commands");
        }
        ran
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("thread_index", &self.thread_index)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingCommands};

    #[test]
    fn runs_commands_in_order_including_requeued_ones() {
        let gl = RecordingCommands::new();
        let executor = CommandExecutor::new(0);
        let inner = executor.clone();
        executor.submit(move |gl| {
            gl.flush();
            inner.submit(|gl| gl.use_program(7));
        });
        executor.submit(|gl| gl.use_program(5));
        assert_eq!(executor.pending(), 2);
        assert_eq!(executor.run(&gl), 3);
        assert_eq!(
            gl.calls(),
            vec![Call::Flush, Call::UseProgram(5), Call::UseProgram(7)]
        );
        assert_eq!(executor.pending(), 0);
    }
}
