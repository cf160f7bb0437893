//! Background queues for the staging half of the copy pipeline.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks off the render threads.
pub trait TaskQueue: Send + Sync {
    fn spawn(&self, task: Task);
}

/// Fixed set of named worker threads fed through a channel. Dropping the
/// queue lets queued tasks finish, then joins the workers.
pub struct ThreadPoolQueue {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolQueue {
    pub fn new(name: &str, workers: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..workers.max(1))
            .map(|i| {
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || loop {
                        // lock dropped before the task runs
                        let task = receiver.lock().recv();
                        match task {
                            Ok(task) => task(),
                            Err(_) => break,
                        }
                    })
                    .with_context(|| format!("failed to spawn worker {name}-{i}"))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(name, workers = workers.len(), "task queue started");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }
}

impl TaskQueue for ThreadPoolQueue {
    fn spawn(&self, task: Task) {
        let sent = self.sender.as_ref().map(|sender| sender.send(task));
        if !matches!(sent, Some(Ok(()))) {
            warn!("task queue is shut down, task dropped");
        }
    }
}

impl Drop for ThreadPoolQueue {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("task queue worker panicked");
            }
        }
    }
}

/// Queue that only runs tasks when asked to.
#[derive(Default)]
pub struct ManualQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl ManualQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run the oldest task. Returns false when there was none.
    pub fn run_one(&self) -> bool {
        let task = self.tasks.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl TaskQueue for ManualQueue {
    fn spawn(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }
}
