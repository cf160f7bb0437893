//! Process-wide housekeeping for shared texture bags.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::bag::DxSharedTextureBag;

struct Worker {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

/// Runs [`DxSharedTextureBag::clean_old_textures`] over every registered
/// bag. Bags are held weakly and forgotten once dropped.
#[derive(Default)]
pub struct SharedTextureSweeper {
    bags: Mutex<Vec<Weak<DxSharedTextureBag>>>,
    worker: Mutex<Option<Worker>>,
}

impl SharedTextureSweeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, bag: &Arc<DxSharedTextureBag>) {
        self.bags.lock().push(Arc::downgrade(bag));
    }

    pub fn bag_count(&self) -> usize {
        self.bags.lock().len()
    }

    /// Clean every live bag. Returns the number of evicted textures.
    pub fn sweep(&self) -> usize {
        let bags: Vec<Arc<DxSharedTextureBag>> = {
            let mut bags = self.bags.lock();
            bags.retain(|bag| bag.strong_count() > 0);
            bags.iter().filter_map(Weak::upgrade).collect()
        };
        let evicted = bags.iter().map(|bag| bag.clean_old_textures()).sum();
        trace!(bags = bags.len(), evicted, "shared textures swept");
        evicted
    }

    /// Sweep every `interval` on a background thread until
    /// [`stop`](Self::stop) or drop.
    pub fn start(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let sweeper = Arc::downgrade(self);
        let signal = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("shared-texture-sweeper".into())
            .spawn(move || {
                let (stopped, wake) = &*signal;
                let mut stopped = stopped.lock();
                while !*stopped {
                    if !wake.wait_for(&mut stopped, interval).timed_out() {
                        continue;
                    }
                    let alive = MutexGuard::unlocked(&mut stopped, || match sweeper.upgrade() {
                        Some(sweeper) => {
                            sweeper.sweep();
                            true
                        }
                        None => false,
                    });
                    if !alive {
                        break;
                    }
                }
            })
            .context("failed to spawn shared texture sweeper")?;
        debug!(?interval, "shared texture sweeper started");
        *worker = Some(Worker { stop, handle });
        Ok(())
    }

    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let (stopped, wake) = &*worker.stop;
        *stopped.lock() = true;
        wake.notify_all();
        // the last reference may be dropped by the worker itself
        if worker.handle.thread().id() == thread::current().id() {
            return;
        }
        if worker.handle.join().is_err() {
            warn!("shared texture sweeper panicked");
        }
    }
}

impl Drop for SharedTextureSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
