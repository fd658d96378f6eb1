/// Background loader pool
///
/// A fixed set of named threads pulls transfer tasks from a shared queue,
/// reads each page from its source into a staging buffer and hands the task
/// back to the consumer over a completion channel. Loaders sleep on a
/// condition variable while the queue is empty and never touch page stores.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use crate::error::{PagerError, PagerResult};
use crate::page::FileId;
use crate::source::CancelToken;
use super::staging::StagingPool;
use super::task::TransferTask;

#[derive(Default)]
struct WorkQueue {
    tasks: VecDeque<TransferTask>,
    shutdown: bool,
}

/// State shared between the cache and its loaders
pub struct LoaderShared {
    queue: Mutex<WorkQueue>,
    work_ready: Condvar,

    /// Current flush generation; tasks from older generations are skipped
    epoch: Arc<AtomicU64>,

    pub staging: StagingPool,
}

impl LoaderShared {
    pub fn new(staging: StagingPool) -> Self {
        Self {
            queue: Mutex::new(WorkQueue::default()),
            work_ready: Condvar::new(),
            epoch: Arc::new(AtomicU64::new(0)),
            staging,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Token that trips once the epoch moves past `epoch`
    pub fn cancel_token(&self, epoch: u64) -> CancelToken {
        CancelToken::for_generation(Arc::clone(&self.epoch), epoch)
    }

    /// Start a new generation, cancelling every task created before it
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn push(&self, mut task: TransferTask) {
        task.mark_queued();
        self.queue.lock().tasks.push_back(task);
        self.work_ready.notify_one();
    }

    /// Remove queued tasks that no loader has picked up yet
    pub fn take_queued(&self, file: Option<FileId>) -> Vec<TransferTask> {
        let mut queue = self.queue.lock();
        let (taken, kept): (VecDeque<_>, VecDeque<_>) = queue
            .tasks
            .drain(..)
            .partition(|task| file.map_or(true, |f| task.address.file == f));
        queue.tasks = kept;
        taken.into()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    fn shutdown(&self) {
        self.queue.lock().shutdown = true;
        self.work_ready.notify_all();
    }

    /// Block until a task is available; `None` once shut down
    fn next_task(&self) -> Option<TransferTask> {
        let mut queue = self.queue.lock();
        loop {
            if queue.shutdown {
                return None;
            }
            if let Some(task) = queue.tasks.pop_front() {
                return Some(task);
            }
            self.work_ready.wait(&mut queue);
        }
    }
}

pub struct LoaderPool {
    shared: Arc<LoaderShared>,
    workers: Vec<JoinHandle<()>>,
}

impl LoaderPool {
    pub fn spawn(
        name: &str,
        threads: usize,
        shared: Arc<LoaderShared>,
        completed: Sender<TransferTask>,
    ) -> PagerResult<Self> {
        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let worker_shared = Arc::clone(&shared);
            let worker_completed = completed.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-loader-{}", name, id))
                .spawn(move || run_loader(id, worker_shared, worker_completed));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Dropping the partial pool joins the threads already started.
                    drop(Self { shared, workers });
                    return Err(PagerError::Io(e));
                }
            }
        }

        log::debug!("[LoaderPool] Started {} loader threads", threads);
        Ok(Self { shared, workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Drop for LoaderPool {
    fn drop(&mut self) {
        self.shared.shutdown();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("[LoaderPool] Loader thread panicked");
            }
        }
        log::debug!("[LoaderPool] All loader threads joined");
    }
}

fn run_loader(id: usize, shared: Arc<LoaderShared>, completed: Sender<TransferTask>) {
    while let Some(mut task) = shared.next_task() {
        let cancel = shared.cancel_token(task.epoch);
        if cancel.is_cancelled() {
            task.cancel();
        } else {
            log::trace!("[Loader {}] Loading {}", id, task.address);
            task.load(&shared.staging, &cancel);
        }

        if completed.send(task).is_err() {
            break;
        }
    }
    log::trace!("[Loader {}] Exiting", id);
}
