use std::fmt;
use std::sync::Arc;
use crate::error::{PagerError, PagerResult};
use crate::page::PageAddress;
use crate::source::{CancelToken, PageSource};
use super::staging::StagingPool;
use super::store::PageStore;

/// Lifecycle of a transfer task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Queued,
    Loading,
    Ready,
    Failed,
    Cancelled,
}

/// One page's in-flight load
///
/// A task is owned by exactly one party at a time: the cache while queued,
/// a loader thread while loading, and the cache again once it comes back on
/// the completion channel. The staging buffer travels with it.
pub struct TransferTask {
    pub id: u64,
    pub address: PageAddress,
    pub offset: u64,

    /// Destination slot in the cache
    pub slot: usize,

    /// Flush generation the task was created in
    pub epoch: u64,

    source: Arc<dyn PageSource>,
    buffer: Option<Vec<u8>>,
    dirty: bool,
    state: TaskState,
}

impl TransferTask {
    pub fn new(
        id: u64,
        address: PageAddress,
        offset: u64,
        slot: usize,
        epoch: u64,
        source: Arc<dyn PageSource>,
    ) -> Self {
        Self {
            id,
            address,
            offset,
            slot,
            epoch,
            source,
            buffer: None,
            dirty: false,
            state: TaskState::New,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_queued(&mut self) {
        self.state = TaskState::Queued;
    }

    /// Read the page into a staging buffer. Loader threads only.
    pub fn load(&mut self, staging: &StagingPool, cancel: &CancelToken) {
        self.state = TaskState::Loading;

        if !self.source.is_active() || cancel.is_cancelled() {
            self.state = TaskState::Cancelled;
            return;
        }

        let mut buffer = staging.acquire();
        match self.source.read_page(self.offset, &mut buffer, cancel) {
            Ok(()) => {
                self.buffer = Some(buffer);
                self.dirty = true;
                self.state = TaskState::Ready;
            }
            Err(PagerError::Cancelled) => {
                staging.release(buffer);
                self.state = TaskState::Cancelled;
            }
            Err(e) => {
                log::warn!("[TransferTask] Read of {} failed: {}", self.address, e);
                staging.release(buffer);
                self.state = TaskState::Failed;
            }
        }
    }

    /// Mark cancelled without reading
    pub fn cancel(&mut self) {
        self.state = TaskState::Cancelled;
    }

    /// Copy a dirty buffer into the slot's graphics storage. Consumer only.
    pub fn upload(&mut self, store: &mut dyn PageStore, staging: &StagingPool) -> PagerResult<()> {
        let result = match (&self.buffer, self.dirty) {
            (Some(buffer), true) => store.upload(self.slot, buffer),
            _ => Ok(()),
        };
        self.dirty = false;
        self.recycle(staging);
        result
    }

    /// Return the staging buffer to the pool
    pub fn recycle(&mut self, staging: &StagingPool) {
        if let Some(buffer) = self.buffer.take() {
            staging.release(buffer);
        }
    }
}

impl fmt::Debug for TransferTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferTask")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("offset", &self.offset)
            .field("slot", &self.slot)
            .field("epoch", &self.epoch)
            .field("dirty", &self.dirty)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{CacheParams, FileId, PageIndex};
    use crate::source::MemoryPageSource;
    use crate::streaming::store::HostPageStore;

    fn setup() -> (MemoryPageSource, StagingPool, HostPageStore) {
        let params = CacheParams::new(2, 1, 1);
        let source = MemoryPageSource::new(params);
        source.insert_page(PageIndex(0), vec![5; 4], 0.0, 1.0);
        let store = HostPageStore::new(params, 2).unwrap();
        (source, StagingPool::new(4, 4), store)
    }

    fn task_for(source: &MemoryPageSource, page: u64) -> TransferTask {
        let address = PageAddress::new(FileId::new(0, 0), page);
        let offset = source.page_offset(PageIndex(page)).unwrap_or(page + 1);
        TransferTask::new(1, address, offset, 1, 0, Arc::new(source.clone()))
    }

    #[test]
    fn test_load_then_upload() {
        let (source, staging, mut store) = setup();
        let mut task = task_for(&source, 0);
        assert_eq!(task.state(), TaskState::New);

        task.load(&staging, &CancelToken::never());
        assert_eq!(task.state(), TaskState::Ready);
        assert!(task.is_dirty());

        task.upload(&mut store, &staging).unwrap();
        assert!(!task.is_dirty());
        assert_eq!(store.page_data(1), Some(&[5u8; 4][..]));
        assert_eq!(staging.idle(), 1);
    }

    #[test]
    fn test_failed_read_releases_buffer() {
        let (source, staging, _) = setup();
        source.set_failing(PageIndex(0), true);
        let mut task = task_for(&source, 0);
        task.load(&staging, &CancelToken::never());
        assert_eq!(task.state(), TaskState::Failed);
        assert!(!task.is_dirty());
        assert_eq!(staging.idle(), 1);
    }

    #[test]
    fn test_inactive_source_cancels() {
        let (source, staging, _) = setup();
        let mut task = task_for(&source, 0);
        source.deactivate();
        task.load(&staging, &CancelToken::never());
        assert_eq!(task.state(), TaskState::Cancelled);
        assert_eq!(staging.allocated(), 0);
    }

    #[test]
    fn test_stale_generation_cancels() {
        let (source, staging, _) = setup();
        let mut task = task_for(&source, 0);
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(1));
        task.load(&staging, &CancelToken::for_generation(counter, 0));
        assert_eq!(task.state(), TaskState::Cancelled);
        assert_eq!(source.read_count(), 0);
    }
}
