/// Streaming page cache engine
///
/// A fixed table of slots holds the pages most recently needed by the
/// renderer. Misses become transfer tasks that a loader pool reads in the
/// background; `update`, called once per frame on the consumer thread,
/// uploads finished pages and hands more work to the loaders.
///
/// Threading model:
/// - One consumer thread owns the page store and calls every method here.
/// - Loader threads only see `LoaderShared` and the completion channel.
/// - The slot table and pending queue live behind one coarse mutex; every
///   operation under it is O(1) or O(log n).
///
/// Frames: `update(n, ..)` ends frame `n`. Touches and requests made after it
/// are stamped `n + 1`, and a slot is only evictable once its last touch is
/// older than the current stamp.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use crate::config::CacheConfig;
use crate::error::{PagerError, PagerResult};
use crate::page::{CacheParams, FileId, PageAddress};
use crate::source::PageSource;
use super::loader::{LoaderPool, LoaderShared};
use super::overlay::{CacheOverlay, SlotCell};
use super::staging::StagingPool;
use super::store::{BindTarget, HostPageStore, PageStore};
use super::task::{TaskState, TransferTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Loading,
    Ready,
    Failed,
}

/// Outcome of `PageCache::request`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Uploaded and ready to bind
    Resident,

    /// Queued or being read
    Pending,

    /// Not resident and not admitted: unknown file, absent page, or every
    /// slot is pinned by the current frame
    Miss,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    address: Option<PageAddress>,
    state: SlotState,
    last_touch: u64,
    task: Option<u64>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            address: None,
            state: SlotState::Empty,
            last_touch: 0,
            task: None,
        }
    }
}

/// Pending task ordered by priority, then by arrival
struct PendingTask {
    priority: f32,
    seq: u64,
    task: TransferTask,
}

impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for PendingTask {}

/// Snapshot of cache occupancy and lifetime counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity: usize,
    pub resident: usize,
    pub loading: usize,
    pub failed: usize,

    /// Tasks waiting for dispatch
    pub pending: usize,

    /// Tasks handed to the loaders and not yet returned
    pub in_flight: usize,

    pub uploads: u64,
    pub evictions: u64,
    pub failures: u64,
}

/// What one `update` call did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub dispatched: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl std::ops::AddAssign for FrameReport {
    fn add_assign(&mut self, other: Self) {
        self.dispatched += other.dispatched;
        self.uploaded += other.uploaded;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

struct CacheState {
    slots: Vec<Slot>,
    lookup: HashMap<PageAddress, usize>,

    /// Empty slots, reused before anything is evicted
    free: Vec<usize>,

    /// Evictable slots (ready or failed) by (last touch, address)
    recency: BTreeSet<(u64, PageAddress, usize)>,

    pending: BinaryHeap<PendingTask>,
    in_flight: HashMap<u64, PageAddress>,
    sources: HashMap<FileId, Arc<dyn PageSource>>,
    store: Box<dyn PageStore>,

    frame: u64,
    next_task: u64,
    uploads: u64,
    evictions: u64,
    failures: u64,
}

impl CacheState {
    fn recency_key(&self, slot: usize) -> Option<(u64, PageAddress, usize)> {
        let s = &self.slots[slot];
        match (s.state, s.address) {
            (SlotState::Ready | SlotState::Failed, Some(address)) => {
                Some((s.last_touch, address, slot))
            }
            _ => None,
        }
    }

    /// Modify a slot, keeping the recency index in step
    fn update_slot(&mut self, slot: usize, f: impl FnOnce(&mut Slot)) {
        if let Some(key) = self.recency_key(slot) {
            self.recency.remove(&key);
        }
        f(&mut self.slots[slot]);
        if let Some(key) = self.recency_key(slot) {
            self.recency.insert(key);
        }
    }

    fn free_slot(&mut self, slot: usize) {
        if let Some(address) = self.slots[slot].address {
            self.lookup.remove(&address);
        }
        self.update_slot(slot, |s| *s = Slot::empty());
        self.store.release(slot);
        self.free.push(slot);
    }

    /// An empty slot, or the least recently touched evictable one
    fn claim_slot(&mut self) -> Option<usize> {
        if let Some(slot) = self.free.pop() {
            return Some(slot);
        }

        let &(last_touch, address, slot) = self.recency.iter().next()?;
        if last_touch >= self.frame {
            return None;
        }

        log::debug!(
            "[PageCache] Evicting {} from slot {} (last touched {})",
            address,
            slot,
            last_touch
        );
        self.free_slot(slot);
        self.evictions += 1;
        self.free.pop()
    }

    fn locate(&self, address: PageAddress) -> Option<(Arc<dyn PageSource>, u64)> {
        let source = self.sources.get(&address.file)?;
        let offset = source.page_offset(address.page)?;
        Some((Arc::clone(source), offset))
    }

    fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }
}

pub struct PageCache {
    name: String,
    params: CacheParams,
    config: CacheConfig,
    state: Mutex<CacheState>,
    shared: Arc<LoaderShared>,
    completed: Receiver<TransferTask>,
    loaders: LoaderPool,
}

impl PageCache {
    /// Build a cache over `store`, which must have `config.slot_count` slots
    pub fn new(
        name: &str,
        params: CacheParams,
        config: CacheConfig,
        store: Box<dyn PageStore>,
    ) -> PagerResult<Self> {
        config.validate()?;
        if !params.is_valid() {
            return Err(PagerError::InvalidGeometry {
                reason: format!("cache parameters {}", params),
            });
        }
        if store.slot_count() != config.slot_count || store.params() != params {
            return Err(PagerError::AllocationFailed {
                slots: config.slot_count,
                reason: format!(
                    "store holds {} slots of {}",
                    store.slot_count(),
                    store.params()
                ),
            });
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(config.slot_count)
            .map_err(|e| PagerError::AllocationFailed {
                slots: config.slot_count,
                reason: e.to_string(),
            })?;
        slots.resize(config.slot_count, Slot::empty());

        let shared = Arc::new(LoaderShared::new(StagingPool::new(
            params.page_bytes(),
            config.staging_pool_limit,
        )));
        let (completed_tx, completed) = unbounded();
        let loaders = LoaderPool::spawn(
            name,
            config.loader_threads,
            Arc::clone(&shared),
            completed_tx,
        )?;

        log::info!(
            "[PageCache] Created '{}' for {} with {} slots and {} loaders",
            name,
            params,
            config.slot_count,
            config.loader_threads
        );

        Ok(Self {
            name: name.to_string(),
            params,
            state: Mutex::new(CacheState {
                free: (0..config.slot_count).rev().collect(),
                slots,
                lookup: HashMap::new(),
                recency: BTreeSet::new(),
                pending: BinaryHeap::new(),
                in_flight: HashMap::new(),
                sources: HashMap::new(),
                store,
                frame: 0,
                next_task: 0,
                uploads: 0,
                evictions: 0,
                failures: 0,
            }),
            config,
            shared,
            completed,
            loaders,
        })
    }

    /// Cache backed by host memory
    pub fn with_host_store(name: &str, params: CacheParams, config: CacheConfig) -> PagerResult<Self> {
        let store = HostPageStore::new(params, config.slot_count)?;
        Self::new(name, params, config, Box::new(store))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> CacheParams {
        self.params
    }

    pub fn capacity(&self) -> usize {
        self.config.slot_count
    }

    pub fn loader_count(&self) -> usize {
        self.loaders.len()
    }

    /// Stamp applied to touches made now
    pub fn frame(&self) -> u64 {
        self.state.lock().frame
    }

    /// Make a file's pages loadable through this cache
    pub fn attach_source(&self, file: FileId, source: Arc<dyn PageSource>) {
        debug_assert_eq!(source.params(), self.params);
        self.state.lock().sources.insert(file, source);
    }

    pub fn has_source(&self, file: FileId) -> bool {
        self.state.lock().sources.contains_key(&file)
    }

    /// Look up a page, admitting it for loading on a miss
    pub fn request(&self, address: PageAddress, priority: f32) -> RequestStatus {
        let mut state = self.state.lock();
        let frame = state.frame;

        if let Some(&slot) = state.lookup.get(&address) {
            state.update_slot(slot, |s| s.last_touch = frame);
            let slot_state = state.slots[slot].state;
            return match slot_state {
                SlotState::Ready => RequestStatus::Resident,
                SlotState::Loading => RequestStatus::Pending,
                SlotState::Failed => match state.locate(address) {
                    Some((source, offset)) => {
                        log::debug!("[PageCache] Retrying {}", address);
                        self.enqueue(&mut state, address, slot, source, offset, priority)
                    }
                    None => RequestStatus::Miss,
                },
                SlotState::Empty => RequestStatus::Miss,
            };
        }

        let Some((source, offset)) = state.locate(address) else {
            return RequestStatus::Miss;
        };
        let Some(slot) = state.claim_slot() else {
            log::trace!("[PageCache] No evictable slot for {}", address);
            return RequestStatus::Miss;
        };

        state.lookup.insert(address, slot);
        state.update_slot(slot, |s| {
            s.address = Some(address);
            s.last_touch = frame;
        });
        self.enqueue(&mut state, address, slot, source, offset, priority)
    }

    fn enqueue(
        &self,
        state: &mut CacheState,
        address: PageAddress,
        slot: usize,
        source: Arc<dyn PageSource>,
        offset: u64,
        priority: f32,
    ) -> RequestStatus {
        let id = state.next_task;
        state.next_task += 1;

        let task = TransferTask::new(id, address, offset, slot, self.shared.epoch(), source);
        state.update_slot(slot, |s| {
            s.state = SlotState::Loading;
            s.task = Some(id);
        });
        state.pending.push(PendingTask {
            priority,
            seq: id,
            task,
        });

        log::debug!(
            "[PageCache] Queued {} into slot {} (priority {})",
            address,
            slot,
            priority
        );
        RequestStatus::Pending
    }

    /// Mark a page as needed this frame
    pub fn touch(&self, address: PageAddress) {
        let mut state = self.state.lock();
        let frame = state.frame;
        if let Some(&slot) = state.lookup.get(&address) {
            state.update_slot(slot, |s| s.last_touch = frame);
        }
    }

    /// End frame `frame_id`: upload finished pages and dispatch queued ones
    ///
    /// With `synchronous` set, blocks until every task dispatched by this call
    /// has been read (or has failed) and uploaded.
    pub fn update(&self, frame_id: u64, synchronous: bool) -> FrameReport {
        let started = Instant::now();
        let report = self.cycle(synchronous);

        let mut state = self.state.lock();
        state.frame = state.frame.max(frame_id + 1);

        if report != FrameReport::default() {
            log::trace!(
                "[PageCache] '{}' frame {}: {:?} in {:?}",
                self.name,
                frame_id,
                report,
                started.elapsed()
            );
        }
        report
    }

    /// Upload finished pages and dispatch queued ones without ending the frame
    ///
    /// Pages touched in the current frame stay pinned across the call.
    pub fn cycle(&self, synchronous: bool) -> FrameReport {
        let mut report = FrameReport::default();
        let mut waiting = HashSet::new();

        {
            let mut state = self.state.lock();
            while let Ok(task) = self.completed.try_recv() {
                self.finish(&mut state, task, &mut report);
            }

            while state.in_flight.len() < self.config.max_in_flight {
                let Some(PendingTask { task, .. }) = state.pending.pop() else {
                    break;
                };
                state.in_flight.insert(task.id, task.address);
                waiting.insert(task.id);
                self.shared.push(task);
                report.dispatched += 1;
            }
        }

        if synchronous {
            while !waiting.is_empty() {
                let Ok(task) = self.completed.recv() else {
                    break;
                };
                waiting.remove(&task.id);
                let mut state = self.state.lock();
                self.finish(&mut state, task, &mut report);
            }
        }
        report
    }

    /// Take back a task from the loaders and apply its result
    fn finish(&self, state: &mut CacheState, mut task: TransferTask, report: &mut FrameReport) {
        state.in_flight.remove(&task.id);
        let staging = &self.shared.staging;

        let current = task.epoch == self.shared.epoch()
            && state.slots.get(task.slot).and_then(|s| s.task) == Some(task.id);
        if !current {
            task.recycle(staging);
            return;
        }

        match task.state() {
            TaskState::Ready => match task.upload(state.store.as_mut(), staging) {
                Ok(()) => {
                    state.update_slot(task.slot, |s| {
                        s.state = SlotState::Ready;
                        s.task = None;
                    });
                    state.uploads += 1;
                    report.uploaded += 1;
                    log::debug!("[PageCache] Uploaded {} to slot {}", task.address, task.slot);
                }
                Err(e) => {
                    log::warn!("[PageCache] Upload of {} failed: {}", task.address, e);
                    self.mark_failed(state, task.slot, report);
                }
            },
            TaskState::Failed => {
                task.recycle(staging);
                self.mark_failed(state, task.slot, report);
            }
            _ => {
                task.recycle(staging);
                state.free_slot(task.slot);
                report.cancelled += 1;
            }
        }
    }

    fn mark_failed(&self, state: &mut CacheState, slot: usize, report: &mut FrameReport) {
        state.update_slot(slot, |s| {
            s.state = SlotState::Failed;
            s.task = None;
        });
        state.failures += 1;
        report.failed += 1;
    }

    /// Receive tasks until none from `file` (or none at all) remain with the loaders
    fn wait_in_flight(&self, file: Option<FileId>) {
        let mut report = FrameReport::default();
        loop {
            {
                let state = self.state.lock();
                let outstanding = state
                    .in_flight
                    .values()
                    .any(|address| file.map_or(true, |f| address.file == f));
                if !outstanding {
                    break;
                }
            }
            let Ok(task) = self.completed.recv() else {
                break;
            };
            let mut state = self.state.lock();
            self.finish(&mut state, task, &mut report);
        }
    }

    /// Cancel all outstanding work and empty every slot
    pub fn flush(&self) {
        {
            let mut state = self.state.lock();
            self.shared.advance_epoch();

            for mut task in self.shared.take_queued(None) {
                state.in_flight.remove(&task.id);
                task.recycle(&self.shared.staging);
            }
            state.pending.clear();

            for slot in 0..state.slots.len() {
                if state.slots[slot].address.is_some() {
                    state.free_slot(slot);
                }
            }
            state.free = (0..state.slots.len()).rev().collect();
            state.store.unbind();
        }

        self.wait_in_flight(None);
        log::debug!("[PageCache] '{}' flushed", self.name);
    }

    /// Drop everything belonging to a file that is about to close
    ///
    /// Queued tasks are discarded, tasks already with the loaders are waited
    /// for, and the file's slots are freed.
    pub fn forget_file(&self, file: FileId) {
        {
            let mut state = self.state.lock();
            for mut task in self.shared.take_queued(Some(file)) {
                state.in_flight.remove(&task.id);
                task.recycle(&self.shared.staging);
            }
            state.pending.retain(|p| p.task.address.file != file);
            state.sources.remove(&file);
        }

        self.wait_in_flight(Some(file));

        let mut state = self.state.lock();
        let owned: Vec<usize> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.address.map_or(false, |a| a.file == file))
            .map(|(i, _)| i)
            .collect();
        for slot in &owned {
            state.free_slot(*slot);
        }
        log::debug!(
            "[PageCache] '{}' released {} slots of {}",
            self.name,
            owned.len(),
            file
        );
    }

    pub fn status(&self, address: PageAddress) -> SlotState {
        let state = self.state.lock();
        state
            .lookup
            .get(&address)
            .map_or(SlotState::Empty, |&slot| state.slots[slot].state)
    }

    pub fn is_resident(&self, address: PageAddress) -> bool {
        self.status(address) == SlotState::Ready
    }

    /// The page itself if resident, else its nearest resident ancestor
    pub fn resolve(&self, address: PageAddress) -> Option<(PageAddress, usize)> {
        let state = self.state.lock();
        std::iter::once(address.page)
            .chain(address.page.ancestors())
            .map(|page| PageAddress { file: address.file, page })
            .find_map(|candidate| {
                let &slot = state.lookup.get(&candidate)?;
                (state.slots[slot].state == SlotState::Ready).then_some((candidate, slot))
            })
    }

    /// Select a resident page's storage for drawing
    pub fn bind(&self, address: PageAddress) -> Option<BindTarget> {
        let mut state = self.state.lock();
        let &slot = state.lookup.get(&address)?;
        if state.slots[slot].state != SlotState::Ready {
            return None;
        }
        Some(state.store.bind(slot))
    }

    pub fn unbind(&self) {
        self.state.lock().store.unbind();
    }

    /// Slot currently bound for drawing
    pub fn bound_slot(&self) -> Option<usize> {
        self.state.lock().store.bound()
    }

    /// Slot occupancy for the debug overlay; does not change any state
    pub fn render(&self, index: usize, total: usize) -> CacheOverlay {
        let total = total.max(2);
        let state = self.state.lock();
        let frame = state.frame;

        CacheOverlay {
            index,
            total,
            x0: index as f32 / total as f32,
            x1: (index + 1) as f32 / total as f32,
            frame,
            cells: state
                .slots
                .iter()
                .map(|s| SlotCell {
                    address: s.address,
                    state: s.state,
                    age: frame.saturating_sub(s.last_touch),
                })
                .collect(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            capacity: state.slots.len(),
            resident: state.count(SlotState::Ready),
            loading: state.count(SlotState::Loading),
            failed: state.count(SlotState::Failed),
            pending: state.pending.len(),
            in_flight: state.in_flight.len(),
            uploads: state.uploads,
            evictions: state.evictions,
            failures: state.failures,
        }
    }

    /// Addresses of every resident page, in address order
    pub fn resident_pages(&self) -> Vec<PageAddress> {
        let state = self.state.lock();
        let mut pages: Vec<_> = state
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Ready)
            .filter_map(|s| s.address)
            .collect();
        pages.sort();
        pages
    }
}

impl Drop for PageCache {
    fn drop(&mut self) {
        log::info!("[PageCache] Destroying '{}'", self.name);
    }
}
