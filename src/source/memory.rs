/// In-memory page source
///
/// Holds page bytes in host memory. Per-page read delays and failures can be
/// injected at any time, which makes this source the workhorse for driving
/// the cache headless (demo binary, tests). Clones share pages and injected
/// faults and the activation flag; `reopen` shares pages and faults under a
/// fresh flag, so an opener can hand out a new source per acquisition.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::{Mutex, RwLock};
use crate::constants::registry::NEUTRAL_BOUND;
use crate::error::{read_failure, source_unavailable, PagerError, PagerResult};
use crate::page::{CacheParams, PageIndex};
use super::{ActiveFlag, CancelToken, PageSource, SourceOpener};

/// Sleep granularity while simulating a slow read
const DELAY_SLICE: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
struct MemoryPage {
    data: Arc<Vec<u8>>,
    bounds: (f32, f32),
}

#[derive(Debug, Default)]
struct Faults {
    delays: HashMap<PageIndex, Duration>,
    failing: HashSet<PageIndex>,
}

#[derive(Debug, Default)]
struct ReadCounters {
    total: AtomicUsize,
    in_progress: Mutex<HashMap<PageIndex, usize>>,
    max_same_page: AtomicUsize,
}

#[derive(Clone)]
pub struct MemoryPageSource {
    params: CacheParams,
    pages: Arc<RwLock<HashMap<PageIndex, MemoryPage>>>,
    faults: Arc<RwLock<Faults>>,
    counters: Arc<ReadCounters>,
    active: Arc<ActiveFlag>,
}

impl MemoryPageSource {
    pub fn new(params: CacheParams) -> Self {
        Self {
            params,
            pages: Arc::new(RwLock::new(HashMap::new())),
            faults: Arc::new(RwLock::new(Faults::default())),
            counters: Arc::new(ReadCounters::default()),
            active: Arc::new(ActiveFlag::new()),
        }
    }

    /// Source whose every page up to `depth` is filled with a byte derived from
    /// its index
    pub fn filled(params: CacheParams, depth: u32) -> Self {
        let source = Self::new(params);
        let count = crate::page::index::pages_at_depth(depth) * 4 / 3 + 2;
        for i in 0..count {
            let page = PageIndex(i);
            if page.depth() <= depth {
                source.insert_page(page, vec![(i % 251) as u8; params.page_bytes()], 0.0, 1.0);
            }
        }
        source
    }

    /// Shared pages and faults, fresh activation flag
    pub fn reopen(&self) -> Self {
        Self {
            active: Arc::new(ActiveFlag::new()),
            ..self.clone()
        }
    }

    pub fn insert_page(&self, page: PageIndex, data: Vec<u8>, min: f32, max: f32) {
        debug_assert_eq!(data.len(), self.params.page_bytes());
        self.pages.write().insert(
            page,
            MemoryPage {
                data: Arc::new(data),
                bounds: (min, max),
            },
        );
    }

    pub fn set_delay(&self, page: PageIndex, delay: Duration) {
        self.faults.write().delays.insert(page, delay);
    }

    pub fn clear_delay(&self, page: PageIndex) {
        self.faults.write().delays.remove(&page);
    }

    pub fn set_failing(&self, page: PageIndex, failing: bool) {
        let mut faults = self.faults.write();
        if failing {
            faults.failing.insert(page);
        } else {
            faults.failing.remove(&page);
        }
    }

    /// Reads attempted so far, across all clones
    pub fn read_count(&self) -> usize {
        self.counters.total.load(Ordering::Acquire)
    }

    /// Highest number of simultaneous reads ever observed for a single page
    pub fn max_concurrent_reads_per_page(&self) -> usize {
        self.counters.max_same_page.load(Ordering::Acquire)
    }

    // Offsets are page index + 1 so that zero never names a page.
    fn offset_page(offset: u64) -> PageIndex {
        PageIndex(offset - 1)
    }

    fn wait_out_delay(&self, delay: Duration, cancel: &CancelToken) -> PagerResult<()> {
        let deadline = Instant::now() + delay;
        loop {
            if !self.active.is_active() || cancel.is_cancelled() {
                return Err(PagerError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(DELAY_SLICE.min(deadline - now));
        }
    }

    fn begin_read(&self, page: PageIndex) {
        self.counters.total.fetch_add(1, Ordering::AcqRel);
        let mut in_progress = self.counters.in_progress.lock();
        let count = in_progress.entry(page).or_insert(0);
        *count += 1;
        self.counters.max_same_page.fetch_max(*count, Ordering::AcqRel);
    }

    fn end_read(&self, page: PageIndex) {
        let mut in_progress = self.counters.in_progress.lock();
        if let Some(count) = in_progress.get_mut(&page) {
            *count -= 1;
            if *count == 0 {
                in_progress.remove(&page);
            }
        }
    }

    fn read_inner(&self, page: PageIndex, buffer: &mut [u8], cancel: &CancelToken) -> PagerResult<()> {
        let (delay, failing) = {
            let faults = self.faults.read();
            (faults.delays.get(&page).copied(), faults.failing.contains(&page))
        };
        if let Some(delay) = delay {
            self.wait_out_delay(delay, cancel)?;
        }
        if !self.active.is_active() || cancel.is_cancelled() {
            return Err(PagerError::Cancelled);
        }
        if failing {
            return Err(read_failure(page, "injected failure"));
        }

        let data = self
            .pages
            .read()
            .get(&page)
            .map(|p| Arc::clone(&p.data))
            .ok_or_else(|| read_failure(page, "no such page"))?;
        if data.len() != buffer.len() {
            return Err(read_failure(
                page,
                format!("stored {} bytes, buffer holds {}", data.len(), buffer.len()),
            ));
        }
        buffer.copy_from_slice(&data);
        Ok(())
    }
}

impl PageSource for MemoryPageSource {
    fn params(&self) -> CacheParams {
        self.params
    }

    fn page_offset(&self, page: PageIndex) -> Option<u64> {
        self.pages.read().contains_key(&page).then(|| page.0 + 1)
    }

    fn read_page(&self, offset: u64, buffer: &mut [u8], cancel: &CancelToken) -> PagerResult<()> {
        if offset == 0 {
            return Err(PagerError::InvalidGeometry {
                reason: "offset zero".to_string(),
            });
        }
        let page = Self::offset_page(offset);
        self.begin_read(page);
        let result = self.read_inner(page, buffer, cancel);
        self.end_read(page);
        result
    }

    fn page_bounds(&self, page: PageIndex) -> (f32, f32) {
        self.pages
            .read()
            .get(&page)
            .map(|p| p.bounds)
            .unwrap_or((NEUTRAL_BOUND, NEUTRAL_BOUND))
    }

    fn page_status(&self, page: PageIndex) -> bool {
        self.pages.read().contains_key(&page)
    }

    fn deactivate(&self) {
        self.active.deactivate();
    }

    fn is_active(&self) -> bool {
        self.active.is_active()
    }
}

/// Opener over a set of named in-memory sources
#[derive(Default)]
pub struct MemorySourceOpener {
    sources: RwLock<HashMap<String, MemoryPageSource>>,
    opens: AtomicUsize,
}

impl MemorySourceOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, source: MemoryPageSource) {
        self.sources.write().insert(name.to_string(), source);
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }
}

impl SourceOpener for MemorySourceOpener {
    fn open(&self, name: &str) -> PagerResult<Arc<dyn PageSource>> {
        let source = self
            .sources
            .read()
            .get(name)
            .map(MemoryPageSource::reopen)
            .ok_or_else(|| source_unavailable(name, "no such in-memory source"))?;
        self.opens.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CacheParams {
        CacheParams::new(2, 1, 1)
    }

    #[test]
    fn test_read_round_trip() {
        let source = MemoryPageSource::new(params());
        source.insert_page(PageIndex(3), vec![1, 2, 3, 4], 0.0, 4.0);

        let offset = source.page_offset(PageIndex(3)).unwrap();
        let mut buffer = vec![0; 4];
        source.read_page(offset, &mut buffer, &CancelToken::never()).unwrap();
        assert_eq!(buffer, vec![1, 2, 3, 4]);
        assert_eq!(source.page_bounds(PageIndex(3)), (0.0, 4.0));
        assert_eq!(source.read_count(), 1);
        assert!(source.page_offset(PageIndex(4)).is_none());
    }

    #[test]
    fn test_injected_failure_and_recovery() {
        let source = MemoryPageSource::new(params());
        source.insert_page(PageIndex(0), vec![0; 4], 0.0, 0.0);
        source.set_failing(PageIndex(0), true);

        let mut buffer = vec![0; 4];
        let offset = source.page_offset(PageIndex(0)).unwrap();
        assert!(matches!(
            source.read_page(offset, &mut buffer, &CancelToken::never()),
            Err(PagerError::ReadFailure { .. })
        ));

        source.set_failing(PageIndex(0), false);
        assert!(source.read_page(offset, &mut buffer, &CancelToken::never()).is_ok());
    }

    #[test]
    fn test_deactivate_interrupts_delay() {
        let source = MemoryPageSource::new(params());
        source.insert_page(PageIndex(0), vec![0; 4], 0.0, 0.0);
        source.set_delay(PageIndex(0), Duration::from_secs(10));

        let reader = source.clone();
        let handle = std::thread::spawn(move || {
            let mut buffer = vec![0; 4];
            reader.read_page(1, &mut buffer, &CancelToken::never())
        });

        std::thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        source.deactivate();
        let result = handle.join().unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_cancel_token_interrupts_delay() {
        let source = MemoryPageSource::new(params());
        source.insert_page(PageIndex(0), vec![0; 4], 0.0, 0.0);
        source.set_delay(PageIndex(0), Duration::from_secs(10));

        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let token = CancelToken::for_generation(Arc::clone(&counter), 0);
        let reader = source.clone();
        let handle = std::thread::spawn(move || {
            let mut buffer = vec![0; 4];
            reader.read_page(1, &mut buffer, &token)
        });

        std::thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        counter.fetch_add(1, Ordering::AcqRel);
        let result = handle.join().unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(source.is_active());
    }

    #[test]
    fn test_clones_share_activation() {
        let source = MemoryPageSource::new(params());
        let clone = source.clone();
        clone.deactivate();
        assert!(!source.is_active());
    }

    #[test]
    fn test_reopen_has_fresh_activation() {
        let source = MemoryPageSource::filled(params(), 1);
        source.deactivate();
        let reopened = source.reopen();
        assert!(reopened.is_active());
        assert!(reopened.page_status(PageIndex(29)));
        assert!(!reopened.page_status(PageIndex(30)));
    }

    #[test]
    fn test_opener_counts_and_rejects_unknown() {
        let opener = MemorySourceOpener::new();
        opener.insert("earth", MemoryPageSource::new(params()));
        assert!(opener.open("earth").is_ok());
        assert!(opener.open("mars").is_err());
        assert_eq!(opener.open_count(), 1);
    }
}
