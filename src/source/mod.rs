/// Page sources
///
/// A page source is the read side of one backing file: it knows where each
/// page lives, copies raw page bytes into a caller buffer, and answers
/// presence and value-range queries. The cache never interprets page bytes.
///
/// Sources are shared between the consumer thread and the loader threads, so
/// every implementation must tolerate concurrent reads of distinct pages.
/// Shutdown is cooperative: `deactivate` flips a flag that long reads check
/// between chunks, returning `PagerError::Cancelled`.

pub mod file;
pub mod memory;

pub use file::{FilePageSource, FilePageWriter, FileSourceOpener, PageFileHeader, PageTableRecord};
pub use memory::{MemoryPageSource, MemorySourceOpener};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use crate::error::PagerResult;
use crate::page::{CacheParams, PageIndex};

pub trait PageSource: Send + Sync {
    /// Geometry and format of every page in this source
    fn params(&self) -> CacheParams;

    /// Location of a page's bytes, or `None` if the page is absent
    fn page_offset(&self, page: PageIndex) -> Option<u64>;

    /// Fill `buffer` with the page stored at `offset`
    ///
    /// `buffer.len()` equals `params().page_bytes()`. Long reads check
    /// `cancel` as well as their own activation flag between chunks and
    /// return `PagerError::Cancelled` once either says stop.
    fn read_page(&self, offset: u64, buffer: &mut [u8], cancel: &CancelToken) -> PagerResult<()>;

    /// Minimum and maximum sample value of a page
    fn page_bounds(&self, page: PageIndex) -> (f32, f32);

    /// Whether the page has data in this source
    fn page_status(&self, page: PageIndex) -> bool;

    /// Ask in-progress and future reads to stop early
    fn deactivate(&self);

    fn is_active(&self) -> bool;
}

/// Opens page sources by name
pub trait SourceOpener: Send + Sync {
    fn open(&self, name: &str) -> PagerResult<Arc<dyn PageSource>>;
}

impl<F> SourceOpener for F
where
    F: Fn(&str) -> PagerResult<Arc<dyn PageSource>> + Send + Sync,
{
    fn open(&self, name: &str) -> PagerResult<Arc<dyn PageSource>> {
        self(name)
    }
}

/// Stop signal handed to a read by whoever scheduled it
///
/// Issued against a shared generation counter; the token is cancelled as
/// soon as the counter moves past the generation it was issued for.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    generation: Option<(Arc<AtomicU64>, u64)>,
}

impl CancelToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        Self::default()
    }

    pub fn for_generation(counter: Arc<AtomicU64>, generation: u64) -> Self {
        Self {
            generation: Some((counter, generation)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.generation
            .as_ref()
            .map_or(false, |(counter, generation)| {
                counter.load(Ordering::Acquire) != *generation
            })
    }
}

/// Activation flag shared by the source implementations
#[derive(Debug)]
pub struct ActiveFlag(AtomicBool);

impl ActiveFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn deactivate(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for ActiveFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_follows_generation() {
        let counter = Arc::new(AtomicU64::new(3));
        let token = CancelToken::for_generation(Arc::clone(&counter), 3);
        assert!(!token.is_cancelled());

        counter.fetch_add(1, Ordering::AcqRel);
        assert!(token.is_cancelled());
        assert!(!CancelToken::never().is_cancelled());
    }
}
