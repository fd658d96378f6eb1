/// Cache registry
///
/// Binds named page files to shared page caches. Files are reference counted
/// by name; caches are reference counted by the files attached to them and
/// keyed by `CacheParams`, so every file with the same page geometry and
/// format shares one cache.
///
/// The registry lives on the consumer thread. `PageQuery` is the only part of
/// it that may be handed to other threads.

pub mod files;

pub use files::{FileEntry, FileTable};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use parking_lot::RwLock;
use crate::config::PagerConfig;
use crate::constants::registry::{CACHE_NAME, NEUTRAL_BOUND};
use crate::error::PagerResult;
use crate::page::{CacheParams, FileId, PageIndex};
use crate::source::{PageSource, SourceOpener};
use crate::streaming::{CacheOverlay, FrameReport, PageCache, StoreFactory};

struct CacheEntry {
    cache: PageCache,
    uses: usize,
}

/// Thread-safe metadata lookups against the registry's open files
#[derive(Clone)]
pub struct PageQuery {
    files: Arc<RwLock<FileTable>>,
}

impl PageQuery {
    fn source(&self, file: FileId) -> Option<Arc<dyn PageSource>> {
        self.files.read().get(file).map(|e| Arc::clone(&e.source))
    }

    /// Value range of a page; neutral for unknown files and absent pages
    pub fn page_bounds(&self, file: FileId, page: PageIndex) -> (f32, f32) {
        self.source(file)
            .map_or((NEUTRAL_BOUND, NEUTRAL_BOUND), |s| s.page_bounds(page))
    }

    /// Whether a page has data; false for unknown files
    pub fn page_status(&self, file: FileId, page: PageIndex) -> bool {
        self.source(file).map_or(false, |s| s.page_status(page))
    }
}

pub struct CacheRegistry {
    opener: Box<dyn SourceOpener>,
    stores: Box<dyn StoreFactory>,
    config: PagerConfig,
    files: Arc<RwLock<FileTable>>,
    names: HashMap<String, FileId>,
    caches: BTreeMap<CacheParams, CacheEntry>,
    frame: u64,
}

impl CacheRegistry {
    pub fn new(
        opener: impl SourceOpener + 'static,
        stores: impl StoreFactory + 'static,
        config: PagerConfig,
    ) -> PagerResult<Self> {
        config.cache.validate()?;
        Ok(Self {
            opener: Box::new(opener),
            stores: Box::new(stores),
            config,
            files: Arc::new(RwLock::new(FileTable::default())),
            names: HashMap::new(),
            caches: BTreeMap::new(),
            frame: 0,
        })
    }

    /// Open `name`, or take another reference to it if already open
    ///
    /// Returns `FileId::SENTINEL` if the file cannot be opened or its cache
    /// cannot be created.
    pub fn acquire(&mut self, name: &str) -> FileId {
        if let Some(&id) = self.names.get(name) {
            if let Some(entry) = self.files.write().get_mut(id) {
                entry.uses += 1;
                log::debug!("[CacheRegistry] '{}' now has {} users", name, entry.uses);
            }
            return id;
        }

        let source = match self.opener.open(name) {
            Ok(source) => source,
            Err(e) => {
                log::warn!("[CacheRegistry] Cannot open '{}': {}", name, e);
                return FileId::SENTINEL;
            }
        };

        let params = source.params();
        if !self.caches.contains_key(&params) {
            match self.create_cache(params) {
                Ok(cache) => {
                    self.caches.insert(params, CacheEntry { cache, uses: 0 });
                }
                Err(e) => {
                    log::warn!("[CacheRegistry] No cache for '{}' ({}): {}", name, params, e);
                    source.deactivate();
                    return FileId::SENTINEL;
                }
            }
        }

        let id = self.files.write().insert(FileEntry {
            name: name.to_string(),
            source: Arc::clone(&source),
            params,
            uses: 1,
        });
        self.names.insert(name.to_string(), id);

        if let Some(entry) = self.caches.get_mut(&params) {
            entry.cache.attach_source(id, source);
            entry.uses += 1;
        }

        log::info!("[CacheRegistry] Acquired '{}' as {} ({})", name, id, params);
        id
    }

    fn create_cache(&self, params: CacheParams) -> PagerResult<PageCache> {
        let store = self.stores.create(params, self.config.cache.slot_count)?;
        PageCache::new(CACHE_NAME, params, self.config.cache.clone(), store)
    }

    /// Drop one reference to `name`; returns false if it was not open
    ///
    /// The last release deactivates the source and runs one synchronous cycle
    /// on its cache before the source is dropped, so no loader is left reading
    /// from it. The cache goes too once no file uses it.
    pub fn release(&mut self, name: &str) -> bool {
        let Some(&id) = self.names.get(name) else {
            return false;
        };

        let remaining = match self.files.write().get_mut(id) {
            Some(entry) => {
                entry.uses = entry.uses.saturating_sub(1);
                entry.uses
            }
            None => 0,
        };
        if remaining > 0 {
            log::debug!("[CacheRegistry] '{}' still has {} users", name, remaining);
            return true;
        }

        self.names.remove(name);
        let Some(entry) = self.files.write().remove(id) else {
            return true;
        };

        entry.source.deactivate();

        if let Some(cache_entry) = self.caches.get_mut(&entry.params) {
            cache_entry.cache.cycle(true);
            cache_entry.cache.forget_file(id);
            cache_entry.uses = cache_entry.uses.saturating_sub(1);

            if cache_entry.uses == 0 {
                if let Some(retired) = self.caches.remove(&entry.params) {
                    log::info!("[CacheRegistry] Destroying cache for {}", entry.params);
                    drop(retired);
                }
            }
        }

        log::info!("[CacheRegistry] Released '{}'", name);
        drop(entry);
        true
    }

    /// End the current frame on every cache, then advance the frame counter
    pub fn update_caches(&mut self) -> FrameReport {
        let synchronous = self.config.synchronous;
        let mut report = FrameReport::default();
        for entry in self.caches.values() {
            report += entry.cache.update(self.frame, synchronous);
        }
        self.frame += 1;
        report
    }

    /// Overlays for every cache, in cache parameter order
    pub fn render_caches(&self) -> Vec<CacheOverlay> {
        let total = self.caches.len();
        self.caches
            .values()
            .enumerate()
            .map(|(index, entry)| entry.cache.render(index, total))
            .collect()
    }

    pub fn flush_caches(&self) {
        for entry in self.caches.values() {
            entry.cache.flush();
        }
    }

    pub fn set_synchronous(&mut self, synchronous: bool) {
        self.config.synchronous = synchronous;
    }

    pub fn synchronous(&self) -> bool {
        self.config.synchronous
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    pub fn cache_for(&self, file: FileId) -> Option<&PageCache> {
        let params = self.files.read().get(file)?.params;
        self.caches.get(&params).map(|entry| &entry.cache)
    }

    pub fn source_for(&self, file: FileId) -> Option<Arc<dyn PageSource>> {
        self.files.read().get(file).map(|e| Arc::clone(&e.source))
    }

    pub fn file_id(&self, name: &str) -> Option<FileId> {
        self.names.get(name).copied()
    }

    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }

    pub fn file_count(&self) -> usize {
        self.names.len()
    }

    /// References held on a file name; zero if not open
    pub fn uses(&self, name: &str) -> usize {
        self.names
            .get(name)
            .and_then(|&id| self.files.read().get(id).map(|e| e.uses))
            .unwrap_or(0)
    }

    /// Files attached to the cache for `params`
    pub fn cache_uses(&self, params: CacheParams) -> usize {
        self.caches.get(&params).map_or(0, |entry| entry.uses)
    }

    pub fn query(&self) -> PageQuery {
        PageQuery {
            files: Arc::clone(&self.files),
        }
    }
}

impl Drop for CacheRegistry {
    fn drop(&mut self) {
        // Let loaders blocked in long reads return before the caches join them.
        for entry in self.files.read().entries() {
            entry.source.deactivate();
        }
        log::debug!(
            "[CacheRegistry] Shutting down {} caches and {} files",
            self.caches.len(),
            self.names.len()
        );
    }
}
