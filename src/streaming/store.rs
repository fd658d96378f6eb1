/// Graphics-side page storage
///
/// A store owns the resident copy of every cache slot. It is created and used
/// only on the consumer thread; loader threads never see it. Slot `i` of a
/// cache always maps to storage location `i` of its store.

use crate::error::{PagerError, PagerResult};
use crate::page::CacheParams;

/// What the draw code needs to sample a bound page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindTarget {
    pub slot: usize,

    /// Texture array layer holding the page
    pub layer: u32,
}

pub trait PageStore: Send {
    fn params(&self) -> CacheParams;

    fn slot_count(&self) -> usize;

    /// Replace the contents of a slot with one page of bytes
    fn upload(&mut self, slot: usize, data: &[u8]) -> PagerResult<()>;

    /// Forget a slot's contents; the storage itself is kept for reuse
    fn release(&mut self, slot: usize);

    fn bind(&mut self, slot: usize) -> BindTarget;

    fn unbind(&mut self);

    fn bound(&self) -> Option<usize>;
}

/// Creates stores for caches the registry builds on demand
pub trait StoreFactory: Send + Sync {
    fn create(&self, params: CacheParams, slots: usize) -> PagerResult<Box<dyn PageStore>>;
}

/// Host-memory store for headless use
pub struct HostPageStore {
    params: CacheParams,
    slots: usize,
    data: Vec<u8>,
    valid: Vec<bool>,
    bound: Option<usize>,
    uploads: u64,
}

impl HostPageStore {
    pub fn new(params: CacheParams, slots: usize) -> PagerResult<Self> {
        let bytes = params
            .page_bytes()
            .checked_mul(slots)
            .ok_or_else(|| PagerError::AllocationFailed {
                slots,
                reason: "size overflow".to_string(),
            })?;

        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|e| PagerError::AllocationFailed {
                slots,
                reason: e.to_string(),
            })?;
        data.resize(bytes, 0);

        Ok(Self {
            params,
            slots,
            data,
            valid: vec![false; slots],
            bound: None,
            uploads: 0,
        })
    }

    fn range(&self, slot: usize) -> std::ops::Range<usize> {
        let size = self.params.page_bytes();
        slot * size..(slot + 1) * size
    }

    /// Contents of a slot, if something has been uploaded since its release
    pub fn page_data(&self, slot: usize) -> Option<&[u8]> {
        if *self.valid.get(slot)? {
            Some(&self.data[self.range(slot)])
        } else {
            None
        }
    }

    pub fn upload_count(&self) -> u64 {
        self.uploads
    }
}

impl PageStore for HostPageStore {
    fn params(&self) -> CacheParams {
        self.params
    }

    fn slot_count(&self) -> usize {
        self.slots
    }

    fn upload(&mut self, slot: usize, data: &[u8]) -> PagerResult<()> {
        if slot >= self.slots || data.len() != self.params.page_bytes() {
            return Err(PagerError::InvalidGeometry {
                reason: format!(
                    "upload of {} bytes to slot {} of {}",
                    data.len(),
                    slot,
                    self.slots
                ),
            });
        }
        let range = self.range(slot);
        self.data[range].copy_from_slice(data);
        self.valid[slot] = true;
        self.uploads += 1;
        Ok(())
    }

    fn release(&mut self, slot: usize) {
        if let Some(valid) = self.valid.get_mut(slot) {
            *valid = false;
        }
        if self.bound == Some(slot) {
            self.bound = None;
        }
    }

    fn bind(&mut self, slot: usize) -> BindTarget {
        self.bound = Some(slot);
        BindTarget {
            slot,
            layer: slot as u32,
        }
    }

    fn unbind(&mut self) {
        self.bound = None;
    }

    fn bound(&self) -> Option<usize> {
        self.bound
    }
}

/// Factory for `HostPageStore`
#[derive(Debug, Clone, Copy, Default)]
pub struct HostStoreFactory;

impl StoreFactory for HostStoreFactory {
    fn create(&self, params: CacheParams, slots: usize) -> PagerResult<Box<dyn PageStore>> {
        Ok(Box::new(HostPageStore::new(params, slots)?))
    }
}
