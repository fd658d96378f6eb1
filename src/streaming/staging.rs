use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;

/// Recycled host buffers for page transfers
///
/// Loader threads take a buffer to read into; the consumer gives it back
/// after upload. Idle buffers beyond `limit` are dropped.
pub struct StagingPool {
    free: Mutex<Vec<Vec<u8>>>,
    page_bytes: usize,
    limit: usize,
    allocated: AtomicUsize,
}

impl StagingPool {
    pub fn new(page_bytes: usize, limit: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            page_bytes,
            limit,
            allocated: AtomicUsize::new(0),
        }
    }

    pub fn acquire(&self) -> Vec<u8> {
        if let Some(buffer) = self.free.lock().pop() {
            return buffer;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        vec![0; self.page_bytes]
    }

    pub fn release(&self, buffer: Vec<u8>) {
        if buffer.len() != self.page_bytes {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.limit {
            free.push(buffer);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Buffers created over the pool's lifetime
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_recycled() {
        let pool = StagingPool::new(16, 4);
        let a = pool.acquire();
        assert_eq!(a.len(), 16);
        pool.release(a);
        let _b = pool.acquire();
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_limit_caps_idle_buffers() {
        let pool = StagingPool::new(8, 2);
        let buffers: Vec<_> = (0..4).map(|_| pool.acquire()).collect();
        for buffer in buffers {
            pool.release(buffer);
        }
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_foreign_sized_buffer_dropped() {
        let pool = StagingPool::new(8, 2);
        pool.release(vec![0; 3]);
        assert_eq!(pool.idle(), 0);
    }
}
