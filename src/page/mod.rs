// Page addressing for cube-sphere image pyramids
// Pure data: page indices, file handles and cache parameters

pub mod index;

pub use index::{pages_at_depth, Ancestors, PageIndex};

use std::fmt;
use serde::{Deserialize, Serialize};

/// Opaque handle for an acquired page file
///
/// The index is a slot in the registry's binding table; the generation is
/// bumped whenever that slot is released, so a handle kept past its file's
/// release never aliases a later file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId {
    pub index: u32,
    pub generation: u32,
}

impl FileId {
    /// Returned when a file cannot be acquired
    pub const SENTINEL: FileId = FileId {
        index: u32::MAX,
        generation: u32::MAX,
    };

    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn is_sentinel(self) -> bool {
        self == Self::SENTINEL
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sentinel() {
            write!(f, "file:none")
        } else {
            write!(f, "file:{}.{}", self.index, self.generation)
        }
    }
}

/// One page of one file. Ordered by file, then page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageAddress {
    pub file: FileId,
    pub page: PageIndex,
}

impl PageAddress {
    pub fn new(file: FileId, page: impl Into<PageIndex>) -> Self {
        Self {
            file,
            page: page.into(),
        }
    }

    pub fn parent(self) -> Option<Self> {
        self.page.parent().map(|page| Self { file: self.file, page })
    }
}

impl fmt::Display for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.file, self.page)
    }
}

/// Page geometry and format. Files with equal parameters share a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheParams {
    /// Width and height of a page in samples
    pub page_dimension: u32,
    pub channels: u32,
    pub bytes_per_channel: u32,
}

impl CacheParams {
    pub fn new(page_dimension: u32, channels: u32, bytes_per_channel: u32) -> Self {
        Self {
            page_dimension,
            channels,
            bytes_per_channel,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.channels as usize * self.bytes_per_channel as usize
    }

    pub fn bytes_per_row(&self) -> usize {
        self.page_dimension as usize * self.bytes_per_sample()
    }

    /// Size in bytes of one page's pixel data
    pub fn page_bytes(&self) -> usize {
        self.page_dimension as usize * self.bytes_per_row()
    }

    pub fn is_valid(&self) -> bool {
        self.page_dimension > 0 && self.channels > 0 && self.bytes_per_channel > 0
    }
}

impl fmt::Display for CacheParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}ch@{}B",
            self.page_dimension, self.page_dimension, self.channels, self.bytes_per_channel
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_ordering_is_file_then_page() {
        let a = PageAddress::new(FileId::new(0, 0), 9);
        let b = PageAddress::new(FileId::new(0, 0), 10);
        let c = PageAddress::new(FileId::new(1, 0), 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_page_bytes() {
        let params = CacheParams::new(256, 3, 2);
        assert_eq!(params.bytes_per_row(), 1536);
        assert_eq!(params.page_bytes(), 256 * 1536);
        assert!(params.is_valid());
        assert!(!CacheParams::new(0, 1, 1).is_valid());
    }

    #[test]
    fn test_sentinel_display() {
        assert!(FileId::SENTINEL.is_sentinel());
        assert_eq!(FileId::SENTINEL.to_string(), "file:none");
        assert_eq!(FileId::new(3, 1).to_string(), "file:3.1");
    }

    #[test]
    fn test_address_parent_keeps_file() {
        let file = FileId::new(2, 0);
        let address = PageAddress::new(file, 7);
        assert_eq!(address.parent(), Some(PageAddress::new(file, 0)));
        assert_eq!(PageAddress::new(file, 3).parent(), None);
    }
}
