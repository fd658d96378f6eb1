// Globe Pager Constants - SINGLE SOURCE OF TRUTH
//
// Defaults and fixed values shared by the cache, the registry and the page
// file format. Do not redefine these elsewhere.

/// Cube-sphere quadtree layout
pub mod layout {
    /// Number of cube faces, and therefore of depth-0 root pages
    pub const FACE_COUNT: u64 = 6;

    /// Children per page
    pub const CHILDREN_PER_PAGE: u64 = 4;

    /// Deepest level representable in a 64-bit page index
    pub const MAX_DEPTH: u32 = 29;
}

/// Cache engine defaults
pub mod cache {
    /// Resident slots per cache
    pub const DEFAULT_SLOT_COUNT: usize = 256;

    /// Upper bound for the default loader thread count
    pub const MAX_DEFAULT_LOADERS: usize = 4;

    /// Tasks the loader pool may hold at once
    pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

    /// Idle staging buffers retained for reuse
    pub const DEFAULT_STAGING_POOL_LIMIT: usize = 64;

    /// Bytes copied per chunk between cancellation checkpoints
    pub const READ_CHUNK_BYTES: usize = 64 * 1024;
}

/// Registry defaults
pub mod registry {
    /// Value reported as the minimum and maximum of an unknown page
    pub const NEUTRAL_BOUND: f32 = 1.0;

    /// Name given to caches the registry creates, and prefix of their loader threads
    pub const CACHE_NAME: &str = "globe-pager";
}

/// Page file format
pub mod file_format {
    /// Magic bytes at offset zero of a page file
    pub const MAGIC: [u8; 8] = *b"GPAGES01";

    /// Current format version
    pub const VERSION: u32 = 1;

    /// Page table entry marking a page absent from the file
    pub const ABSENT_OFFSET: u64 = 0;
}
