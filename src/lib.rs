pub mod binding;
pub mod config;
pub mod constants;
pub mod error;
pub mod page;
pub mod registry;
pub mod source;
pub mod streaming;

pub use binding::{BoundPage, PageConsumer};
pub use config::{CacheConfig, PagerConfig};
pub use error::{PagerError, PagerErrorContext, PagerResult};
pub use page::{CacheParams, FileId, PageAddress, PageIndex};
pub use registry::{CacheRegistry, PageQuery};
pub use source::{
    CancelToken, FilePageSource, FilePageWriter, FileSourceOpener, MemoryPageSource,
    MemorySourceOpener, PageSource, SourceOpener,
};
pub use streaming::{
    BindTarget, CacheOverlay, CacheStats, FrameReport, HostPageStore, HostStoreFactory,
    PageCache, PageStore, RequestStatus, SlotState, StoreFactory, WgpuPageStore,
    WgpuStoreFactory,
};
