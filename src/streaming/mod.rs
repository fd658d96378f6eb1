// Page streaming engine
// Fixed-slot page caches fed by background loader threads

pub mod cache;
pub mod loader;
pub mod overlay;
pub mod staging;
pub mod store;
pub mod task;
pub mod wgpu_store;

pub use cache::{CacheStats, FrameReport, PageCache, RequestStatus, SlotState};
pub use loader::{LoaderPool, LoaderShared};
pub use overlay::{CacheOverlay, SlotCell};
pub use staging::StagingPool;
pub use store::{BindTarget, HostPageStore, HostStoreFactory, PageStore, StoreFactory};
pub use task::{TaskState, TransferTask};
pub use wgpu_store::{texture_format, WgpuPageStore, WgpuStoreFactory};
