/// Registry lifecycle tests
///
/// Acquire/release reference counting, cache sharing, sentinel handles and
/// releasing a file while a loader is stuck in a slow read.

use std::time::{Duration, Instant};
use globe_pager::{
    BoundPage, CacheConfig, CacheParams, CacheRegistry, HostStoreFactory, MemoryPageSource,
    MemorySourceOpener, PageAddress, PageConsumer, PageIndex, PagerConfig, RequestStatus,
    SlotState,
};
use globe_pager::constants::registry::NEUTRAL_BOUND;

fn params() -> CacheParams {
    CacheParams::new(4, 1, 1)
}

fn registry(opener: MemorySourceOpener, synchronous: bool) -> CacheRegistry {
    let config = PagerConfig {
        cache: CacheConfig::with_slots(16).with_loader_threads(2),
        synchronous,
    };
    CacheRegistry::new(opener, HostStoreFactory, config).unwrap()
}

#[test]
fn test_double_acquire_and_release() {
    let opener = MemorySourceOpener::new();
    opener.insert("x", MemoryPageSource::filled(params(), 1));
    let mut registry = registry(opener, true);

    let first = registry.acquire("x");
    let second = registry.acquire("x");
    assert_eq!(first, second);
    assert_eq!(registry.uses("x"), 2);

    registry.release("x");
    assert_eq!(registry.uses("x"), 1);
    let source = registry.source_for(first).unwrap();
    assert!(source.is_active());

    registry.release("x");
    assert!(!source.is_active());
    assert!(registry.source_for(first).is_none());
    assert_eq!(registry.cache_count(), 0);
    assert_eq!(registry.file_count(), 0);
}

#[test]
fn test_missing_file_is_neutral() {
    let mut registry = registry(MemorySourceOpener::new(), true);
    let missing = registry.acquire("missing");
    assert!(missing.is_sentinel());
    assert_eq!(registry.file_count(), 0);
    assert_eq!(registry.cache_count(), 0);

    for page in [PageIndex(0), PageIndex(5), PageIndex(1_000)] {
        assert!(!registry.get_page_status(missing, page));
        assert_eq!(
            registry.get_page_bounds(missing, page),
            (NEUTRAL_BOUND, NEUTRAL_BOUND)
        );
    }
}

#[test]
fn test_shared_cache_outlives_first_file() {
    let opener = MemorySourceOpener::new();
    opener.insert("a", MemoryPageSource::filled(params(), 1));
    opener.insert("b", MemoryPageSource::filled(params(), 1));
    let mut registry = registry(opener, true);

    let a = registry.acquire("a");
    let b = registry.acquire("b");
    assert_eq!(registry.cache_count(), 1);

    registry.touch_page(a, PageIndex(0), 0.0);
    registry.touch_page(b, PageIndex(0), 0.0);
    registry.update_caches();

    registry.release("a");
    assert_eq!(registry.cache_count(), 1);
    let cache = registry.cache_for(b).unwrap();
    assert_eq!(cache.stats().resident, 1);
    assert!(matches!(registry.bind_page(b, PageIndex(0)), BoundPage::Exact(_)));

    registry.release("b");
    assert_eq!(registry.cache_count(), 0);
}

#[test]
fn test_release_and_acquire_keep_frame_pins() {
    let opener = MemorySourceOpener::new();
    for name in ["earth", "moon", "mars"] {
        opener.insert(name, MemoryPageSource::filled(params(), 1));
    }
    let config = PagerConfig {
        cache: CacheConfig::with_slots(1).with_loader_threads(1),
        synchronous: true,
    };
    let mut registry = CacheRegistry::new(opener, HostStoreFactory, config).unwrap();
    registry.acquire("earth");
    let moon = registry.acquire("moon");
    assert_eq!(registry.cache_count(), 1);

    registry.touch_page(moon, PageIndex(0), 0.0);
    registry.update_caches();

    // The single slot is touched this frame, so nothing else may take it.
    assert_eq!(registry.touch_page(moon, PageIndex(0), 0.0), RequestStatus::Resident);
    assert_eq!(registry.touch_page(moon, PageIndex(1), 0.0), RequestStatus::Miss);

    registry.release("earth");
    assert_eq!(registry.touch_page(moon, PageIndex(1), 0.0), RequestStatus::Miss);

    registry.acquire("mars");
    assert_eq!(registry.touch_page(moon, PageIndex(1), 0.0), RequestStatus::Miss);

    let cache = registry.cache_for(moon).unwrap();
    assert_eq!(cache.status(PageAddress::new(moon, 0)), SlotState::Ready);
    assert_eq!(cache.stats().evictions, 0);

    // Next frame the slot is fair game again.
    registry.update_caches();
    assert_eq!(registry.touch_page(moon, PageIndex(1), 0.0), RequestStatus::Pending);
}

#[test]
fn test_release_during_slow_read_does_not_deadlock() {
    let slow = MemoryPageSource::filled(params(), 1);
    slow.set_delay(PageIndex(0), Duration::from_secs(30));
    let opener = MemorySourceOpener::new();
    opener.insert("slow", slow.clone());
    let mut registry = registry(opener, false);

    let file = registry.acquire("slow");
    assert_eq!(registry.touch_page(file, PageIndex(0), 0.0), RequestStatus::Pending);
    registry.update_caches();

    // Give a loader time to enter the read.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(slow.read_count(), 1);

    let started = Instant::now();
    assert!(registry.release("slow"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(registry.cache_count(), 0);
}

#[test]
fn test_synchronous_update_waits_for_delayed_page() {
    let source = MemoryPageSource::filled(params(), 1);
    source.set_delay(PageIndex(3), Duration::from_millis(100));
    let opener = MemorySourceOpener::new();
    opener.insert("earth", source);
    let mut registry = registry(opener, true);
    let file = registry.acquire("earth");

    registry.touch_page(file, PageIndex(3), 0.0);
    let started = Instant::now();
    let report = registry.update_caches();
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert_eq!(report.uploaded, 1);
    assert_eq!(registry.touch_page(file, PageIndex(3), 0.0), RequestStatus::Resident);
}

#[test]
fn test_asynchronous_update_pops_in_later() {
    let source = MemoryPageSource::filled(params(), 1);
    source.set_delay(PageIndex(3), Duration::from_millis(100));
    let opener = MemorySourceOpener::new();
    opener.insert("earth", source);
    let mut registry = registry(opener, false);
    let file = registry.acquire("earth");

    registry.touch_page(file, PageIndex(3), 0.0);
    let started = Instant::now();
    registry.update_caches();
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(registry.touch_page(file, PageIndex(3), 0.0), RequestStatus::Pending);

    std::thread::sleep(Duration::from_millis(250));
    registry.update_caches();
    assert_eq!(registry.touch_page(file, PageIndex(3), 0.0), RequestStatus::Resident);
}

#[test]
fn test_query_handle_works_off_thread() {
    let source = MemoryPageSource::new(params());
    source.insert_page(PageIndex(7), vec![0; 16], 2.0, 9.0);
    let opener = MemorySourceOpener::new();
    opener.insert("earth", source);
    let mut registry = registry(opener, true);
    let file = registry.acquire("earth");

    let query = registry.query();
    let (status, bounds) = std::thread::spawn(move || {
        (query.page_status(file, PageIndex(7)), query.page_bounds(file, PageIndex(7)))
    })
    .join()
    .unwrap();
    assert!(status);
    assert_eq!(bounds, (2.0, 9.0));
}
