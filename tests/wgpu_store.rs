/// Texture-array page store on a real device
///
/// Skipped when no adapter is available.

use std::sync::Arc;
use globe_pager::{CacheParams, PageStore, PagerError, WgpuPageStore};

fn init_gpu() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Page Store Test Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        },
        None,
    ))
    .ok()?;

    Some((Arc::new(device), Arc::new(queue)))
}

#[test]
fn test_upload_and_bind_layers() {
    let Some((device, queue)) = init_gpu() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    let params = CacheParams::new(16, 4, 1);
    let mut store = WgpuPageStore::new(&device, queue, params, 4).unwrap();
    assert_eq!(store.slot_count(), 4);

    store.upload(2, &vec![7u8; params.page_bytes()]).unwrap();
    assert!(store.upload(4, &vec![0u8; params.page_bytes()]).is_err());
    assert!(store.upload(0, &[0u8; 3]).is_err());

    let target = store.bind(2);
    assert_eq!(target.layer, 2);
    assert_eq!(store.bound(), Some(2));
    store.release(2);
    assert_eq!(store.bound(), None);
}

#[test]
fn test_unsupported_format_rejected() {
    let Some((device, queue)) = init_gpu() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    let result = WgpuPageStore::new(&device, queue, CacheParams::new(16, 3, 1), 4);
    assert!(matches!(result, Err(PagerError::UnsupportedFormat { .. })));
}
