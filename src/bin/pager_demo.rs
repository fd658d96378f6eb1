//! Headless page cache walkthrough
//!
//! Writes a small page file, acquires it through a registry and sweeps a
//! synthetic camera across one cube face, logging cache activity per frame.
//!
//! Usage: pager_demo [--sync] [--gpu] [--frames N] [--config pager.toml]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use rand::Rng;
use globe_pager::{
    BoundPage, CacheConfig, CacheParams, CacheRegistry, FilePageWriter, FileSourceOpener,
    HostStoreFactory, PageConsumer, PageIndex, PagerConfig, StoreFactory, WgpuStoreFactory,
};

const FILE_NAME: &str = "demo.pages";
const DEPTH: u32 = 3;
const VIEW_COLUMNS: u64 = 2;

struct Options {
    synchronous: bool,
    gpu: bool,
    frames: u64,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Options> {
    let mut options = Options {
        synchronous: false,
        gpu: false,
        frames: 24,
        config: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--sync" => options.synchronous = true,
            "--gpu" => options.gpu = true,
            "--frames" => {
                let value = args.next().context("--frames needs a value")?;
                options.frames = value.parse().context("--frames must be a number")?;
            }
            "--config" => {
                options.config = Some(args.next().context("--config needs a path")?.into());
            }
            other => bail!("unknown argument '{}'", other),
        }
    }
    Ok(options)
}

/// Page file with every page of one face down to `DEPTH`, filled with noise
fn write_page_file(path: &Path, params: CacheParams) -> Result<usize> {
    let mut rng = rand::thread_rng();
    let mut writer = FilePageWriter::new(params);

    for face in 0..6 {
        for depth in 0..=DEPTH {
            let side = 1u64 << depth;
            for row in 0..side {
                for col in 0..side {
                    let page = PageIndex::from_face_row_col(face, depth, row, col)
                        .context("page outside the quadtree")?;
                    let data: Vec<u8> = (0..params.page_bytes()).map(|_| rng.gen()).collect();
                    let min = data.iter().copied().min().unwrap_or(0) as f32;
                    let max = data.iter().copied().max().unwrap_or(0) as f32;
                    writer.add_page(page, data, min, max)?;
                }
            }
        }
    }

    writer.write(path)?;
    Ok(writer.page_count())
}

fn gpu_factory() -> Option<WgpuStoreFactory> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    log::info!("Using adapter {:?}", adapter.get_info().name);

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Pager Demo Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        },
        None,
    ))
    .ok()?;
    Some(WgpuStoreFactory::new(Arc::new(device), Arc::new(queue)))
}

/// Pages in view: a band of columns at `DEPTH` that slides one column per frame
fn visible_pages(frame: u64) -> Vec<(PageIndex, f32)> {
    let side = 1u64 << DEPTH;
    let mut pages = Vec::new();
    for row in 0..side {
        for offset in 0..VIEW_COLUMNS {
            let col = (frame + offset) % side;
            if let Some(page) = PageIndex::from_face_row_col(0, DEPTH, row, col) {
                let centre = (side / 2) as f32;
                let priority = -((row as f32 - centre).abs());
                pages.push((page, priority));
            }
        }
    }
    pages
}

fn run(stores: impl StoreFactory + 'static, dir: &Path, config: PagerConfig, frames: u64) -> Result<()> {
    let mut registry = CacheRegistry::new(FileSourceOpener::with_base(dir), stores, config)?;
    let file = registry.acquire(FILE_NAME);
    if file.is_sentinel() {
        bail!("could not acquire {}", FILE_NAME);
    }

    for _ in 0..frames {
        let frame = registry.frame();
        let visible = visible_pages(frame);

        for &(page, priority) in &visible {
            registry.touch_page(file, page, priority);
        }

        let (mut exact, mut ancestor, mut placeholder) = (0, 0, 0);
        for &(page, _) in &visible {
            match registry.bind_page(file, page) {
                BoundPage::Exact(_) => exact += 1,
                BoundPage::Ancestor { .. } => ancestor += 1,
                BoundPage::Placeholder => placeholder += 1,
            }
        }
        registry.unbind_page(file);

        let report = registry.update_caches();
        if let Some(cache) = registry.cache_for(file) {
            let stats = cache.stats();
            log::info!(
                "frame {:3}: drawn {:2} exact / {:2} ancestor / {:2} placeholder | resident {:3} loading {:2} evictions {:3} | {:?}",
                frame,
                exact,
                ancestor,
                placeholder,
                stats.resident,
                stats.loading,
                stats.evictions,
                report
            );
        }
        for overlay in registry.render_caches() {
            log::debug!("{}", overlay);
        }
    }

    registry.release(FILE_NAME);
    log::info!("Released; {} caches remain", registry.cache_count());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let options = parse_args()?;
    let mut config = match &options.config {
        Some(path) => PagerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PagerConfig {
            cache: CacheConfig::with_slots(24),
            synchronous: false,
        },
    };
    config.synchronous |= options.synchronous;

    let params = CacheParams::new(16, 1, 1);
    let dir = std::env::temp_dir().join(format!("globe-pager-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let pages = write_page_file(&dir.join(FILE_NAME), params)?;
    log::info!(
        "Wrote {} pages of {} to {} ({} mode)",
        pages,
        params,
        dir.display(),
        if config.synchronous { "synchronous" } else { "asynchronous" }
    );

    let result = match options.gpu.then(gpu_factory).flatten() {
        Some(factory) => run(factory, &dir, config, options.frames),
        None => {
            if options.gpu {
                log::warn!("No GPU available, using host memory");
            }
            run(HostStoreFactory, &dir, config, options.frames)
        }
    };

    if let Err(e) = std::fs::remove_dir_all(&dir) {
        log::warn!("Could not remove {}: {}", dir.display(), e);
    }
    result
}
