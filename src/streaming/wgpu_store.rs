/// wgpu page store
///
/// All slots of a cache live in one 2D texture array, one layer per slot.
/// Uploads go straight through `Queue::write_texture`, so no GPU-side staging
/// buffers are kept here.

use std::sync::Arc;
use wgpu::{Device, Queue};
use crate::error::{PagerError, PagerResult};
use crate::page::CacheParams;
use super::store::{BindTarget, PageStore, StoreFactory};

/// Texture format for a page layout, if the GPU can hold it directly
pub fn texture_format(params: &CacheParams) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat::*;
    let format = match (params.channels, params.bytes_per_channel) {
        (1, 1) => R8Unorm,
        (2, 1) => Rg8Unorm,
        (4, 1) => Rgba8Unorm,
        (1, 2) => R16Uint,
        (2, 2) => Rg16Uint,
        (4, 2) => Rgba16Uint,
        (1, 4) => R32Float,
        (2, 4) => Rg32Float,
        (4, 4) => Rgba32Float,
        _ => return None,
    };
    Some(format)
}

pub struct WgpuPageStore {
    params: CacheParams,
    slots: usize,
    queue: Arc<Queue>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    bound: Option<usize>,
}

impl WgpuPageStore {
    pub fn new(
        device: &Device,
        queue: Arc<Queue>,
        params: CacheParams,
        slots: usize,
    ) -> PagerResult<Self> {
        let format = texture_format(&params).ok_or(PagerError::UnsupportedFormat {
            channels: params.channels,
            bytes_per_channel: params.bytes_per_channel,
        })?;

        let limits = device.limits();
        if slots as u64 > limits.max_texture_array_layers as u64 {
            return Err(PagerError::AllocationFailed {
                slots,
                reason: format!(
                    "device allows {} array layers",
                    limits.max_texture_array_layers
                ),
            });
        }
        if params.page_dimension > limits.max_texture_dimension_2d {
            return Err(PagerError::AllocationFailed {
                slots,
                reason: format!(
                    "page dimension {} exceeds device limit {}",
                    params.page_dimension, limits.max_texture_dimension_2d
                ),
            });
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("Page Cache {}", params)),
            size: wgpu::Extent3d {
                width: params.page_dimension,
                height: params.page_dimension,
                depth_or_array_layers: slots as u32,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Page Cache View"),
            format: None,
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: 0,
            mip_level_count: None,
            base_array_layer: 0,
            array_layer_count: None,
        });

        log::info!(
            "[WgpuPageStore] Allocated {} layers of {} as {:?}",
            slots,
            params,
            format
        );

        Ok(Self {
            params,
            slots,
            queue,
            texture,
            view,
            bound: None,
        })
    }

    /// Array view for binding in draw code
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

impl PageStore for WgpuPageStore {
    fn params(&self) -> CacheParams {
        self.params
    }

    fn slot_count(&self) -> usize {
        self.slots
    }

    fn upload(&mut self, slot: usize, data: &[u8]) -> PagerResult<()> {
        if slot >= self.slots || data.len() != self.params.page_bytes() {
            return Err(PagerError::InvalidGeometry {
                reason: format!("upload of {} bytes to layer {}", data.len(), slot),
            });
        }

        let dimension = self.params.page_dimension;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: slot as u32,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.params.bytes_per_row() as u32),
                rows_per_image: Some(dimension),
            },
            wgpu::Extent3d {
                width: dimension,
                height: dimension,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn release(&mut self, slot: usize) {
        // Layers are overwritten on reuse.
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

/// Factory creating texture-array stores on a shared device
pub struct WgpuStoreFactory {
    device: Arc<Device>,
    queue: Arc<Queue>,
}

impl WgpuStoreFactory {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        Self { device, queue }
    }
}

impl StoreFactory for WgpuStoreFactory {
    fn create(&self, params: CacheParams, slots: usize) -> PagerResult<Box<dyn PageStore>> {
        Ok(Box::new(WgpuPageStore::new(
            &self.device,
            Arc::clone(&self.queue),
            params,
            slots,
        )?))
    }
}
