use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{memory_or, GfxResult, GraphicsError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    /// Requested anisotropy. Clamped to the device limit, ignored without the feature.
    pub max_anisotropy: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: 16.0,
        }
    }
}

pub struct Sampler {
    handle: vk::Sampler,
    anisotropy: Option<f32>,
    ctx: Arc<DeviceContext>,
}

impl Sampler {
    pub fn new(ctx: Arc<DeviceContext>, desc: &SamplerDesc) -> GfxResult<Self> {
        let anisotropy = if ctx.enabled_features().sampler_anisotropy == vk::TRUE && desc.max_anisotropy > 1.0 {
            Some(desc.max_anisotropy.min(ctx.limits().max_sampler_anisotropy))
        } else {
            None
        };

        let info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let handle = unsafe {
            ctx.device().create_sampler(&info).map_err(|e| {
                log::error!("Unable to create sampler: {}", e);
                memory_or(e, GraphicsError::InitializationFailed)
            })?
        };
        Ok(Self { handle, anisotropy, ctx })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }

    pub fn anisotropy(&self) -> Option<f32> {
        self.anisotropy
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_sampler(self.handle) };
    }
}
