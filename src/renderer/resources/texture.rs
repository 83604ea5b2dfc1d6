use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{GfxResult, GraphicsError};
use crate::renderer::resources::image::ImageBuffer;
use crate::renderer::transfer::{create_staging_buffer, ImageUpload, TransferCoordinator};

/// Sampled color image filled from host pixels through the transfer coordinator.
///
/// The pixels reach the image on the next `TransferCoordinator::flush`. The pending upload holds
/// its own reference to the image, so the texture may be dropped before that.
pub struct Texture2D {
    image: Arc<ImageBuffer>,
    view: vk::ImageView,
    ctx: Arc<DeviceContext>,
}

impl Texture2D {
    /// SRGB format holding `channels` 8-bit components per texel.
    pub fn format_for_channels(channels: u32) -> GfxResult<vk::Format> {
        match channels {
            1 => Ok(vk::Format::R8_SRGB),
            2 => Ok(vk::Format::R8G8_SRGB),
            3 => Ok(vk::Format::R8G8B8_SRGB),
            4 => Ok(vk::Format::R8G8B8A8_SRGB),
            _ => Err(GraphicsError::UnsupportedFormat),
        }
    }

    pub fn new_from_bytes(
        ctx: Arc<DeviceContext>,
        transfers: &mut TransferCoordinator,
        data: &[u8],
        extent: vk::Extent3D,
        channels: u32,
    ) -> GfxResult<Self> {
        let format = Self::format_for_channels(channels)?;
        let expected = extent.width as usize * extent.height as usize * extent.depth.max(1) as usize * channels as usize;
        assert_eq!(
            data.len(),
            expected,
            "{}x{}x{} texture with {} channels needs {} bytes",
            extent.width,
            extent.height,
            extent.depth,
            channels,
            expected
        );

        let mut image = ImageBuffer::new(ctx.clone());
        image
            .set_format(format)
            .set_extent(extent.width, extent.height, extent.depth.max(1));
        // Exclusive ownership: a split upload moves the image between families with barriers
        image.initialize(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED, &[])?;
        image.allocate(vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let view = image.create_view(vk::ImageViewType::TYPE_2D, vk::ImageAspectFlags::COLOR)?;
        let image = Arc::new(image);

        let staging = match create_staging_buffer(&ctx, data) {
            Ok(staging) => staging,
            Err(e) => {
                unsafe { ctx.device().destroy_image_view(view) };
                return Err(e);
            }
        };
        let upload = ImageUpload::new(staging, image.clone(), transfers.uses_transfer_queue());
        transfers.register(Box::new(upload));

        log::debug!(
            "Texture {}x{} ({:?}) queued for upload",
            extent.width,
            extent.height,
            format
        );
        Ok(Self { image, view, ctx })
    }

    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    /// Descriptor data for a combined image sampler binding.
    pub fn descriptor_info(&self, sampler: vk::Sampler) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl Drop for Texture2D {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_image_view(self.view) };
    }
}
