use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::GfxResult;
use crate::renderer::resources::image::ImageBuffer;

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Depth attachment sized to the render target. Rebuilt with the swapchain.
pub struct DepthStencilBuffer {
    image: ImageBuffer,
    view: vk::ImageView,
    ctx: Arc<DeviceContext>,
}

impl DepthStencilBuffer {
    pub fn new(ctx: Arc<DeviceContext>, extent: vk::Extent2D) -> GfxResult<Self> {
        let usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        let mut image = ImageBuffer::new(ctx.clone());
        image.set_extent(extent.width, extent.height, 1);
        image.set_format_best_candidate(&DEPTH_CANDIDATES, vk::ImageTiling::OPTIMAL, usage)?;
        image.initialize(usage, &[])?;
        image.allocate(vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let view = image.create_view(vk::ImageViewType::TYPE_2D, vk::ImageAspectFlags::DEPTH)?;

        log::debug!("Depth buffer {}x{} as {:?}", extent.width, extent.height, image.format());
        Ok(Self { image, view, ctx })
    }

    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    pub fn has_stencil(&self) -> bool {
        has_stencil_component(self.format())
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }
}

impl Drop for DepthStencilBuffer {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_image_view(self.view) };
    }
}
