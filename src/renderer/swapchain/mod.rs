mod lifecycle;

pub use lifecycle::{OnCreate, OnDestroy, SwapchainLifecycle};

use std::sync::Arc;
use ash::vk;
use crate::renderer::config::{ConfigError, RenderConfig};
use crate::renderer::contexts::device_ctx::queue::QueueRole;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{memory_or, GfxResult, GraphicsError};
use crate::renderer::resources::sharing_mode;

const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// What the application would like the swapchain to look like. Anything the surface does not
/// support falls back to a format and present mode it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPreferences {
    pub format: Option<vk::Format>,
    pub present_mode: Option<vk::PresentModeKHR>,
    pub vsync: bool,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            format: None,
            present_mode: None,
            vsync: true,
        }
    }
}

impl SwapchainPreferences {
    pub fn from_config(config: &RenderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            format: config.surface_format_preference()?,
            present_mode: config.present_mode_preference()?,
            vsync: config.vsync,
        })
    }
}

/// Presentable images of one surface together with a color view per image.
pub struct Swapchain {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    ctx: Arc<DeviceContext>,
}

impl Swapchain {
    /// Builds a swapchain for `surface`. `requested_extent` is only used when the surface lets
    /// the application pick the size. A zero-sized surface (minimized window) yields
    /// `SwapchainOutOfDate` so the caller retries later.
    pub fn new(
        ctx: Arc<DeviceContext>,
        surface: vk::SurfaceKHR,
        prefs: &SwapchainPreferences,
        requested_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> GfxResult<Self> {
        let device = ctx.device();
        let capabilities = unsafe { device.surface_capabilities(surface) }.map_err(|e| {
            log::error!("Unable to query surface capabilities: {}", e);
            GraphicsError::SwapchainInvalid
        })?;

        let extent = choose_extent(&capabilities, requested_extent);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface has zero extent, postponing swapchain creation");
            return Err(GraphicsError::SwapchainOutOfDate);
        }

        let formats = unsafe { device.surface_formats(surface) }.map_err(|e| {
            log::error!("Unable to query surface formats: {}", e);
            GraphicsError::SwapchainCreateError
        })?;
        let surface_format = choose_surface_format(&formats, prefs.format)
            .ok_or(GraphicsError::SwapchainCreateError)?;

        let present_modes = unsafe { device.surface_present_modes(surface) }.map_err(|e| {
            log::error!("Unable to query present modes: {}", e);
            GraphicsError::SwapchainCreateError
        })?;
        let present_mode = choose_present_mode(&present_modes, prefs);

        let image_count = choose_image_count(&capabilities);
        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        let families = ctx.unique_family_indices(&[QueueRole::Graphics, QueueRole::Present]);
        let (image_sharing_mode, family_indices) = sharing_mode(&families);

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(image_sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain);

        let handle = unsafe { device.create_swapchain(&info) }.map_err(|e| {
            log::error!("Unable to create swapchain: {}", e);
            match e {
                vk::Result::ERROR_OUT_OF_DATE_KHR => GraphicsError::SwapchainOutOfDate,
                e => memory_or(e, GraphicsError::SwapchainCreateError),
            }
        })?;

        // From here on `Drop` owns the cleanup of whatever was created
        let mut swapchain = Self {
            handle,
            images: Vec::new(),
            views: Vec::new(),
            extent,
            surface_format,
            present_mode,
            ctx: ctx.clone(),
        };

        swapchain.images = unsafe { device.get_swapchain_images(handle) }.map_err(|e| {
            log::error!("Unable to get swapchain images: {}", e);
            GraphicsError::SwapchainCreateError
        })?;

        for image in swapchain.images.clone() {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { device.create_image_view(&view_info) }.map_err(|e| {
                log::error!("Unable to create swapchain image view: {}", e);
                memory_or(e, GraphicsError::SwapchainCreateError)
            })?;
            swapchain.views.push(view);
        }

        log::debug!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            swapchain.images.len(),
            surface_format.format,
            present_mode
        );
        Ok(swapchain)
    }

    /// Returns the image index and whether the swapchain no longer matches the surface exactly.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> GfxResult<(u32, bool)> {
        unsafe {
            self.ctx
                .device()
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        }
        .map_err(present_error)
    }

    /// Queues `image_index` for presentation once `wait_semaphores` are signaled. Returns whether
    /// the swapchain is suboptimal.
    pub fn present(&self, wait_semaphores: &[vk::Semaphore], image_index: u32) -> GfxResult<bool> {
        let swapchains = [self.handle];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        unsafe {
            self.ctx
                .device()
                .queue_present(self.ctx.queue(QueueRole::Present).handle, &info)
        }
        .map_err(present_error)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.surface_format.color_space
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            for view in self.views.drain(..) {
                device.destroy_image_view(view);
            }
            device.destroy_swapchain(self.handle);
        }
    }
}

fn present_error(result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR => GraphicsError::SwapchainOutOfDate,
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        e => {
            log::error!("Swapchain operation failed: {}", e);
            GraphicsError::SwapchainInvalid
        }
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    let extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        requested
    };
    vk::Extent2D {
        width: extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

// One more than the minimum so acquiring never waits on the driver, and at least triple buffering
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = (capabilities.min_image_count + 1).max(3);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: Option<vk::Format>,
) -> Option<vk::SurfaceFormatKHR> {
    preferred
        .and_then(|format| {
            formats.iter().copied().find(|f| {
                f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.iter().copied().find(|f| *f == DEFAULT_SURFACE_FORMAT))
        .or_else(|| formats.first().copied())
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], prefs: &SwapchainPreferences) -> vk::PresentModeKHR {
    if let Some(mode) = prefs.present_mode.filter(|mode| modes.contains(mode)) {
        return mode;
    }
    if prefs.vsync {
        return vk::PresentModeKHR::FIFO;
    }
    // FIFO is the only mode every surface has to support
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}
