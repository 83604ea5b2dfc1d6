use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{memory_or, GfxResult, GraphicsError};
use crate::renderer::resources::{allocate_memory, sharing_mode};

/// Creation parameters that stay fixed once the image exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProperties {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub image_type: vk::ImageType,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub initial_layout: vk::ImageLayout,
}

impl Default for ImageProperties {
    fn default() -> Self {
        Self {
            format: vk::Format::UNDEFINED,
            extent: vk::Extent3D { width: 1, height: 1, depth: 1 },
            image_type: vk::ImageType::TYPE_2D,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }
}

/// Device image with explicitly allocated memory. Setters only take effect before `initialize`.
pub struct ImageBuffer {
    properties: ImageProperties,
    handle: vk::Image,
    memory: vk::DeviceMemory,

    ctx: Arc<DeviceContext>,
}

/// Format features an image needs for the given usage.
pub(crate) fn format_features_for(usage: vk::ImageUsageFlags) -> vk::FormatFeatureFlags {
    const MAPPING: [(vk::ImageUsageFlags, vk::FormatFeatureFlags); 6] = [
        (vk::ImageUsageFlags::SAMPLED, vk::FormatFeatureFlags::SAMPLED_IMAGE),
        (vk::ImageUsageFlags::STORAGE, vk::FormatFeatureFlags::STORAGE_IMAGE),
        (vk::ImageUsageFlags::COLOR_ATTACHMENT, vk::FormatFeatureFlags::COLOR_ATTACHMENT),
        (
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        ),
        (vk::ImageUsageFlags::TRANSFER_SRC, vk::FormatFeatureFlags::TRANSFER_SRC),
        (vk::ImageUsageFlags::TRANSFER_DST, vk::FormatFeatureFlags::TRANSFER_DST),
    ];
    MAPPING
        .iter()
        .filter(|(u, _)| usage.contains(*u))
        .fold(vk::FormatFeatureFlags::empty(), |acc, (_, f)| acc | *f)
}

impl ImageBuffer {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            properties: ImageProperties::default(),
            handle: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            ctx,
        }
    }

    pub fn set_format(&mut self, format: vk::Format) -> &mut Self {
        self.properties.format = format;
        self
    }

    pub fn set_extent(&mut self, width: u32, height: u32, depth: u32) -> &mut Self {
        self.properties.extent = vk::Extent3D { width, height, depth };
        self
    }

    pub fn set_image_type(&mut self, image_type: vk::ImageType) -> &mut Self {
        self.properties.image_type = image_type;
        self
    }

    pub fn set_mip_levels(&mut self, mip_levels: u32) -> &mut Self {
        self.properties.mip_levels = mip_levels;
        self
    }

    pub fn set_array_layers(&mut self, array_layers: u32) -> &mut Self {
        self.properties.array_layers = array_layers;
        self
    }

    pub fn set_samples(&mut self, samples: vk::SampleCountFlags) -> &mut Self {
        self.properties.samples = samples;
        self
    }

    pub fn set_tiling(&mut self, tiling: vk::ImageTiling) -> &mut Self {
        self.properties.tiling = tiling;
        self
    }

    pub fn set_initial_layout(&mut self, layout: vk::ImageLayout) -> &mut Self {
        self.properties.initial_layout = layout;
        self
    }

    /// Picks the first candidate the device supports for `usage` under `tiling`.
    pub fn set_format_best_candidate(
        &mut self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
    ) -> GfxResult<vk::Format> {
        let features = format_features_for(usage);
        let format = candidates
            .iter()
            .copied()
            .find(|f| self.ctx.is_format_supported(*f, tiling, features))
            .ok_or_else(|| {
                log::error!("None of {:?} supports {:?}", candidates, usage);
                GraphicsError::UnsupportedFormat
            })?;
        self.properties.format = format;
        self.properties.tiling = tiling;
        Ok(format)
    }

    pub fn initialize(&mut self, usage: vk::ImageUsageFlags, queue_families: &[u32]) -> GfxResult<()> {
        assert_eq!(self.handle, vk::Image::null(), "image already initialized");
        let props = self.properties;

        if !self
            .ctx
            .is_format_supported(props.format, props.tiling, format_features_for(usage))
        {
            log::error!("Format {:?} does not support {:?} with {:?} tiling", props.format, usage, props.tiling);
            return Err(GraphicsError::UnsupportedFormat);
        }

        let (mode, families) = sharing_mode(queue_families);
        let info = vk::ImageCreateInfo::default()
            .image_type(props.image_type)
            .format(props.format)
            .extent(props.extent)
            .mip_levels(props.mip_levels)
            .array_layers(props.array_layers)
            .samples(props.samples)
            .tiling(props.tiling)
            .usage(usage)
            .sharing_mode(mode)
            .queue_family_indices(&families)
            .initial_layout(props.initial_layout);

        self.handle = unsafe {
            self.ctx.device().create_image(&info).map_err(|e| {
                log::error!("Unable to create image: {}", e);
                memory_or(e, GraphicsError::ImageCreateError)
            })?
        };
        Ok(())
    }

    /// Allocates and binds backing memory. Does nothing when memory is already bound.
    pub fn allocate(&mut self, properties: vk::MemoryPropertyFlags) -> GfxResult<()> {
        assert_ne!(self.handle, vk::Image::null(), "allocate called before initialize");
        if self.memory != vk::DeviceMemory::null() {
            return Ok(());
        }

        let device = self.ctx.device();
        let requirements = unsafe { device.image_memory_requirements(self.handle) };
        let memory = allocate_memory(&self.ctx, &requirements, requirements.size, properties)?;

        if let Err(e) = unsafe { device.bind_image_memory(self.handle, memory, 0) } {
            log::error!("Unable to bind image memory: {}", e);
            unsafe { device.free_memory(memory) };
            return Err(GraphicsError::InitializationFailed);
        }
        self.memory = memory;
        Ok(())
    }

    /// A view over every mip level and layer of the image.
    pub fn create_view(
        &self,
        view_type: vk::ImageViewType,
        aspect: vk::ImageAspectFlags,
    ) -> GfxResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(self.handle)
            .view_type(view_type)
            .format(self.properties.format)
            .subresource_range(self.subresource_range(aspect));
        unsafe {
            self.ctx.device().create_image_view(&info).map_err(|e| {
                log::error!("Unable to create image view: {}", e);
                memory_or(e, GraphicsError::ImageCreateError)
            })
        }
    }

    pub fn subresource_range(&self, aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: self.properties.mip_levels,
            base_array_layer: 0,
            layer_count: self.properties.array_layers,
        }
    }

    pub fn clear(&mut self) {
        let device = self.ctx.device();
        if self.handle != vk::Image::null() {
            unsafe { device.destroy_image(self.handle) };
            self.handle = vk::Image::null();
        }
        if self.memory != vk::DeviceMemory::null() {
            unsafe { device.free_memory(self.memory) };
            self.memory = vk::DeviceMemory::null();
        }
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn properties(&self) -> &ImageProperties {
        &self.properties
    }

    pub fn format(&self) -> vk::Format {
        self.properties.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.properties.extent
    }

    pub fn is_allocated(&self) -> bool {
        self.memory != vk::DeviceMemory::null()
    }
}

impl Drop for ImageBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::contexts::device_ctx::mock::{mock_context, test_context, Event};

    #[test]
    fn defaults_describe_a_single_sample_2d_image() {
        let image = ImageBuffer::new(test_context(false));
        let props = image.properties();
        assert_eq!(props.image_type, vk::ImageType::TYPE_2D);
        assert_eq!(props.mip_levels, 1);
        assert_eq!(props.array_layers, 1);
        assert_eq!(props.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(props.tiling, vk::ImageTiling::OPTIMAL);
        assert_eq!(props.initial_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn unsupported_format_is_rejected_before_creation() {
        let (mock, ctx) = mock_context(false);
        let mut image = ImageBuffer::new(ctx);
        image.set_format(vk::Format::R8G8B8_SRGB).set_extent(4, 4, 1);
        assert_eq!(
            image.initialize(vk::ImageUsageFlags::SAMPLED, &[]),
            Err(GraphicsError::UnsupportedFormat)
        );
        assert_eq!(mock.state().count(|e| matches!(e, Event::CreateImage { .. })), 0);
    }

    #[test]
    fn best_candidate_skips_unsupported_formats() {
        let (_mock, ctx) = mock_context(false);
        let mut image = ImageBuffer::new(ctx);
        let format = image
            .set_format_best_candidate(
                &[vk::Format::R8G8B8_SRGB, vk::Format::R8G8B8A8_SRGB],
                vk::ImageTiling::OPTIMAL,
                vk::ImageUsageFlags::SAMPLED,
            )
            .unwrap();
        assert_eq!(format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(image.format(), vk::Format::R8G8B8A8_SRGB);

        assert_eq!(
            image.set_format_best_candidate(
                &[vk::Format::R8G8B8_SRGB],
                vk::ImageTiling::OPTIMAL,
                vk::ImageUsageFlags::SAMPLED,
            ),
            Err(GraphicsError::UnsupportedFormat)
        );
    }

    #[test]
    fn allocate_is_idempotent_and_clear_releases() {
        let (mock, ctx) = mock_context(true);
        let mut image = ImageBuffer::new(ctx);
        image.set_format(vk::Format::R8G8B8A8_SRGB).set_extent(16, 16, 1);
        image
            .initialize(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST, &[0, 1])
            .unwrap();
        image.allocate(vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        image.allocate(vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        let handle = image.handle();
        image.clear();
        image.clear();

        let state = mock.state();
        assert_eq!(state.allocations(), 1);
        assert!(state.events.iter().any(|e| matches!(
            e,
            Event::CreateImage { sharing_mode, .. } if *sharing_mode == vk::SharingMode::CONCURRENT
        )));
        assert_eq!(state.count(|e| *e == Event::DestroyImage(handle)), 1);
    }

    #[test]
    fn usage_maps_to_format_features() {
        assert_eq!(
            format_features_for(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST),
            vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::TRANSFER_DST
        );
        assert_eq!(
            format_features_for(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
        );
    }
}
