use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::api::DeviceApi;
use crate::renderer::contexts::device_ctx::features::{resolve_features, DeviceFeature};
use crate::renderer::contexts::device_ctx::instance::{RenderInstance, Surface};
use crate::renderer::contexts::device_ctx::queue::{QueueFamily, QueueFamilySelection};
use crate::renderer::error::{GfxResult, GraphicsError};

/// Vulkan-backed implementation of [`DeviceApi`]
pub struct AshDevice {
    pub logical: ash::Device,
    pub physical: vk::PhysicalDevice,

    queue_families: QueueFamilySelection,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    properties: vk::PhysicalDeviceProperties,
    enabled_features: vk::PhysicalDeviceFeatures,

    surface_loader: Option<ash::khr::surface::Instance>,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    instance: Arc<RenderInstance>,
}

struct DeviceCandidate {
    physical: vk::PhysicalDevice,
    queue_families: QueueFamilySelection,
    features: vk::PhysicalDeviceFeatures,
    rank: u32,
}

impl AshDevice {
    pub fn new(
        instance: Arc<RenderInstance>,
        config: &RenderConfig,
        surface: Option<&Surface>,
    ) -> GfxResult<Self> {
        let required = config
            .required_device_features()
            .map_err(|_| GraphicsError::InitializationFailed)?;
        let optional = config
            .optional_device_features()
            .map_err(|_| GraphicsError::InitializationFailed)?;

        let candidate = Self::select_physical_device(
            &instance,
            surface,
            &required,
            &optional,
            config.prefer_transfer_queue,
        )?;

        let logical = Self::create_logical_device(
            &instance.instance,
            &candidate,
            surface.is_some(),
        )?;

        let (memory_properties, properties) = unsafe {
            (
                instance.instance.get_physical_device_memory_properties(candidate.physical),
                instance.instance.get_physical_device_properties(candidate.physical),
            )
        };
        log::info!(
            "Selected device {:?} (graphics family {}, present family {}, transfer family {})",
            properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            candidate.queue_families.graphics.index,
            candidate.queue_families.present.index,
            candidate.queue_families.transfer.index,
        );

        let surface_loader = surface.map(|s| s.loader.clone());
        let swapchain_loader = surface
            .map(|_| ash::khr::swapchain::Device::new(&instance.instance, &logical));

        Ok(Self {
            logical,
            physical: candidate.physical,
            queue_families: candidate.queue_families,
            memory_properties,
            properties,
            enabled_features: candidate.features,
            surface_loader,
            swapchain_loader,
            instance,
        })
    }

    pub fn queue_families(&self) -> &QueueFamilySelection {
        &self.queue_families
    }

    fn select_physical_device(
        instance: &RenderInstance,
        surface: Option<&Surface>,
        required: &[DeviceFeature],
        optional: &[DeviceFeature],
        prefer_transfer_queue: bool,
    ) -> GfxResult<DeviceCandidate> {
        let req_device_exts = Self::get_required_device_extensions(surface.is_some());
        let instance = &instance.instance;

        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(GraphicsError::from)?
        };

        devices
            .into_iter()
            // Filter out devices that do not contain the required device extensions
            .filter(|device| {
                let supported_extensions = unsafe {
                    instance
                        .enumerate_device_extension_properties(*device)
                        .unwrap_or_default()
                };
                req_device_exts.iter().all(|req_ext| {
                    let supported = supported_extensions
                        .iter()
                        .any(|ext| ext.extension_name_as_c_str() == Ok(*req_ext));
                    if !supported {
                        log::warn!("Device extension not supported: {:?}", req_ext);
                    }
                    supported
                })
            })
            // Filter out devices missing a required feature
            .filter_map(|device| {
                let supported = unsafe { instance.get_physical_device_features(device) };
                match resolve_features(&supported, required, optional) {
                    Ok(features) => Some((device, features)),
                    Err(missing) => {
                        log::warn!("Device feature not supported: {}", missing.name());
                        None
                    }
                }
            })
            // Filter out devices that do not contain the required queues
            .filter_map(|(device, features)| {
                let props = unsafe { instance.get_physical_device_queue_family_properties(device) };
                let families = props
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let supports_present = surface.is_some_and(|surface| unsafe {
                            surface
                                .loader
                                .get_physical_device_surface_support(device, i as u32, surface.handle)
                                .unwrap_or(false)
                        });
                        QueueFamily::new(i as u32, *p, supports_present)
                    })
                    .collect::<Vec<_>>();
                let queue_families = QueueFamilySelection::select(
                    &families,
                    surface.is_some(),
                    prefer_transfer_queue,
                )?;

                let rank = match unsafe { instance.get_physical_device_properties(device) }.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                    vk::PhysicalDeviceType::CPU => 3,
                    vk::PhysicalDeviceType::OTHER => 4,
                    _ => 5,
                };
                Some(DeviceCandidate {
                    physical: device,
                    queue_families,
                    features,
                    rank,
                })
            })
            .min_by_key(|candidate| candidate.rank)
            .ok_or_else(|| {
                log::error!("No suitable physical device found");
                GraphicsError::NoSupportedDevice
            })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        candidate: &DeviceCandidate,
        with_swapchain: bool,
    ) -> GfxResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos = candidate
            .queue_families
            .unique_indices()
            .into_iter()
            .map(|index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(index)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        let enabled_extension_names = Self::get_required_device_extensions(with_swapchain)
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .enabled_features(&candidate.features);

        unsafe {
            instance
                .create_device(candidate.physical, &device_create_info, None)
                .map_err(|e| {
                    log::error!("Unable to create logical device: {}", e);
                    GraphicsError::from(e)
                })
        }
    }

    fn get_required_device_extensions(with_swapchain: bool) -> Vec<&'static CStr> {
        let mut exts = Vec::new();
        if with_swapchain {
            exts.push(ash::khr::swapchain::NAME);
        }
        #[cfg(target_os = "macos")]
        exts.push(ash::khr::portability_subset::NAME);
        exts
    }

    fn swapchain_loader(&self) -> VkResult<&ash::khr::swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)
    }

    fn surface_loader(&self) -> VkResult<&ash::khr::surface::Instance> {
        self.surface_loader
            .as_ref()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.logical.device_wait_idle();
            self.logical.destroy_device(None);
        }
    }
}

impl DeviceApi for AshDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical, format)
        }
    }

    fn limits(&self) -> vk::PhysicalDeviceLimits {
        self.properties.limits
    }

    fn enabled_features(&self) -> vk::PhysicalDeviceFeatures {
        self.enabled_features
    }

    fn queue_family_properties(&self) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .instance
                .get_physical_device_queue_family_properties(self.physical)
        }
    }

    unsafe fn get_device_queue(&self, family_index: u32, queue_index: u32) -> vk::Queue {
        unsafe { self.logical.get_device_queue(family_index, queue_index) }
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.logical.device_wait_idle() }
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        unsafe { self.logical.create_buffer(info, None) }
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.logical.destroy_buffer(buffer, None) }
    }

    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.logical.get_buffer_memory_requirements(buffer) }
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.logical.bind_buffer_memory(buffer, memory, offset) }
    }

    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory> {
        unsafe { self.logical.allocate_memory(info, None) }
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.logical.free_memory(memory, None) }
    }

    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        unsafe {
            self.logical
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
        }
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.logical.unmap_memory(memory) }
    }

    unsafe fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        unsafe { self.logical.create_image(info, None) }
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        unsafe { self.logical.destroy_image(image, None) }
    }

    unsafe fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.logical.get_image_memory_requirements(image) }
    }

    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.logical.bind_image_memory(image, memory, offset) }
    }

    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        unsafe { self.logical.create_image_view(info, None) }
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.logical.destroy_image_view(view, None) }
    }

    unsafe fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler> {
        unsafe { self.logical.create_sampler(info, None) }
    }

    unsafe fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.logical.destroy_sampler(sampler, None) }
    }

    unsafe fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo<'_>) -> VkResult<vk::CommandPool> {
        unsafe { self.logical.create_command_pool(info, None) }
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.logical.destroy_command_pool(pool, None) }
    }

    unsafe fn reset_command_pool(
        &self,
        pool: vk::CommandPool,
        flags: vk::CommandPoolResetFlags,
    ) -> VkResult<()> {
        unsafe { self.logical.reset_command_pool(pool, flags) }
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        unsafe { self.logical.allocate_command_buffers(info) }
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.logical.free_command_buffers(pool, buffers) }
    }

    unsafe fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        unsafe { self.logical.begin_command_buffer(buffer, info) }
    }

    unsafe fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.logical.end_command_buffer(buffer) }
    }

    unsafe fn reset_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> VkResult<()> {
        unsafe { self.logical.reset_command_buffer(buffer, flags) }
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        unsafe { self.logical.queue_submit(queue, submits, fence) }
    }

    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence> {
        unsafe { self.logical.create_fence(info, None) }
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.logical.destroy_fence(fence, None) }
    }

    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool, timeout: u64) -> VkResult<()> {
        unsafe { self.logical.wait_for_fences(fences, wait_all, timeout) }
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        unsafe { self.logical.reset_fences(fences) }
    }

    unsafe fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.logical.get_fence_status(fence) }
    }

    unsafe fn create_semaphore(&self, info: &vk::SemaphoreCreateInfo<'_>) -> VkResult<vk::Semaphore> {
        unsafe { self.logical.create_semaphore(info, None) }
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.logical.destroy_semaphore(semaphore, None) }
    }

    unsafe fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout> {
        unsafe { self.logical.create_descriptor_set_layout(info, None) }
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.logical.destroy_descriptor_set_layout(layout, None) }
    }

    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorPool> {
        unsafe { self.logical.create_descriptor_pool(info, None) }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.logical.destroy_descriptor_pool(pool, None) }
    }

    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        unsafe {
            self.logical
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        unsafe { self.logical.allocate_descriptor_sets(info) }
    }

    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        unsafe { self.logical.update_descriptor_sets(writes, &[]) }
    }

    unsafe fn create_shader_module(
        &self,
        info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> VkResult<vk::ShaderModule> {
        unsafe { self.logical.create_shader_module(info, None) }
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.logical.destroy_shader_module(module, None) }
    }

    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        unsafe { self.logical.create_pipeline_layout(info, None) }
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.logical.destroy_pipeline_layout(layout, None) }
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        let pipelines = unsafe {
            self.logical
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
                .map_err(|(_, err)| err)?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.logical.destroy_pipeline(pipeline, None) }
    }

    unsafe fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        unsafe { self.logical.create_render_pass(info, None) }
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.logical.destroy_render_pass(render_pass, None) }
    }

    unsafe fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>) -> VkResult<vk::Framebuffer> {
        unsafe { self.logical.create_framebuffer(info, None) }
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.logical.destroy_framebuffer(framebuffer, None) }
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffer_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.logical.cmd_pipeline_barrier(
                buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                buffer_barriers,
                image_barriers,
            )
        }
    }

    unsafe fn cmd_copy_buffer(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.logical.cmd_copy_buffer(buffer, src, dst, regions) }
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.logical
                .cmd_copy_buffer_to_image(buffer, src, dst, dst_layout, regions)
        }
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) {
        unsafe { self.logical.cmd_begin_render_pass(buffer, info, contents) }
    }

    unsafe fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) {
        unsafe { self.logical.cmd_end_render_pass(buffer) }
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.logical.cmd_bind_pipeline(buffer, bind_point, pipeline) }
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.logical
                .cmd_bind_descriptor_sets(buffer, bind_point, layout, first_set, sets, &[])
        }
    }

    unsafe fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.logical
                .cmd_push_constants(buffer, layout, stages, offset, data)
        }
    }

    unsafe fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewports: &[vk::Viewport]) {
        unsafe { self.logical.cmd_set_viewport(buffer, 0, viewports) }
    }

    unsafe fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissors: &[vk::Rect2D]) {
        unsafe { self.logical.cmd_set_scissor(buffer, 0, scissors) }
    }

    unsafe fn surface_capabilities(&self, surface: vk::SurfaceKHR) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_capabilities(self.physical, surface)
        }
    }

    unsafe fn surface_formats(&self, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_formats(self.physical, surface)
        }
    }

    unsafe fn surface_present_modes(&self, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_present_modes(self.physical, surface)
        }
    }

    unsafe fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR> {
        unsafe { self.swapchain_loader()?.create_swapchain(info, None) }
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if let Ok(loader) = self.swapchain_loader() {
            unsafe { loader.destroy_swapchain(swapchain, None) }
        }
    }

    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader()?.get_swapchain_images(swapchain) }
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader()?
                .acquire_next_image(swapchain, timeout, semaphore, fence)
        }
    }

    unsafe fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        unsafe { self.swapchain_loader()?.queue_present(queue, info) }
    }
}
