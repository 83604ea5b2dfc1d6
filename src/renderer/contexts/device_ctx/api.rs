use std::ffi::c_void;
use ash::prelude::VkResult;
use ash::vk;

/// The set of device entry points the renderer core is built on.
///
/// `AshDevice` forwards every call to the Vulkan driver. Tests use a recording mock so the
/// lifecycle rules (allocation, pool growth, fences, queue ownership) can be checked without a GPU.
///
/// # Safety
/// The `unsafe` methods carry the same contracts as the Vulkan commands they wrap: handles must
/// belong to this device and must not be in use by the GPU when destroyed.
#[allow(clippy::missing_safety_doc)]
pub trait DeviceApi: Send + Sync {
    // Physical device queries
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;
    fn limits(&self) -> vk::PhysicalDeviceLimits;
    fn enabled_features(&self) -> vk::PhysicalDeviceFeatures;
    fn queue_family_properties(&self) -> Vec<vk::QueueFamilyProperties>;

    unsafe fn get_device_queue(&self, family_index: u32, queue_index: u32) -> vk::Queue;
    unsafe fn device_wait_idle(&self) -> VkResult<()>;

    // Buffers and memory
    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer>;
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer);
    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory>;
    unsafe fn free_memory(&self, memory: vk::DeviceMemory);
    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void>;
    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory);

    // Images
    unsafe fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image>;
    unsafe fn destroy_image(&self, image: vk::Image);
    unsafe fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView>;
    unsafe fn destroy_image_view(&self, view: vk::ImageView);
    unsafe fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler>;
    unsafe fn destroy_sampler(&self, sampler: vk::Sampler);

    // Command pools and buffers
    unsafe fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo<'_>) -> VkResult<vk::CommandPool>;
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn reset_command_pool(
        &self,
        pool: vk::CommandPool,
        flags: vk::CommandPoolResetFlags,
    ) -> VkResult<()>;
    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    unsafe fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()>;
    unsafe fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;
    unsafe fn reset_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> VkResult<()>;
    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()>;

    // Synchronization
    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool, timeout: u64) -> VkResult<()>;
    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()>;
    unsafe fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool>;
    unsafe fn create_semaphore(&self, info: &vk::SemaphoreCreateInfo<'_>) -> VkResult<vk::Semaphore>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Descriptors
    unsafe fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout>;
    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorPool>;
    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()>;
    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);

    // Pipelines and passes
    unsafe fn create_shader_module(
        &self,
        info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> VkResult<vk::ShaderModule>;
    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule);
    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout>;
    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline>;
    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    unsafe fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass>;
    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    unsafe fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>) -> VkResult<vk::Framebuffer>;
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Recording
    unsafe fn cmd_pipeline_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffer_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    );
    unsafe fn cmd_copy_buffer(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    unsafe fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    unsafe fn cmd_begin_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    );
    unsafe fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer);
    unsafe fn cmd_bind_pipeline(
        &self,
        buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    unsafe fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    unsafe fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    unsafe fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewports: &[vk::Viewport]);
    unsafe fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissors: &[vk::Rect2D]);

    // Presentation
    unsafe fn surface_capabilities(&self, surface: vk::SurfaceKHR) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    unsafe fn surface_formats(&self, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    unsafe fn surface_present_modes(&self, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::PresentModeKHR>>;
    unsafe fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR>;
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    /// Returns the image index and whether the swapchain is suboptimal.
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)>;
    /// Returns whether the swapchain is suboptimal.
    unsafe fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool>;
}
