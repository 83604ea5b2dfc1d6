//! Recording device used by unit tests.
//!
//! Handles are fabricated with `vk::Handle::from_raw`. Device memory is backed by host
//! allocations so mapped writes land somewhere real. Submissions complete immediately and
//! signal their fence.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::c_void;
use std::slice;
use std::sync::{Arc, Mutex, MutexGuard};
use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;
use crate::renderer::contexts::device_ctx::api::DeviceApi;
use crate::renderer::contexts::device_ctx::queue::{QueueFamily, QueueFamilySelection};
use crate::renderer::contexts::device_ctx::DeviceContext;

pub(crate) const HOST_VISIBLE_TYPE: u32 = 1;
pub(crate) const DEVICE_LOCAL_TYPE: u32 = 0;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubmitRecord {
    pub queue: vk::Queue,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_semaphores: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImageBarrierRecord {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BarrierRecord {
    pub command_buffer: vk::CommandBuffer,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub images: Vec<ImageBarrierRecord>,
    pub buffer_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DescriptorWriteRecord {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub array_element: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub buffer: Option<vk::Buffer>,
    pub image_view: Option<vk::ImageView>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SwapchainRecord {
    pub swapchain: vk::SwapchainKHR,
    pub min_image_count: u32,
    pub extent: vk::Extent2D,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub old_swapchain: vk::SwapchainKHR,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    AllocateMemory { memory: vk::DeviceMemory, size: vk::DeviceSize, type_index: u32 },
    FreeMemory(vk::DeviceMemory),
    BindBufferMemory { buffer: vk::Buffer, memory: vk::DeviceMemory, offset: vk::DeviceSize },
    CreateBuffer { buffer: vk::Buffer, size: vk::DeviceSize, sharing_mode: vk::SharingMode },
    DestroyBuffer(vk::Buffer),
    CreateImage { image: vk::Image, format: vk::Format, sharing_mode: vk::SharingMode },
    DestroyImage(vk::Image),
    CreateFence { fence: vk::Fence, signaled: bool },
    DestroyFence(vk::Fence),
    WaitFences(Vec<vk::Fence>),
    ResetFences(Vec<vk::Fence>),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    AllocateCommandBuffers { pool: vk::CommandPool, level: vk::CommandBufferLevel, buffers: Vec<vk::CommandBuffer> },
    FreeCommandBuffers { pool: vk::CommandPool, buffers: Vec<vk::CommandBuffer> },
    ResetCommandPool(vk::CommandPool),
    Begin { command_buffer: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags },
    End(vk::CommandBuffer),
    ResetCommandBuffer(vk::CommandBuffer),
    Submit(SubmitRecord),
    Barrier(BarrierRecord),
    CopyBuffer { src: vk::Buffer, dst: vk::Buffer },
    CopyBufferToImage { src: vk::Buffer, dst: vk::Image, layout: vk::ImageLayout },
    CreateDescriptorPool { pool: vk::DescriptorPool, max_sets: u32, sizes: Vec<(vk::DescriptorType, u32)> },
    DestroyDescriptorPool(vk::DescriptorPool),
    ResetDescriptorPool(vk::DescriptorPool),
    UpdateDescriptorSets(Vec<DescriptorWriteRecord>),
    CreatePipelineLayout { layout: vk::PipelineLayout, set_layouts: Vec<vk::DescriptorSetLayout>, push_constant_ranges: u32 },
    DestroyPipelineLayout(vk::PipelineLayout),
    CreatePipeline { pipeline: vk::Pipeline, layout: vk::PipelineLayout, stages: u32 },
    DestroyPipeline(vk::Pipeline),
    CreateRenderPass { render_pass: vk::RenderPass, attachments: u32, subpasses: u32, dependencies: u32 },
    DestroyRenderPass(vk::RenderPass),
    CreateFramebuffer(vk::Framebuffer),
    DestroyFramebuffer(vk::Framebuffer),
    CreateSwapchain(SwapchainRecord),
    DestroySwapchain(vk::SwapchainKHR),
    BeginRenderPass { render_pass: vk::RenderPass, framebuffer: vk::Framebuffer },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    BindDescriptorSets { first_set: u32, sets: Vec<vk::DescriptorSet> },
    PushConstants { offset: u32, size: usize },
    Present { image_index: u32 },
    WaitIdle,
}

struct DescriptorPoolUsage {
    max_sets: u32,
    capacity: HashMap<vk::DescriptorType, u32>,
    remaining: HashMap<vk::DescriptorType, u32>,
    sets: u32,
}

pub(crate) struct MockState {
    next_handle: u64,
    pub events: Vec<Event>,

    pub memory: HashMap<vk::DeviceMemory, Box<[u8]>>,
    pub buffer_alignment: vk::DeviceSize,
    buffer_sizes: HashMap<vk::Buffer, vk::DeviceSize>,
    image_sizes: HashMap<vk::Image, vk::DeviceSize>,
    pub mapped: HashSet<vk::DeviceMemory>,
    pub fail_memory_allocation: Option<vk::Result>,

    pub fences: HashMap<vk::Fence, bool>,
    pub fail_fence_creation: bool,
    pub live_semaphores: HashSet<vk::Semaphore>,

    pub command_pools_created: usize,
    pub command_pools_destroyed: usize,
    pub fail_command_buffer_allocation: bool,
    pub submit_results: VecDeque<vk::Result>,
    pub wait_results: VecDeque<vk::Result>,

    set_layouts: HashMap<vk::DescriptorSetLayout, Vec<(vk::DescriptorType, u32)>>,
    descriptor_pools: HashMap<vk::DescriptorPool, DescriptorPoolUsage>,
    pub fail_descriptor_allocation: Option<vk::Result>,

    pub fail_pipeline_creation: bool,
    pub fail_pipeline_layout_creation: bool,
    pub fail_render_pass_creation: bool,
    pub unsupported_formats: HashSet<vk::Format>,

    pub surface_capabilities: vk::SurfaceCapabilitiesKHR,
    swapchain_images: HashMap<vk::SwapchainKHR, u32>,
    pub acquire_results: VecDeque<VkResult<(u32, bool)>>,
    pub present_results: VecDeque<VkResult<bool>>,
    next_image: u32,
}

impl MockState {
    fn handle<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| predicate(*e)).count()
    }

    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.iter().position(predicate)
    }

    pub fn submits(&self) -> Vec<SubmitRecord> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Submit(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn barriers(&self) -> Vec<BarrierRecord> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Barrier(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn allocations(&self) -> usize {
        self.count(|e| matches!(e, Event::AllocateMemory { .. }))
    }

    pub fn descriptor_pools_created(&self) -> usize {
        self.count(|e| matches!(e, Event::CreateDescriptorPool { .. }))
    }

    pub fn live_descriptor_pools(&self) -> usize {
        self.descriptor_pools.len()
    }

    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.fences.get(&fence).copied().unwrap_or(false)
    }
}

pub(crate) struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        let state = MockState {
            next_handle: 0x1000,
            events: Vec::new(),
            memory: HashMap::new(),
            buffer_alignment: 64,
            buffer_sizes: HashMap::new(),
            image_sizes: HashMap::new(),
            mapped: HashSet::new(),
            fail_memory_allocation: None,
            fences: HashMap::new(),
            fail_fence_creation: false,
            live_semaphores: HashSet::new(),
            command_pools_created: 0,
            command_pools_destroyed: 0,
            fail_command_buffer_allocation: false,
            submit_results: VecDeque::new(),
            wait_results: VecDeque::new(),
            set_layouts: HashMap::new(),
            descriptor_pools: HashMap::new(),
            fail_descriptor_allocation: None,
            fail_pipeline_creation: false,
            fail_pipeline_layout_creation: false,
            fail_render_pass_creation: false,
            unsupported_formats: HashSet::from([vk::Format::R8G8B8_SRGB]),
            surface_capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D { width: 800, height: 600 },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            swapchain_images: HashMap::new(),
            acquire_results: VecDeque::new(),
            present_results: VecDeque::new(),
            next_image: 0,
        };
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Family 0 does graphics and present; with `dual_queue` family 1 is a transfer-only family.
    pub fn selection(dual_queue: bool) -> QueueFamilySelection {
        let mut families = vec![QueueFamily::new(
            0,
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
            true,
        )];
        if dual_queue {
            families.push(QueueFamily::new(
                1,
                vk::QueueFamilyProperties {
                    queue_flags: vk::QueueFlags::TRANSFER,
                    queue_count: 1,
                    ..Default::default()
                },
                false,
            ));
        }
        QueueFamilySelection::select(&families, true, true).expect("mock families are complete")
    }
}

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn mock_context(dual_queue: bool) -> (Arc<MockDevice>, Arc<DeviceContext>) {
    init_logging();
    let mock = MockDevice::new();
    let ctx = DeviceContext::new(mock.clone(), MockDevice::selection(dual_queue))
        .expect("mock device context");
    (mock, ctx)
}

pub(crate) fn test_context(dual_queue: bool) -> Arc<DeviceContext> {
    mock_context(dual_queue).1
}

unsafe fn raw_slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(ptr, len as usize) }
    }
}

fn round_up(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    size.div_ceil(alignment) * alignment
}

impl DeviceApi for MockDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 2,
            ..Default::default()
        };
        props.memory_types[DEVICE_LOCAL_TYPE as usize] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        props.memory_types[HOST_VISIBLE_TYPE as usize] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        props.memory_heaps[0] = vk::MemoryHeap {
            size: 1 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        props.memory_heaps[1] = vk::MemoryHeap {
            size: 1 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        props
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        if self.state().unsupported_formats.contains(&format) {
            return vk::FormatProperties::default();
        }
        vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::TRANSFER_SRC | vk::FormatFeatureFlags::TRANSFER_DST,
            optimal_tiling_features: vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::FormatFeatureFlags::TRANSFER_SRC
                | vk::FormatFeatureFlags::TRANSFER_DST,
            buffer_features: vk::FormatFeatureFlags::empty(),
        }
    }

    fn limits(&self) -> vk::PhysicalDeviceLimits {
        vk::PhysicalDeviceLimits {
            max_sampler_anisotropy: 16.0,
            min_uniform_buffer_offset_alignment: 64,
            non_coherent_atom_size: 64,
            ..Default::default()
        }
    }

    fn enabled_features(&self) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            fill_mode_non_solid: vk::TRUE,
            ..Default::default()
        }
    }

    fn queue_family_properties(&self) -> Vec<vk::QueueFamilyProperties> {
        Vec::new()
    }

    unsafe fn get_device_queue(&self, family_index: u32, queue_index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x100 + (family_index as u64) * 0x10 + queue_index as u64)
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        self.state().events.push(Event::WaitIdle);
        Ok(())
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        let mut state = self.state();
        let buffer = state.handle();
        state.buffer_sizes.insert(buffer, info.size);
        state.events.push(Event::CreateBuffer {
            buffer,
            size: info.size,
            sharing_mode: info.sharing_mode,
        });
        Ok(buffer)
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        state.buffer_sizes.remove(&buffer);
        state.events.push(Event::DestroyBuffer(buffer));
    }

    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state();
        let size = state.buffer_sizes.get(&buffer).copied().unwrap_or(0);
        vk::MemoryRequirements {
            size: round_up(size, state.buffer_alignment),
            alignment: state.buffer_alignment,
            memory_type_bits: 0b11,
        }
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        self.state().events.push(Event::BindBufferMemory { buffer, memory, offset });
        Ok(())
    }

    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory> {
        let mut state = self.state();
        if let Some(err) = state.fail_memory_allocation {
            return Err(err);
        }
        let memory = state.handle();
        state
            .memory
            .insert(memory, vec![0u8; info.allocation_size as usize].into_boxed_slice());
        state.events.push(Event::AllocateMemory {
            memory,
            size: info.allocation_size,
            type_index: info.memory_type_index,
        });
        Ok(memory)
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state();
        state.memory.remove(&memory);
        state.mapped.remove(&memory);
        state.events.push(Event::FreeMemory(memory));
    }

    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        _size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        let mut state = self.state();
        let ptr = match state.memory.get_mut(&memory) {
            Some(backing) if (offset as usize) <= backing.len() => unsafe {
                backing.as_mut_ptr().add(offset as usize) as *mut c_void
            },
            _ => return Err(vk::Result::ERROR_MEMORY_MAP_FAILED),
        };
        state.mapped.insert(memory);
        Ok(ptr)
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        self.state().mapped.remove(&memory);
    }

    unsafe fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        let mut state = self.state();
        let image = state.handle();
        let extent = info.extent;
        let size = extent.width as u64 * extent.height as u64 * extent.depth.max(1) as u64 * 4;
        state.image_sizes.insert(image, size);
        state.events.push(Event::CreateImage {
            image,
            format: info.format,
            sharing_mode: info.sharing_mode,
        });
        Ok(image)
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state();
        state.image_sizes.remove(&image);
        state.events.push(Event::DestroyImage(image));
    }

    unsafe fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state();
        let size = state.image_sizes.get(&image).copied().unwrap_or(0);
        vk::MemoryRequirements {
            size: round_up(size, 256),
            alignment: 256,
            memory_type_bits: 0b11,
        }
    }

    unsafe fn bind_image_memory(
        &self,
        _image: vk::Image,
        _memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> VkResult<()> {
        Ok(())
    }

    unsafe fn create_image_view(&self, _info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        Ok(self.state().handle())
    }

    unsafe fn destroy_image_view(&self, _view: vk::ImageView) {}

    unsafe fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler> {
        Ok(self.state().handle())
    }

    unsafe fn destroy_sampler(&self, _sampler: vk::Sampler) {}

    unsafe fn create_command_pool(&self, _info: &vk::CommandPoolCreateInfo<'_>) -> VkResult<vk::CommandPool> {
        let mut state = self.state();
        state.command_pools_created += 1;
        Ok(state.handle())
    }

    unsafe fn destroy_command_pool(&self, _pool: vk::CommandPool) {
        self.state().command_pools_destroyed += 1;
    }

    unsafe fn reset_command_pool(
        &self,
        pool: vk::CommandPool,
        _flags: vk::CommandPoolResetFlags,
    ) -> VkResult<()> {
        self.state().events.push(Event::ResetCommandPool(pool));
        Ok(())
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        if state.fail_command_buffer_allocation {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let buffers = (0..info.command_buffer_count)
            .map(|_| state.handle())
            .collect::<Vec<vk::CommandBuffer>>();
        state.events.push(Event::AllocateCommandBuffers {
            pool: info.command_pool,
            level: info.level,
            buffers: buffers.clone(),
        });
        Ok(buffers)
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.state().events.push(Event::FreeCommandBuffers {
            pool,
            buffers: buffers.to_vec(),
        });
    }

    unsafe fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        self.state().events.push(Event::Begin {
            command_buffer: buffer,
            flags: info.flags,
        });
        Ok(())
    }

    unsafe fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state().events.push(Event::End(buffer));
        Ok(())
    }

    unsafe fn reset_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferResetFlags,
    ) -> VkResult<()> {
        self.state().events.push(Event::ResetCommandBuffer(buffer));
        Ok(())
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state();
        if let Some(err) = state.submit_results.pop_front() {
            if err != vk::Result::SUCCESS {
                return Err(err);
            }
        }
        for submit in submits {
            let (command_buffers, waits, stages, signals) = unsafe {
                (
                    raw_slice(submit.p_command_buffers, submit.command_buffer_count),
                    raw_slice(submit.p_wait_semaphores, submit.wait_semaphore_count),
                    raw_slice(submit.p_wait_dst_stage_mask, submit.wait_semaphore_count),
                    raw_slice(submit.p_signal_semaphores, submit.signal_semaphore_count),
                )
            };
            state.events.push(Event::Submit(SubmitRecord {
                queue,
                command_buffers: command_buffers.to_vec(),
                wait_semaphores: waits.iter().copied().zip(stages.iter().copied()).collect(),
                signal_semaphores: signals.to_vec(),
                fence,
            }));
        }
        if fence != vk::Fence::null() {
            state.fences.insert(fence, true);
        }
        Ok(())
    }

    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence> {
        let mut state = self.state();
        if state.fail_fence_creation {
            return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        }
        let fence = state.handle();
        let signaled = info.flags.contains(vk::FenceCreateFlags::SIGNALED);
        state.fences.insert(fence, signaled);
        state.events.push(Event::CreateFence { fence, signaled });
        Ok(fence)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.fences.remove(&fence);
        state.events.push(Event::DestroyFence(fence));
    }

    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], _wait_all: bool, _timeout: u64) -> VkResult<()> {
        let mut state = self.state();
        state.events.push(Event::WaitFences(fences.to_vec()));
        if let Some(err) = state.wait_results.pop_front() {
            if err != vk::Result::SUCCESS {
                return Err(err);
            }
        }
        // Nothing would ever signal these
        if fences.iter().any(|f| !state.is_fence_signaled(*f)) {
            return Err(vk::Result::TIMEOUT);
        }
        Ok(())
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        let mut state = self.state();
        for fence in fences {
            state.fences.insert(*fence, false);
        }
        state.events.push(Event::ResetFences(fences.to_vec()));
        Ok(())
    }

    unsafe fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        Ok(self.state().is_fence_signaled(fence))
    }

    unsafe fn create_semaphore(&self, _info: &vk::SemaphoreCreateInfo<'_>) -> VkResult<vk::Semaphore> {
        let mut state = self.state();
        let semaphore = state.handle();
        state.live_semaphores.insert(semaphore);
        state.events.push(Event::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state();
        state.live_semaphores.remove(&semaphore);
        state.events.push(Event::DestroySemaphore(semaphore));
    }

    unsafe fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout> {
        let bindings = unsafe { raw_slice(info.p_bindings, info.binding_count) }
            .iter()
            .map(|b| (b.descriptor_type, b.descriptor_count))
            .collect();
        let mut state = self.state();
        let layout = state.handle();
        state.set_layouts.insert(layout, bindings);
        Ok(layout)
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state().set_layouts.remove(&layout);
    }

    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorPool> {
        let sizes = unsafe { raw_slice(info.p_pool_sizes, info.pool_size_count) }
            .iter()
            .map(|s| (s.ty, s.descriptor_count))
            .collect::<Vec<_>>();
        let mut capacity = HashMap::new();
        for (ty, count) in &sizes {
            *capacity.entry(*ty).or_insert(0) += *count;
        }
        let mut state = self.state();
        let pool = state.handle();
        state.descriptor_pools.insert(
            pool,
            DescriptorPoolUsage {
                max_sets: info.max_sets,
                remaining: capacity.clone(),
                capacity,
                sets: 0,
            },
        );
        state.events.push(Event::CreateDescriptorPool {
            pool,
            max_sets: info.max_sets,
            sizes,
        });
        Ok(pool)
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        state.descriptor_pools.remove(&pool);
        state.events.push(Event::DestroyDescriptorPool(pool));
    }

    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        let mut state = self.state();
        if let Some(usage) = state.descriptor_pools.get_mut(&pool) {
            usage.remaining = usage.capacity.clone();
            usage.sets = 0;
        }
        state.events.push(Event::ResetDescriptorPool(pool));
        Ok(())
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let layouts = unsafe { raw_slice(info.p_set_layouts, info.descriptor_set_count) };
        let mut state = self.state();
        if let Some(err) = state.fail_descriptor_allocation {
            return Err(err);
        }

        let mut needed: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for layout in layouts {
            for (ty, count) in state.set_layouts.get(layout).into_iter().flatten() {
                *needed.entry(*ty).or_insert(0) += *count;
            }
        }

        let usage = state
            .descriptor_pools
            .get_mut(&info.descriptor_pool)
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        if usage.sets + layouts.len() as u32 > usage.max_sets {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        for (ty, count) in &needed {
            if usage.remaining.get(ty).copied().unwrap_or(0) < *count {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
        }
        for (ty, count) in &needed {
            if let Some(remaining) = usage.remaining.get_mut(ty) {
                *remaining -= *count;
            }
        }
        usage.sets += layouts.len() as u32;

        Ok(layouts.iter().map(|_| state.handle()).collect())
    }

    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        let records = writes
            .iter()
            .map(|w| {
                let buffer = unsafe { w.p_buffer_info.as_ref() }.map(|info| info.buffer);
                let image_view = unsafe { w.p_image_info.as_ref() }.map(|info| info.image_view);
                DescriptorWriteRecord {
                    set: w.dst_set,
                    binding: w.dst_binding,
                    array_element: w.dst_array_element,
                    descriptor_type: w.descriptor_type,
                    count: w.descriptor_count,
                    buffer,
                    image_view,
                }
            })
            .collect();
        self.state().events.push(Event::UpdateDescriptorSets(records));
    }

    unsafe fn create_shader_module(
        &self,
        _info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> VkResult<vk::ShaderModule> {
        Ok(self.state().handle())
    }

    unsafe fn destroy_shader_module(&self, _module: vk::ShaderModule) {}

    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        let set_layouts = unsafe { raw_slice(info.p_set_layouts, info.set_layout_count) }.to_vec();
        let mut state = self.state();
        if state.fail_pipeline_layout_creation {
            return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        }
        let layout = state.handle();
        state.events.push(Event::CreatePipelineLayout {
            layout,
            set_layouts,
            push_constant_ranges: info.push_constant_range_count,
        });
        Ok(layout)
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state().events.push(Event::DestroyPipelineLayout(layout));
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        let mut state = self.state();
        if state.fail_pipeline_creation {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let pipeline = state.handle();
        state.events.push(Event::CreatePipeline {
            pipeline,
            layout: info.layout,
            stages: info.stage_count,
        });
        Ok(pipeline)
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state().events.push(Event::DestroyPipeline(pipeline));
    }

    unsafe fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        let mut state = self.state();
        if state.fail_render_pass_creation {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let render_pass = state.handle();
        state.events.push(Event::CreateRenderPass {
            render_pass,
            attachments: info.attachment_count,
            subpasses: info.subpass_count,
            dependencies: info.dependency_count,
        });
        Ok(render_pass)
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state().events.push(Event::DestroyRenderPass(render_pass));
    }

    unsafe fn create_framebuffer(&self, _info: &vk::FramebufferCreateInfo<'_>) -> VkResult<vk::Framebuffer> {
        let mut state = self.state();
        let framebuffer = state.handle();
        state.events.push(Event::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state().events.push(Event::DestroyFramebuffer(framebuffer));
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffer_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        let images = image_barriers
            .iter()
            .map(|b| ImageBarrierRecord {
                image: b.image,
                old_layout: b.old_layout,
                new_layout: b.new_layout,
                src_access: b.src_access_mask,
                dst_access: b.dst_access_mask,
                src_queue_family: b.src_queue_family_index,
                dst_queue_family: b.dst_queue_family_index,
            })
            .collect();
        self.state().events.push(Event::Barrier(BarrierRecord {
            command_buffer: buffer,
            src_stage,
            dst_stage,
            images,
            buffer_count: buffer_barriers.len(),
        }));
    }

    unsafe fn cmd_copy_buffer(
        &self,
        _buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        _regions: &[vk::BufferCopy],
    ) {
        self.state().events.push(Event::CopyBuffer { src, dst });
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        _buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        self.state().events.push(Event::CopyBufferToImage {
            src,
            dst,
            layout: dst_layout,
        });
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        _buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        _contents: vk::SubpassContents,
    ) {
        self.state().events.push(Event::BeginRenderPass {
            render_pass: info.render_pass,
            framebuffer: info.framebuffer,
        });
    }

    unsafe fn cmd_end_render_pass(&self, _buffer: vk::CommandBuffer) {
        self.state().events.push(Event::EndRenderPass);
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        _buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.state().events.push(Event::BindPipeline(pipeline));
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        _buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.state().events.push(Event::BindDescriptorSets {
            first_set,
            sets: sets.to_vec(),
        });
    }

    unsafe fn cmd_push_constants(
        &self,
        _buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.state().events.push(Event::PushConstants {
            offset,
            size: data.len(),
        });
    }

    unsafe fn cmd_set_viewport(&self, _buffer: vk::CommandBuffer, _viewports: &[vk::Viewport]) {}

    unsafe fn cmd_set_scissor(&self, _buffer: vk::CommandBuffer, _scissors: &[vk::Rect2D]) {}

    unsafe fn surface_capabilities(&self, _surface: vk::SurfaceKHR) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state().surface_capabilities)
    }

    unsafe fn surface_formats(&self, _surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ])
    }

    unsafe fn surface_present_modes(&self, _surface: vk::SurfaceKHR) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX])
    }

    unsafe fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR> {
        let queue_family_indices =
            unsafe { raw_slice(info.p_queue_family_indices, info.queue_family_index_count) }.to_vec();
        let mut state = self.state();
        let swapchain = state.handle();
        state.swapchain_images.insert(swapchain, info.min_image_count);
        state.next_image = 0;
        state.events.push(Event::CreateSwapchain(SwapchainRecord {
            swapchain,
            min_image_count: info.min_image_count,
            extent: info.image_extent,
            sharing_mode: info.image_sharing_mode,
            queue_family_indices,
            old_swapchain: info.old_swapchain,
        }));
        Ok(swapchain)
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        state.swapchain_images.remove(&swapchain);
        state.events.push(Event::DestroySwapchain(swapchain));
    }

    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut state = self.state();
        let count = state
            .swapchain_images
            .get(&swapchain)
            .copied()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        Ok((0..count).map(|_| state.handle()).collect())
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        _semaphore: vk::Semaphore,
        _fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state();
        if let Some(result) = state.acquire_results.pop_front() {
            return result;
        }
        let count = state.swapchain_images.get(&swapchain).copied().unwrap_or(1).max(1);
        let index = state.next_image % count;
        state.next_image = state.next_image.wrapping_add(1);
        Ok((index, false))
    }

    unsafe fn queue_present(&self, _queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        let indices = unsafe { raw_slice(info.p_image_indices, info.swapchain_count) };
        let mut state = self.state();
        if let Some(result) = state.present_results.pop_front() {
            return result;
        }
        for index in indices {
            state.events.push(Event::Present { image_index: *index });
        }
        Ok(false)
    }
}
