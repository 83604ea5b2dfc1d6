use std::sync::Arc;
use ash::vk;
use crate::renderer::command_buffer::CommandBuffer;
use crate::renderer::contexts::device_ctx::queue::QueueRole;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::descriptor::{DescriptorSetAllocator, DescriptorSetLayout};
use crate::renderer::error::{memory_or, GfxResult, GraphicsError};

/// Everything one frame in flight records into and synchronizes on.
pub struct Frame {
    // Fence created signaled so the first wait on a fresh frame returns immediately.
    command_buffer: CommandBuffer,

    // Signals when the swapchain image is ready to be rendered to.
    image_available: vk::Semaphore,

    // Signals when rendering commands have finished and the image may be presented.
    render_finished: vk::Semaphore,

    // Pools for sets that only live for this frame; reset once the frame's fence signals.
    descriptors: DescriptorSetAllocator,

    ctx: Arc<DeviceContext>,
}

impl Frame {
    /// `layouts` are the descriptor layouts allocated per frame, each with room for
    /// `alloc_count` sets in every pool.
    pub fn new(ctx: Arc<DeviceContext>, layouts: &[&DescriptorSetLayout], alloc_count: u32) -> GfxResult<Self> {
        let mut descriptors = DescriptorSetAllocator::new(ctx.clone());
        for layout in layouts {
            descriptors.add_descriptor_layout(layout, alloc_count);
        }
        descriptors.initialize()?;

        let mut command_buffer = CommandBuffer::new(ctx.clone());
        command_buffer.set_wait_fence(true, None, vk::FenceCreateFlags::SIGNALED);
        command_buffer.initialize(QueueRole::Graphics, None)?;

        let image_available = create_semaphore(&ctx)?;
        let render_finished = match create_semaphore(&ctx) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { ctx.device().destroy_semaphore(image_available) };
                return Err(e);
            }
        };

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            descriptors,
            ctx,
        })
    }

    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    pub fn command_buffer_mut(&mut self) -> &mut CommandBuffer {
        &mut self.command_buffer
    }

    pub fn descriptors(&mut self) -> &mut DescriptorSetAllocator {
        &mut self.descriptors
    }

    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished
    }

    /// Replaces the sync objects a frame abandoned after acquiring leaves behind: a fence that may
    /// never signal and an acquire semaphore holding a signal nothing waits on.
    pub fn recover(&mut self) -> GfxResult<()> {
        self.command_buffer.replace_owned_fence()?;
        let semaphore = create_semaphore(&self.ctx)?;
        unsafe { self.ctx.device().destroy_semaphore(self.image_available) };
        self.image_available = semaphore;
        Ok(())
    }

    /// Blocks until the GPU is done with the previous use of this frame.
    pub fn wait(&self) -> GfxResult<()> {
        if !self.command_buffer.wait(u64::MAX)? {
            log::error!("Frame fence did not signal");
            return Err(GraphicsError::QueueError);
        }
        Ok(())
    }
}

fn create_semaphore(ctx: &DeviceContext) -> GfxResult<vk::Semaphore> {
    unsafe { ctx.device().create_semaphore(&vk::SemaphoreCreateInfo::default()) }
        .map_err(|e| memory_or(e, GraphicsError::InitializationFailed))
}

impl Drop for Frame {
    fn drop(&mut self) {
        let _ = self.wait();
        unsafe {
            self.ctx.device().destroy_semaphore(self.image_available);
            self.ctx.device().destroy_semaphore(self.render_finished);
        }
    }
}
