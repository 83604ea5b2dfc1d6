use std::sync::Arc;
use ash::vk;
use bitflags::bitflags;
use crate::renderer::contexts::device_ctx::queue::QueueRole;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{GfxResult, GraphicsError};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct CommandBufferFlags: u8 {
        const SINGLE_USE = 1 << 0;
        const SECONDARY = 1 << 1;
        const OWNS_COMMAND_BUFFER = 1 << 2;
        const USE_FENCE = 1 << 3;
        const OWNS_FENCE = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Configured,
    Initialized,
    Recording,
    Executable,
    Submitted,
}

/// A command buffer bound to one queue role, with its own completion fence and the
/// semaphores its next submission waits on and signals.
///
/// Configure with `set_single_use`, `set_level` and `set_wait_fence`, then `initialize`.
/// `clear` returns to the configured state so the object can be initialized again.
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    fence: vk::Fence,
    fence_flags: vk::FenceCreateFlags,
    flags: CommandBufferFlags,
    role: Option<QueueRole>,
    state: CommandBufferState,

    wait_semaphores: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    signal_semaphores: Vec<vk::Semaphore>,

    ctx: Arc<DeviceContext>,
}

impl CommandBuffer {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            handle: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            fence_flags: vk::FenceCreateFlags::empty(),
            flags: CommandBufferFlags::empty(),
            role: None,
            state: CommandBufferState::Configured,
            wait_semaphores: Vec::new(),
            wait_stages: Vec::new(),
            signal_semaphores: Vec::new(),
            ctx,
        }
    }

    pub fn set_single_use(&mut self, single_use: bool) -> &mut Self {
        self.flags.set(CommandBufferFlags::SINGLE_USE, single_use);
        self
    }

    pub fn set_level(&mut self, level: vk::CommandBufferLevel) -> &mut Self {
        assert_eq!(self.handle, vk::CommandBuffer::null(), "level must be set before initialize");
        self.flags
            .set(CommandBufferFlags::SECONDARY, level == vk::CommandBufferLevel::SECONDARY);
        self
    }

    /// `fence = Some(f)` uses an external fence that this object never destroys. `None` makes
    /// `initialize` create an owned fence with `fence_flags`. `use_fence = false` drops any fence.
    pub fn set_wait_fence(
        &mut self,
        use_fence: bool,
        fence: Option<vk::Fence>,
        fence_flags: vk::FenceCreateFlags,
    ) -> &mut Self {
        match (use_fence, fence) {
            (true, Some(external)) => {
                self.destroy_owned_fence();
                self.fence = external;
                self.flags.remove(CommandBufferFlags::OWNS_FENCE);
                self.flags.insert(CommandBufferFlags::USE_FENCE);
            }
            (true, None) => {
                if !self.flags.contains(CommandBufferFlags::OWNS_FENCE) {
                    self.fence = vk::Fence::null();
                }
                self.fence_flags = fence_flags;
                self.flags
                    .insert(CommandBufferFlags::USE_FENCE | CommandBufferFlags::OWNS_FENCE);
            }
            (false, _) => {
                self.destroy_owned_fence();
                self.fence = vk::Fence::null();
                self.flags
                    .remove(CommandBufferFlags::USE_FENCE | CommandBufferFlags::OWNS_FENCE);
            }
        }
        self
    }

    /// Allocates from the role's command pool unless `external` supplies a handle, then creates
    /// the owned fence if one was requested.
    pub fn initialize(&mut self, role: QueueRole, external: Option<vk::CommandBuffer>) -> GfxResult<()> {
        assert_eq!(self.handle, vk::CommandBuffer::null(), "command buffer already initialized");

        match external {
            Some(handle) => {
                self.handle = handle;
                self.flags.remove(CommandBufferFlags::OWNS_COMMAND_BUFFER);
            }
            None => {
                let buffers = self.ctx.allocate_command_buffers(role, self.level(), 1)?;
                self.handle = buffers
                    .first()
                    .copied()
                    .ok_or(GraphicsError::CommandBufferCreateError)?;
                self.flags.insert(CommandBufferFlags::OWNS_COMMAND_BUFFER);
            }
        }
        self.role = Some(role);

        let wants_owned_fence = self
            .flags
            .contains(CommandBufferFlags::USE_FENCE | CommandBufferFlags::OWNS_FENCE);
        if wants_owned_fence && self.fence == vk::Fence::null() {
            let info = vk::FenceCreateInfo::default().flags(self.fence_flags);
            match unsafe { self.ctx.device().create_fence(&info) } {
                Ok(fence) => self.fence = fence,
                Err(e) => {
                    log::error!("Unable to create command buffer fence: {}", e);
                    self.clear();
                    return Err(GraphicsError::InitializationFailed);
                }
            }
        }

        self.state = CommandBufferState::Initialized;
        Ok(())
    }

    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> GfxResult<()> {
        let mut flags = flags;
        if self.flags.contains(CommandBufferFlags::SINGLE_USE) {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe {
            self.ctx.device().begin_command_buffer(self.handle, &info).map_err(|e| {
                log::error!("Unable to begin command buffer: {}", e);
                GraphicsError::QueueError
            })?;
        }
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub fn end(&mut self) -> GfxResult<()> {
        unsafe {
            self.ctx.device().end_command_buffer(self.handle).map_err(|e| {
                log::error!("Unable to end command buffer: {}", e);
                GraphicsError::QueueError
            })?;
        }
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    pub fn add_wait_semaphore(&mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) {
        self.wait_semaphores.push(semaphore);
        self.wait_stages.push(stage);
    }

    pub fn add_signal_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.signal_semaphores.push(semaphore);
    }

    /// Submits to the queue of the role given at `initialize`, signaling the fence if any.
    pub fn submit(&mut self) -> GfxResult<()> {
        let role = self.role.ok_or(GraphicsError::QueueError)?;
        let device = self.ctx.device();

        if self.fence != vk::Fence::null() {
            unsafe { device.reset_fences(&[self.fence]) }.map_err(|e| {
                log::error!("Unable to reset command buffer fence: {}", e);
                submit_error(e)
            })?;
        }

        let command_buffers = [self.handle];
        let submit = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&self.wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .signal_semaphores(&self.signal_semaphores);

        unsafe {
            device
                .queue_submit(self.ctx.queue(role).handle, &[submit], self.fence)
                .map_err(|e| {
                    log::error!("Queue submission on {:?} failed: {}", role, e);
                    submit_error(e)
                })?;
        }
        self.state = CommandBufferState::Submitted;
        Ok(())
    }

    /// Blocks until the fence signals. Returns `false` on timeout; without a fence it returns at once.
    pub fn wait(&self, timeout: u64) -> GfxResult<bool> {
        if self.fence == vk::Fence::null() {
            return Ok(true);
        }
        match unsafe { self.ctx.device().wait_for_fences(&[self.fence], true, timeout) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_complete(&self) -> GfxResult<bool> {
        if self.fence == vk::Fence::null() {
            return Ok(true);
        }
        unsafe { self.ctx.device().get_fence_status(self.fence) }.map_err(GraphicsError::from)
    }

    pub fn reset_wait_fence(&self) -> GfxResult<()> {
        if self.fence == vk::Fence::null() {
            return Ok(());
        }
        unsafe { self.ctx.device().reset_fences(&[self.fence]) }.map_err(GraphicsError::from)
    }

    /// Swaps the owned fence for a new one created with the configured flags. A failed submission
    /// leaves the fence reset with nothing queued to signal it.
    pub fn replace_owned_fence(&mut self) -> GfxResult<()> {
        assert!(
            self.flags.contains(CommandBufferFlags::OWNS_FENCE),
            "only an owned fence can be replaced"
        );
        let info = vk::FenceCreateInfo::default().flags(self.fence_flags);
        let fence = unsafe { self.ctx.device().create_fence(&info) }.map_err(|e| {
            log::error!("Unable to create command buffer fence: {}", e);
            GraphicsError::InitializationFailed
        })?;
        self.destroy_owned_fence();
        self.fence = fence;
        Ok(())
    }

    /// Resets the recorded commands and forgets pending semaphores.
    pub fn reset(&mut self, flags: vk::CommandBufferResetFlags) -> GfxResult<()> {
        unsafe {
            self.ctx
                .device()
                .reset_command_buffer(self.handle, flags)
                .map_err(|e| {
                    log::error!("Unable to reset command buffer: {}", e);
                    GraphicsError::QueueError
                })?;
        }
        self.clear_semaphores();
        self.state = CommandBufferState::Initialized;
        Ok(())
    }

    /// Frees an owned handle and forgets the queue role. Configuration and the fence survive.
    pub fn clear(&mut self) {
        if self.flags.contains(CommandBufferFlags::OWNS_COMMAND_BUFFER)
            && self.handle != vk::CommandBuffer::null()
        {
            if let Some(role) = self.role {
                self.ctx.free_command_buffers(role, &[self.handle]);
            }
        }
        self.flags.remove(CommandBufferFlags::OWNS_COMMAND_BUFFER);
        self.handle = vk::CommandBuffer::null();
        self.role = None;
        self.clear_semaphores();
        self.state = CommandBufferState::Configured;
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn fence(&self) -> Option<vk::Fence> {
        (self.fence != vk::Fence::null()).then_some(self.fence)
    }

    pub fn role(&self) -> Option<QueueRole> {
        self.role
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn level(&self) -> vk::CommandBufferLevel {
        if self.flags.contains(CommandBufferFlags::SECONDARY) {
            vk::CommandBufferLevel::SECONDARY
        } else {
            vk::CommandBufferLevel::PRIMARY
        }
    }

    pub fn is_single_use(&self) -> bool {
        self.flags.contains(CommandBufferFlags::SINGLE_USE)
    }

    pub fn owns_fence(&self) -> bool {
        self.flags.contains(CommandBufferFlags::OWNS_FENCE)
    }

    pub fn wait_semaphores(&self) -> &[vk::Semaphore] {
        &self.wait_semaphores
    }

    pub fn signal_semaphores(&self) -> &[vk::Semaphore] {
        &self.signal_semaphores
    }

    fn clear_semaphores(&mut self) {
        self.wait_semaphores.clear();
        self.wait_stages.clear();
        self.signal_semaphores.clear();
    }

    fn destroy_owned_fence(&mut self) {
        if self.flags.contains(CommandBufferFlags::OWNS_FENCE) && self.fence != vk::Fence::null() {
            unsafe { self.ctx.device().destroy_fence(self.fence) };
            self.fence = vk::Fence::null();
        }
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.clear();
        self.destroy_owned_fence();
    }
}

fn submit_error(result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        _ => GraphicsError::QueueError,
    }
}
