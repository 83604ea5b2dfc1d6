//! Deferred uploads from host staging buffers into device-local resources.
//!
//! Jobs are registered during the frame and recorded on the next `flush`. With a dedicated
//! transfer queue an upload is split in two: the transfer queue copies and releases ownership,
//! signaling a semaphore; the graphics queue waits on it and acquires ownership. Otherwise the
//! whole upload is recorded on the graphics queue.

use std::mem;
use std::sync::Arc;
use ash::vk;
use smallvec::{smallvec, SmallVec};
use crate::renderer::command_buffer::{CommandBuffer, CommandBufferState};
use crate::renderer::contexts::device_ctx::queue::QueueRole;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{GfxResult, GraphicsError};
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::image::ImageBuffer;

/// One step of a transfer job.
///
/// `Begin` is called once per queue role, in the order the job lists them, with a command buffer
/// in the recording state. It is ended and submitted after the step returns. `End` is called once
/// per role after that command buffer's fence signaled. `Error` replaces every later step when
/// the job cannot complete.
pub enum TransferStep<'a> {
    Begin { role: QueueRole, cmd: &'a mut CommandBuffer },
    End { role: QueueRole, cmd: &'a mut CommandBuffer },
    Error(GraphicsError),
}

pub trait TransferJob {
    /// Queue roles this job records on, in submission order.
    fn queues(&self) -> &[QueueRole];

    fn step(&mut self, ctx: &DeviceContext, step: TransferStep<'_>) -> GfxResult<()>;
}

/// Runs registered transfer jobs on transient command buffers.
pub struct TransferCoordinator {
    pending: Vec<Box<dyn TransferJob>>,
    // Jobs whose submitted work could not be confirmed complete; released once the device is idle
    stalled: Vec<(Box<dyn TransferJob>, Vec<CommandBuffer>)>,
    free_command_buffers: Vec<CommandBuffer>,
    prefer_transfer_queue: bool,
    ctx: Arc<DeviceContext>,
}

impl TransferCoordinator {
    pub fn new(ctx: Arc<DeviceContext>, prefer_transfer_queue: bool) -> Self {
        Self {
            pending: Vec::new(),
            stalled: Vec::new(),
            free_command_buffers: Vec::new(),
            prefer_transfer_queue,
            ctx,
        }
    }

    /// Whether uploads are split across a dedicated transfer queue and the graphics queue.
    pub fn uses_transfer_queue(&self) -> bool {
        self.prefer_transfer_queue && self.ctx.has_dedicated_transfer_queue()
    }

    pub fn register(&mut self, job: Box<dyn TransferJob>) {
        for role in job.queues() {
            assert_ne!(*role, QueueRole::Present, "transfers cannot run on the present queue");
        }
        self.pending.push(job);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Records, submits and completes every registered job.
    ///
    /// Jobs that fail are dropped after their `Error` step; the flush goes on with the others.
    /// Only a fatal error (device lost) is returned.
    pub fn flush(&mut self) -> GfxResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let jobs = mem::take(&mut self.pending);
        log::debug!("Flushing {} transfer jobs", jobs.len());

        let mut fatal = None;
        let mut started: Vec<(Box<dyn TransferJob>, Vec<CommandBuffer>)> = Vec::with_capacity(jobs.len());

        for mut job in jobs {
            let mut cmds = match self.acquire_command_buffers(job.queues()) {
                Ok(cmds) => cmds,
                Err(e) => {
                    log::warn!("No command buffers for transfer job: {}", e);
                    self.fail_job(job.as_mut(), e, &mut fatal);
                    continue;
                }
            };

            match self.begin_job(job.as_mut(), &mut cmds) {
                Ok(()) => started.push((job, cmds)),
                Err(e) => {
                    log::error!("Transfer job failed while recording: {}", e);
                    self.abandon(job, cmds, e, &mut fatal);
                }
            }
        }

        for (mut job, mut cmds) in started {
            let roles = job.queues().to_vec();
            // The flag tells whether the failing command buffer is known to have completed
            let mut failure = None;
            for (role, cmd) in roles.into_iter().zip(cmds.iter_mut()) {
                match cmd.wait(u64::MAX) {
                    Ok(true) => {
                        if let Err(e) = job.step(&self.ctx, TransferStep::End { role, cmd }) {
                            failure = Some((e, true));
                        }
                    }
                    Ok(false) => failure = Some((GraphicsError::TransferFailed, false)),
                    Err(e) => failure = Some((e, false)),
                }
                if let Some((e, _)) = &failure {
                    log::error!("Transfer job failed to complete on {:?}: {}", role, e);
                    break;
                }
            }
            match failure {
                Some((e, true)) => self.abandon(job, cmds, e, &mut fatal),
                Some((e, false)) => self.stall(job, cmds, e, &mut fatal),
                None => self.recycle(cmds),
            }
        }

        // Stalled command buffers may still be pending in their pool
        if self.stalled.is_empty() {
            self.ctx.reset_transient_pools();
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn begin_job(&self, job: &mut dyn TransferJob, cmds: &mut [CommandBuffer]) -> GfxResult<()> {
        let roles = job.queues().to_vec();
        for (role, cmd) in roles.into_iter().zip(cmds.iter_mut()) {
            cmd.begin(vk::CommandBufferUsageFlags::empty())?;
            job.step(&self.ctx, TransferStep::Begin { role, cmd: &mut *cmd })?;
            cmd.end()?;
            cmd.submit()?;
        }
        Ok(())
    }

    /// Fails a job whose command buffers may already be on a queue.
    ///
    /// Submitted work can still read the staging memory, so the `Error` step only runs once every
    /// submitted buffer signaled.
    fn abandon(
        &mut self,
        mut job: Box<dyn TransferJob>,
        cmds: Vec<CommandBuffer>,
        error: GraphicsError,
        fatal: &mut Option<GraphicsError>,
    ) {
        match Self::drain(&cmds) {
            Ok(()) => {
                self.fail_job(job.as_mut(), error, fatal);
                self.recycle(cmds);
            }
            Err(wait_error) => {
                if error.is_fatal() {
                    *fatal = Some(error);
                }
                self.stall(job, cmds, wait_error, fatal);
            }
        }
    }

    /// Parks a job whose submitted work never confirmed completion. Its staging memory and
    /// command buffers are released on drop, after the device went idle.
    fn stall(
        &mut self,
        job: Box<dyn TransferJob>,
        cmds: Vec<CommandBuffer>,
        error: GraphicsError,
        fatal: &mut Option<GraphicsError>,
    ) {
        log::error!("Transfer job left in flight: {}", error);
        if error.is_fatal() {
            *fatal = Some(error);
        }
        self.stalled.push((job, cmds));
    }

    fn drain(cmds: &[CommandBuffer]) -> GfxResult<()> {
        for cmd in cmds.iter().filter(|c| c.state() == CommandBufferState::Submitted) {
            if !cmd.wait(u64::MAX)? {
                return Err(GraphicsError::TransferFailed);
            }
        }
        Ok(())
    }

    fn fail_job(&self, job: &mut dyn TransferJob, error: GraphicsError, fatal: &mut Option<GraphicsError>) {
        if error.is_fatal() {
            *fatal = Some(error);
        }
        if let Err(e) = job.step(&self.ctx, TransferStep::Error(error)) {
            log::warn!("Transfer job error step failed: {}", e);
        }
    }

    /// One single-use command buffer per role, backed by the role's transient pool.
    fn acquire_command_buffers(&mut self, roles: &[QueueRole]) -> GfxResult<Vec<CommandBuffer>> {
        let mut cmds = Vec::with_capacity(roles.len());
        for role in roles {
            match self.transient_command_buffer(*role) {
                Ok(cmd) => cmds.push(cmd),
                Err(e) => {
                    self.recycle(cmds);
                    return Err(e);
                }
            }
        }
        Ok(cmds)
    }

    fn transient_command_buffer(&mut self, role: QueueRole) -> GfxResult<CommandBuffer> {
        let handle = self
            .ctx
            .allocate_transient_command_buffers(role, 1)?
            .first()
            .copied()
            .ok_or(GraphicsError::CommandBufferCreateError)?;

        let mut cmd = match self.free_command_buffers.pop() {
            Some(cmd) => cmd,
            None => {
                let mut cmd = CommandBuffer::new(self.ctx.clone());
                cmd.set_single_use(true)
                    .set_level(vk::CommandBufferLevel::PRIMARY)
                    .set_wait_fence(true, None, vk::FenceCreateFlags::empty());
                cmd
            }
        };
        if let Err(e) = cmd.initialize(role, Some(handle)) {
            self.ctx.free_transient_command_buffers(role, &[handle]);
            self.free_command_buffers.push(cmd);
            return Err(e);
        }
        Ok(cmd)
    }

    fn recycle(&mut self, cmds: Vec<CommandBuffer>) {
        for mut cmd in cmds {
            if let Some(role) = cmd.role() {
                self.ctx.free_transient_command_buffers(role, &[cmd.handle()]);
            }
            cmd.clear();
            self.free_command_buffers.push(cmd);
        }
    }
}

impl Drop for TransferCoordinator {
    fn drop(&mut self) {
        for mut job in mem::take(&mut self.pending) {
            let _ = job.step(&self.ctx, TransferStep::Error(GraphicsError::TransferFailed));
        }
        if self.stalled.is_empty() {
            return;
        }
        if let Err(e) = self.ctx.wait_idle() {
            log::warn!("Releasing stalled transfers without an idle device: {}", e);
        }
        for (mut job, cmds) in mem::take(&mut self.stalled) {
            let _ = job.step(&self.ctx, TransferStep::Error(GraphicsError::TransferFailed));
            self.recycle(cmds);
        }
    }
}

/// Queue family ownership handoff from the transfer queue to the graphics queue.
struct Handoff {
    queues: SmallVec<[QueueRole; 2]>,
    semaphore: vk::Semaphore,
}

impl Handoff {
    fn new(dual_queue: bool) -> Self {
        let queues = if dual_queue {
            smallvec![QueueRole::Transfer, QueueRole::Graphics]
        } else {
            smallvec![QueueRole::Graphics]
        };
        Self {
            queues,
            semaphore: vk::Semaphore::null(),
        }
    }

    fn is_split(&self) -> bool {
        self.queues.len() > 1
    }

    /// Source and destination families for release and acquire barriers.
    fn families(&self, ctx: &DeviceContext) -> (u32, u32) {
        if self.is_split() {
            (
                ctx.queue_family_index(QueueRole::Transfer),
                ctx.queue_family_index(QueueRole::Graphics),
            )
        } else {
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
        }
    }

    fn signal(&mut self, ctx: &DeviceContext, cmd: &mut CommandBuffer) -> GfxResult<()> {
        self.semaphore = unsafe {
            ctx.device()
                .create_semaphore(&vk::SemaphoreCreateInfo::default())
                .map_err(GraphicsError::from)?
        };
        cmd.add_signal_semaphore(self.semaphore);
        Ok(())
    }

    fn wait(&self, cmd: &mut CommandBuffer, stage: vk::PipelineStageFlags) {
        cmd.add_wait_semaphore(self.semaphore, stage);
    }

    fn release(&mut self, ctx: &DeviceContext) {
        if self.semaphore != vk::Semaphore::null() {
            unsafe { ctx.device().destroy_semaphore(self.semaphore) };
            self.semaphore = vk::Semaphore::null();
        }
    }
}

/// Copies a staging buffer into every mip 0 texel of an image and leaves it shader-readable.
///
/// The job shares ownership of the image, which stays alive until the upload completed or failed.
pub struct ImageUpload {
    staging: Buffer,
    image: Arc<ImageBuffer>,
    range: vk::ImageSubresourceRange,
    handoff: Handoff,
}

impl ImageUpload {
    pub fn new(staging: Buffer, image: Arc<ImageBuffer>, use_transfer_queue: bool) -> Self {
        let mut range = image.subresource_range(vk::ImageAspectFlags::COLOR);
        range.level_count = 1;
        Self {
            staging,
            image,
            range,
            handoff: Handoff::new(use_transfer_queue),
        }
    }

    fn barrier(
        &self,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        (src_family, dst_family): (u32, u32),
    ) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .image(self.image.handle())
            .subresource_range(self.range)
    }

    fn record_copy(&self, ctx: &DeviceContext, cmd: &CommandBuffer) {
        let device = ctx.device();
        let ignored = (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED);
        let to_transfer = self.barrier(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            ignored,
        );
        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: self.range.aspect_mask,
                mip_level: 0,
                base_array_layer: self.range.base_array_layer,
                layer_count: self.range.layer_count,
            })
            .image_extent(self.image.extent());
        unsafe {
            device.cmd_pipeline_barrier(
                cmd.handle(),
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                &[],
                &[to_transfer],
            );
            device.cmd_copy_buffer_to_image(
                cmd.handle(),
                self.staging.handle(),
                self.image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }
}

impl TransferJob for ImageUpload {
    fn queues(&self) -> &[QueueRole] {
        &self.handoff.queues
    }

    fn step(&mut self, ctx: &DeviceContext, step: TransferStep<'_>) -> GfxResult<()> {
        let families = self.handoff.families(ctx);
        match step {
            TransferStep::Begin { role: QueueRole::Graphics, cmd } if self.handoff.is_split() => {
                self.handoff.wait(cmd, vk::PipelineStageFlags::FRAGMENT_SHADER);
                let acquire = self.barrier(
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::SHADER_READ,
                    families,
                );
                unsafe {
                    ctx.device().cmd_pipeline_barrier(
                        cmd.handle(),
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        &[],
                        &[acquire],
                    );
                }
            }
            TransferStep::Begin { role, cmd } => {
                self.record_copy(ctx, cmd);
                if self.handoff.is_split() {
                    debug_assert_eq!(role, QueueRole::Transfer);
                    let release = self.barrier(
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::AccessFlags::empty(),
                        families,
                    );
                    unsafe {
                        ctx.device().cmd_pipeline_barrier(
                            cmd.handle(),
                            vk::PipelineStageFlags::TRANSFER,
                            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                            &[],
                            &[release],
                        );
                    }
                    self.handoff.signal(ctx, cmd)?;
                } else {
                    let to_shader = self.barrier(
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::AccessFlags::SHADER_READ,
                        families,
                    );
                    unsafe {
                        ctx.device().cmd_pipeline_barrier(
                            cmd.handle(),
                            vk::PipelineStageFlags::TRANSFER,
                            vk::PipelineStageFlags::FRAGMENT_SHADER,
                            &[],
                            &[to_shader],
                        );
                    }
                }
            }
            TransferStep::End { role, .. } => {
                // The copy lives on the first queue; the acquire side only holds the semaphore
                if role == self.handoff.queues[0] {
                    self.staging.clear();
                }
                if role == QueueRole::Graphics {
                    self.handoff.release(ctx);
                }
            }
            TransferStep::Error(e) => {
                log::warn!("Image upload abandoned: {}", e);
                self.staging.clear();
                self.handoff.release(ctx);
            }
        }
        Ok(())
    }
}

/// Copies a staging buffer into a device-local buffer read at `dst_stage`.
pub struct BufferUpload {
    staging: Buffer,
    dst: Arc<Buffer>,
    size: vk::DeviceSize,
    dst_stage: vk::PipelineStageFlags,
    dst_access: vk::AccessFlags,
    handoff: Handoff,
}

impl BufferUpload {
    pub fn new(
        staging: Buffer,
        dst: Arc<Buffer>,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
        use_transfer_queue: bool,
    ) -> Self {
        let size = staging.size().min(dst.size());
        Self {
            staging,
            dst,
            size,
            dst_stage,
            dst_access,
            handoff: Handoff::new(use_transfer_queue),
        }
    }

    fn barrier(
        &self,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        (src_family, dst_family): (u32, u32),
    ) -> vk::BufferMemoryBarrier<'static> {
        vk::BufferMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .buffer(self.dst.handle())
            .offset(0)
            .size(self.size)
    }
}

impl TransferJob for BufferUpload {
    fn queues(&self) -> &[QueueRole] {
        &self.handoff.queues
    }

    fn step(&mut self, ctx: &DeviceContext, step: TransferStep<'_>) -> GfxResult<()> {
        let device = ctx.device();
        let families = self.handoff.families(ctx);
        match step {
            TransferStep::Begin { role: QueueRole::Graphics, cmd } if self.handoff.is_split() => {
                self.handoff.wait(cmd, self.dst_stage);
                let acquire = self.barrier(vk::AccessFlags::empty(), self.dst_access, families);
                unsafe {
                    device.cmd_pipeline_barrier(cmd.handle(), self.dst_stage, self.dst_stage, &[acquire], &[]);
                }
            }
            TransferStep::Begin { cmd, .. } => {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: self.size,
                };
                unsafe { device.cmd_copy_buffer(cmd.handle(), self.staging.handle(), self.dst.handle(), &[region]) };

                if self.handoff.is_split() {
                    let release = self.barrier(vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::empty(), families);
                    unsafe {
                        device.cmd_pipeline_barrier(
                            cmd.handle(),
                            vk::PipelineStageFlags::TRANSFER,
                            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                            &[release],
                            &[],
                        );
                    }
                    self.handoff.signal(ctx, cmd)?;
                } else {
                    let visible = self.barrier(vk::AccessFlags::TRANSFER_WRITE, self.dst_access, families);
                    unsafe {
                        device.cmd_pipeline_barrier(
                            cmd.handle(),
                            vk::PipelineStageFlags::TRANSFER,
                            self.dst_stage,
                            &[visible],
                            &[],
                        );
                    }
                }
            }
            TransferStep::End { role, .. } => {
                if role == self.handoff.queues[0] {
                    self.staging.clear();
                }
                if role == QueueRole::Graphics {
                    self.handoff.release(ctx);
                }
            }
            TransferStep::Error(e) => {
                log::warn!("Buffer upload abandoned: {}", e);
                self.staging.clear();
                self.handoff.release(ctx);
            }
        }
        Ok(())
    }
}

/// A host-visible staging buffer holding `data`, usable only by the queue that copies from it.
pub fn create_staging_buffer(ctx: &Arc<DeviceContext>, data: &[u8]) -> GfxResult<Buffer> {
    let mut staging = Buffer::new(ctx.clone());
    staging.initialize(data.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC, &[])?;
    staging.allocate(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)?;
    staging.write(data, 0)?;
    staging.unmap_memory();
    Ok(staging)
}
