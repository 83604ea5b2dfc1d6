pub mod frame;

use std::sync::Arc;
use ash::vk;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::contexts::frame_ctx::frame::Frame;
use crate::renderer::descriptor::DescriptorSetLayout;
use crate::renderer::error::{GfxResult, GraphicsError};
use crate::renderer::pipeline::PipelineStateObject;
use crate::renderer::swapchain::SwapchainLifecycle;
use crate::renderer::transfer::TransferCoordinator;

/// Responsibilities:
/// - Cycle the frames in flight and keep the CPU from overrunning the GPU
/// - Acquire, submit and present through the swapchain lifecycle
/// - Run pending uploads and swapchain recreation between frames
pub struct FrameDriver {
    frames: Vec<Frame>,
    current: usize,
    image_index: Option<u32>,
    lifecycle: SwapchainLifecycle,
    transfers: TransferCoordinator,
}

impl FrameDriver {
    /// Each frame gets its own descriptor pools sized for `config.descriptor_alloc_count` sets
    /// of every layout in `frame_layouts`.
    pub fn new(
        ctx: Arc<DeviceContext>,
        lifecycle: SwapchainLifecycle,
        config: &RenderConfig,
        frame_layouts: &[&DescriptorSetLayout],
    ) -> GfxResult<Self> {
        assert!(config.frames_in_flight > 0, "at least one frame in flight is required");
        let frames = (0..config.frames_in_flight)
            .map(|_| Frame::new(ctx.clone(), frame_layouts, config.descriptor_alloc_count))
            .collect::<GfxResult<Vec<_>>>()?;
        log::debug!("Frame driver with {} frames in flight", frames.len());

        Ok(Self {
            frames,
            current: 0,
            image_index: None,
            lifecycle,
            transfers: TransferCoordinator::new(ctx, config.prefer_transfer_queue),
        })
    }

    /// Waits for the current slot, acquires a swapchain image and starts recording.
    ///
    /// Returns the acquired image index. A stale swapchain is marked for the next `update` and
    /// reported as `SwapchainOutOfDate`.
    pub fn begin_frame(&mut self) -> GfxResult<u32> {
        assert!(self.image_index.is_none(), "begin_frame called twice without end_frame");
        let frame = &mut self.frames[self.current];
        frame.wait()?;
        frame.descriptors().reset();

        let image_index = self.lifecycle.acquire_next_image(frame.image_available())?;

        let image_available = frame.image_available();
        let render_finished = frame.render_finished();
        let cmd = frame.command_buffer_mut();
        let started = cmd.reset(vk::CommandBufferResetFlags::empty()).and_then(|()| {
            cmd.add_wait_semaphore(image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
            cmd.add_signal_semaphore(render_finished);
            cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        });
        if let Err(e) = started {
            return Err(self.abandon_frame(e));
        }

        self.image_index = Some(image_index);
        Ok(image_index)
    }

    /// Finishes recording, submits and presents the image acquired by `begin_frame`.
    pub fn end_frame(&mut self) -> GfxResult<()> {
        let Some(image_index) = self.image_index.take() else {
            panic!("end_frame called without begin_frame");
        };
        let frame = &mut self.frames[self.current];
        let render_finished = frame.render_finished();
        let cmd = frame.command_buffer_mut();
        if let Err(e) = cmd.end().and_then(|()| cmd.submit()) {
            return Err(self.abandon_frame(e));
        }

        self.current = (self.current + 1) % self.frames.len();
        self.lifecycle.present(&[render_finished], image_index)
    }

    /// Cleans up after a frame failed between acquiring and submitting. The acquired image is
    /// never presented, so the swapchain is recreated to get it back.
    fn abandon_frame(&mut self, error: GraphicsError) -> GraphicsError {
        log::error!("Frame {} abandoned: {}", self.current, error);
        self.lifecycle.mark_out_of_date();
        if let Err(e) = self.frames[self.current].recover() {
            log::error!("Unable to recover frame {}: {}", self.current, e);
        }
        error
    }

    pub fn wait_all_frames(&self) -> GfxResult<()> {
        for frame in &self.frames {
            frame.wait()?;
        }
        Ok(())
    }

    /// Rebuilds every dirty pipeline. Pipelines may still be referenced by frames in flight, so
    /// all of them are waited on first; nothing waits when every pipeline is clean.
    pub fn rebuild_dirty_pipelines(&self, pipelines: &mut [&mut PipelineStateObject]) -> GfxResult<()> {
        if !pipelines.iter().any(|pso| pso.is_dirty()) {
            return Ok(());
        }
        self.wait_all_frames()?;
        for pso in pipelines.iter_mut().filter(|pso| pso.is_dirty()) {
            pso.create_pipeline()?;
        }
        Ok(())
    }

    /// Between-frame housekeeping. Returns whether a swapchain is ready to render to.
    pub fn update(&mut self) -> GfxResult<bool> {
        self.transfers.flush()?;
        self.lifecycle.update()
    }

    pub fn current_frame(&mut self) -> &mut Frame {
        &mut self.frames[self.current]
    }

    pub fn current_frame_index(&self) -> usize {
        self.current
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frames_mut(&mut self) -> &mut [Frame] {
        &mut self.frames
    }

    pub fn lifecycle(&mut self) -> &mut SwapchainLifecycle {
        &mut self.lifecycle
    }

    pub fn transfers(&mut self) -> &mut TransferCoordinator {
        &mut self.transfers
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        let _ = self.wait_all_frames();
    }
}
