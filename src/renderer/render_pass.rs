use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{GfxResult, GraphicsError};

#[derive(Default, Clone)]
struct Subpass {
    flags: vk::SubpassDescriptionFlags,
    bind_point: vk::PipelineBindPoint,
    inputs: Vec<vk::AttachmentReference>,
    colors: Vec<vk::AttachmentReference>,
    resolves: Vec<vk::AttachmentReference>,
    depth_stencil: Option<vk::AttachmentReference>,
    preserve: Vec<u32>,
}

impl Subpass {
    fn description(&self) -> vk::SubpassDescription<'_> {
        let mut desc = vk::SubpassDescription::default()
            .flags(self.flags)
            .pipeline_bind_point(self.bind_point)
            .input_attachments(&self.inputs)
            .color_attachments(&self.colors)
            .preserve_attachments(&self.preserve);
        if self.resolves.iter().any(|r| r.attachment != vk::ATTACHMENT_UNUSED) {
            desc = desc.resolve_attachments(&self.resolves);
        }
        if let Some(depth) = self.depth_stencil.as_ref() {
            desc = desc.depth_stencil_attachment(depth);
        }
        desc
    }
}

/// Attachments, subpasses and dependencies of a render pass.
///
/// The description can only change while no handle exists. `reset_resources` destroys the
/// handle but keeps the description, so the pass can be rebuilt after a swapchain change.
pub struct RenderPass {
    attachments: Vec<vk::AttachmentDescription>,
    subpasses: Vec<Subpass>,
    dependencies: Vec<vk::SubpassDependency>,
    handle: vk::RenderPass,
    ctx: Arc<DeviceContext>,
}

impl RenderPass {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            attachments: Vec::new(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
            handle: vk::RenderPass::null(),
            ctx,
        }
    }

    pub fn add_attachment(&mut self, attachment: vk::AttachmentDescription) -> &mut Self {
        self.assert_mutable();
        self.attachments.push(attachment);
        self
    }

    /// Resizes the subpass list. New subpasses bind to the graphics pipeline.
    pub fn set_subpass_count(&mut self, count: usize) -> &mut Self {
        self.assert_mutable();
        self.subpasses.resize(
            count,
            Subpass {
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                ..Default::default()
            },
        );
        self
    }

    pub fn set_subpass_bind_point(&mut self, subpass: usize, bind_point: vk::PipelineBindPoint) -> &mut Self {
        self.subpass_mut(subpass).bind_point = bind_point;
        self
    }

    pub fn set_subpass_flags(&mut self, subpass: usize, flags: vk::SubpassDescriptionFlags) -> &mut Self {
        self.subpass_mut(subpass).flags |= flags;
        self
    }

    pub fn add_subpass_input_attachment(
        &mut self,
        subpass: usize,
        attachment: u32,
        layout: vk::ImageLayout,
    ) -> &mut Self {
        self.subpass_mut(subpass)
            .inputs
            .push(vk::AttachmentReference { attachment, layout });
        self
    }

    /// Adds a color reference and its resolve target. Pass `None` when nothing resolves into it.
    pub fn add_subpass_color_attachment(
        &mut self,
        subpass: usize,
        attachment: u32,
        layout: vk::ImageLayout,
        resolve: Option<(u32, vk::ImageLayout)>,
    ) -> &mut Self {
        let (resolve_attachment, resolve_layout) =
            resolve.unwrap_or((vk::ATTACHMENT_UNUSED, vk::ImageLayout::UNDEFINED));
        let desc = self.subpass_mut(subpass);
        desc.colors.push(vk::AttachmentReference { attachment, layout });
        desc.resolves.push(vk::AttachmentReference {
            attachment: resolve_attachment,
            layout: resolve_layout,
        });
        self
    }

    pub fn set_subpass_depth_stencil_attachment(
        &mut self,
        subpass: usize,
        attachment: u32,
        layout: vk::ImageLayout,
    ) -> &mut Self {
        self.subpass_mut(subpass).depth_stencil = Some(vk::AttachmentReference { attachment, layout });
        self
    }

    pub fn add_subpass_preserve_attachment(&mut self, subpass: usize, attachment: u32) -> &mut Self {
        self.subpass_mut(subpass).preserve.push(attachment);
        self
    }

    pub fn add_subpass_dependency(&mut self, dependency: vk::SubpassDependency) -> &mut Self {
        self.assert_mutable();
        self.dependencies.push(dependency);
        self
    }

    pub fn initialize(&mut self) -> GfxResult<()> {
        self.assert_mutable();

        let subpasses = self.subpasses.iter().map(Subpass::description).collect::<Vec<_>>();
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&self.attachments)
            .subpasses(&subpasses)
            .dependencies(&self.dependencies);

        self.handle = unsafe {
            self.ctx.device().create_render_pass(&info).map_err(|e| {
                log::error!("Unable to create render pass: {}", e);
                GraphicsError::RenderPassCreateError
            })?
        };
        log::debug!(
            "Render pass created ({} attachments, {} subpasses)",
            self.attachments.len(),
            subpasses.len()
        );
        Ok(())
    }

    /// Destroys the handle. The description is kept.
    pub fn reset_resources(&mut self) {
        if self.handle != vk::RenderPass::null() {
            unsafe { self.ctx.device().destroy_render_pass(self.handle) };
            self.handle = vk::RenderPass::null();
        }
    }

    /// Forgets the attachment descriptions so new ones can be added.
    pub fn reset_attachments(&mut self) {
        self.attachments.clear();
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn subpass_count(&self) -> usize {
        self.subpasses.len()
    }

    fn subpass_mut(&mut self, subpass: usize) -> &mut Subpass {
        self.assert_mutable();
        let count = self.subpasses.len();
        self.subpasses
            .get_mut(subpass)
            .unwrap_or_else(|| panic!("subpass {} out of range ({} subpasses)", subpass, count))
    }

    fn assert_mutable(&self) {
        assert_eq!(
            self.handle,
            vk::RenderPass::null(),
            "render pass cannot change while its handle exists"
        );
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.reset_resources();
    }
}

/// Owned framebuffer handle.
pub struct Framebuffer {
    handle: vk::Framebuffer,
    extent: vk::Extent2D,
    ctx: Arc<DeviceContext>,
}

impl Framebuffer {
    pub fn new(
        ctx: Arc<DeviceContext>,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> GfxResult<Self> {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let handle = unsafe {
            ctx.device().create_framebuffer(&info).map_err(|e| {
                log::error!("Unable to create framebuffer: {}", e);
                GraphicsError::from(e)
            })?
        };
        Ok(Self { handle, extent, ctx })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_framebuffer(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::contexts::device_ctx::mock::{mock_context, Event};

    fn color_attachment() -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(vk::Format::B8G8R8A8_SRGB)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
    }

    fn forward_pass(pass: &mut RenderPass) {
        pass.add_attachment(color_attachment())
            .add_attachment(
                vk::AttachmentDescription::default()
                    .format(vk::Format::D32_SFLOAT)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            )
            .set_subpass_count(1)
            .add_subpass_color_attachment(0, 0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, None)
            .set_subpass_depth_stencil_attachment(0, 1, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .add_subpass_dependency(
                vk::SubpassDependency::default()
                    .src_subpass(vk::SUBPASS_EXTERNAL)
                    .dst_subpass(0)
                    .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
            );
    }

    #[test]
    fn description_reaches_the_device() {
        let (mock, ctx) = mock_context(false);
        let mut pass = RenderPass::new(ctx);
        forward_pass(&mut pass);
        pass.initialize().unwrap();

        let handle = pass.handle();
        assert!(mock.state().events.iter().any(|e| *e
            == Event::CreateRenderPass {
                render_pass: handle,
                attachments: 2,
                subpasses: 1,
                dependencies: 1,
            }));
    }

    #[test]
    fn unresolved_color_attachments_have_no_resolve_list() {
        let (_mock, ctx) = mock_context(false);
        let mut pass = RenderPass::new(ctx);
        forward_pass(&mut pass);
        let desc = pass.subpasses[0].description();
        assert!(desc.p_resolve_attachments.is_null());
        assert!(!desc.p_depth_stencil_attachment.is_null());

        pass.add_subpass_color_attachment(
            0,
            0,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Some((1, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)),
        );
        assert!(!pass.subpasses[0].description().p_resolve_attachments.is_null());
    }

    #[test]
    fn reset_resources_keeps_the_description() {
        let (mock, ctx) = mock_context(false);
        let mut pass = RenderPass::new(ctx);
        forward_pass(&mut pass);
        pass.initialize().unwrap();
        let first = pass.handle();

        pass.reset_resources();
        assert_eq!(pass.handle(), vk::RenderPass::null());
        assert_eq!(pass.attachment_count(), 2);

        pass.initialize().unwrap();
        assert_ne!(pass.handle(), first);
        assert_eq!(mock.state().count(|e| *e == Event::DestroyRenderPass(first)), 1);

        pass.reset_resources();
        pass.reset_attachments();
        assert_eq!(pass.attachment_count(), 0);
        assert_eq!(pass.subpass_count(), 1);
    }

    #[test]
    fn creation_failure_is_reported() {
        let (mock, ctx) = mock_context(false);
        mock.state().fail_render_pass_creation = true;
        let mut pass = RenderPass::new(ctx);
        forward_pass(&mut pass);
        assert_eq!(pass.initialize(), Err(GraphicsError::RenderPassCreateError));
        assert_eq!(pass.handle(), vk::RenderPass::null());
    }

    #[test]
    #[should_panic(expected = "render pass cannot change while its handle exists")]
    fn built_pass_is_frozen() {
        let (_mock, ctx) = mock_context(false);
        let mut pass = RenderPass::new(ctx);
        forward_pass(&mut pass);
        pass.initialize().unwrap();
        pass.add_attachment(color_attachment());
    }

    #[test]
    fn framebuffer_is_destroyed_on_drop() {
        let (mock, ctx) = mock_context(false);
        let mut pass = RenderPass::new(ctx.clone());
        forward_pass(&mut pass);
        pass.initialize().unwrap();

        let framebuffer = Framebuffer::new(ctx, &pass, &[], vk::Extent2D { width: 4, height: 4 }).unwrap();
        let handle = framebuffer.handle();
        drop(framebuffer);
        assert_eq!(mock.state().count(|e| *e == Event::DestroyFramebuffer(handle)), 1);
    }
}
