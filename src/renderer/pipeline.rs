use std::ffi::CString;
use std::sync::Arc;
use ash::vk;
use thiserror::Error;
use crate::renderer::command_buffer::CommandBuffer;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::descriptor::DescriptorSetInstance;
use crate::renderer::error::{GfxResult, GraphicsError};
use crate::renderer::resources::shader::ShaderModule;

pub const MAX_DESCRIPTOR_SETS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineStateError {
    #[error("unknown pipeline state key: {0}")]
    UnknownKey(String),

    #[error("invalid value {value:?} for pipeline state {key}")]
    InvalidValue { key: String, value: String },
}

struct ShaderStage {
    stage: vk::ShaderStageFlags,
    module: vk::ShaderModule,
    entry: CString,
}

/// Graphics pipeline description with a cached pipeline and layout.
///
/// Mutators mark either the layout (descriptor set layouts, push constants) or the rest of the
/// state dirty. `create_pipeline` rebuilds only what is dirty. Rebuilding destroys the old
/// pipeline, so every frame in flight that may still use it must have been waited on first.
pub struct PipelineStateObject {
    state_dirty: bool,
    layout_dirty: bool,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,

    flags: vk::PipelineCreateFlags,
    stages: Vec<ShaderStage>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'static>,
    viewports: Vec<vk::Viewport>,
    scissors: Vec<vk::Rect2D>,
    rasterization: vk::PipelineRasterizationStateCreateInfo<'static>,
    multisample: vk::PipelineMultisampleStateCreateInfo<'static>,
    depth_stencil: vk::PipelineDepthStencilStateCreateInfo<'static>,
    blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    logic_op_enable: bool,
    logic_op: vk::LogicOp,
    blend_constants: [f32; 4],
    dynamic_states: Vec<vk::DynamicState>,
    render_pass: vk::RenderPass,
    subpass: u32,

    set_layouts: [vk::DescriptorSetLayout; MAX_DESCRIPTOR_SETS],
    push_constant_ranges: Vec<vk::PushConstantRange>,

    ctx: Arc<DeviceContext>,
}

impl PipelineStateObject {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            state_dirty: true,
            layout_dirty: true,
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),

            flags: vk::PipelineCreateFlags::empty(),
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            input_assembly: Self::default_input_assembly_info(),
            viewports: vec![vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
            scissors: vec![vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width: 1, height: 1 },
            }],
            rasterization: Self::default_rasterization_info(),
            multisample: Self::default_multisample_info(),
            depth_stencil: Self::default_depth_stencil_info(),
            blend_attachments: vec![Self::default_color_blend_state()],
            logic_op_enable: false,
            logic_op: vk::LogicOp::CLEAR,
            blend_constants: [0.0; 4],
            dynamic_states: Vec::new(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,

            set_layouts: [vk::DescriptorSetLayout::null(); MAX_DESCRIPTOR_SETS],
            push_constant_ranges: Vec::new(),

            ctx,
        }
    }

    // State mutators

    pub fn set_pipeline_flags(&mut self, flags: vk::PipelineCreateFlags) -> &mut Self {
        self.flags |= flags;
        self.mark_state_dirty()
    }

    pub fn set_vertex_input(
        &mut self,
        bindings: &[vk::VertexInputBindingDescription],
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> &mut Self {
        self.vertex_bindings = bindings.to_vec();
        self.vertex_attributes = attributes.to_vec();
        self.mark_state_dirty()
    }

    pub fn set_topology(&mut self, topology: vk::PrimitiveTopology) -> &mut Self {
        self.input_assembly.topology = topology;
        self.mark_state_dirty()
    }

    pub fn set_primitive_restart(&mut self, enable: bool) -> &mut Self {
        self.input_assembly.primitive_restart_enable = enable.into();
        self.mark_state_dirty()
    }

    /// Adds a stage, replacing any earlier module for the same stage.
    pub fn set_shader_stage(&mut self, shader: &ShaderModule, entry: &str) -> &mut Self {
        self.set_shader_stage_raw(shader.stage(), shader.handle(), entry)
    }

    pub fn set_shader_stage_raw(
        &mut self,
        stage: vk::ShaderStageFlags,
        module: vk::ShaderModule,
        entry: &str,
    ) -> &mut Self {
        let entry = CString::new(entry).unwrap_or_else(|_| panic!("entry point {:?} contains a nul byte", entry));
        let shader = ShaderStage { stage, module, entry };
        match self.stages.iter_mut().find(|s| s.stage == stage) {
            Some(existing) => *existing = shader,
            None => self.stages.push(shader),
        }
        self.mark_state_dirty()
    }

    pub fn set_dynamic_states(&mut self, states: &[vk::DynamicState]) -> &mut Self {
        self.dynamic_states = states.to_vec();
        self.mark_state_dirty()
    }

    /// Sets the viewport and a scissor covering it.
    pub fn set_viewport(&mut self, viewport: vk::Viewport) -> &mut Self {
        self.viewports = vec![viewport];
        self.scissors = vec![vk::Rect2D {
            offset: vk::Offset2D {
                x: viewport.x as i32,
                y: viewport.y as i32,
            },
            extent: vk::Extent2D {
                width: viewport.width.abs() as u32,
                height: viewport.height.abs() as u32,
            },
        }];
        self.mark_state_dirty()
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) -> &mut Self {
        self.scissors = vec![scissor];
        self.mark_state_dirty()
    }

    pub fn set_depth_clamp(&mut self, enable: bool) -> &mut Self {
        self.rasterization.depth_clamp_enable = enable.into();
        self.mark_state_dirty()
    }

    pub fn set_rasterizer_discard(&mut self, enable: bool) -> &mut Self {
        self.rasterization.rasterizer_discard_enable = enable.into();
        self.mark_state_dirty()
    }

    pub fn set_polygon_mode(&mut self, mode: vk::PolygonMode) -> &mut Self {
        self.rasterization.polygon_mode = mode;
        self.mark_state_dirty()
    }

    pub fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace) -> &mut Self {
        self.rasterization.cull_mode = cull_mode;
        self.rasterization.front_face = front_face;
        self.mark_state_dirty()
    }

    pub fn set_depth_bias(&mut self, enable: bool, constant: f32, clamp: f32, slope: f32) -> &mut Self {
        self.rasterization.depth_bias_enable = enable.into();
        self.rasterization.depth_bias_constant_factor = constant;
        self.rasterization.depth_bias_clamp = clamp;
        self.rasterization.depth_bias_slope_factor = slope;
        self.mark_state_dirty()
    }

    pub fn set_line_width(&mut self, width: f32) -> &mut Self {
        self.rasterization.line_width = width;
        self.mark_state_dirty()
    }

    pub fn set_render_pass(&mut self, render_pass: vk::RenderPass, subpass: u32) -> &mut Self {
        self.render_pass = render_pass;
        self.subpass = subpass;
        self.mark_state_dirty()
    }

    pub fn set_depth_test(&mut self, test: bool, write: bool, compare: vk::CompareOp) -> &mut Self {
        self.depth_stencil.depth_test_enable = test.into();
        self.depth_stencil.depth_write_enable = write.into();
        self.depth_stencil.depth_compare_op = compare;
        self.mark_state_dirty()
    }

    pub fn set_depth_bounds_test(&mut self, enable: bool, min: f32, max: f32) -> &mut Self {
        self.depth_stencil.depth_bounds_test_enable = enable.into();
        self.depth_stencil.min_depth_bounds = min;
        self.depth_stencil.max_depth_bounds = max;
        self.mark_state_dirty()
    }

    pub fn set_stencil_test(
        &mut self,
        enable: bool,
        front: vk::StencilOpState,
        back: vk::StencilOpState,
    ) -> &mut Self {
        self.depth_stencil.stencil_test_enable = enable.into();
        self.depth_stencil.front = front;
        self.depth_stencil.back = back;
        self.mark_state_dirty()
    }

    /// Sets the blend state of attachment `index`, adding default attachments up to it.
    pub fn set_color_blend_attachment(
        &mut self,
        index: usize,
        state: vk::PipelineColorBlendAttachmentState,
    ) -> &mut Self {
        if self.blend_attachments.len() <= index {
            self.blend_attachments
                .resize(index + 1, Self::default_color_blend_state());
        }
        self.blend_attachments[index] = state;
        self.mark_state_dirty()
    }

    pub fn set_logic_op(&mut self, enable: bool, op: vk::LogicOp) -> &mut Self {
        self.logic_op_enable = enable;
        self.logic_op = op;
        self.mark_state_dirty()
    }

    pub fn set_blend_constants(&mut self, constants: [f32; 4]) -> &mut Self {
        self.blend_constants = constants;
        self.mark_state_dirty()
    }

    // Layout mutators

    pub fn set_descriptor_set_layout(&mut self, slot: usize, layout: vk::DescriptorSetLayout) -> &mut Self {
        assert!(slot < MAX_DESCRIPTOR_SETS, "descriptor set slot {} out of range", slot);
        self.set_layouts[slot] = layout;
        self.layout_dirty = true;
        self
    }

    pub fn add_push_constant_range(
        &mut self,
        stages: vk::ShaderStageFlags,
        offset: u32,
        size: u32,
    ) -> &mut Self {
        self.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags: stages,
            offset,
            size,
        });
        self.layout_dirty = true;
        self
    }

    /// Returns the cached pipeline, rebuilding the layout and pipeline first when dirty.
    pub fn create_pipeline(&mut self) -> GfxResult<vk::Pipeline> {
        if !self.is_dirty() {
            return Ok(self.pipeline);
        }

        let mut layout_rebuilt = false;
        if self.layout_dirty || self.layout == vk::PipelineLayout::null() {
            self.rebuild_layout()?;
            layout_rebuilt = true;
        }

        if self.state_dirty || layout_rebuilt || self.pipeline == vk::Pipeline::null() {
            self.rebuild_pipeline()?;
        }
        Ok(self.pipeline)
    }

    pub fn is_dirty(&self) -> bool {
        self.state_dirty || self.layout_dirty || self.pipeline == vk::Pipeline::null()
    }

    /// Destroys the cached pipeline and layout. The description is kept for the next build.
    pub fn reset_resources(&mut self) {
        let device = self.ctx.device();
        if self.pipeline != vk::Pipeline::null() {
            unsafe { device.destroy_pipeline(self.pipeline) };
            self.pipeline = vk::Pipeline::null();
        }
        if self.layout != vk::PipelineLayout::null() {
            unsafe { device.destroy_pipeline_layout(self.layout) };
            self.layout = vk::PipelineLayout::null();
        }
        self.state_dirty = true;
        self.layout_dirty = true;
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    // Binding

    pub fn bind(&self, cmd: &CommandBuffer) {
        assert_ne!(self.pipeline, vk::Pipeline::null(), "binding a pipeline that was never built");
        unsafe {
            self.ctx
                .device()
                .cmd_bind_pipeline(cmd.handle(), vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }

    pub fn bind_descriptor_sets(&self, cmd: &CommandBuffer, first_set: u32, sets: &[&DescriptorSetInstance]) {
        let handles = sets.iter().map(|s| s.set()).collect::<Vec<_>>();
        unsafe {
            self.ctx.device().cmd_bind_descriptor_sets(
                cmd.handle(),
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                first_set,
                &handles,
            );
        }
    }

    pub fn push_constants(&self, cmd: &CommandBuffer, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe {
            self.ctx
                .device()
                .cmd_push_constants(cmd.handle(), self.layout, stages, offset, data);
        }
    }

    // String-keyed state

    pub fn set_state_by_key(&mut self, key: &str, value: &str) -> Result<(), PipelineStateError> {
        let invalid = || PipelineStateError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "polygon_mode" => {
                let mode = lookup(POLYGON_MODES, value).ok_or_else(invalid)?;
                self.set_polygon_mode(mode);
            }
            "cull_mode" => {
                self.rasterization.cull_mode = lookup(CULL_MODES, value).ok_or_else(invalid)?;
                self.mark_state_dirty();
            }
            "front_face" => {
                self.rasterization.front_face = lookup(FRONT_FACES, value).ok_or_else(invalid)?;
                self.mark_state_dirty();
            }
            "topology" => {
                let topology = lookup(TOPOLOGIES, value).ok_or_else(invalid)?;
                self.set_topology(topology);
            }
            "line_width" => {
                let width = value.parse::<f32>().map_err(|_| invalid())?;
                self.set_line_width(width);
            }
            "depth_test" => {
                self.depth_stencil.depth_test_enable = parse_bool(value).ok_or_else(invalid)?.into();
                self.mark_state_dirty();
            }
            "depth_write" => {
                self.depth_stencil.depth_write_enable = parse_bool(value).ok_or_else(invalid)?.into();
                self.mark_state_dirty();
            }
            "depth_compare" => {
                self.depth_stencil.depth_compare_op = lookup(COMPARE_OPS, value).ok_or_else(invalid)?;
                self.mark_state_dirty();
            }
            "primitive_restart" => {
                let enable = parse_bool(value).ok_or_else(invalid)?;
                self.set_primitive_restart(enable);
            }
            "rasterizer_discard" => {
                let enable = parse_bool(value).ok_or_else(invalid)?;
                self.set_rasterizer_discard(enable);
            }
            "depth_clamp" => {
                let enable = parse_bool(value).ok_or_else(invalid)?;
                self.set_depth_clamp(enable);
            }
            _ => return Err(PipelineStateError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn get_state_by_key(&self, key: &str) -> Result<String, PipelineStateError> {
        let value = match key {
            "polygon_mode" => name_of(POLYGON_MODES, self.rasterization.polygon_mode),
            "cull_mode" => name_of(CULL_MODES, self.rasterization.cull_mode),
            "front_face" => name_of(FRONT_FACES, self.rasterization.front_face),
            "topology" => name_of(TOPOLOGIES, self.input_assembly.topology),
            "line_width" => return Ok(self.rasterization.line_width.to_string()),
            "depth_test" => bool_name(self.depth_stencil.depth_test_enable),
            "depth_write" => bool_name(self.depth_stencil.depth_write_enable),
            "depth_compare" => name_of(COMPARE_OPS, self.depth_stencil.depth_compare_op),
            "primitive_restart" => bool_name(self.input_assembly.primitive_restart_enable),
            "rasterizer_discard" => bool_name(self.rasterization.rasterizer_discard_enable),
            "depth_clamp" => bool_name(self.rasterization.depth_clamp_enable),
            _ => return Err(PipelineStateError::UnknownKey(key.to_string())),
        };
        Ok(value.unwrap_or("unknown").to_string())
    }

    fn mark_state_dirty(&mut self) -> &mut Self {
        self.state_dirty = true;
        self
    }

    fn rebuild_layout(&mut self) -> GfxResult<()> {
        let device = self.ctx.device();
        if self.layout != vk::PipelineLayout::null() {
            unsafe { device.destroy_pipeline_layout(self.layout) };
            self.layout = vk::PipelineLayout::null();
        }

        let used_slots = self
            .set_layouts
            .iter()
            .rposition(|l| *l != vk::DescriptorSetLayout::null())
            .map_or(0, |last| last + 1);
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&self.set_layouts[..used_slots])
            .push_constant_ranges(&self.push_constant_ranges);

        self.layout = unsafe {
            device.create_pipeline_layout(&info).map_err(|e| {
                log::error!("Unable to create pipeline layout: {}", e);
                GraphicsError::DescriptorSetCreateError
            })?
        };
        self.layout_dirty = false;
        Ok(())
    }

    fn rebuild_pipeline(&mut self) -> GfxResult<()> {
        assert_ne!(self.render_pass, vk::RenderPass::null(), "pipeline has no render pass");
        let device = self.ctx.device();
        if self.pipeline != vk::Pipeline::null() {
            unsafe { device.destroy_pipeline(self.pipeline) };
            self.pipeline = vk::Pipeline::null();
        }

        let stages = self
            .stages
            .iter()
            .map(|s| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(s.stage)
                    .module(s.module)
                    .name(&s.entry)
            })
            .collect::<Vec<_>>();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&self.viewports)
            .scissors(&self.scissors);
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(self.logic_op_enable)
            .logic_op(self.logic_op)
            .attachments(&self.blend_attachments)
            .blend_constants(self.blend_constants);
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&self.dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .flags(self.flags)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&self.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterization)
            .multisample_state(&self.multisample)
            .depth_stencil_state(&self.depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(self.render_pass)
            .subpass(self.subpass);

        self.pipeline = unsafe {
            device.create_graphics_pipeline(&info).map_err(|e| {
                log::error!("Unable to create graphics pipeline: {}", e);
                GraphicsError::PipelineCreateError
            })?
        };
        self.state_dirty = false;
        log::debug!("Built pipeline with {} stages", stages.len());
        Ok(())
    }

    fn default_input_assembly_info() -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
    }

    fn default_rasterization_info() -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
    }

    fn default_multisample_info() -> vk::PipelineMultisampleStateCreateInfo<'static> {
        vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false)
    }

    fn default_depth_stencil_info() -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .depth_compare_op(vk::CompareOp::NEVER)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false)
    }

    fn default_color_blend_state() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
    }
}

impl Drop for PipelineStateObject {
    fn drop(&mut self) {
        self.reset_resources();
    }
}

const POLYGON_MODES: &[(&str, vk::PolygonMode)] = &[
    ("fill", vk::PolygonMode::FILL),
    ("line", vk::PolygonMode::LINE),
    ("point", vk::PolygonMode::POINT),
];

const CULL_MODES: &[(&str, vk::CullModeFlags)] = &[
    ("none", vk::CullModeFlags::NONE),
    ("front", vk::CullModeFlags::FRONT),
    ("back", vk::CullModeFlags::BACK),
    ("front_and_back", vk::CullModeFlags::FRONT_AND_BACK),
];

const FRONT_FACES: &[(&str, vk::FrontFace)] = &[
    ("counter_clockwise", vk::FrontFace::COUNTER_CLOCKWISE),
    ("clockwise", vk::FrontFace::CLOCKWISE),
];

const TOPOLOGIES: &[(&str, vk::PrimitiveTopology)] = &[
    ("point_list", vk::PrimitiveTopology::POINT_LIST),
    ("line_list", vk::PrimitiveTopology::LINE_LIST),
    ("line_strip", vk::PrimitiveTopology::LINE_STRIP),
    ("triangle_list", vk::PrimitiveTopology::TRIANGLE_LIST),
    ("triangle_strip", vk::PrimitiveTopology::TRIANGLE_STRIP),
    ("triangle_fan", vk::PrimitiveTopology::TRIANGLE_FAN),
];

const COMPARE_OPS: &[(&str, vk::CompareOp)] = &[
    ("never", vk::CompareOp::NEVER),
    ("less", vk::CompareOp::LESS),
    ("equal", vk::CompareOp::EQUAL),
    ("less_or_equal", vk::CompareOp::LESS_OR_EQUAL),
    ("greater", vk::CompareOp::GREATER),
    ("not_equal", vk::CompareOp::NOT_EQUAL),
    ("greater_or_equal", vk::CompareOp::GREATER_OR_EQUAL),
    ("always", vk::CompareOp::ALWAYS),
];

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    table
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| *v)
}

fn name_of<T: PartialEq>(table: &[(&'static str, T)], value: T) -> Option<&'static str> {
    table.iter().find(|(_, v)| *v == value).map(|(n, _)| *n)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn bool_name(value: vk::Bool32) -> Option<&'static str> {
    Some(if value == vk::TRUE { "true" } else { "false" })
}
