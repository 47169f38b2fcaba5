//! Graphics pipelines and pipeline layouts

use super::context::GpuContext;
use super::error::{VulkanError, VulkanResult};
use super::shader::ShaderSet;
use super::vertex_layout::VulkanVertexLayout;
use ash::{vk, Device};
use std::sync::Arc;

/// Fixed-function state for a graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Primitive assembly
    pub topology: vk::PrimitiveTopology,
    /// Fill, line or point rasterization
    pub polygon_mode: vk::PolygonMode,
    /// Faces to discard
    pub cull_mode: vk::CullModeFlags,
    /// Winding treated as front-facing
    pub front_face: vk::FrontFace,
    /// Depth testing
    pub depth_test: bool,
    /// Depth writes
    pub depth_write: bool,
    /// Depth comparison
    pub depth_compare_op: vk::CompareOp,
    /// Standard alpha blending on the color attachment
    pub blend_enable: bool,
    /// State supplied at record time
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Render pass the pipeline is compatible with
    pub render_pass: vk::RenderPass,
    /// Subpass index within `render_pass`
    pub subpass: u32,
}

impl PipelineConfig {
    /// Opaque triangles with back-face culling, counter-clockwise front faces, a
    /// less-than depth test, and viewport and scissor left dynamic
    pub fn default_for(render_pass: vk::RenderPass) -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS,
            blend_enable: false,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            render_pass,
            subpass: 0,
        }
    }

    /// Rasterizer state for this configuration
    pub fn rasterization_state(&self) -> vk::PipelineRasterizationStateCreateInfo {
        vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false)
            .build()
    }

    /// Depth/stencil state for this configuration
    pub fn depth_stencil_state(&self) -> vk::PipelineDepthStencilStateCreateInfo {
        vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .build()
    }

    /// Blend state of the single color attachment
    pub fn color_blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let builder = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(self.blend_enable);

        if self.blend_enable {
            builder
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        } else {
            builder
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ZERO)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        }
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Layout over `set_layouts` (in set order) and `push_constant_ranges`
    pub fn new(
        context: &GpuContext,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let device = context.device().clone();
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, layout })
    }

    /// Get layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup
///
/// Holds a share of its layout, which outlives the pipeline handle.
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: Arc<PipelineLayout>,
}

impl GraphicsPipeline {
    /// Create a pipeline drawing [`Vertex`](crate::render::mesh::Vertex) data with `shaders`
    pub fn new(
        context: &GpuContext,
        config: &PipelineConfig,
        shaders: &ShaderSet,
        layout: &Arc<PipelineLayout>,
    ) -> VulkanResult<Self> {
        let shader_stages = shaders.stage_infos();

        let bindings = [VulkanVertexLayout::binding_description()];
        let attributes = VulkanVertexLayout::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(config.topology)
            .primitive_restart_enable(false);

        // Counts only; the actual rectangles are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = config.rasterization_state();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let depth_stencil = config.depth_stencil_state();

        let color_blend_attachments = [config.color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&config.dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(config.render_pass)
            .subpass(config.subpass)
            .base_pipeline_index(-1);

        let device = context.device().clone();
        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };

        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("No pipeline returned".to_string()))?;

        Ok(Self {
            device,
            pipeline,
            layout: Arc::clone(layout),
        })
    }

    /// Bind for graphics work on `command_buffer`
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout the pipeline was created with
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_default_config() {
        let render_pass = vk::RenderPass::from_raw(0x5);
        let config = PipelineConfig::default_for(render_pass);

        assert_eq!(config.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(config.render_pass, render_pass);
        assert_eq!(config.subpass, 0);
        assert_eq!(
            config.dynamic_states,
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
    }

    #[test]
    fn test_default_rasterization_culls_back_faces() {
        let rasterizer = PipelineConfig::default_for(vk::RenderPass::null()).rasterization_state();

        assert_eq!(rasterizer.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(rasterizer.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(rasterizer.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(rasterizer.line_width, 1.0);
    }

    #[test]
    fn test_default_depth_test_is_less() {
        let depth = PipelineConfig::default_for(vk::RenderPass::null()).depth_stencil_state();

        assert_eq!(depth.depth_test_enable, vk::TRUE);
        assert_eq!(depth.depth_write_enable, vk::TRUE);
        assert_eq!(depth.depth_compare_op, vk::CompareOp::LESS);
        assert_eq!(depth.stencil_test_enable, vk::FALSE);
    }

    #[test]
    fn test_blending_toggle() {
        let mut config = PipelineConfig::default_for(vk::RenderPass::null());
        let opaque = config.color_blend_attachment();
        assert_eq!(opaque.blend_enable, vk::FALSE);
        assert_eq!(opaque.color_write_mask, vk::ColorComponentFlags::RGBA);

        config.blend_enable = true;
        let blended = config.color_blend_attachment();
        assert_eq!(blended.blend_enable, vk::TRUE);
        assert_eq!(blended.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blended.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    }

    #[test]
    fn test_pipeline_layout_is_shared_not_copied() {
        // Callers get a share of the layout, so it cannot be destroyed under the pipeline
        fn shared_layout(pipeline: &GraphicsPipeline) -> Arc<PipelineLayout> {
            Arc::clone(pipeline.layout())
        }
        let _: fn(&GraphicsPipeline) -> Arc<PipelineLayout> = shared_layout;
    }
}
