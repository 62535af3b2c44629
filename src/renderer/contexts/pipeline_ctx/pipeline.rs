use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::contexts::pipeline_ctx::shader::GraphicsShader;
use crate::renderer::shader_data::PerVertexData;

/// Collects fixed-function state for a graphics pipeline drawn inside a render pass
pub struct GraphicsPipelineBuilder<'a> {
    device: &'a ash::Device,

    vertex_bindings: [vk::VertexInputBindingDescription; 1],
    vertex_attributes: [vk::VertexInputAttributeDescription; 3],
    input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'a>,
    rasterization: vk::PipelineRasterizationStateCreateInfo<'a>,
    color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    multisample: vk::PipelineMultisampleStateCreateInfo<'a>,
    shader: Option<&'a GraphicsShader>,
    pipeline_layout: Option<vk::PipelineLayout>,
    render_pass: Option<vk::RenderPass>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new(device: &'a ash::Device) -> Self {
        Self {
            device,

            vertex_bindings: [PerVertexData::binding_description()],
            vertex_attributes: PerVertexData::attribute_descriptions(),
            input_assembly: Self::default_input_assembly_info(),
            rasterization: Self::default_rasterization_info(),
            color_blend_attachment: Self::default_color_blend_state(),
            multisample: Self::default_multisample_info(),
            shader: None,
            pipeline_layout: None,
            render_pass: None,
        }
    }

    pub fn with_shader(mut self, shader: &'a GraphicsShader) -> Self {
        self.shader = Some(shader);
        self
    }

    pub fn with_pipeline_layout(mut self, layout: vk::PipelineLayout) -> Self {
        self.pipeline_layout = Some(layout);
        self
    }

    pub fn with_render_pass(mut self, render_pass: vk::RenderPass) -> Self {
        self.render_pass = Some(render_pass);
        self
    }

    pub fn build(self) -> Result<vk::Pipeline> {
        let shader = self.shader.ok_or_eyre("No shader provided for GraphicsPipelineBuilder")?;
        let pipeline_layout = self.pipeline_layout.ok_or_eyre(
            "No pipeline layout provided for GraphicsPipelineBuilder",
        )?;
        let render_pass = self.render_pass.ok_or_eyre(
            "No render pass provided for GraphicsPipelineBuilder",
        )?;

        let shader_stages = shader.stages();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        // Extent is supplied per frame through dynamic state
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let color_blend_attachments = [self.color_blend_attachment];
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let dynamic_states = dynamic_states();
        let dynamic_info = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .layout(pipeline_layout)
            .render_pass(render_pass)
            .subpass(0)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&self.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterization)
            .multisample_state(&self.multisample)
            .color_blend_state(&color_blend_info)
            .dynamic_state(&dynamic_info);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, err)| eyre!("Failed to create graphics pipeline: {}", err))?
        };

        pipelines.into_iter().next().ok_or_eyre("No graphics pipeline was created")
    }

    fn default_input_assembly_info() -> vk::PipelineInputAssemblyStateCreateInfo<'a> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
    }

    fn default_rasterization_info() -> vk::PipelineRasterizationStateCreateInfo<'a> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            // Both faces stay visible while the quad spins
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
    }

    fn default_color_blend_state() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
    }

    fn default_multisample_info() -> vk::PipelineMultisampleStateCreateInfo<'a> {
        vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            // 1 sample per pixel means no multisampling
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false)
    }
}

pub fn dynamic_states() -> [vk::DynamicState; 2] {
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
}
