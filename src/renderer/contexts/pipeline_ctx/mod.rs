pub mod descriptor_set_layout_builder;
pub mod pipeline;
pub mod shader;

use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::VulkanDevice;
use crate::renderer::contexts::pipeline_ctx::descriptor_set_layout_builder::DescriptorSetLayoutBuilder;
use crate::renderer::contexts::pipeline_ctx::pipeline::GraphicsPipelineBuilder;
use crate::renderer::contexts::pipeline_ctx::shader::GraphicsShader;

/// Responsibilities:
/// - Create the render pass the swapchain framebuffers are built against
/// - Create the per-frame descriptor set layout and the pipeline layout
/// - Build the quad's graphics pipeline
pub struct RenderPipelineContext {
    pub render_pass: vk::RenderPass,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    device: Arc<VulkanDevice>,
}

impl RenderPipelineContext {
    pub fn new(device: Arc<VulkanDevice>, color_format: vk::Format) -> Result<Self> {
        // Null handles are skipped on drop, so partial construction cleans up after itself
        let mut ctx = Self {
            render_pass: vk::RenderPass::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            device,
        };
        let logical = &ctx.device.logical;

        ctx.render_pass = create_render_pass(logical, color_format)?;
        ctx.descriptor_set_layout = DescriptorSetLayoutBuilder::per_frame().build(logical)?;

        let set_layouts = [ctx.descriptor_set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        ctx.pipeline_layout = unsafe { logical.create_pipeline_layout(&layout_info, None)? };

        // Only needed until the pipeline exists
        let shader = GraphicsShader::quad(ctx.device.clone())?;
        ctx.pipeline = GraphicsPipelineBuilder::new(logical)
            .with_shader(&shader)
            .with_pipeline_layout(ctx.pipeline_layout)
            .with_render_pass(ctx.render_pass)
            .build()?;

        log::debug!("Created quad pipeline for {:?}", color_format);
        Ok(ctx)
    }
}

impl Drop for RenderPipelineContext {
    fn drop(&mut self) {
        let logical = &self.device.logical;
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                logical.destroy_pipeline(self.pipeline, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                logical.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
                logical.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                logical.destroy_render_pass(self.render_pass, None);
            }
        }
    }
}

/// Single color attachment cleared on load and left ready for presentation
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

/// Holds the layout transition until the acquire semaphore's wait stage
pub fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
}

fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let attachments = [color_attachment(format)];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];
    let dependencies = [external_dependency()];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    Ok(unsafe { device.create_render_pass(&render_pass_info, None)? })
}
