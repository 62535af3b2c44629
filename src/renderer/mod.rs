pub mod config;
pub mod error;
pub mod gpu;

mod contexts;
mod shader_data;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::device_ctx::device::VulkanDevice;
use crate::renderer::contexts::frame_ctx::swapchain::choose_surface_format;
use crate::renderer::contexts::frame_ctx::RenderFrameContext;
use crate::renderer::contexts::pipeline_ctx::RenderPipelineContext;
use crate::renderer::contexts::resource_ctx::RenderResourceContext;
use crate::renderer::error::RenderResult;
use crate::renderer::gpu::{DrawResources, GpuDevice};

pub use crate::renderer::contexts::frame_ctx::FrameOutcome;

pub struct Renderer {
    // Field order is drop order: frame loop, then resources, then pipelines, then the device
    frm: RenderFrameContext<VulkanDevice>,
    res: RenderResourceContext,
    pip: RenderPipelineContext,
    dev: RenderDeviceContext,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: RenderConfig) -> Result<Self> {
        config.validate()?;

        let dev = RenderDeviceContext::new(window)?;
        let device = dev.device.clone();

        // The render pass and every later swapchain must agree on the color format
        let support = device.surface_support()?;
        let format = choose_surface_format(&support.formats, config.swapchain.preferred_format)?;
        let config = config.with_preferred_format(format);
        log::info!("Surface format {:?} / {:?}", format.format, format.color_space);

        let pip = RenderPipelineContext::new(device.clone(), format.format)?;
        let (res, slot_uniforms) = RenderResourceContext::new(
            device.clone(),
            pip.descriptor_set_layout,
            &config,
        )?;

        let resources = DrawResources {
            render_pass: pip.render_pass,
            pipeline: pip.pipeline,
            pipeline_layout: pip.pipeline_layout,
            vertex_buffer: res.mesh.vertex_buffer.buffer,
            index_buffer: res.mesh.index_buffer.buffer,
            index_count: res.mesh.index_count,
        };
        let frm = RenderFrameContext::new(
            device,
            &config,
            resources,
            slot_uniforms,
            dev.window_extent(),
        )?;

        Ok(Self { frm, res, pip, dev })
    }

    /// Draws and presents one frame sized to the window's current drawable area
    pub fn render_one_frame(&mut self) -> RenderResult<FrameOutcome> {
        self.frm.render_one_frame(self.dev.window_extent())
    }

    pub fn request_resize(&mut self) {
        self.frm.request_rebuild();
    }

    pub fn window(&self) -> &Window {
        &self.dev.window
    }

    /// Blocks until the GPU is idle, then releases everything in dependency order
    pub fn wait_idle_and_teardown(self) -> Result<()> {
        let Self { frm, res, pip, dev } = self;
        let result = frm.wait_idle_and_teardown();
        drop(res);
        drop(pip);
        drop(dev);
        Ok(result?)
    }
}
