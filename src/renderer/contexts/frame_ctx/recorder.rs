use ash::vk;
use crate::renderer::contexts::frame_ctx::swapchain::SwapchainManager;
use crate::renderer::error::RenderResult;
use crate::renderer::gpu::{DrawResources, GpuDevice};

/// Re-records the single fixed draw into a frame slot's command buffer
pub struct CommandRecorder {
    resources: DrawResources,
    clear_color: [f32; 4],
}

impl CommandRecorder {
    pub fn new(resources: DrawResources, clear_color: [f32; 4]) -> Self {
        Self {
            resources,
            clear_color,
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.resources.render_pass
    }

    /// The framebuffer follows `image_index`, the descriptor set follows the frame slot
    pub fn record<D: GpuDevice>(
        &self,
        device: &D,
        command_buffer: vk::CommandBuffer,
        swapchain: &SwapchainManager<D>,
        image_index: u32,
        descriptor_set: vk::DescriptorSet,
    ) -> RenderResult<()> {
        let extent = swapchain.extent();
        let res = &self.resources;

        device.begin_command_buffer(command_buffer)?;
        device.cmd_begin_render_pass(
            command_buffer,
            res.render_pass,
            swapchain.framebuffer(image_index),
            extent,
            self.clear_color,
        );

        device.cmd_bind_pipeline(command_buffer, res.pipeline);
        device.cmd_set_viewport(command_buffer, vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        device.cmd_set_scissor(command_buffer, vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        });
        device.cmd_bind_vertex_buffer(command_buffer, res.vertex_buffer);
        device.cmd_bind_index_buffer(command_buffer, res.index_buffer);
        device.cmd_bind_descriptor_set(command_buffer, res.pipeline_layout, descriptor_set);
        device.cmd_draw_indexed(command_buffer, res.index_count);

        device.cmd_end_render_pass(command_buffer);
        device.end_command_buffer(command_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use crate::renderer::config::SwapchainOptions;
    use crate::renderer::error::RenderError;
    use crate::renderer::testing::{draw_resources, Call, MockDevice};

    const WINDOW: vk::Extent2D = vk::Extent2D { width: 800, height: 600 };

    fn setup() -> (std::sync::Arc<MockDevice>, SwapchainManager<MockDevice>, CommandRecorder) {
        let device = MockDevice::new();
        let resources = draw_resources();
        let swapchain = SwapchainManager::new(
            device.clone(),
            &SwapchainOptions::default(),
            resources.render_pass,
            WINDOW,
        ).unwrap();
        (device, swapchain, CommandRecorder::new(resources, [0.1, 0.2, 0.3, 1.0]))
    }

    #[test]
    fn records_the_full_draw_in_order() {
        let (device, swapchain, recorder) = setup();
        let cmd = device.allocate_command_buffer().unwrap();
        let set = vk::DescriptorSet::from_raw(0xD5);
        device.state_mut().calls.clear();

        recorder.record(device.as_ref(), cmd, &swapchain, 2, set).unwrap();

        let res = draw_resources();
        let calls = device.state().calls.clone();
        assert_eq!(calls, vec![
            Call::BeginCommandBuffer(cmd),
            Call::BeginRenderPass {
                command_buffer: cmd,
                framebuffer: swapchain.framebuffer(2),
                extent: WINDOW,
                clear_color: [0.1, 0.2, 0.3, 1.0],
            },
            Call::BindPipeline(res.pipeline),
            Call::SetViewport {
                width: WINDOW.width as f32,
                height: WINDOW.height as f32,
            },
            Call::SetScissor(WINDOW),
            Call::BindVertexBuffer(res.vertex_buffer),
            Call::BindIndexBuffer(res.index_buffer),
            Call::BindDescriptorSet(set),
            Call::DrawIndexed { index_count: 6 },
            Call::EndRenderPass(cmd),
            Call::EndCommandBuffer(cmd),
        ]);
    }

    #[test]
    fn recording_error_is_propagated() {
        let (device, swapchain, recorder) = setup();
        let cmd = device.allocate_command_buffer().unwrap();
        device.state_mut().fail_end_command_buffer = true;
        let result = recorder.record(
            device.as_ref(),
            cmd,
            &swapchain,
            0,
            vk::DescriptorSet::from_raw(1),
        );
        assert_eq!(
            result,
            Err(RenderError::FatalDevice(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)),
        );
    }
}
