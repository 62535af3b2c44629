use std::sync::Arc;
use ash::vk;
use crate::renderer::error::RenderResult;
use crate::renderer::gpu::{GpuDevice, UniformMemory};
use crate::renderer::shader_data::UniformBufferObject;

/// Semaphore/fence triple ordering one frame slot's CPU work, GPU work and presentation
pub struct FrameSync<D: GpuDevice> {
    // Signals when the acquired swapchain image can be written.
    pub image_available: vk::Semaphore,

    // Signals when the slot's command buffer has finished executing.
    pub render_finished: vk::Semaphore,

    // Signals when all of the slot's submitted work has completed. Created signaled so
    // the first wait returns immediately.
    pub in_flight: vk::Fence,

    device: Arc<D>,
}

impl<D: GpuDevice> FrameSync<D> {
    pub fn new(device: Arc<D>) -> RenderResult<Self> {
        // Handles start out null so a failure part way through only releases what exists
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            device,
        };
        sync.image_available = sync.device.create_semaphore()?;
        sync.render_finished = sync.device.create_semaphore()?;
        sync.in_flight = sync.device.create_fence(true)?;

        Ok(sync)
    }

    /// Replaces both semaphores with fresh unsignaled ones. The device must be idle.
    pub fn recreate_semaphores(&mut self) -> RenderResult<()> {
        self.destroy_semaphores();
        self.image_available = self.device.create_semaphore()?;
        self.render_finished = self.device.create_semaphore()?;
        Ok(())
    }

    fn destroy_semaphores(&mut self) {
        for semaphore in [&mut self.image_available, &mut self.render_finished] {
            if *semaphore != vk::Semaphore::null() {
                self.device.destroy_semaphore(*semaphore);
                *semaphore = vk::Semaphore::null();
            }
        }
    }
}

impl<D: GpuDevice> Drop for FrameSync<D> {
    fn drop(&mut self) {
        self.destroy_semaphores();
        if self.in_flight != vk::Fence::null() {
            self.device.destroy_fence(self.in_flight);
        }
    }
}

/// One of the frames that may be in flight at once
pub struct FrameSlot<D: GpuDevice> {
    pub sync: FrameSync<D>,
    pub command_buffer: vk::CommandBuffer,
    /// Bound to this slot's uniform buffer, so it follows the slot and not the image
    pub descriptor_set: vk::DescriptorSet,

    uniform: D::Uniform,
    device: Arc<D>,
}

impl<D: GpuDevice> FrameSlot<D> {
    pub fn new(
        device: Arc<D>,
        uniform: D::Uniform,
        descriptor_set: vk::DescriptorSet,
    ) -> RenderResult<Self> {
        let sync = FrameSync::new(device.clone())?;
        let command_buffer = device.allocate_command_buffer()?;

        Ok(Self {
            sync,
            command_buffer,
            descriptor_set,
            uniform,
            device,
        })
    }

    /// Must only be called between the slot's fence wait and its next submission
    pub fn write_uniforms(&mut self, ubo: &UniformBufferObject) -> RenderResult<()> {
        self.uniform.write(bytemuck::bytes_of(ubo))
    }
}

impl<D: GpuDevice> Drop for FrameSlot<D> {
    fn drop(&mut self) {
        self.device.free_command_buffer(self.command_buffer);
    }
}
