use ash::vk;
use color_eyre::eyre::Result;

/// Runs one-off upload work on the graphics queue and waits for it
pub struct TransferContext {
    transfer_fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,

    queue: vk::Queue,
    device: ash::Device,
}

impl TransferContext {
    const TIMEOUT_NS: u64 = 10_000_000_000;

    pub fn new(
        queue: vk::Queue,
        queue_family_index: u32,
        device: ash::Device,
    ) -> Result<Self> {
        let transfer_fence = unsafe {
            device.create_fence(&vk::FenceCreateInfo::default(), None)?
        };

        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = match unsafe { device.create_command_pool(&command_pool_info, None) } {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { device.destroy_fence(transfer_fence, None) };
                return Err(err.into());
            }
        };

        let mut ctx = Self {
            transfer_fence,
            command_pool,
            command_buffer: vk::CommandBuffer::null(),
            queue,
            device,
        };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        ctx.command_buffer = unsafe {
            ctx.device.allocate_command_buffers(&command_buffer_info)?[0]
        };

        Ok(ctx)
    }

    /// Records `func` into a one-time command buffer, submits it and blocks until the GPU
    /// has finished executing it
    pub fn immediate_submit<F>(&self, func: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let cmd = self.command_buffer;

        let cmd_begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(cmd, &cmd_begin_info)?;
        }

        func(cmd, &self.device)?;

        unsafe {
            self.device.end_command_buffer(cmd)?;
        }

        let cmd = [cmd];
        let submit = vk::SubmitInfo::default().command_buffers(&cmd);
        unsafe {
            self.device.queue_submit(self.queue, &[submit], self.transfer_fence)?;
            self.device.wait_for_fences(&[self.transfer_fence], true, Self::TIMEOUT_NS)?;
            self.device.reset_fences(&[self.transfer_fence])?;
            self.device.reset_command_pool(
                self.command_pool,
                vk::CommandPoolResetFlags::empty(),
            )?;
        }

        Ok(())
    }
}

impl Drop for TransferContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_fence(self.transfer_fence, None);
        }
    }
}
