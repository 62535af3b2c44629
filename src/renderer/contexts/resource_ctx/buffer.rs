use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, Result};
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation,
};
use crate::renderer::contexts::device_ctx::device::VulkanDevice;
use crate::renderer::error::{RenderError, RenderResult};
use crate::renderer::gpu::UniformMemory;

pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl AllocatedBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
        mem_loc: MemoryLocation,
    ) -> Result<Self> {
        let buffer = {
            let buffer_info = vk::BufferCreateInfo {
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            unsafe { device.logical.create_buffer(&buffer_info, None)? }
        };

        // Owns the buffer from here, so every early return below releases it
        let mut allocated = Self {
            buffer,
            size,
            allocation: None,
            device,
        };

        let requirements = unsafe {
            allocated.device.logical.get_buffer_memory_requirements(buffer)
        };
        let allocation = allocated.device
            .allocator()?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: mem_loc,
                linear: true,
                allocation_scheme: AllocationScheme::DedicatedBuffer(buffer),
            })?;
        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        allocated.allocation = Some(allocation);

        unsafe {
            allocated.device.logical.bind_buffer_memory(buffer, memory, offset)?;
        }

        Ok(allocated)
    }

    /// Copies into the host-visible allocation, failing for GPU-only memory
    pub fn write<T>(
        &mut self,
        data: &[T],
        start_offset: usize,
    ) -> Result<presser::CopyRecord>
    where
        T: Copy,
    {
        let mut slab = self.allocation
            .as_mut()
            .and_then(|allocation| allocation.try_as_mapped_slab())
            .ok_or_else(|| eyre!("Buffer memory is not host visible"))?;
        Ok(presser::copy_from_slice_to_offset(data, &mut slab, start_offset)?)
    }

    /// Device-local buffer filled with `data` through a staging buffer
    pub fn with_data<T>(
        device: Arc<VulkanDevice>,
        data: &[T],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Self>
    where
        T: Copy,
    {
        let size = size_of_val(data) as u64;
        let mut staging = Self::new(
            device.clone(),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            &format!("{} staging", name),
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(data, 0)?;

        let buffer = Self::new(
            device.clone(),
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            name,
            MemoryLocation::GpuOnly,
        )?;

        device.immediate_submit(|cmd, device| {
            let region = vk::BufferCopy::default().size(size);
            unsafe {
                device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
            }
            Ok(())
        })?;

        Ok(buffer)
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free buffer memory: {}", err);
                    }
                }
                Err(err) => log::error!("Failed to free buffer memory: {}", err),
            }
        }
        unsafe {
            self.device.logical.destroy_buffer(self.buffer, None);
        }
    }
}

/// Host-visible uniform buffer owned by one frame slot
pub struct UniformBuffer(AllocatedBuffer);

impl UniformBuffer {
    pub fn new(device: Arc<VulkanDevice>, size: u64, name: &str) -> Result<Self> {
        Ok(Self(AllocatedBuffer::new(
            device,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            name,
            MemoryLocation::CpuToGpu,
        )?))
    }

    pub fn handle(&self) -> vk::Buffer {
        self.0.buffer
    }

    pub fn size(&self) -> u64 {
        self.0.size
    }
}

impl UniformMemory for UniformBuffer {
    fn write(&mut self, bytes: &[u8]) -> RenderResult<()> {
        let mut slab = self.0.allocation
            .as_mut()
            .and_then(|allocation| allocation.try_as_mapped_slab())
            .ok_or_else(|| RenderError::ResourceExhaustion("Uniform buffer is not mapped".into()))?;
        presser::copy_from_slice_to_offset(bytes, &mut slab, 0)
            .map(|_| ())
            .map_err(|err| RenderError::ResourceExhaustion(err.to_string()))
    }
}
