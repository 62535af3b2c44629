use ash::vk;
use gpu_descriptor::{
    CreatePoolError, DescriptorDevice, DescriptorPoolCreateFlags, DescriptorTotalCount,
    DeviceAllocationError,
};
use smallvec::SmallVec;

/// Lets `gpu_descriptor` grow and recycle descriptor pools on an ash device
pub struct DescriptorAshDevice(pub ash::Device);

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
for DescriptorAshDevice
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, CreatePoolError> {
        let sizes = pool_sizes(descriptor_count);

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&sizes)
                    .flags(pool_flags(flags)),
                None,
            )
        };

        result.map_err(pool_error)
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.0.destroy_descriptor_pool(pool, None)
        }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), DeviceAllocationError> {
        let set_layouts: SmallVec<[_; 16]> = layouts.copied().collect();

        let result = unsafe {
            self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            )
        };

        let allocated = result.map_err(allocation_error)?;
        sets.extend(allocated);
        Ok(())
    }

    unsafe fn dealloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: SmallVec<[_; 16]> = sets.collect();
        if let Err(err) = unsafe { self.0.free_descriptor_sets(*pool, &sets) } {
            log::error!("Failed to free {} descriptor sets: {}", sets.len(), err);
        }
    }
}

/// Non-zero entries of `count` as Vulkan pool sizes. Inline uniform blocks are not used.
pub fn pool_sizes(count: &DescriptorTotalCount) -> SmallVec<[vk::DescriptorPoolSize; 13]> {
    if count.inline_uniform_block_bytes != 0 || count.inline_uniform_block_bindings != 0 {
        log::warn!("Ignoring inline uniform block descriptors");
    }

    [
        (vk::DescriptorType::SAMPLER, count.sampler),
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, count.combined_image_sampler),
        (vk::DescriptorType::SAMPLED_IMAGE, count.sampled_image),
        (vk::DescriptorType::STORAGE_IMAGE, count.storage_image),
        (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, count.uniform_texel_buffer),
        (vk::DescriptorType::STORAGE_TEXEL_BUFFER, count.storage_texel_buffer),
        (vk::DescriptorType::UNIFORM_BUFFER, count.uniform_buffer),
        (vk::DescriptorType::STORAGE_BUFFER, count.storage_buffer),
        (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, count.uniform_buffer_dynamic),
        (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, count.storage_buffer_dynamic),
        (vk::DescriptorType::INPUT_ATTACHMENT, count.input_attachment),
        (vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, count.acceleration_structure),
    ]
        .into_iter()
        .filter(|&(_, descriptor_count)| descriptor_count != 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect()
}

fn pool_flags(flags: DescriptorPoolCreateFlags) -> vk::DescriptorPoolCreateFlags {
    let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();

    if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
        ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
    }
    if flags.contains(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
        ash_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
    }

    ash_flags
}

fn pool_error(result: vk::Result) -> CreatePoolError {
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => CreatePoolError::OutOfDeviceMemory,
        vk::Result::ERROR_FRAGMENTATION => CreatePoolError::Fragmentation,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => CreatePoolError::OutOfHostMemory,
        other => {
            log::error!("Unexpected descriptor pool result '{}'", other);
            CreatePoolError::OutOfHostMemory
        }
    }
}

/// Pool exhaustion and fragmentation are reported distinctly so the allocator opens a new pool
fn allocation_error(result: vk::Result) -> DeviceAllocationError {
    match result {
        vk::Result::ERROR_OUT_OF_POOL_MEMORY => DeviceAllocationError::OutOfPoolMemory,
        vk::Result::ERROR_FRAGMENTED_POOL => DeviceAllocationError::FragmentedPool,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => DeviceAllocationError::OutOfDeviceMemory,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => DeviceAllocationError::OutOfHostMemory,
        other => {
            log::error!("Unexpected descriptor set allocation result '{}'", other);
            DeviceAllocationError::OutOfHostMemory
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_skip_empty_types() {
        let count = DescriptorTotalCount {
            uniform_buffer: 3,
            sampled_image: 3,
            sampler: 3,
            ..Default::default()
        };
        let sizes = pool_sizes(&count);
        let types: Vec<_> = sizes.iter().map(|s| s.ty).collect();
        assert_eq!(
            types,
            [
                vk::DescriptorType::SAMPLER,
                vk::DescriptorType::SAMPLED_IMAGE,
                vk::DescriptorType::UNIFORM_BUFFER,
            ]
        );
        assert!(sizes.iter().all(|s| s.descriptor_count == 3));
    }

    #[test]
    fn empty_count_gives_no_pool_sizes() {
        assert!(pool_sizes(&DescriptorTotalCount::default()).is_empty());
    }

    #[test]
    fn pool_flags_are_translated() {
        assert_eq!(
            pool_flags(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET),
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
        );
        assert_eq!(
            pool_flags(DescriptorPoolCreateFlags::empty()),
            vk::DescriptorPoolCreateFlags::empty(),
        );
    }

    #[test]
    fn exhausted_pool_is_not_confused_with_fragmentation() {
        assert!(matches!(
            allocation_error(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
            DeviceAllocationError::OutOfPoolMemory
        ));
        assert!(matches!(
            allocation_error(vk::Result::ERROR_FRAGMENTED_POOL),
            DeviceAllocationError::FragmentedPool
        ));
        assert!(matches!(
            pool_error(vk::Result::ERROR_FRAGMENTATION),
            CreatePoolError::Fragmentation
        ));
    }
}
