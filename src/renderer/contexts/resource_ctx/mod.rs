pub mod buffer;
pub mod descriptor;
pub mod mesh;
pub mod texture;

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_descriptor::{DescriptorAllocator, DescriptorSet, DescriptorSetLayoutCreateFlags, DescriptorTotalCount};
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::VulkanDevice;
use crate::renderer::contexts::resource_ctx::buffer::UniformBuffer;
use crate::renderer::contexts::resource_ctx::descriptor::DescriptorAshDevice;
use crate::renderer::contexts::resource_ctx::mesh::QuadMesh;
use crate::renderer::contexts::resource_ctx::texture::Texture;
use crate::renderer::shader_data::UniformBufferObject;

/// Descriptors one frame slot's set consumes: the uniform block, the texture and its sampler
pub const PER_FRAME_DESCRIPTORS: DescriptorTotalCount = DescriptorTotalCount {
    sampler: 1,
    combined_image_sampler: 0,
    sampled_image: 1,
    storage_image: 0,
    uniform_texel_buffer: 0,
    storage_texel_buffer: 0,
    uniform_buffer: 1,
    storage_buffer: 0,
    uniform_buffer_dynamic: 0,
    storage_buffer_dynamic: 0,
    input_attachment: 0,
    acceleration_structure: 0,
    inline_uniform_block_bytes: 0,
    inline_uniform_block_bindings: 0,
};

/// Responsibilities:
/// - Upload the quad mesh and texture
/// - Allocate one uniform buffer and one descriptor set per frame slot
/// - Free descriptor pools once the frame slots are gone
pub struct RenderResourceContext {
    pub mesh: QuadMesh,
    pub texture: Texture,

    descriptor_sets: Vec<DescriptorSet<vk::DescriptorSet>>,
    descriptor_allocator: DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>,
    descriptor_device: DescriptorAshDevice,
}

impl RenderResourceContext {
    /// Returns the context plus each frame slot's uniform buffer paired with its descriptor set
    pub fn new(
        device: Arc<VulkanDevice>,
        layout: vk::DescriptorSetLayout,
        config: &RenderConfig,
    ) -> Result<(Self, Vec<(UniformBuffer, vk::DescriptorSet)>)> {
        let mesh = QuadMesh::upload(device.clone())?;
        let texture = Texture::load(device.clone(), config.texture_path.as_deref())?;

        let frames = config.frames_in_flight as u32;
        let descriptor_device = DescriptorAshDevice(device.logical.clone());
        let mut descriptor_allocator: DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>
            = DescriptorAllocator::new(0);

        let descriptor_sets = unsafe {
            descriptor_allocator.allocate(
                &descriptor_device,
                &layout,
                DescriptorSetLayoutCreateFlags::empty(),
                &PER_FRAME_DESCRIPTORS,
                frames,
            )?
        };

        let ctx = Self {
            mesh,
            texture,
            descriptor_sets,
            descriptor_allocator,
            descriptor_device,
        };

        let mut slots = Vec::with_capacity(config.frames_in_flight);
        for (index, set) in ctx.descriptor_sets.iter().enumerate() {
            let uniform = UniformBuffer::new(
                device.clone(),
                size_of::<UniformBufferObject>() as u64,
                &format!("Frame {} uniform buffer", index),
            )?;
            ctx.write_descriptor_set(&device.logical, *set.raw(), &uniform);
            slots.push((uniform, *set.raw()));
        }

        if slots.len() != config.frames_in_flight {
            return Err(eyre!(
                "Allocated {} descriptor sets for {} frames in flight",
                slots.len(),
                config.frames_in_flight,
            ));
        }

        log::debug!("Allocated {} per-frame descriptor sets", slots.len());
        Ok((ctx, slots))
    }

    fn write_descriptor_set(
        &self,
        device: &ash::Device,
        set: vk::DescriptorSet,
        uniform: &UniformBuffer,
    ) {
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(uniform.handle())
            .offset(0)
            .range(uniform.size())];
        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(self.texture.view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let sampler_info = [vk::DescriptorImageInfo::default()
            .sampler(self.texture.sampler)];

        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info),
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .image_info(&image_info),
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(2)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .image_info(&sampler_info),
        ];

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}

impl Drop for RenderResourceContext {
    fn drop(&mut self) {
        unsafe {
            self.descriptor_allocator.free(&self.descriptor_device, self.descriptor_sets.drain(..));
            self.descriptor_allocator.cleanup(&self.descriptor_device);
        }
    }
}
