use std::path::Path;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, Result};
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation,
};
use image::{Rgba, RgbaImage};
use crate::renderer::contexts::device_ctx::device::VulkanDevice;
use crate::renderer::contexts::resource_ctx::buffer::AllocatedBuffer;

/// Sampled color image with its view and sampler
pub struct Texture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub extent: vk::Extent3D,

    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Texture {
    const FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

    /// Decodes the image at `path`. Falls back to a generated checkerboard when there is no
    /// path or the file does not exist.
    pub fn load(device: Arc<VulkanDevice>, path: Option<&Path>) -> Result<Self> {
        let pixels = match path {
            Some(path) if path.exists() => {
                log::info!("Loading texture {:?}", path);
                image::open(path)?.to_rgba8()
            }
            Some(path) => {
                log::warn!("Texture {:?} not found, using a checkerboard", path);
                checkerboard(256, 32)
            }
            None => checkerboard(256, 32),
        };
        Self::from_rgba(device, &pixels)
    }

    pub fn from_rgba(device: Arc<VulkanDevice>, pixels: &RgbaImage) -> Result<Self> {
        let extent = vk::Extent3D {
            width: pixels.width(),
            height: pixels.height(),
            depth: 1,
        };
        if extent.width == 0 || extent.height == 0 {
            return Err(eyre!("Texture has no pixels"));
        }

        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(Self::FORMAT)
                .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
                .extent(extent)
                .image_type(vk::ImageType::TYPE_2D)
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            unsafe { device.logical.create_image(&info, None)? }
        };

        // Null handles are skipped on drop, so a failure below releases only what exists
        let mut texture = Self {
            image,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            extent,
            allocation: None,
            device,
        };

        let requirements = unsafe { texture.device.logical.get_image_memory_requirements(image) };
        let allocation = texture.device
            .allocator()?
            .allocate(&AllocationCreateDesc {
                name: "Quad texture",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::DedicatedImage(image),
            })?;
        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        texture.allocation = Some(allocation);
        unsafe {
            texture.device.logical.bind_image_memory(image, memory, offset)?;
        }

        texture.upload(pixels.as_raw())?;

        texture.view = {
            let info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .image(image)
                .format(Self::FORMAT)
                .subresource_range(color_subresource_range());
            unsafe { texture.device.logical.create_image_view(&info, None)? }
        };

        let sampler_info = sampler_create_info(texture.device.max_sampler_anisotropy());
        texture.sampler = unsafe { texture.device.logical.create_sampler(&sampler_info, None)? };

        Ok(texture)
    }

    fn upload(&self, data: &[u8]) -> Result<()> {
        let mut staging_buffer = AllocatedBuffer::new(
            self.device.clone(),
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            "Texture staging buffer",
            MemoryLocation::CpuToGpu,
        )?;
        staging_buffer.write(data, 0)?;

        self.device.immediate_submit(|cmd: vk::CommandBuffer, device: &ash::Device| {
            let img_barrier_to_transfer = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.image)
                .subresource_range(color_subresource_range())
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[img_barrier_to_transfer],
                );
            }

            let copy_region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_extent: self.extent,
                ..Default::default()
            };

            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging_buffer.buffer,
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy_region],
                );
            }

            let img_barrier_to_readable = img_barrier_to_transfer
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);

            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[img_barrier_to_readable],
                )
            }

            Ok(())
        })
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            if self.sampler != vk::Sampler::null() {
                self.device.logical.destroy_sampler(self.sampler, None);
            }
            if self.view != vk::ImageView::null() {
                self.device.logical.destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free texture memory: {}", err);
                    }
                }
                Err(err) => log::error!("Failed to free texture memory: {}", err),
            }
        }
        unsafe {
            self.device.logical.destroy_image(self.image, None);
        }
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Linear filtering, mirrored repeat, anisotropy at the device maximum when available
pub fn sampler_create_info(max_anisotropy: Option<f32>) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::MIRRORED_REPEAT)
        .address_mode_v(vk::SamplerAddressMode::MIRRORED_REPEAT)
        .address_mode_w(vk::SamplerAddressMode::MIRRORED_REPEAT)
        .anisotropy_enable(max_anisotropy.is_some())
        .max_anisotropy(max_anisotropy.unwrap_or(1.0))
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0)
}

pub fn checkerboard(size: u32, cell: u32) -> RgbaImage {
    let cell = cell.max(1);
    RgbaImage::from_fn(size, size, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Rgba([235, 235, 235, 255])
        } else {
            Rgba([40, 40, 40, 255])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_alternates_by_cell() {
        let board = checkerboard(64, 16);
        assert_eq!(board.dimensions(), (64, 64));
        assert_eq!(board.get_pixel(0, 0), board.get_pixel(15, 15));
        assert_ne!(board.get_pixel(0, 0), board.get_pixel(16, 0));
        assert_eq!(board.get_pixel(0, 0), board.get_pixel(16, 16));
        assert!(board.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn sampler_filters_linearly_with_mirrored_repeat() {
        let info = sampler_create_info(Some(16.0));
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.min_filter, vk::Filter::LINEAR);
        assert_eq!(info.mipmap_mode, vk::SamplerMipmapMode::LINEAR);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::MIRRORED_REPEAT);
        assert_eq!(info.address_mode_v, vk::SamplerAddressMode::MIRRORED_REPEAT);
        assert_eq!(info.border_color, vk::BorderColor::INT_OPAQUE_BLACK);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 16.0);
    }

    #[test]
    fn anisotropy_is_off_without_device_support() {
        let info = sampler_create_info(None);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.max_anisotropy, 1.0);
    }
}
