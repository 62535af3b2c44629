use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;
use std::sync::{Mutex, MutexGuard};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::queue::{pick_queue_families, Queue, QueueFamily};
use crate::renderer::contexts::device_ctx::transfer_ctx::TransferContext;
use crate::renderer::contexts::resource_ctx::buffer::UniformBuffer;
use crate::renderer::error::{RenderError, RenderResult};
use crate::renderer::gpu::{
    AcquiredImage, FramePresent, FrameSubmit, GpuDevice, SurfaceSupport, SwapchainDesc,
};

/// Logical device together with everything whose lifetime is bound to it.
///
/// Shared through an `Arc`, so it is destroyed only after every object created from it.
pub struct VulkanDevice {
    pub logical: ash::Device,
    pub physical: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,

    pub graphics_queue: Queue,
    pub present_queue: Queue,

    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,

    // Frame slot command buffers are allocated from here
    command_pool: vk::CommandPool,
    memory_allocator: ManuallyDrop<Mutex<Allocator>>,
    transfer_context: ManuallyDrop<TransferContext>,
}

impl VulkanDevice {
    /// Takes ownership of `surface`. It is destroyed together with the device, or right away
    /// if creation fails.
    pub fn new(
        instance: &RenderInstance,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
    ) -> Result<Self> {
        Self::create(instance, surface, surface_loader.clone()).inspect_err(|_| unsafe {
            surface_loader.destroy_surface(surface, None);
        })
    }

    fn create(
        instance: &RenderInstance,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
    ) -> Result<Self> {
        let instance = &instance.instance;
        let (physical, graphics_family, present_family) = Self::select_physical_device(
            instance,
            surface,
            &surface_loader,
        )?;
        let properties = unsafe { instance.get_physical_device_properties(physical) };
        let features = unsafe { instance.get_physical_device_features(physical) };
        log::info!(
            "Using device {:?} ({:?})",
            properties.device_name_as_c_str().unwrap_or(c"unknown"),
            properties.device_type,
        );

        let (logical, graphics_queue, present_queue) = Self::create_logical_device(
            instance,
            physical,
            &features,
            graphics_family,
            present_family,
        )?;

        // From here on `logical` has to be destroyed by hand until `Self` exists
        let rest = (|| -> Result<_> {
            let swapchain_loader = ash::khr::swapchain::Device::new(instance, &logical);

            let command_pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(graphics_queue.family.index)
                // Frame slot command buffers are reset one at a time
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let command_pool = unsafe { logical.create_command_pool(&command_pool_info, None)? };

            let transfer_context = TransferContext::new(
                graphics_queue.handle,
                graphics_queue.family.index,
                logical.clone(),
            ).inspect_err(|_| unsafe { logical.destroy_command_pool(command_pool, None) })?;

            let memory_allocator = match Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: logical.clone(),
                physical_device: physical,
                debug_settings: gpu_allocator::AllocatorDebugSettings {
                    log_memory_information: cfg!(debug_assertions),
                    log_leaks_on_shutdown: true,
                    store_stack_traces: false,
                    log_allocations: false,
                    log_frees: false,
                    log_stack_traces: false,
                },
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            }) {
                Ok(allocator) => allocator,
                Err(err) => {
                    drop(transfer_context);
                    unsafe { logical.destroy_command_pool(command_pool, None) };
                    return Err(err.into());
                }
            };

            Ok((swapchain_loader, command_pool, transfer_context, memory_allocator))
        })();

        let (swapchain_loader, command_pool, transfer_context, memory_allocator) = match rest {
            Ok(rest) => rest,
            Err(err) => {
                unsafe { logical.destroy_device(None) };
                return Err(err);
            }
        };

        Ok(Self {
            logical,
            physical,
            properties,
            features,
            graphics_queue,
            present_queue,
            surface,
            surface_loader,
            swapchain_loader,
            command_pool,
            memory_allocator: ManuallyDrop::new(Mutex::new(memory_allocator)),
            transfer_context: ManuallyDrop::new(transfer_context),
        })
    }

    pub fn allocator(&self) -> Result<MutexGuard<'_, Allocator>> {
        self.memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))
    }

    pub fn immediate_submit<F>(&self, func: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        self.transfer_context.immediate_submit(func)
    }

    /// `None` when the device does not support anisotropic filtering
    pub fn max_sampler_anisotropy(&self) -> Option<f32> {
        (self.features.sampler_anisotropy == vk::TRUE)
            .then_some(self.properties.limits.max_sampler_anisotropy)
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<(vk::PhysicalDevice, QueueFamily, QueueFamily)> {
        let req_device_exts = Self::get_required_device_extensions();

        unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            // Filter out devices that do not contain the required device extensions
            .filter(|device| {
                let supported_extensions = unsafe {
                    instance.enumerate_device_extension_properties(*device)
                }.unwrap_or_default();

                req_device_exts.iter().all(|req_ext| {
                    let supported = supported_extensions
                        .iter()
                        .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == *req_ext));
                    if !supported {
                        log::debug!("Device extension not supported: {:?}", req_ext);
                    }
                    supported
                })
            })
            // Filter out devices the surface cannot be presented from
            .filter(|device| unsafe {
                let formats = surface_loader
                    .get_physical_device_surface_formats(*device, surface)
                    .unwrap_or_default();
                let present_modes = surface_loader
                    .get_physical_device_surface_present_modes(*device, surface)
                    .unwrap_or_default();
                !formats.is_empty() && !present_modes.is_empty()
            })
            // Filter out devices that do not contain the required queues
            .filter_map(|device| {
                let props = unsafe {
                    instance.get_physical_device_queue_family_properties(device)
                };
                pick_queue_families(&props, |index| unsafe {
                    surface_loader
                        .get_physical_device_surface_support(device, index, surface)
                        .unwrap_or(false)
                })
                .map(|(graphics, present)| (device, graphics, present))
            })
            .min_by_key(|(device, _, _)| {
                let props = unsafe { instance.get_physical_device_properties(*device) };
                match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                    vk::PhysicalDeviceType::CPU => 3,
                    vk::PhysicalDeviceType::OTHER => 4,
                    _ => 5,
                }
            })
            .ok_or_eyre("No suitable physical device found")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        supported_features: &vk::PhysicalDeviceFeatures,
        graphics_family: QueueFamily,
        present_family: QueueFamily,
    ) -> Result<(ash::Device, Queue, Queue)> {
        let queue_priorities = [1.0];
        let mut family_indices = vec![graphics_family.index];
        if present_family != graphics_family {
            family_indices.push(present_family.index);
        }
        let queue_create_infos = family_indices
            .iter()
            .map(|index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(*index)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        let enabled_extension_names = Self::get_required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(supported_features.sampler_anisotropy == vk::TRUE);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .enabled_features(&enabled_features);

        let device = unsafe {
            instance.create_device(physical_device, &device_create_info, None)?
        };

        let graphics_queue = unsafe {
            let queue = device.get_device_queue(graphics_family.index, 0);
            Queue::new(graphics_family, queue)
        };
        let present_queue = unsafe {
            let queue = device.get_device_queue(present_family.index, 0);
            Queue::new(present_family, queue)
        };

        Ok((device, graphics_queue, present_queue))
    }

    fn get_required_device_extensions() -> Vec<&'static CStr> {
        vec![
            ash::khr::swapchain::NAME,

            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.logical.device_wait_idle() {
                log::error!("Failed to wait for device idle: {}", err);
            }
            ManuallyDrop::drop(&mut self.transfer_context);
            ManuallyDrop::drop(&mut self.memory_allocator);
            self.logical.destroy_command_pool(self.command_pool, None);
            self.logical.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

impl GpuDevice for VulkanDevice {
    type Uniform = UniformBuffer;

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self.surface_loader
                    .get_physical_device_surface_capabilities(self.physical, self.surface)?,
                formats: self.surface_loader
                    .get_physical_device_surface_formats(self.physical, self.surface)?,
                present_modes: self.surface_loader
                    .get_physical_device_surface_present_modes(self.physical, self.surface)?,
            })
        }
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<vk::SwapchainKHR> {
        let queue_family_indices = [
            self.graphics_queue.family.index,
            self.present_queue.family.index,
        ];
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        // Images are used by both queues without ownership transfers
        let info = if self.graphics_queue.family != self.present_queue.family {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        } else {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        Ok(unsafe { self.swapchain_loader.create_swapchain(&info, None)? })
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        Ok(unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> RenderResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        Ok(unsafe { self.logical.create_image_view(&info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.logical.destroy_image_view(view, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        let attachments = [view];
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        Ok(unsafe { self.logical.create_framebuffer(&info, None)? })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.logical.destroy_framebuffer(framebuffer, None) }
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        Ok(unsafe {
            self.logical.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.logical.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        Ok(unsafe {
            self.logical.create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.logical.destroy_fence(fence, None) }
    }

    fn allocate_command_buffer(&self) -> RenderResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        unsafe { self.logical.allocate_command_buffers(&info)? }
            .into_iter()
            .next()
            .ok_or(RenderError::ResourceExhaustion("Command pool returned no buffer".into()))
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.logical.free_command_buffers(self.command_pool, &[command_buffer]) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RenderResult<()> {
        Ok(unsafe { self.logical.wait_for_fences(&[fence], true, timeout_ns)? })
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        Ok(unsafe { self.logical.reset_fences(&[fence])? })
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RenderResult<AcquiredImage> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain,
                timeout_ns,
                signal,
                vk::Fence::null(),
            )?
        };
        Ok(AcquiredImage { index, suboptimal })
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        Ok(unsafe {
            self.logical.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?
        })
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        Ok(unsafe { self.logical.begin_command_buffer(command_buffer, &info)? })
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        Ok(unsafe { self.logical.end_command_buffer(command_buffer)? })
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.logical.cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.logical.cmd_end_render_pass(command_buffer) }
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.logical.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.logical.cmd_set_viewport(command_buffer, 0, &[viewport]) }
    }

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.logical.cmd_set_scissor(command_buffer, 0, &[scissor]) }
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.logical.cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[0]) }
    }

    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.logical.cmd_bind_index_buffer(command_buffer, buffer, 0, vk::IndexType::UINT16)
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.logical.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            )
        }
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32) {
        unsafe { self.logical.cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0) }
    }

    fn submit(&self, submit: &FrameSubmit) -> RenderResult<()> {
        let wait_semaphores = [submit.wait_semaphore];
        let wait_stages = [submit.wait_stage];
        let command_buffers = [submit.command_buffer];
        let signal_semaphores = [submit.signal_semaphore];
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        Ok(unsafe {
            self.logical.queue_submit(self.graphics_queue.handle, &[info], submit.fence)?
        })
    }

    fn present(&self, present: &FramePresent) -> RenderResult<bool> {
        let wait_semaphores = [present.wait_semaphore];
        let swapchains = [present.swapchain];
        let image_indices = [present.image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        Ok(unsafe {
            self.swapchain_loader.queue_present(self.present_queue.handle, &info)?
        })
    }

    fn wait_idle(&self) -> RenderResult<()> {
        Ok(unsafe { self.logical.device_wait_idle()? })
    }
}
