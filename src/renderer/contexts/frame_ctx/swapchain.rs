use std::sync::Arc;
use ash::vk;
use crate::renderer::config::SwapchainOptions;
use crate::renderer::error::{RenderError, RenderResult};
use crate::renderer::gpu::{AcquiredImage, FramePresent, GpuDevice, SurfaceSupport, SwapchainDesc};

/// Preferred pair if the surface offers it, otherwise whatever the surface lists first
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> RenderResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|format| {
            format.format == preferred.format && format.color_space == preferred.color_space
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or(RenderError::FatalDevice(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))
}

/// FIFO is the only mode every surface is required to support
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|mode| *mode == preferred)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent. Surfaces that leave the size up to the swapchain report
/// `u32::MAX`, in which case the window size is clamped into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

pub fn swapchain_desc(
    support: &SurfaceSupport,
    options: &SwapchainOptions,
    window_extent: vk::Extent2D,
) -> RenderResult<SwapchainDesc> {
    let caps = &support.capabilities;
    Ok(SwapchainDesc {
        min_image_count: options
            .image_count_policy
            .resolve(caps.min_image_count, caps.max_image_count),
        format: choose_surface_format(&support.formats, options.preferred_format)?,
        present_mode: choose_present_mode(&support.present_modes, options.preferred_present_mode),
        extent: choose_extent(caps, window_extent),
        pre_transform: caps.current_transform,
    })
}

/// Everything created for one swapchain generation. Released on drop unless handed over.
struct SwapchainParts<'a, D: GpuDevice> {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    device: &'a D,
}

impl<'a, D: GpuDevice> SwapchainParts<'a, D> {
    fn build(
        device: &'a D,
        desc: &SwapchainDesc,
        render_pass: vk::RenderPass,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<Self> {
        let mut parts = Self {
            swapchain: device.create_swapchain(desc, old_swapchain)?,
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            device,
        };
        parts.images = device.swapchain_images(parts.swapchain)?;
        for image in &parts.images {
            let view = device.create_image_view(*image, desc.format.format)?;
            parts.views.push(view);
        }
        for view in &parts.views {
            let framebuffer = device.create_framebuffer(render_pass, *view, desc.extent)?;
            parts.framebuffers.push(framebuffer);
        }
        Ok(parts)
    }

    fn into_inner(mut self) -> (vk::SwapchainKHR, Vec<vk::Image>, Vec<vk::ImageView>, Vec<vk::Framebuffer>) {
        (
            std::mem::replace(&mut self.swapchain, vk::SwapchainKHR::null()),
            std::mem::take(&mut self.images),
            std::mem::take(&mut self.views),
            std::mem::take(&mut self.framebuffers),
        )
    }
}

impl<D: GpuDevice> Drop for SwapchainParts<'_, D> {
    fn drop(&mut self) {
        release(
            self.device,
            self.swapchain,
            &mut self.views,
            &mut self.framebuffers,
        );
    }
}

// Framebuffers reference views, views reference swapchain images
fn release<D: GpuDevice>(
    device: &D,
    swapchain: vk::SwapchainKHR,
    views: &mut Vec<vk::ImageView>,
    framebuffers: &mut Vec<vk::Framebuffer>,
) {
    for framebuffer in framebuffers.drain(..) {
        device.destroy_framebuffer(framebuffer);
    }
    for view in views.drain(..) {
        device.destroy_image_view(view);
    }
    if swapchain != vk::SwapchainKHR::null() {
        device.destroy_swapchain(swapchain);
    }
}

/// Owns the presentable images, one view and one framebuffer per image, and knows how
/// to rebuild all of them when the surface changes
pub struct SwapchainManager<D: GpuDevice> {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    desc: SwapchainDesc,
    options: SwapchainOptions,
    device: Arc<D>,
}

impl<D: GpuDevice> SwapchainManager<D> {
    /// Leaves the manager unbuilt if the surface has no area yet. The first successful
    /// [`rebuild`](Self::rebuild) then creates the swapchain.
    pub fn new(
        device: Arc<D>,
        options: &SwapchainOptions,
        render_pass: vk::RenderPass,
        window_extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let support = device.surface_support()?;
        let desc = swapchain_desc(&support, options, window_extent)?;
        let mut manager = Self {
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            desc,
            options: *options,
            device,
        };
        if desc.extent.width == 0 || desc.extent.height == 0 {
            log::debug!("Surface has zero area, deferring swapchain creation");
            return Ok(manager);
        }

        manager.install(desc, render_pass)?;
        log::info!(
            "Created swapchain: {:?} {:?}, {:?}, {}x{}, {} images",
            desc.format.format,
            desc.format.color_space,
            desc.present_mode,
            desc.extent.width,
            desc.extent.height,
            manager.images.len(),
        );
        Ok(manager)
    }

    /// Rebuilds the swapchain against the surface's current state. Once built, the format
    /// and present mode chosen at creation are kept. The caller must ensure the device is
    /// idle.
    ///
    /// Returns `false` without touching anything if the surface currently has no area.
    pub fn rebuild(
        &mut self,
        render_pass: vk::RenderPass,
        window_extent: vk::Extent2D,
    ) -> RenderResult<bool> {
        let support = self.device.surface_support()?;
        let extent = choose_extent(&support.capabilities, window_extent);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface has zero area, postponing swapchain rebuild");
            return Ok(false);
        }

        if !self.is_built() {
            let desc = swapchain_desc(&support, &self.options, window_extent)?;
            self.install(desc, render_pass)?;
            log::info!(
                "Created deferred swapchain: {:?}, {:?}, {}x{}, {} images",
                desc.format.format,
                desc.present_mode,
                extent.width,
                extent.height,
                self.images.len(),
            );
            return Ok(true);
        }

        let caps = &support.capabilities;
        let desc = SwapchainDesc {
            extent,
            pre_transform: caps.current_transform,
            min_image_count: self.options
                .image_count_policy
                .resolve(caps.min_image_count, caps.max_image_count),
            ..self.desc
        };
        self.install(desc, render_pass)?;

        log::info!(
            "Rebuilt swapchain: {}x{}, {} images",
            extent.width,
            extent.height,
            self.images.len(),
        );

        Ok(true)
    }

    /// Builds a new generation from `desc`, retiring the current one if there is one
    fn install(&mut self, desc: SwapchainDesc, render_pass: vk::RenderPass) -> RenderResult<()> {
        let (swapchain, images, views, framebuffers) = SwapchainParts::build(
            self.device.as_ref(),
            &desc,
            render_pass,
            self.swapchain,
        )?.into_inner();

        // The old swapchain was retired by the create call and can go now
        release(
            self.device.as_ref(),
            self.swapchain,
            &mut self.views,
            &mut self.framebuffers,
        );
        self.swapchain = swapchain;
        self.images = images;
        self.views = views;
        self.framebuffers = framebuffers;
        self.desc = desc;
        Ok(())
    }

    /// `false` until a surface with area has been seen
    pub fn is_built(&self) -> bool {
        self.swapchain != vk::SwapchainKHR::null()
    }

    /// Blocks until the presentation engine hands out an image, signalling `signal` once
    /// the image may be written
    pub fn acquire_next_image(
        &self,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RenderResult<AcquiredImage> {
        let acquired = self.device.acquire_next_image(self.swapchain, timeout_ns, signal)?;
        if acquired.index >= self.image_count() {
            return Err(RenderError::InvalidImageIndex {
                index: acquired.index,
                count: self.image_count(),
            });
        }
        Ok(acquired)
    }

    /// Returns `true` if the swapchain is suboptimal for the surface
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> RenderResult<bool> {
        self.device.present(&FramePresent {
            swapchain: self.swapchain,
            image_index,
            wait_semaphore: wait,
        })
    }

    #[cfg(test)]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    #[cfg(test)]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[cfg(test)]
    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[cfg(test)]
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.desc.format
    }

    #[cfg(test)]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.desc.present_mode
    }
}

impl<D: GpuDevice> Drop for SwapchainManager<D> {
    fn drop(&mut self) {
        release(
            self.device.as_ref(),
            self.swapchain,
            &mut self.views,
            &mut self.framebuffers,
        );
    }
}
