pub mod device;
pub mod instance;
pub mod queue;
pub mod transfer_ctx;

use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::contexts::device_ctx::device::VulkanDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;

/// Responsibilities:
/// - Manage the Vulkan instance, surface, device, and queues
/// - Hand out the shared device the other contexts create their objects from
pub struct RenderDeviceContext {
    // Dropped before the instance
    pub device: Arc<VulkanDevice>,
    pub instance: RenderInstance,
    pub window: Arc<Window>,
}

impl RenderDeviceContext {
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let instance = RenderInstance::new(&window)?;
        let (surface, surface_loader) = instance.create_surface(&window)?;
        let device = VulkanDevice::new(&instance, surface, surface_loader)?;

        Ok(Self {
            device: Arc::new(device),
            instance,
            window,
        })
    }

    /// Current drawable size of the window in physical pixels
    pub fn window_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}
