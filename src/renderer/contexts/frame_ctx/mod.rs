pub mod frame;
pub mod recorder;
pub mod swapchain;

use std::sync::Arc;
use std::time::Instant;
use ash::vk;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::frame_ctx::frame::FrameSlot;
use crate::renderer::contexts::frame_ctx::recorder::CommandRecorder;
use crate::renderer::contexts::frame_ctx::swapchain::SwapchainManager;
use crate::renderer::error::{RenderError, RenderResult};
use crate::renderer::gpu::{AcquiredImage, DrawResources, FrameSubmit, GpuDevice};
use crate::renderer::shader_data::UniformBufferObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { slot: usize, image_index: u32 },
    /// The surface has no area, nothing was acquired or submitted
    Skipped,
}

/// Responsibilities:
/// - Own the frame slots and rotate through them
/// - Order fence waits, acquisition, recording, submission and presentation
/// - Rebuild the swapchain when it goes stale
pub struct RenderFrameContext<D: GpuDevice> {
    slots: Vec<FrameSlot<D>>,
    swapchain: SwapchainManager<D>,
    recorder: CommandRecorder,

    current: usize,
    frame_number: u64,
    start: Instant,
    timeout_ns: u64,
    rebuild_requested: bool,
    torn_down: bool,

    device: Arc<D>,
}

impl<D: GpuDevice> RenderFrameContext<D> {
    /// One frame slot is created per entry of `slot_uniforms`, each entry being the slot's
    /// uniform memory and the descriptor set bound to it
    pub fn new(
        device: Arc<D>,
        config: &RenderConfig,
        resources: DrawResources,
        slot_uniforms: Vec<(D::Uniform, vk::DescriptorSet)>,
        window_extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        if slot_uniforms.is_empty() || slot_uniforms.len() != config.frames_in_flight {
            log::error!(
                "Expected {} frame slot uniforms, got {}",
                config.frames_in_flight,
                slot_uniforms.len(),
            );
            return Err(RenderError::FatalDevice(vk::Result::ERROR_INITIALIZATION_FAILED));
        }

        let swapchain = SwapchainManager::new(
            device.clone(),
            &config.swapchain,
            resources.render_pass,
            window_extent,
        )?;

        let slots = slot_uniforms
            .into_iter()
            .map(|(uniform, set)| FrameSlot::new(device.clone(), uniform, set))
            .collect::<RenderResult<Vec<_>>>()?;

        // An unbuilt swapchain is created by the first rebuild that finds a surface with area
        let rebuild_requested = !swapchain.is_built();

        Ok(Self {
            slots,
            swapchain,
            recorder: CommandRecorder::new(resources, config.clear_color),
            current: 0,
            frame_number: 0,
            start: Instant::now(),
            timeout_ns: config.timeout_ns(),
            rebuild_requested,
            torn_down: false,
            device,
        })
    }

    /// Runs one full cycle on the current slot and advances to the next one.
    ///
    /// A stale swapchain found on acquisition is rebuilt and acquisition retried once. If
    /// presentation finds it stale the frame still counts, the swapchain is rebuilt at the
    /// start of the next call and `SwapchainStale` is returned.
    pub fn render_one_frame(&mut self, window_extent: vk::Extent2D) -> RenderResult<FrameOutcome> {
        if window_extent.width == 0 || window_extent.height == 0 {
            return Ok(FrameOutcome::Skipped);
        }
        if self.rebuild_requested && !self.rebuild(window_extent)? {
            return Ok(FrameOutcome::Skipped);
        }

        let slot_index = self.current;
        let in_flight = self.slots[slot_index].sync.in_flight;

        // Past this point the GPU is done with everything the slot owns
        self.device.wait_for_fence(in_flight, self.timeout_ns)?;

        let Some(acquired) = self.acquire(window_extent)? else {
            return Ok(FrameOutcome::Skipped);
        };
        if acquired.suboptimal {
            log::debug!("Acquired image {} from a suboptimal swapchain", acquired.index);
            self.rebuild_requested = true;
        }
        let image_index = acquired.index;

        log::trace!(
            "Frame {}: slot {}, image {}",
            self.frame_number,
            slot_index,
            image_index,
        );

        // Only reset once work is certain to be submitted, or the next wait never returns
        let slot = &mut self.slots[slot_index];
        self.device.reset_fence(slot.sync.in_flight)?;

        let ubo = UniformBufferObject::at(
            self.start.elapsed().as_secs_f32(),
            self.swapchain.extent(),
        );
        slot.write_uniforms(&ubo)?;

        self.device.reset_command_buffer(slot.command_buffer)?;
        self.recorder.record(
            self.device.as_ref(),
            slot.command_buffer,
            &self.swapchain,
            image_index,
            slot.descriptor_set,
        )?;

        self.device.submit(&FrameSubmit {
            command_buffer: slot.command_buffer,
            wait_semaphore: slot.sync.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: slot.sync.render_finished,
            fence: slot.sync.in_flight,
        })?;

        let presented = self.swapchain.present(image_index, slot.sync.render_finished);

        self.current = (self.current + 1) % self.slots.len();
        self.frame_number += 1;

        match presented {
            Ok(suboptimal) => {
                if suboptimal {
                    log::debug!("Presented to a suboptimal swapchain");
                    self.rebuild_requested = true;
                }
                Ok(FrameOutcome::Presented {
                    slot: slot_index,
                    image_index,
                })
            }
            Err(RenderError::SwapchainStale) => {
                log::debug!("Swapchain went stale on present");
                self.rebuild_requested = true;
                Err(RenderError::SwapchainStale)
            }
            Err(err) => Err(err),
        }
    }

    /// `None` when the swapchain had to be rebuilt and the surface has no area
    fn acquire(&mut self, window_extent: vk::Extent2D) -> RenderResult<Option<AcquiredImage>> {
        let image_available = self.slots[self.current].sync.image_available;
        match self.swapchain.acquire_next_image(self.timeout_ns, image_available) {
            Err(RenderError::SwapchainStale) => {
                log::debug!("Swapchain went stale on acquire, rebuilding");
                if !self.rebuild(window_extent)? {
                    return Ok(None);
                }
                let image_available = self.slots[self.current].sync.image_available;
                match self.swapchain.acquire_next_image(self.timeout_ns, image_available) {
                    Err(RenderError::SwapchainStale) => {
                        self.rebuild_requested = true;
                        Err(RenderError::SwapchainStale)
                    }
                    result => result.map(Some),
                }
            }
            result => result.map(Some),
        }
    }

    /// Returns `false` if the surface has no area and the old swapchain was kept
    fn rebuild(&mut self, window_extent: vk::Extent2D) -> RenderResult<bool> {
        self.device.wait_idle()?;
        if !self.swapchain.rebuild(self.recorder.render_pass(), window_extent)? {
            self.rebuild_requested = true;
            return Ok(false);
        }
        // A present that failed may have left its wait semaphore in an unknown state
        for slot in &mut self.slots {
            slot.sync.recreate_semaphores()?;
        }
        self.rebuild_requested = false;
        Ok(true)
    }

    /// The swapchain is rebuilt before the next frame is acquired
    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    /// Waits for the GPU to finish all outstanding work, then releases every object the
    /// frame loop owns
    pub fn wait_idle_and_teardown(mut self) -> RenderResult<()> {
        self.device.wait_idle()?;
        self.torn_down = true;
        log::info!("Frame loop stopped after {} frames", self.frame_number);
        Ok(())
    }

    #[cfg(test)]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[cfg(test)]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    #[cfg(test)]
    pub fn swapchain(&self) -> &SwapchainManager<D> {
        &self.swapchain
    }
}

impl<D: GpuDevice> Drop for RenderFrameContext<D> {
    fn drop(&mut self) {
        if !self.torn_down {
            if let Err(err) = self.device.wait_idle() {
                log::error!("Failed to wait for device idle before teardown: {}", err);
            }
        }
    }
}
