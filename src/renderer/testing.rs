//! Stand-in GPU for exercising the frame loop without a device.
//!
//! Submitted work never completes on its own. It finishes only when its fence is waited
//! on or the device is waited idle, so any reuse of a slot before its fence wait shows up
//! as a recorded violation.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use ash::vk;
use ash::vk::Handle;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::frame_ctx::RenderFrameContext;
use crate::renderer::error::{RenderError, RenderResult};
use crate::renderer::gpu::{
    AcquiredImage, DrawResources, FramePresent, FrameSubmit, GpuDevice, SurfaceSupport,
    SwapchainDesc, UniformMemory,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        min_image_count: u32,
        old_swapchain: vk::SwapchainKHR,
        extent: vk::Extent2D,
    },
    DestroySwapchain(vk::SwapchainKHR),
    CreateImageView { view: vk::ImageView, image: vk::Image },
    DestroyImageView(vk::ImageView),
    CreateFramebuffer(vk::Framebuffer),
    DestroyFramebuffer(vk::Framebuffer),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    CreateFence { fence: vk::Fence, signaled: bool },
    DestroyFence(vk::Fence),
    AllocateCommandBuffer(vk::CommandBuffer),
    FreeCommandBuffer(vk::CommandBuffer),
    WaitForFence(vk::Fence),
    ResetFence(vk::Fence),
    Acquire(vk::Semaphore),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    BeginRenderPass {
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    },
    EndRenderPass(vk::CommandBuffer),
    BindPipeline(vk::Pipeline),
    SetViewport { width: f32, height: f32 },
    SetScissor(vk::Extent2D),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    BindDescriptorSet(vk::DescriptorSet),
    DrawIndexed { index_count: u32 },
    Submit {
        command_buffer: vk::CommandBuffer,
        wait_semaphore: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal_semaphore: vk::Semaphore,
        fence: vk::Fence,
    },
    Present {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    },
    WaitIdle,
    WriteUniform(vk::DescriptorSet),
}

impl Call {
    pub fn is_destroy(&self) -> bool {
        matches!(
            self,
            Self::DestroySwapchain(_)
                | Self::DestroyImageView(_)
                | Self::DestroyFramebuffer(_)
                | Self::DestroySemaphore(_)
                | Self::DestroyFence(_)
                | Self::FreeCommandBuffer(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    /// Attached to a submission the GPU has not finished
    Pending,
}

#[derive(Debug, Clone, Copy)]
struct Submission {
    fence: u64,
    command_buffer: u64,
    descriptor_set: Option<u64>,
}

pub struct MockState {
    pub calls: Vec<Call>,
    pub violations: Vec<String>,

    pub support: SurfaceSupport,
    /// Results handed out by the next acquisitions before falling back to round robin
    pub acquire_script: VecDeque<RenderResult<AcquiredImage>>,
    pub present_script: VecDeque<RenderResult<bool>>,
    /// Number of upcoming fence waits that time out without completing anything
    pub fence_timeouts: usize,

    pub fail_fence_creation: bool,
    pub fail_end_command_buffer: bool,
    /// Framebuffer creation fails once this many have been created
    pub fail_framebuffer_after: Option<usize>,

    next_handle: u64,
    live: HashSet<u64>,
    fences: HashMap<u64, FenceState>,
    signaled_semaphores: HashSet<u64>,
    pending: Vec<Submission>,
    bound_sets: HashMap<u64, u64>,
    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    acquire_cursor: u32,
    framebuffers_created: usize,
    uniforms: HashMap<u64, Vec<u8>>,
}

impl MockState {
    fn new() -> Self {
        Self {
            calls: Vec::new(),
            violations: Vec::new(),
            support: SurfaceSupport {
                capabilities: vk::SurfaceCapabilitiesKHR {
                    min_image_count: 2,
                    max_image_count: 8,
                    current_extent: vk::Extent2D { width: 800, height: 600 },
                    min_image_extent: vk::Extent2D { width: 1, height: 1 },
                    max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
                    max_image_array_layers: 1,
                    supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                    current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                    supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                    supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                },
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            },
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fence_timeouts: 0,
            fail_fence_creation: false,
            fail_end_command_buffer: false,
            fail_framebuffer_after: None,
            next_handle: 1,
            live: HashSet::new(),
            fences: HashMap::new(),
            signaled_semaphores: HashSet::new(),
            pending: Vec::new(),
            bound_sets: HashMap::new(),
            swapchain_images: HashMap::new(),
            acquire_cursor: 0,
            framebuffers_created: 0,
            uniforms: HashMap::new(),
        }
    }

    fn handle(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn create(&mut self) -> u64 {
        let raw = self.handle();
        self.live.insert(raw);
        raw
    }

    fn destroy(&mut self, raw: u64, what: &str) {
        if self.has_pending_work() {
            self.violations.push(format!("{} {:#x} destroyed while GPU work is pending", what, raw));
        }
        if !self.live.remove(&raw) {
            self.violations.push(format!("{} {:#x} destroyed but never created", what, raw));
        }
    }

    fn complete(&mut self, fence: u64) {
        self.pending.retain(|submission| submission.fence != fence);
        self.fences.insert(fence, FenceState::Signaled);
    }

    fn is_pending(&self, command_buffer: u64) -> bool {
        self.pending.iter().any(|s| s.command_buffer == command_buffer)
    }

    pub fn live_objects(&self) -> usize {
        self.live.len()
    }

    pub fn fence_is_signaled(&self, fence: vk::Fence) -> bool {
        self.fences.get(&fence.as_raw()) == Some(&FenceState::Signaled)
    }

    pub fn has_pending_work(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| pred(call)).count()
    }

    pub fn positions(&self, pred: impl Fn(&Call) -> bool) -> Vec<usize> {
        self.calls
            .iter()
            .enumerate()
            .filter(|(_, call)| pred(call))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn uniform_bytes(&self, set: vk::DescriptorSet) -> &[u8] {
        self.uniforms.get(&set.as_raw()).map_or(&[], Vec::as_slice)
    }
}

pub struct MockDevice {
    state: RefCell<MockState>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RefCell::new(MockState::new()),
        })
    }

    pub fn state(&self) -> Ref<'_, MockState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    /// Uniform memory plus the descriptor set that would point at it
    pub fn uniform(self: &Arc<Self>) -> (MockUniform, vk::DescriptorSet) {
        let set = vk::DescriptorSet::from_raw(self.state_mut().handle());
        (MockUniform { set, device: self.clone() }, set)
    }

    fn record(&self, call: Call) {
        self.state_mut().calls.push(call);
    }
}

pub struct MockUniform {
    set: vk::DescriptorSet,
    device: Arc<MockDevice>,
}

impl UniformMemory for MockUniform {
    fn write(&mut self, bytes: &[u8]) -> RenderResult<()> {
        let mut state = self.device.state_mut();
        let raw = self.set.as_raw();
        if state.pending.iter().any(|s| s.descriptor_set == Some(raw)) {
            state.violations.push(format!("uniforms of set {:#x} written while in use", raw));
        }
        state.calls.push(Call::WriteUniform(self.set));
        state.uniforms.insert(raw, bytes.to_vec());
        Ok(())
    }
}

impl GpuDevice for MockDevice {
    type Uniform = MockUniform;

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        Ok(self.state().support.clone())
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<vk::SwapchainKHR> {
        let mut state = self.state_mut();
        let swapchain = vk::SwapchainKHR::from_raw(state.create());
        let images = (0..desc.min_image_count)
            .map(|_| vk::Image::from_raw(state.handle()))
            .collect();
        state.swapchain_images.insert(swapchain.as_raw(), images);
        state.calls.push(Call::CreateSwapchain {
            swapchain,
            min_image_count: desc.min_image_count,
            old_swapchain,
            extent: desc.extent,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        self.state()
            .swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(RenderError::FatalDevice(vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state_mut();
        state.destroy(swapchain.as_raw(), "swapchain");
        state.swapchain_images.remove(&swapchain.as_raw());
        state.calls.push(Call::DestroySwapchain(swapchain));
    }

    fn create_image_view(&self, image: vk::Image, _format: vk::Format) -> RenderResult<vk::ImageView> {
        let mut state = self.state_mut();
        let view = vk::ImageView::from_raw(state.create());
        state.calls.push(Call::CreateImageView { view, image });
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state_mut();
        state.destroy(view.as_raw(), "image view");
        state.calls.push(Call::DestroyImageView(view));
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        let mut state = self.state_mut();
        if state.fail_framebuffer_after.is_some_and(|n| state.framebuffers_created >= n) {
            return Err(RenderError::FatalDevice(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        state.framebuffers_created += 1;
        let framebuffer = vk::Framebuffer::from_raw(state.create());
        state.calls.push(Call::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state_mut();
        state.destroy(framebuffer.as_raw(), "framebuffer");
        state.calls.push(Call::DestroyFramebuffer(framebuffer));
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let mut state = self.state_mut();
        let semaphore = vk::Semaphore::from_raw(state.create());
        state.calls.push(Call::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state_mut();
        state.destroy(semaphore.as_raw(), "semaphore");
        state.signaled_semaphores.remove(&semaphore.as_raw());
        state.calls.push(Call::DestroySemaphore(semaphore));
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let mut state = self.state_mut();
        if state.fail_fence_creation {
            return Err(RenderError::FatalDevice(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        let fence = vk::Fence::from_raw(state.create());
        let initial = if signaled { FenceState::Signaled } else { FenceState::Unsignaled };
        state.fences.insert(fence.as_raw(), initial);
        state.calls.push(Call::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state_mut();
        state.destroy(fence.as_raw(), "fence");
        state.fences.remove(&fence.as_raw());
        state.calls.push(Call::DestroyFence(fence));
    }

    fn allocate_command_buffer(&self) -> RenderResult<vk::CommandBuffer> {
        let mut state = self.state_mut();
        let command_buffer = vk::CommandBuffer::from_raw(state.create());
        state.calls.push(Call::AllocateCommandBuffer(command_buffer));
        Ok(command_buffer)
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        let mut state = self.state_mut();
        state.destroy(command_buffer.as_raw(), "command buffer");
        state.calls.push(Call::FreeCommandBuffer(command_buffer));
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> RenderResult<()> {
        let mut state = self.state_mut();
        state.calls.push(Call::WaitForFence(fence));
        let raw = fence.as_raw();
        match state.fences.get(&raw).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending) => {
                if state.fence_timeouts > 0 {
                    state.fence_timeouts -= 1;
                    return Err(RenderError::Timeout);
                }
                state.complete(raw);
                Ok(())
            }
            Some(FenceState::Unsignaled) => {
                state.violations.push(format!("waited on fence {:#x} that nothing will signal", raw));
                Err(RenderError::Timeout)
            }
            None => {
                state.violations.push(format!("waited on unknown fence {:#x}", raw));
                Err(RenderError::FatalDevice(vk::Result::ERROR_UNKNOWN))
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        let mut state = self.state_mut();
        state.calls.push(Call::ResetFence(fence));
        let raw = fence.as_raw();
        if state.fences.get(&raw) == Some(&FenceState::Pending) {
            state.violations.push(format!("fence {:#x} reset while its work is pending", raw));
        }
        state.fences.insert(raw, FenceState::Unsignaled);
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RenderResult<AcquiredImage> {
        let mut state = self.state_mut();
        state.calls.push(Call::Acquire(signal));
        let acquired = match state.acquire_script.pop_front() {
            Some(scripted) => scripted?,
            None => {
                let count = state
                    .swapchain_images
                    .get(&swapchain.as_raw())
                    .map_or(0, Vec::len) as u32;
                if count == 0 {
                    return Err(RenderError::FatalDevice(vk::Result::ERROR_SURFACE_LOST_KHR));
                }
                let index = state.acquire_cursor % count;
                state.acquire_cursor += 1;
                AcquiredImage { index, suboptimal: false }
            }
        };
        if !state.signaled_semaphores.insert(signal.as_raw()) {
            state.violations.push(format!("semaphore {:#x} signaled twice", signal.as_raw()));
        }
        Ok(acquired)
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut state = self.state_mut();
        state.calls.push(Call::ResetCommandBuffer(command_buffer));
        if state.is_pending(command_buffer.as_raw()) {
            state.violations.push(format!("command buffer {:#x} reset while pending", command_buffer.as_raw()));
        }
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut state = self.state_mut();
        state.calls.push(Call::BeginCommandBuffer(command_buffer));
        if state.is_pending(command_buffer.as_raw()) {
            state.violations.push(format!("command buffer {:#x} recorded while pending", command_buffer.as_raw()));
        }
        state.bound_sets.remove(&command_buffer.as_raw());
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut state = self.state_mut();
        if state.fail_end_command_buffer {
            return Err(RenderError::FatalDevice(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        state.calls.push(Call::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        self.record(Call::BeginRenderPass {
            command_buffer,
            framebuffer,
            extent,
            clear_color,
        });
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.record(Call::EndRenderPass(command_buffer));
    }

    fn cmd_bind_pipeline(&self, _command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(Call::BindPipeline(pipeline));
    }

    fn cmd_set_viewport(&self, _command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.record(Call::SetViewport {
            width: viewport.width,
            height: viewport.height,
        });
    }

    fn cmd_set_scissor(&self, _command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.record(Call::SetScissor(scissor.extent));
    }

    fn cmd_bind_vertex_buffer(&self, _command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(Call::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(&self, _command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(Call::BindIndexBuffer(buffer));
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        let mut state = self.state_mut();
        state.bound_sets.insert(command_buffer.as_raw(), set.as_raw());
        state.calls.push(Call::BindDescriptorSet(set));
    }

    fn cmd_draw_indexed(&self, _command_buffer: vk::CommandBuffer, index_count: u32) {
        self.record(Call::DrawIndexed { index_count });
    }

    fn submit(&self, submit: &FrameSubmit) -> RenderResult<()> {
        let mut state = self.state_mut();
        state.calls.push(Call::Submit {
            command_buffer: submit.command_buffer,
            wait_semaphore: submit.wait_semaphore,
            wait_stage: submit.wait_stage,
            signal_semaphore: submit.signal_semaphore,
            fence: submit.fence,
        });

        let fence = submit.fence.as_raw();
        let command_buffer = submit.command_buffer.as_raw();
        if state.fences.get(&fence) != Some(&FenceState::Unsignaled) {
            state.violations.push(format!("submitted with fence {:#x} not reset", fence));
        }
        if state.is_pending(command_buffer) {
            state.violations.push(format!("command buffer {:#x} submitted twice", command_buffer));
        }
        if !state.signaled_semaphores.remove(&submit.wait_semaphore.as_raw()) {
            state.violations.push(format!(
                "submission waits on semaphore {:#x} that nothing signaled",
                submit.wait_semaphore.as_raw(),
            ));
        }
        if !state.signaled_semaphores.insert(submit.signal_semaphore.as_raw()) {
            state.violations.push(format!(
                "semaphore {:#x} signaled twice",
                submit.signal_semaphore.as_raw(),
            ));
        }

        let descriptor_set = state.bound_sets.get(&command_buffer).copied();
        state.pending.push(Submission {
            fence,
            command_buffer,
            descriptor_set,
        });
        state.fences.insert(fence, FenceState::Pending);
        Ok(())
    }

    fn present(&self, present: &FramePresent) -> RenderResult<bool> {
        let mut state = self.state_mut();
        state.calls.push(Call::Present {
            swapchain: present.swapchain,
            image_index: present.image_index,
            wait_semaphore: present.wait_semaphore,
        });
        if !state.signaled_semaphores.remove(&present.wait_semaphore.as_raw()) {
            state.violations.push(format!(
                "present waits on semaphore {:#x} that nothing signaled",
                present.wait_semaphore.as_raw(),
            ));
        }
        state.present_script.pop_front().unwrap_or(Ok(false))
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut state = self.state_mut();
        state.calls.push(Call::WaitIdle);
        let fences = state.pending.iter().map(|s| s.fence).collect::<Vec<_>>();
        for fence in fences {
            state.complete(fence);
        }
        Ok(())
    }
}

pub fn draw_resources() -> DrawResources {
    DrawResources {
        render_pass: vk::RenderPass::from_raw(0xF000_0001),
        pipeline: vk::Pipeline::from_raw(0xF000_0002),
        pipeline_layout: vk::PipelineLayout::from_raw(0xF000_0003),
        vertex_buffer: vk::Buffer::from_raw(0xF000_0004),
        index_buffer: vk::Buffer::from_raw(0xF000_0005),
        index_count: 6,
    }
}

pub fn frame_context(device: &Arc<MockDevice>, frames_in_flight: usize) -> RenderFrameContext<MockDevice> {
    let config = RenderConfig::default().with_frames_in_flight(frames_in_flight);
    let uniforms = (0..frames_in_flight).map(|_| device.uniform()).collect();
    RenderFrameContext::new(
        device.clone(),
        &config,
        draw_resources(),
        uniforms,
        vk::Extent2D { width: 800, height: 600 },
    )
    .unwrap()
}
