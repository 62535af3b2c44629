use ash::vk;
use crate::renderer::error::RenderResult;

/// What the surface currently supports, queried before (re)building a swapchain
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Resolved swapchain parameters handed to the device for creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

/// One frame's worth of graphics queue work
#[derive(Debug, Clone, Copy)]
pub struct FrameSubmit {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

#[derive(Debug, Clone, Copy)]
pub struct FramePresent {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub wait_semaphore: vk::Semaphore,
}

/// Handles built once by the pipeline and resource setup and bound every frame
#[derive(Debug, Clone, Copy)]
pub struct DrawResources {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Host-visible memory the CPU fills with a frame slot's uniform block
pub trait UniformMemory {
    fn write(&mut self, bytes: &[u8]) -> RenderResult<()>;
}

/// Device operations the frame loop, swapchain and sync objects are built on.
///
/// Destroy calls must only be made once the GPU no longer references the object.
pub trait GpuDevice {
    type Uniform: UniformMemory;

    fn surface_support(&self) -> RenderResult<SurfaceSupport>;

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> RenderResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);

    fn allocate_command_buffer(&self) -> RenderResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer);

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RenderResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()>;

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RenderResult<AcquiredImage>;

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    );
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D);
    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32);

    fn submit(&self, submit: &FrameSubmit) -> RenderResult<()>;
    /// Returns `true` when the swapchain no longer matches the surface exactly
    fn present(&self, present: &FramePresent) -> RenderResult<bool>;

    fn wait_idle(&self) -> RenderResult<()>;
}
