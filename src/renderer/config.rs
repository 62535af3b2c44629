use std::path::PathBuf;
use std::time::Duration;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::eyre;

/// How many presentable images to request from the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCountPolicy {
    /// One more than the minimum. When that exceeds a finite maximum, fall back to the
    /// minimum itself rather than the maximum.
    MinPlusOne,
    /// One more than the minimum, clamped to a finite maximum.
    MinPlusOneClampToMax,
    /// A fixed count, clamped into the supported range.
    Fixed(u32),
}

impl ImageCountPolicy {
    /// `max == 0` means the surface reports no upper limit
    pub fn resolve(&self, min: u32, max: u32) -> u32 {
        let bounded = |count: u32| max > 0 && count > max;
        match *self {
            Self::MinPlusOne => {
                let count = min + 1;
                if bounded(count) { min } else { count }
            }
            Self::MinPlusOneClampToMax => {
                let count = min + 1;
                if bounded(count) { max } else { count }
            }
            Self::Fixed(count) => {
                let count = count.max(min);
                if bounded(count) { max } else { count }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainOptions {
    pub preferred_format: vk::SurfaceFormatKHR,
    pub preferred_present_mode: vk::PresentModeKHR,
    pub image_count_policy: ImageCountPolicy,
}

impl Default for SwapchainOptions {
    fn default() -> Self {
        Self {
            preferred_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
            image_count_policy: ImageCountPolicy::MinPlusOne,
        }
    }
}

/// Contains configuration options for the renderer like vsync and frames in flight
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub frames_in_flight: usize,
    pub swapchain: SwapchainOptions,
    pub clear_color: [f32; 4],
    /// `None` waits on fences and acquisition indefinitely
    pub fence_timeout: Option<Duration>,
    pub texture_path: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: Self::DEFAULT_FRAMES_IN_FLIGHT,
            swapchain: SwapchainOptions::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_timeout: None,
            texture_path: Some(PathBuf::from("assets/texture.png")),
        }
    }
}

impl RenderConfig {
    pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;
    pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

    /// Defaults overridden by `SPINQUAD_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(vsync) = lookup("SPINQUAD_VSYNC") {
            let vsync = parse_bool(&vsync)
                .ok_or_else(|| eyre!("SPINQUAD_VSYNC must be a boolean, got {:?}", vsync))?;
            config = config.with_vsync(vsync);
        }
        if let Some(frames) = lookup("SPINQUAD_FRAMES_IN_FLIGHT") {
            config = config.with_frames_in_flight(frames.trim().parse()?);
        }
        if let Some(path) = lookup("SPINQUAD_TEXTURE") {
            config = config.with_texture_path(Some(PathBuf::from(path)));
        }
        if let Some(ms) = lookup("SPINQUAD_FENCE_TIMEOUT_MS") {
            config = config.with_fence_timeout(Some(Duration::from_millis(ms.trim().parse()?)));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.swapchain.preferred_present_mode = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            vk::PresentModeKHR::MAILBOX
        };
        self
    }

    pub fn with_preferred_format(mut self, format: vk::SurfaceFormatKHR) -> Self {
        self.swapchain.preferred_format = format;
        self
    }

    pub fn with_image_count_policy(mut self, policy: ImageCountPolicy) -> Self {
        self.swapchain.image_count_policy = policy;
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fence_timeout = timeout;
        self
    }

    pub fn with_texture_path(mut self, path: Option<PathBuf>) -> Self {
        self.texture_path = path;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=Self::MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(eyre!(
                "frames_in_flight must be within 1..={}, got {}",
                Self::MAX_FRAMES_IN_FLIGHT,
                self.frames_in_flight,
            ));
        }
        if self.swapchain.image_count_policy == ImageCountPolicy::Fixed(0) {
            return Err(eyre!("A fixed swapchain image count must be at least 1"));
        }
        if self.fence_timeout == Some(Duration::ZERO) {
            return Err(eyre!("fence_timeout must be non-zero, use None to wait indefinitely"));
        }
        Ok(())
    }

    /// Timeout in nanoseconds as Vulkan expects it
    pub fn timeout_ns(&self) -> u64 {
        self.fence_timeout
            .map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
