use ash::vk;
use thiserror::Error;

/// Failures surfaced by the frame loop and the objects it drives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Unrecoverable API failure, eg. device lost or out of memory
    #[error("Fatal device error: {0}")]
    FatalDevice(vk::Result),

    /// The surface changed and the swapchain has to be rebuilt before the next acquire
    #[error("Swapchain is out of date")]
    SwapchainStale,

    /// A pool or allocator ran dry during steady-state rendering
    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// A bounded fence or acquire wait expired before the GPU caught up
    #[error("Timed out waiting on the GPU")]
    Timeout,

    #[error("Presentation engine returned image index {index}, swapchain has {count} images")]
    InvalidImageIndex { index: u32, count: u32 },
}

impl RenderError {
    /// Whether the frame loop can carry on after reporting this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SwapchainStale | Self::Timeout)
    }
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapchainStale,
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout,
            vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL
            | vk::Result::ERROR_FRAGMENTATION
            | vk::Result::ERROR_TOO_MANY_OBJECTS => Self::ResourceExhaustion(result.to_string()),
            _ => Self::FatalDevice(result),
        }
    }
}

impl From<gpu_allocator::AllocationError> for RenderError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        Self::ResourceExhaustion(err.to_string())
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_stale_and_recoverable() {
        let err = RenderError::from(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(err, RenderError::SwapchainStale);
        assert!(err.is_recoverable());
    }

    #[test]
    fn device_lost_is_fatal() {
        let err = RenderError::from(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(err, RenderError::FatalDevice(vk::Result::ERROR_DEVICE_LOST));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn pool_exhaustion_is_classified() {
        for code in [
            vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            vk::Result::ERROR_FRAGMENTED_POOL,
        ] {
            let err = RenderError::from(code);
            assert!(matches!(err, RenderError::ResourceExhaustion(_)));
            assert!(!err.is_recoverable());
        }
    }

    #[test]
    fn timeout_is_recoverable() {
        assert!(RenderError::from(vk::Result::TIMEOUT).is_recoverable());
    }
}
