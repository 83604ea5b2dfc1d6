use ash::vk;
use thiserror::Error;

pub type GfxResult<T> = std::result::Result<T, GraphicsError>;

/// Every failure the renderer core can report.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsError {
    #[error("unknown graphics error")]
    Unknown,
    #[error("device lost")]
    DeviceLost,
    #[error("unsupported api version")]
    UnsupportedApiVersion,
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("initialization failed")]
    InitializationFailed,
    #[error("requested layer is not present")]
    NoSuchLayer,
    #[error("requested extension is not present")]
    NoSuchExtension,
    #[error("no supported device")]
    NoSupportedDevice,
    #[error("failed to create swapchain")]
    SwapchainCreateError,
    #[error("swapchain is invalid")]
    SwapchainInvalid,
    #[error("swapchain is out of date")]
    SwapchainOutOfDate,
    #[error("failed to create command pool")]
    CommandPoolCreateError,
    #[error("failed to create command buffer")]
    CommandBufferCreateError,
    #[error("failed to create image")]
    ImageCreateError,
    #[error("failed to create render pass")]
    RenderPassCreateError,
    #[error("failed to create descriptor pool")]
    DescriptorPoolCreateError,
    #[error("failed to create descriptor set")]
    DescriptorSetCreateError,
    #[error("failed to create pipeline")]
    PipelineCreateError,
    #[error("no memory type satisfies the requested properties")]
    NoSupportedMemory,
    #[error("queue operation failed")]
    QueueError,
    #[error("transfer failed")]
    TransferFailed,
    #[error("failed to load file")]
    FileLoadError,
    #[error("unsupported format")]
    UnsupportedFormat,
}

impl GraphicsError {
    /// Errors after which the current device cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GraphicsError::DeviceLost)
    }

    /// Errors the frame driver recovers from by rebuilding the swapchain.
    pub fn is_swapchain_stale(&self) -> bool {
        matches!(
            self,
            GraphicsError::SwapchainOutOfDate | GraphicsError::SwapchainInvalid
        )
    }
}

impl From<vk::Result> for GraphicsError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => GraphicsError::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => GraphicsError::OutOfDeviceMemory,
            vk::Result::ERROR_INITIALIZATION_FAILED => GraphicsError::InitializationFailed,
            vk::Result::ERROR_LAYER_NOT_PRESENT => GraphicsError::NoSuchLayer,
            vk::Result::ERROR_EXTENSION_NOT_PRESENT => GraphicsError::NoSuchExtension,
            vk::Result::ERROR_INCOMPATIBLE_DRIVER => GraphicsError::UnsupportedApiVersion,
            vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
                GraphicsError::SwapchainOutOfDate
            }
            _ => GraphicsError::Unknown,
        }
    }
}

/// Maps allocation failures to their memory class and everything else to `fallback`.
pub(crate) fn memory_or(result: vk::Result, fallback: GraphicsError) -> GraphicsError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => GraphicsError::OutOfHostMemory,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => GraphicsError::OutOfDeviceMemory,
        _ => fallback,
    }
}
