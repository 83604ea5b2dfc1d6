pub mod command_buffer;
pub mod config;
pub mod contexts;
pub mod descriptor;
pub mod error;
pub mod pipeline;
pub mod render_pass;
pub mod resources;
pub mod swapchain;
pub mod transfer;

pub use command_buffer::{CommandBuffer, CommandBufferState};
pub use config::{ConfigError, RenderConfig};
pub use contexts::device_ctx::queue::QueueRole;
pub use contexts::device_ctx::DeviceContext;
pub use contexts::frame_ctx::FrameDriver;
pub use error::{GfxResult, GraphicsError};
pub use pipeline::PipelineStateObject;
pub use render_pass::{Framebuffer, RenderPass};
pub use swapchain::{Swapchain, SwapchainLifecycle, SwapchainPreferences};
pub use transfer::{TransferCoordinator, TransferJob, TransferStep};
