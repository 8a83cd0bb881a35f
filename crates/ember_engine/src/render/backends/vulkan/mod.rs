//! Vulkan backend
//!
//! Bring-up lives in [`initialization`], per-frame state in [`state`],
//! recording and pipeline objects in [`rendering`]. [`VulkanRenderer`] ties
//! them together.

pub mod initialization;
pub mod renderer;
pub mod rendering;
pub mod state;

pub use initialization::*;
pub use renderer::VulkanRenderer;
pub use rendering::{GraphicsPipeline, PipelineSource, RenderPass};
pub use state::{FrameOutcome, FrameSynchronizer, SwapchainLifecycle, SwapchainManager};
