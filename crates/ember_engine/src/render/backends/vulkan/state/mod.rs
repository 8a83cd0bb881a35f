//! Swapchain, framebuffer and frame synchronization state

pub mod frame_sync;
pub mod framebuffer;
pub mod swapchain;
pub mod swapchain_manager;
pub mod sync;

pub use frame_sync::{Acquired, FrameBackend, FrameOutcome, FrameSynchronizer, PresentStatus};
pub use framebuffer::Framebuffer;
pub use swapchain::{SurfaceSupport, Swapchain, SwapchainSettings};
pub use swapchain_manager::{PresentImages, SwapchainBackend, SwapchainLifecycle, SwapchainManager};
pub use sync::{create_frame_slots, Fence, FrameSlot, Semaphore};
