//! Vulkan bring-up: instance, window surface, device selection and queues

pub mod context;
pub mod device;
pub mod queue_family;
pub mod surface;
pub mod window;

pub use context::{FrameStage, InitStage, VulkanContext, VulkanError, VulkanInstance, VulkanResult};
pub use device::{select_physical_device, LogicalDevice, MemoryHeapInfo, PhysicalDeviceInfo};
pub use queue_family::{ImageSharing, QueueFamilyMap};
pub use surface::Surface;
pub use window::{Window, WindowError, WindowResult, WindowSystem};
