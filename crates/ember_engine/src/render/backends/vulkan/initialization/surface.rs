//! Vulkan surface management
//!
//! Binds the GLFW window to a `VkSurfaceKHR` and answers the per-device
//! presentation queries.

use ash::{extensions::khr, vk};

use super::context::{VulkanError, VulkanInstance, VulkanResult};
use super::window::Window;
use crate::render::backends::vulkan::state::swapchain::SurfaceSupport;

/// Vulkan surface wrapper for presentation
///
/// Must be dropped before the instance it was created from.
pub struct Surface {
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create a new surface for the window
    pub fn new(instance: &VulkanInstance, window: &Window) -> VulkanResult<Self> {
        let surface_loader = khr::Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to create surface: {}", e)))?;

        log::debug!("Window surface created");
        Ok(Self { surface_loader, surface })
    }

    /// Get the underlying surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get the surface loader
    pub fn loader(&self) -> &khr::Surface {
        &self.surface_loader
    }

    /// Check if a queue family supports presentation to this surface
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family_index: u32) -> VulkanResult<bool> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(physical_device, queue_family_index, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Capabilities, formats and present modes for a physical device
    pub fn query_support(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<SurfaceSupport> {
        unsafe {
            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(VulkanError::Api)?;
            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(VulkanError::Api)?;
            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(VulkanError::Api)?;

            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
        log::debug!("Window surface destroyed");
    }
}
