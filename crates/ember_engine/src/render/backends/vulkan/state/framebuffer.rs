//! Framebuffer wrapper

use ash::{vk, Device};

use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};

/// Framebuffer bound to one swapchain image view
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a framebuffer with a single color attachment
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        color_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let attachments = [color_view];
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.create_framebuffer(&create_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self { device, framebuffer })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}
