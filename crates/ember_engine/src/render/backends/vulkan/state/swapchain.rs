//! Swapchain settings negotiation and the swapchain itself
//!
//! Negotiation is a pure function of the surface support query, the window
//! extent and the configured present-mode preference. [`Swapchain`] owns the
//! presentable images' views and the `VkSwapchainKHR`.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::core::PresentModePreference;
use crate::render::backends::vulkan::initialization::{ImageSharing, VulkanError, VulkanResult};

/// Everything a surface reports for one physical device
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format/color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported presentation modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Negotiated presentation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSettings {
    /// Image format
    pub format: vk::Format,
    /// Image color space
    pub color_space: vk::ColorSpaceKHR,
    /// Presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Image extent in pixels
    pub extent: vk::Extent2D,
    /// Minimum number of images requested from the driver
    pub min_image_count: u32,
    /// Transform applied at presentation
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainSettings {
    /// Choose format, present mode, extent and image count
    pub fn negotiate(
        support: &SurfaceSupport,
        window_extent: vk::Extent2D,
        preference: PresentModePreference,
    ) -> VulkanResult<Self> {
        if support.formats.is_empty() {
            return Err(VulkanError::InitializationFailed(
                "Surface reports no supported formats".to_string(),
            ));
        }
        if support.present_modes.is_empty() {
            return Err(VulkanError::InitializationFailed(
                "Surface reports no supported present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let caps = &support.capabilities;

        Ok(Self {
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode: choose_present_mode(&support.present_modes, preference),
            extent: choose_extent(caps, window_extent),
            min_image_count: choose_image_count(caps),
            pre_transform: caps.current_transform,
        })
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .unwrap_or(formats[0])
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], preference: PresentModePreference) -> vk::PresentModeKHR {
    let wanted = match preference {
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };

    if modes.contains(&wanted) {
        wanted
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: window_extent
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window_extent
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

/// Vulkan swapchain wrapper with RAII cleanup of the swapchain and its views
pub struct Swapchain {
    device: Device,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    settings: SwapchainSettings,
}

impl Swapchain {
    /// Create a swapchain for `surface` with negotiated settings
    ///
    /// `old_swapchain` is the swapchain being replaced, or null on first
    /// creation. It stays owned by the caller.
    pub fn new(
        device: Device,
        swapchain_loader: SwapchainLoader,
        surface: vk::SurfaceKHR,
        settings: SwapchainSettings,
        sharing: &ImageSharing,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(settings.min_image_count)
            .image_format(settings.format)
            .image_color_space(settings.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing.mode)
            .queue_family_indices(&sharing.queue_family_indices)
            .pre_transform(settings.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(settings.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain =
            unsafe { swapchain_loader.create_swapchain(&create_info, None) }.map_err(VulkanError::Api)?;

        // From here on Drop cleans up whatever was created
        let mut this = Self {
            device,
            swapchain_loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            settings,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }.map_err(VulkanError::Api)?;
        for &image in &this.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(settings.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { this.device.create_image_view(&view_info, None) }.map_err(VulkanError::Api)?;
            this.image_views.push(view);
        }

        log::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}, sharing {:?}",
            settings.extent.width,
            settings.extent.height,
            this.images.len(),
            settings.format,
            settings.present_mode,
            sharing.mode
        );
        Ok(this)
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get swapchain loader
    pub fn loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Get image views, one per presentable image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of presentable images the driver created
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Settings the swapchain was created with
    pub fn settings(&self) -> &SwapchainSettings {
        &self.settings
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        log::debug!("Swapchain destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn support() -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D { width: 1280, height: 720 },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    const WINDOW: vk::Extent2D = vk::Extent2D { width: 800, height: 600 };

    #[test]
    fn test_prefers_srgb_and_mailbox() {
        let settings = SwapchainSettings::negotiate(&support(), WINDOW, PresentModePreference::Mailbox).unwrap();

        assert_eq!(settings.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(settings.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert_eq!(settings.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(settings.extent, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(settings.min_image_count, 3);
    }

    #[test]
    fn test_falls_back_to_first_format_and_fifo() {
        let mut support = support();
        support.formats.remove(1);
        support.present_modes = vec![vk::PresentModeKHR::FIFO];

        let settings = SwapchainSettings::negotiate(&support, WINDOW, PresentModePreference::Immediate).unwrap();
        assert_eq!(settings.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(settings.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_fifo_preference_honored_when_mailbox_available() {
        let settings = SwapchainSettings::negotiate(&support(), WINDOW, PresentModePreference::Fifo).unwrap();
        assert_eq!(settings.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_window_extent_clamped_when_surface_defers() {
        let mut support = support();
        support.capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        support.capabilities.max_image_extent = vk::Extent2D { width: 640, height: 4096 };

        let settings = SwapchainSettings::negotiate(&support, WINDOW, PresentModePreference::Mailbox).unwrap();
        assert_eq!(settings.extent, vk::Extent2D { width: 640, height: 600 });
    }

    #[test]
    fn test_image_count_clamped_to_max() {
        let mut support = support();
        support.capabilities.min_image_count = 3;
        support.capabilities.max_image_count = 3;
        let settings = SwapchainSettings::negotiate(&support, WINDOW, PresentModePreference::Mailbox).unwrap();
        assert_eq!(settings.min_image_count, 3);

        // Zero max means no upper bound
        support.capabilities.max_image_count = 0;
        let settings = SwapchainSettings::negotiate(&support, WINDOW, PresentModePreference::Mailbox).unwrap();
        assert_eq!(settings.min_image_count, 4);
    }

    #[test]
    fn test_no_present_modes_fails() {
        let mut support = support();
        support.present_modes.clear();

        let err = SwapchainSettings::negotiate(&support, WINDOW, PresentModePreference::Fifo).unwrap_err();
        assert!(err.is_initialization_failure());
    }

    #[test]
    fn test_no_formats_fails() {
        let mut support = support();
        support.formats.clear();
        assert!(SwapchainSettings::negotiate(&support, WINDOW, PresentModePreference::Fifo).is_err());
    }

    #[test]
    fn test_negotiation_is_repeatable() {
        let first = SwapchainSettings::negotiate(&support(), WINDOW, PresentModePreference::Mailbox).unwrap();
        let second = SwapchainSettings::negotiate(&support(), WINDOW, PresentModePreference::Mailbox).unwrap();
        assert_eq!(first, second);
    }
}
