//! Swapchain and framebuffer lifecycle
//!
//! Owns the swapchain and the framebuffers bound to it as one unit, and
//! tracks which stage of its lifecycle the pair is in. Out-of-order calls are
//! rejected instead of reaching the driver. The device side goes through
//! [`SwapchainBackend`], implemented by [`VulkanContext`].

use std::fmt;

use ash::vk;

use super::framebuffer::Framebuffer;
use super::swapchain::{SurfaceSupport, Swapchain, SwapchainSettings};
use crate::core::PresentModePreference;
use crate::render::backends::vulkan::initialization::{VulkanContext, VulkanError, VulkanResult};

/// Lifecycle stage of the swapchain/framebuffer pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainLifecycle {
    /// Nothing negotiated yet
    Unconfigured,
    /// Settings chosen, no swapchain for them yet
    SettingsNegotiated,
    /// Swapchain and image views exist
    Created,
    /// One framebuffer per image, ready to render
    FramebufferBound,
    /// Out of date, must be rebuilt before the next frame
    RecreatePending,
    /// Torn down
    Destroyed,
}

impl SwapchainLifecycle {
    /// Whether moving to `next` is a legal step
    pub fn can_transition_to(self, next: Self) -> bool {
        use SwapchainLifecycle::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Unconfigured, SettingsNegotiated)
            | (RecreatePending, SettingsNegotiated)
            | (SettingsNegotiated, Created)
            | (Created, FramebufferBound)
            | (FramebufferBound, RecreatePending) => true,
            _ => false,
        }
    }

    /// Move to `next`, or fail with `InvalidOperation`
    pub fn transition(self, next: Self) -> VulkanResult<Self> {
        if self.can_transition_to(next) {
            log::debug!("Swapchain lifecycle: {} -> {}", self, next);
            Ok(next)
        } else {
            Err(VulkanError::invalid(format!("Illegal swapchain transition {} -> {}", self, next)))
        }
    }
}

impl fmt::Display for SwapchainLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One framebuffer per swapchain image, no more and no fewer
pub fn check_framebuffer_count(framebuffers: usize, images: usize) -> VulkanResult<()> {
    if framebuffers == images {
        Ok(())
    } else {
        Err(VulkanError::invalid(format!(
            "Framebuffer count {} does not match swapchain image count {}",
            framebuffers, images
        )))
    }
}

/// The render pass was built for one format; a rebuilt swapchain must keep it
pub fn check_format_compatible(render_pass_format: vk::Format, settings: &SwapchainSettings) -> VulkanResult<()> {
    if render_pass_format == settings.format {
        Ok(())
    } else {
        Err(VulkanError::invalid(format!(
            "Swapchain format changed from {:?} to {:?}; render pass is incompatible",
            render_pass_format, settings.format
        )))
    }
}

/// A swapchain as the manager sees it
pub trait PresentImages {
    /// Number of presentable images
    fn image_count(&self) -> usize;

    /// Settings the swapchain was created with
    fn settings(&self) -> &SwapchainSettings;
}

impl PresentImages for Swapchain {
    fn image_count(&self) -> usize {
        Swapchain::image_count(self)
    }

    fn settings(&self) -> &SwapchainSettings {
        Swapchain::settings(self)
    }
}

/// Device operations behind the swapchain lifecycle
pub trait SwapchainBackend {
    /// Swapchain created by this backend
    type Swapchain: PresentImages;
    /// Framebuffer created by this backend
    type Framebuffer;

    /// Current surface capabilities, formats and present modes
    fn query_support(&self) -> VulkanResult<SurfaceSupport>;

    /// Create a swapchain, retiring `old` when given
    fn create_swapchain(&self, settings: SwapchainSettings, old: Option<&Self::Swapchain>) -> VulkanResult<Self::Swapchain>;

    /// One framebuffer per image of `swapchain`, in image order
    fn create_framebuffers(
        &self,
        swapchain: &Self::Swapchain,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<Vec<Self::Framebuffer>>;

    /// Block until the device is idle
    fn wait_idle(&self) -> VulkanResult<()>;
}

impl SwapchainBackend for VulkanContext {
    type Swapchain = Swapchain;
    type Framebuffer = Framebuffer;

    fn query_support(&self) -> VulkanResult<SurfaceSupport> {
        self.surface.query_support(self.physical_device.handle)
    }

    fn create_swapchain(&self, settings: SwapchainSettings, old: Option<&Swapchain>) -> VulkanResult<Swapchain> {
        Swapchain::new(
            self.raw_device(),
            self.device.swapchain_loader.clone(),
            self.surface.handle(),
            settings,
            &self.queue_families.image_sharing(),
            old.map_or(vk::SwapchainKHR::null(), Swapchain::handle),
        )
    }

    fn create_framebuffers(&self, swapchain: &Swapchain, render_pass: vk::RenderPass) -> VulkanResult<Vec<Framebuffer>> {
        swapchain
            .image_views()
            .iter()
            .map(|&view| Framebuffer::new(self.raw_device(), render_pass, view, swapchain.extent()))
            .collect()
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        VulkanContext::wait_idle(self)
    }
}

/// Manages the swapchain and the framebuffers bound to it
pub struct SwapchainManager<B: SwapchainBackend = VulkanContext> {
    framebuffers: Vec<B::Framebuffer>,
    swapchain: Option<B::Swapchain>,
    settings: Option<SwapchainSettings>,
    lifecycle: SwapchainLifecycle,
    preference: PresentModePreference,
    rebuilds: u64,
}

impl<B: SwapchainBackend> SwapchainManager<B> {
    /// Create an unconfigured manager
    pub fn new(preference: PresentModePreference) -> Self {
        Self {
            framebuffers: Vec::new(),
            swapchain: None,
            settings: None,
            lifecycle: SwapchainLifecycle::Unconfigured,
            preference,
            rebuilds: 0,
        }
    }

    /// Query the surface and negotiate settings for `window_extent`
    pub fn negotiate(&mut self, backend: &B, window_extent: vk::Extent2D) -> VulkanResult<SwapchainSettings> {
        if !self.lifecycle.can_transition_to(SwapchainLifecycle::SettingsNegotiated) {
            return Err(VulkanError::invalid(format!("Cannot negotiate settings while {}", self.lifecycle)));
        }

        let support = backend.query_support()?;
        let settings = SwapchainSettings::negotiate(&support, window_extent, self.preference)?;

        self.lifecycle = self.lifecycle.transition(SwapchainLifecycle::SettingsNegotiated)?;
        self.settings = Some(settings);
        Ok(settings)
    }

    /// Create the swapchain for the negotiated settings
    ///
    /// A previous swapchain is handed to the driver as `old_swapchain` and
    /// released once its replacement exists.
    pub fn create_swapchain(&mut self, backend: &B) -> VulkanResult<()> {
        let settings = match (self.lifecycle, self.settings) {
            (SwapchainLifecycle::SettingsNegotiated, Some(settings)) => settings,
            _ => {
                return Err(VulkanError::invalid(format!(
                    "Cannot create swapchain while {}",
                    self.lifecycle
                )))
            }
        };

        let swapchain = backend.create_swapchain(settings, self.swapchain.as_ref())?;
        self.swapchain = Some(swapchain);
        self.lifecycle = self.lifecycle.transition(SwapchainLifecycle::Created)?;
        Ok(())
    }

    /// Create one framebuffer per swapchain image
    ///
    /// `render_pass_format` is the color format `render_pass` was built for.
    pub fn bind_framebuffers(
        &mut self,
        backend: &B,
        render_pass: vk::RenderPass,
        render_pass_format: vk::Format,
    ) -> VulkanResult<()> {
        if self.lifecycle != SwapchainLifecycle::Created {
            return Err(VulkanError::invalid(format!("Cannot bind framebuffers while {}", self.lifecycle)));
        }
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("No swapchain to bind framebuffers to"))?;

        check_format_compatible(render_pass_format, swapchain.settings())?;

        let framebuffers = backend.create_framebuffers(swapchain, render_pass)?;
        check_framebuffer_count(framebuffers.len(), swapchain.image_count())?;

        log::debug!("{} framebuffers bound", framebuffers.len());
        self.framebuffers = framebuffers;
        self.lifecycle = self.lifecycle.transition(SwapchainLifecycle::FramebufferBound)?;
        Ok(())
    }

    /// Flag the swapchain as out of date
    pub fn mark_recreate_pending(&mut self) -> VulkanResult<()> {
        if self.lifecycle != SwapchainLifecycle::RecreatePending {
            self.lifecycle = self.lifecycle.transition(SwapchainLifecycle::RecreatePending)?;
        }
        Ok(())
    }

    /// Rebuild swapchain and framebuffers for a new window extent
    ///
    /// Returns `false` without touching anything when the window has no area
    /// (minimized). The rebuild is still pending in that case.
    pub fn recreate(
        &mut self,
        backend: &B,
        render_pass: vk::RenderPass,
        render_pass_format: vk::Format,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<bool> {
        self.mark_recreate_pending()?;
        if window_extent.width == 0 || window_extent.height == 0 {
            log::debug!("Window has zero area, deferring swapchain rebuild");
            return Ok(false);
        }

        backend.wait_idle()?;
        self.framebuffers.clear();

        let settings = self.negotiate(backend, window_extent)?;
        check_format_compatible(render_pass_format, &settings)?;
        self.create_swapchain(backend)?;
        self.bind_framebuffers(backend, render_pass, render_pass_format)?;

        self.rebuilds += 1;
        log::info!(
            "Swapchain rebuilt ({}x{}), rebuild #{}",
            settings.extent.width,
            settings.extent.height,
            self.rebuilds
        );
        Ok(true)
    }

    /// Release framebuffers and the swapchain
    ///
    /// The device must be idle.
    pub fn destroy(&mut self) {
        self.framebuffers.clear();
        self.swapchain = None;
        self.lifecycle = SwapchainLifecycle::Destroyed;
    }

    /// Framebuffer for an acquired image index
    pub fn framebuffer(&self, image_index: u32) -> VulkanResult<&B::Framebuffer> {
        if self.lifecycle != SwapchainLifecycle::FramebufferBound {
            return Err(VulkanError::invalid(format!("No framebuffers bound while {}", self.lifecycle)));
        }
        self.framebuffers
            .get(image_index as usize)
            .ok_or_else(|| VulkanError::invalid(format!("Image index {} has no framebuffer", image_index)))
    }

    /// The live swapchain
    pub fn swapchain(&self) -> VulkanResult<&B::Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| VulkanError::invalid(format!("No swapchain while {}", self.lifecycle)))
    }

    /// Current lifecycle stage
    pub fn lifecycle(&self) -> SwapchainLifecycle {
        self.lifecycle
    }

    /// Last negotiated settings
    pub fn settings(&self) -> Option<&SwapchainSettings> {
        self.settings.as_ref()
    }

    /// Number of bound framebuffers
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Number of presentable images, 0 without a swapchain
    pub fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, PresentImages::image_count)
    }

    /// Successful rebuilds since creation
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }
}
