//! Application driver
//!
//! Sequences startup (config, resources, window, renderer), runs the frame
//! loop until the window closes, and always drains the GPU before teardown.

use ash::vk;
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::ApplicationConfig;
use crate::render::vulkan::{FrameOutcome, VulkanError, VulkanRenderer, VulkanResult, Window, WindowError, WindowSystem};
use crate::resources::{ResourceError, ResourcePaths};

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration could not be loaded or is invalid
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Resource roots or files are missing
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Window could not be created
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Renderer startup or a frame failed
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),
}

/// What the frame loop needs from a renderer
pub trait FrameRenderer {
    /// Draw and present one frame
    fn draw_frame(&mut self) -> VulkanResult<FrameOutcome>;

    /// Rebuild the swapchain; `false` means deferred
    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<bool>;

    /// Block until the GPU is idle
    fn wait_idle(&mut self) -> VulkanResult<()>;
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Frames that reached the present queue
    pub frames_presented: u64,
    /// Successful swapchain rebuilds
    pub swapchain_rebuilds: u64,
}

/// Run frames until the window asks to close
///
/// Resize events and out-of-date frames schedule a swapchain rebuild before
/// the next frame. While the window has no area the loop blocks on events.
/// The first frame failure stops the loop. The renderer is drained with
/// `wait_idle` on every exit path.
pub fn run_frame_loop<W, R>(window: &mut W, renderer: &mut R) -> Result<LoopStats, AppError>
where
    W: WindowSystem,
    R: FrameRenderer,
{
    let result = frame_loop(window, renderer);

    let idle = renderer.wait_idle();
    if let Err(e) = &idle {
        log::error!("Failed to wait for device idle: {}", e);
    }

    let stats = result?;
    idle?;
    log::info!(
        "Frame loop finished: {} frames presented, {} swapchain rebuilds",
        stats.frames_presented,
        stats.swapchain_rebuilds
    );
    Ok(stats)
}

fn frame_loop<W, R>(window: &mut W, renderer: &mut R) -> Result<LoopStats, AppError>
where
    W: WindowSystem,
    R: FrameRenderer,
{
    let mut stats = LoopStats::default();
    let mut recreate_pending = false;

    'frames: while !window.should_close() {
        window.poll_events();
        if window.take_resized() {
            recreate_pending = true;
        }

        if recreate_pending {
            let mut extent = window.framebuffer_extent();
            while extent.width == 0 || extent.height == 0 {
                if window.should_close() {
                    break 'frames;
                }
                window.wait_events();
                extent = window.framebuffer_extent();
            }

            if renderer.recreate_swapchain(extent)? {
                stats.swapchain_rebuilds += 1;
                recreate_pending = false;
            } else {
                continue;
            }
        }

        match renderer.draw_frame() {
            Ok(FrameOutcome::Presented { .. }) => stats.frames_presented += 1,
            Ok(FrameOutcome::RecreatePending) => recreate_pending = true,
            Err(e) => {
                log::error!("Frame failed: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(stats)
}

/// Owns the configuration and runs the whole application
pub struct VulkanApplication {
    config: ApplicationConfig,
}

impl VulkanApplication {
    /// Create an application from a configuration
    pub fn new(config: ApplicationConfig) -> Self {
        Self { config }
    }

    /// Configuration in use
    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    /// Start up, run the frame loop, and tear down
    pub fn run(&self) -> Result<LoopStats, AppError> {
        self.config.validate()?;
        let resources = ResourcePaths::discover(&self.config.resources)?;

        // Declared first, dropped last: the surface must go before the window
        let mut window = Window::new(&self.config.window)?;
        let mut renderer = VulkanRenderer::new(&window, &self.config, &resources)?;

        run_frame_loop(&mut window, &mut renderer)
    }
}
