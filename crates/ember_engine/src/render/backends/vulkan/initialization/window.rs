//! GLFW-based window management for Vulkan rendering
//!
//! Window creation without a client API, event pumping for the frame loop,
//! and the two Vulkan hooks GLFW provides: required instance extensions and
//! surface creation.

use ash::vk;
use thiserror::Error;

use crate::core::WindowConfig;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed: {0}")]
    InitializationFailed(String),

    /// The window could not be opened
    #[error("Window creation failed")]
    CreationFailed,

    /// GLFW reported no Vulkan support
    #[error("Vulkan is not supported by GLFW on this system")]
    VulkanUnsupported,

    /// Surface creation returned an error code
    #[error("Failed to create Vulkan surface: {0:?}")]
    SurfaceCreation(vk::Result),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Event source and close signal the frame loop runs against
pub trait WindowSystem {
    /// Process pending events without blocking
    fn poll_events(&mut self);

    /// Block until at least one event arrives, then process it
    fn wait_events(&mut self);

    /// Whether the user asked to close the window
    fn should_close(&self) -> bool;

    /// Current framebuffer size in pixels
    fn framebuffer_extent(&self) -> vk::Extent2D;

    /// Whether the framebuffer was resized since the last call
    fn take_resized(&mut self) -> bool;
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    resized: bool,
}

impl Window {
    /// Open a window configured for Vulkan rendering
    pub fn new(config: &WindowConfig) -> WindowResult<Self> {
        let mut glfw =
            glfw::init(glfw::fail_on_errors).map_err(|e| WindowError::InitializationFailed(format!("{:?}", e)))?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::VulkanUnsupported);
        }

        // No OpenGL context
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(config.resizable));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Window '{}' opened ({}x{})", config.title, config.width, config.height);
        Ok(Self {
            glfw,
            window,
            events,
            resized: false,
        })
    }

    /// Get required Vulkan instance extensions from GLFW
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or(WindowError::VulkanUnsupported)
    }

    /// Create Vulkan surface using GLFW's built-in functionality
    pub fn create_vulkan_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::SurfaceCreation(result))
        }
    }

    /// Request or cancel window close
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    fn drain_events(&mut self) {
        let mut close_requested = false;
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => close_requested = true,
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    log::debug!("Framebuffer resized to {}x{}", width, height);
                    self.resized = true;
                }
                _ => {}
            }
        }
        if close_requested {
            self.window.set_should_close(true);
        }
    }
}

impl WindowSystem for Window {
    fn poll_events(&mut self) {
        self.glfw.poll_events();
        self.drain_events();
    }

    fn wait_events(&mut self) {
        self.glfw.wait_events();
        self.drain_events();
    }

    fn should_close(&self) -> bool {
        self.window.should_close()
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.window.get_framebuffer_size();
        vk::Extent2D {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
        }
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }
}
