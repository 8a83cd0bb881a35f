//! # Application Configuration
//!
//! All configuration structures for the engine: window, renderer, shaders,
//! resource lookup and logging. Every structure has sensible defaults and
//! builder-style `with_*` setters so applications can run with no config
//! file at all.

use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError};

/// Highest number of frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 3;

/// # Shader Configuration
///
/// Logical names of the compiled SPIR-V shaders. Names are resolved to
/// paths by [`crate::resources::ResourcePaths`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Logical name of the vertex shader SPIR-V file
    pub vertex_shader: String,
    /// Logical name of the fragment shader SPIR-V file
    pub fragment_shader: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex_shader: vertex.into(),
            fragment_shader: fragment.into(),
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::new("triangle.vert.spv", "triangle.frag.spv")
    }
}

/// Preferred presentation mode
///
/// FIFO is always available and is used whenever the preference is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    /// Low-latency triple buffering without tearing
    Mailbox,
    /// Vsync
    Fifo,
    /// No vsync, may tear
    Immediate,
}

/// # Vulkan Renderer Configuration
///
/// Configuration specific to the Vulkan backend: application metadata for
/// instance creation, frame pacing and debug features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanRendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Number of frame slots recorded ahead of the GPU
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers. `None` follows the build type.
    pub enable_validation: Option<bool>,
    /// Preferred present mode
    pub present_mode: PresentModePreference,
    /// Fence wait period after which a stalled frame is reported
    pub fence_timeout_ms: u64,
    /// Clear color of the color attachment (RGBA)
    pub clear_color: [f32; 4],
}

impl VulkanRendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            max_frames_in_flight: 2,
            enable_validation: None,
            present_mode: PresentModePreference::Mailbox,
            fence_timeout_ms: 5_000,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the preferred present mode
    pub fn with_present_mode(mut self, mode: PresentModePreference) -> Self {
        self.present_mode = mode;
        self
    }

    /// Set the clear color
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Whether validation layers should be attached
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Fence wait timeout in nanoseconds
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms.saturating_mul(1_000_000)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if !(1..=MAX_FRAMES_IN_FLIGHT_LIMIT).contains(&self.max_frames_in_flight) {
            return Err(format!(
                "Max frames in flight must be between 1 and {}, got {}",
                MAX_FRAMES_IN_FLIGHT_LIMIT, self.max_frames_in_flight
            ));
        }

        if self.fence_timeout_ms == 0 {
            return Err("Fence timeout must be non-zero".to_string());
        }

        Ok(())
    }
}

impl Default for VulkanRendererConfig {
    fn default() -> Self {
        Self::new("Ember Application")
    }
}

/// Window creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl WindowConfig {
    /// Create a window configuration
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            title: title.into(),
            width,
            height,
            resizable: true,
        }
    }

    /// Set whether the window is resizable
    pub fn with_resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::new("Ember", 800, 600)
    }
}

/// Where logical resource names are looked up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Candidate resource roots, tried in order
    pub roots: Vec<String>,
    /// Output directory of the shader build step
    pub compiled_shader_dir: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            roots: vec!["resources".to_string(), "../resources".to_string()],
            compiled_shader_dir: "target/shaders".to_string(),
        }
    }
}

/// # Engine Configuration
///
/// Process-wide behavior that is not tied to a subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
}

impl EngineConfig {
    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration consumed by [`crate::VulkanApplication`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Engine-wide configuration
    pub engine: EngineConfig,
    /// Window configuration
    pub window: WindowConfig,
    /// Rendering system configuration
    pub renderer: VulkanRendererConfig,
    /// Shader names
    pub shaders: ShaderConfig,
    /// Resource lookup
    pub resources: ResourceConfig,
}

impl ApplicationConfig {
    /// Create a new application configuration with defaults
    pub fn new(app_name: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            window: WindowConfig::new(app_name.clone(), 800, 600),
            renderer: VulkanRendererConfig::new(app_name),
            ..Self::default()
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.renderer.validate().map_err(ConfigError::Invalid)?;

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if self.shaders.vertex_shader.is_empty() || self.shaders.fragment_shader.is_empty() {
            return Err(ConfigError::Invalid("Shader names cannot be empty".to_string()));
        }

        if self.resources.roots.is_empty() {
            return Err(ConfigError::Invalid("At least one resource root is required".to_string()));
        }

        Ok(())
    }
}

impl Config for ApplicationConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ApplicationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renderer.max_frames_in_flight, 2);
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        let mut config = ApplicationConfig::new("bounds");
        config.renderer = config.renderer.with_max_frames_in_flight(0);
        assert!(config.validate().is_err());

        config.renderer = config.renderer.with_max_frames_in_flight(MAX_FRAMES_IN_FLIGHT_LIMIT + 1);
        assert!(config.validate().is_err());

        config.renderer = config.renderer.with_max_frames_in_flight(3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = ApplicationConfig::default();
        config.window.height = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_explicit_validation_flag_wins() {
        let renderer = VulkanRendererConfig::default().with_validation(false);
        assert!(!renderer.validation_enabled());

        let renderer = renderer.with_validation(true);
        assert!(renderer.validation_enabled());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.toml");
        std::fs::write(
            &path,
            "[renderer]\nmax_frames_in_flight = 3\npresent_mode = \"fifo\"\n\n[window]\ntitle = \"Partial\"\n",
        )
        .unwrap();

        let config = ApplicationConfig::load_from_file(&path).unwrap();
        assert_eq!(config.renderer.max_frames_in_flight, 3);
        assert_eq!(config.renderer.present_mode, PresentModePreference::Fifo);
        assert_eq!(config.window.title, "Partial");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.shaders, ShaderConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.ron");
        let config = ApplicationConfig::new("Round");

        config.save_to_file(&path).unwrap();
        assert_eq!(ApplicationConfig::load_from_file(&path).unwrap(), config);
    }
}
