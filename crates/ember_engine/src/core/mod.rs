//! Core engine configuration

pub mod config;

pub use config::{
    ApplicationConfig, EngineConfig, PresentModePreference, ResourceConfig, ShaderConfig,
    VulkanRendererConfig, WindowConfig, MAX_FRAMES_IN_FLIGHT_LIMIT,
};
