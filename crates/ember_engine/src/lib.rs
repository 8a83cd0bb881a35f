//! # Ember Engine
//!
//! Vulkan device bring-up and frame synchronization for a single window.
//!
//! ## Features
//!
//! - **Device Bring-up**: Instance, validation messenger, surface, physical
//!   device selection and queue family resolution
//! - **Swapchain Lifecycle**: Negotiation, rebuild on resize or out-of-date,
//!   and framebuffers kept in step with the swapchain images
//! - **Frames in Flight**: Fence and semaphore protocol with a bounded number
//!   of concurrent frames
//! - **Configuration**: TOML or RON files with validated defaults
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ember_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApplicationConfig::load_or_default("config/ember.toml")?;
//!     let stats = VulkanApplication::new(config).run()?;
//!     println!("{} frames presented", stats.frames_presented);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod render;
pub mod resources;

mod application;

pub use application::{run_frame_loop, AppError, FrameRenderer, LoopStats, VulkanApplication};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::{ApplicationConfig, PresentModePreference, VulkanRendererConfig, WindowConfig},
        render::vulkan::{FrameOutcome, VulkanError, VulkanRenderer, VulkanResult, Window, WindowSystem},
        resources::{ResourceError, ResourcePaths},
        AppError, FrameRenderer, LoopStats, VulkanApplication,
    };
}
