//! Rendering

pub mod backends;

pub use backends::vulkan;
