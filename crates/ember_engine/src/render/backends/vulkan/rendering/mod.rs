//! Render pass, command recording and pipeline

pub mod commands;
pub mod render_pass;
pub mod shader;

pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder, RecordingState, ViewportState};
pub use render_pass::RenderPass;
pub use shader::{GraphicsPipeline, PipelineSource, ShaderModule};
