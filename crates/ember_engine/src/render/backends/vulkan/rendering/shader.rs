//! Shader modules and the graphics pipeline
//!
//! SPIR-V is loaded by logical name through [`ResourcePaths`]. The pipeline
//! draws a vertex-less triangle: no vertex input, no depth, and dynamic
//! viewport/scissor so swapchain rebuilds never touch it.

use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

use ash::{vk, Device};

use crate::core::ShaderConfig;
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};
use crate::resources::ResourcePaths;

const SPIRV_MAGIC: u32 = 0x0723_0203;
const ENTRY_POINT: &CStr = c"main";

/// Anything that can hand the frame loop a pipeline to bind
pub trait PipelineSource {
    /// Opaque pipeline handle
    fn pipeline(&self) -> vk::Pipeline;
}

/// Decode SPIR-V bytes into words, checking length and magic number
pub fn parse_spirv(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| VulkanError::InitializationFailed(format!("Invalid SPIR-V: {}", e)))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        _ => Err(VulkanError::InitializationFailed(
            "Invalid SPIR-V: bad magic number".to_string(),
        )),
    }
}

/// SPIR-V shader module wrapper with automatic resource management
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V words
    pub fn from_words(device: Device, words: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let module = unsafe { device.create_shader_module(&create_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self { device, module })
    }

    /// Load shader from a SPIR-V file
    pub fn from_file(device: Device, path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to read shader {}: {}", path.display(), e))
        })?;

        log::debug!("Loaded shader {} ({} bytes)", path.display(), bytes.len());
        Self::from_words(device, &parse_spirv(&bytes)?)
    }

    /// Resolve a logical name and load it
    pub fn load(device: Device, resources: &ResourcePaths, name: &str) -> VulkanResult<Self> {
        let path = resources
            .shader(name)
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        Self::from_file(device, path)
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Load the configured shaders and build the pipeline
    pub fn load(
        device: &Device,
        render_pass: vk::RenderPass,
        resources: &ResourcePaths,
        shaders: &ShaderConfig,
    ) -> VulkanResult<Self> {
        // Modules are only needed until the pipeline exists
        let vertex = ShaderModule::load(device.clone(), resources, &shaders.vertex_shader)?;
        let fragment = ShaderModule::load(device.clone(), resources, &shaders.fragment_shader)?;
        Self::new(device, render_pass, &vertex, &fragment)
    }

    /// Create graphics pipeline
    pub fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
    ) -> VulkanResult<Self> {
        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        // Vertices come from gl_VertexIndex
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();
        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }.map_err(VulkanError::Api)?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::Api(err));
            }
        };

        log::debug!("Graphics pipeline created");
        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl PipelineSource for GraphicsPipeline {
    fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_header_parses() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00];
        assert!(parse_spirv(&bytes).unwrap_err().is_initialization_failure());
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let bytes = [0xde, 0xad, 0xbe, 0xef];
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn test_empty_rejected() {
        assert!(parse_spirv(&[]).is_err());
    }
}
