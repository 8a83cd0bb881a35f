//! Command buffer management
//!
//! The pool that owns every per-slot command buffer, a recorder that checks
//! the begin/render pass/end order at runtime, and the cached dynamic
//! viewport/scissor derived from the swapchain extent.

use ash::{vk, Device};

use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool =
            unsafe { device.create_command_pool(&pool_create_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self { device, command_pool })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(VulkanError::Api)
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Buffers may still be pending on the GPU
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Where a command buffer is in its recording cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// Reset, nothing recorded
    Initial,
    /// Between begin and end, outside a render pass
    Recording,
    /// Inside a render pass
    InRenderPass,
    /// Ended, ready to submit
    Executable,
}

impl RecordingState {
    fn require(self, expected: Self, action: &str) -> VulkanResult<()> {
        if self == expected {
            Ok(())
        } else {
            Err(VulkanError::invalid(format!(
                "Cannot {} a command buffer in state {:?}",
                action, self
            )))
        }
    }

    /// State after `vkBeginCommandBuffer`
    pub fn begin(self) -> VulkanResult<Self> {
        self.require(Self::Initial, "begin")?;
        Ok(Self::Recording)
    }

    /// State after `vkCmdBeginRenderPass`
    pub fn begin_render_pass(self) -> VulkanResult<Self> {
        self.require(Self::Recording, "begin a render pass on")?;
        Ok(Self::InRenderPass)
    }

    /// State after `vkCmdEndRenderPass`
    pub fn end_render_pass(self) -> VulkanResult<Self> {
        self.require(Self::InRenderPass, "end a render pass on")?;
        Ok(Self::Recording)
    }

    /// State after `vkEndCommandBuffer`
    pub fn end(self) -> VulkanResult<Self> {
        self.require(Self::Recording, "end")?;
        Ok(Self::Executable)
    }
}

/// Records one command buffer, checking call order
pub struct CommandRecorder<'a> {
    device: &'a Device,
    command_buffer: vk::CommandBuffer,
    state: RecordingState,
}

impl<'a> CommandRecorder<'a> {
    /// Reset the buffer and start a fresh recorder for it
    pub fn reset(device: &'a Device, command_buffer: vk::CommandBuffer) -> VulkanResult<Self> {
        unsafe { device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty()) }
            .map_err(VulkanError::Api)?;

        Ok(Self {
            device,
            command_buffer,
            state: RecordingState::Initial,
        })
    }

    /// Begin one-time-submit recording
    pub fn begin(&mut self) -> VulkanResult<()> {
        let next = self.state.begin()?;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe { self.device.begin_command_buffer(self.command_buffer, &begin_info) }.map_err(VulkanError::Api)?;
        self.state = next;
        Ok(())
    }

    /// Begin a render pass; it ends when the returned guard is dropped
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> VulkanResult<ActiveRenderPass<'_, 'a>> {
        self.state = self.state.begin_render_pass()?;

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(self.command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }

        Ok(ActiveRenderPass { recorder: self })
    }

    /// Finish recording
    pub fn end(&mut self) -> VulkanResult<()> {
        let next = self.state.end()?;
        unsafe { self.device.end_command_buffer(self.command_buffer) }.map_err(VulkanError::Api)?;
        self.state = next;
        Ok(())
    }

    /// Current recording state
    pub fn state(&self) -> RecordingState {
        self.state
    }
}

/// Open render pass on a [`CommandRecorder`]
pub struct ActiveRenderPass<'r, 'a> {
    recorder: &'r mut CommandRecorder<'a>,
}

impl ActiveRenderPass<'_, '_> {
    /// Bind a graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.recorder.device.cmd_bind_pipeline(
                self.recorder.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    /// Apply dynamic viewport and scissor
    pub fn set_viewport_state(&mut self, viewport: &ViewportState) {
        unsafe {
            self.recorder
                .device
                .cmd_set_viewport(self.recorder.command_buffer, 0, &[viewport.viewport()]);
            self.recorder
                .device
                .cmd_set_scissor(self.recorder.command_buffer, 0, &[viewport.scissor()]);
        }
    }

    /// Non-indexed draw
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.recorder.device.cmd_draw(
                self.recorder.command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }
}

impl Drop for ActiveRenderPass<'_, '_> {
    fn drop(&mut self) {
        match self.recorder.state.end_render_pass() {
            Ok(next) => {
                unsafe {
                    self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer);
                }
                self.recorder.state = next;
            }
            Err(e) => log::error!("Render pass guard dropped out of order: {}", e),
        }
    }
}

/// Dynamic viewport and scissor for the current swapchain extent
#[derive(Debug, Clone, Copy)]
pub struct ViewportState {
    extent: vk::Extent2D,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
}

impl ViewportState {
    /// Full-extent viewport with a 0..1 depth range and matching scissor
    pub fn for_extent(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            viewport: vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
            scissor: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        }
    }

    /// Recompute for a new extent; returns whether anything changed
    pub fn update(&mut self, extent: vk::Extent2D) -> bool {
        if extent == self.extent {
            return false;
        }
        *self = Self::for_extent(extent);
        true
    }

    /// Extent the state was derived from
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Viewport to set
    pub fn viewport(&self) -> vk::Viewport {
        self.viewport
    }

    /// Scissor rectangle to set, also the render area
    pub fn scissor(&self) -> vk::Rect2D {
        self.scissor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_cycle() {
        let state = RecordingState::Initial
            .begin()
            .and_then(RecordingState::begin_render_pass)
            .and_then(RecordingState::end_render_pass)
            .and_then(RecordingState::end)
            .unwrap();
        assert_eq!(state, RecordingState::Executable);
    }

    #[test]
    fn test_render_pass_requires_recording() {
        assert!(matches!(
            RecordingState::Initial.begin_render_pass(),
            Err(VulkanError::InvalidOperation { .. })
        ));
        assert!(RecordingState::Executable.begin_render_pass().is_err());
    }

    #[test]
    fn test_ending_twice_rejected() {
        let ended = RecordingState::Recording.end().unwrap();
        assert!(ended.end().is_err());
        assert!(RecordingState::InRenderPass.end().is_err());
        assert!(RecordingState::Recording.begin().is_err());
    }

    #[test]
    fn test_end_render_pass_only_inside_pass() {
        assert_eq!(
            RecordingState::InRenderPass.end_render_pass().unwrap(),
            RecordingState::Recording
        );
        assert!(RecordingState::Recording.end_render_pass().is_err());
        assert!(RecordingState::Initial.end_render_pass().is_err());
        assert!(RecordingState::Executable.end_render_pass().is_err());
    }

    #[test]
    fn test_viewport_covers_extent() {
        let state = ViewportState::for_extent(vk::Extent2D { width: 800, height: 600 });
        let viewport = state.viewport();
        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.height, 600.0);
        assert_eq!(viewport.max_depth, 1.0);
        assert_eq!(state.scissor().extent, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(state.scissor().offset, vk::Offset2D { x: 0, y: 0 });
    }

    #[test]
    fn test_viewport_cached_until_extent_changes() {
        let mut state = ViewportState::for_extent(vk::Extent2D { width: 800, height: 600 });
        assert!(!state.update(vk::Extent2D { width: 800, height: 600 }));
        assert!(state.update(vk::Extent2D { width: 1024, height: 768 }));
        assert_eq!(state.viewport().width, 1024.0);
    }
}
