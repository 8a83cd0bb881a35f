//! Vulkan renderer
//!
//! Owns every GPU object of the pipeline and runs frames through the
//! [`FrameSynchronizer`]. Fields are declared in teardown order: frame slots
//! first, the context (device, surface, instance) last.

use ash::vk;

use super::initialization::context::init_step;
use super::initialization::{InitStage, LogicalDevice, VulkanContext, VulkanError, VulkanResult, Window, WindowSystem};
use super::rendering::{CommandPool, CommandRecorder, GraphicsPipeline, PipelineSource, RenderPass, ViewportState};
use super::state::{
    create_frame_slots, Acquired, FrameBackend, FrameOutcome, FrameSlot, FrameSynchronizer, PresentStatus,
    SwapchainManager,
};
use crate::application::FrameRenderer;
use crate::core::ApplicationConfig;
use crate::resources::ResourcePaths;

/// Vertices of the hardcoded triangle
const TRIANGLE_VERTEX_COUNT: u32 = 3;

/// Root owner of the Vulkan device and presentation pipeline
pub struct VulkanRenderer {
    frames: Vec<FrameSlot>,
    synchronizer: FrameSynchronizer,
    command_pool: CommandPool,
    pipeline: GraphicsPipeline,
    viewport: ViewportState,
    swapchain: SwapchainManager,
    render_pass: RenderPass,
    context: VulkanContext,
    clear_color: [f32; 4],
    fence_timeout_ns: u64,
}

impl VulkanRenderer {
    /// Bring up the device and everything needed to draw
    ///
    /// Each step is an [`InitStage`]; the first failure is logged with its
    /// stage and returned as [`VulkanError::InitializationFailed`].
    pub fn new(window: &Window, config: &ApplicationConfig, resources: &ResourcePaths) -> VulkanResult<Self> {
        let renderer_config = &config.renderer;
        let context = VulkanContext::new(window, renderer_config)?;

        let mut swapchain: SwapchainManager = SwapchainManager::new(renderer_config.present_mode);
        let settings = init_step(
            InitStage::SwapchainSettings,
            swapchain.negotiate(&context, window.framebuffer_extent()),
        )?;
        init_step(InitStage::Swapchain, swapchain.create_swapchain(&context))?;

        let render_pass = init_step(InitStage::RenderPass, RenderPass::new(context.raw_device(), settings.format))?;
        init_step(
            InitStage::Framebuffers,
            swapchain.bind_framebuffers(&context, render_pass.handle(), render_pass.format()),
        )?;

        let pipeline = init_step(
            InitStage::Pipeline,
            GraphicsPipeline::load(&context.device.device, render_pass.handle(), resources, &config.shaders),
        )?;

        let frames_in_flight = renderer_config.max_frames_in_flight;
        let synchronizer = init_step(InitStage::FrameSlots, FrameSynchronizer::new(frames_in_flight))?;
        let buffer_count = init_step(
            InitStage::CommandBuffers,
            u32::try_from(frames_in_flight)
                .map_err(|_| VulkanError::invalid(format!("{} frame slots exceed u32", frames_in_flight))),
        )?;
        let command_pool = init_step(
            InitStage::CommandBuffers,
            CommandPool::new(context.raw_device(), context.queue_families.graphics_family()),
        )?;
        let command_buffers = init_step(
            InitStage::CommandBuffers,
            command_pool.allocate_command_buffers(buffer_count),
        )?;

        let frames = init_step(
            InitStage::FrameSlots,
            create_frame_slots(&context.device.device, &command_buffers),
        )?;

        log::info!(
            "Renderer ready: {} frame slots, {} swapchain images",
            frames_in_flight,
            swapchain.image_count()
        );

        Ok(Self {
            frames,
            synchronizer,
            command_pool,
            pipeline,
            viewport: ViewportState::for_extent(settings.extent),
            swapchain,
            render_pass,
            context,
            clear_color: renderer_config.clear_color,
            fence_timeout_ns: renderer_config.fence_timeout_ns(),
        })
    }

    /// Run one frame of the wait/acquire/record/submit/present protocol
    pub fn draw_frame(&mut self) -> VulkanResult<FrameOutcome> {
        let swapchain = self.swapchain.swapchain()?;
        self.viewport.update(swapchain.extent());

        let mut backend = DeviceFrameBackend {
            device: &self.context.device,
            frames: &self.frames,
            swapchain: &self.swapchain,
            swapchain_handle: swapchain.handle(),
            render_pass: &self.render_pass,
            pipeline: &self.pipeline,
            viewport: &self.viewport,
            clear_color: self.clear_color,
            fence_timeout_ns: self.fence_timeout_ns,
        };

        let outcome = self.synchronizer.draw_frame(&mut backend)?;
        if outcome == FrameOutcome::RecreatePending {
            self.swapchain.mark_recreate_pending()?;
        }
        Ok(outcome)
    }

    /// Rebuild the swapchain for a new framebuffer extent
    ///
    /// Returns `false` when the extent has no area and the rebuild is deferred.
    pub fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<bool> {
        let rebuilt = self.swapchain.recreate(
            &self.context,
            self.render_pass.handle(),
            self.render_pass.format(),
            extent,
        )?;
        if rebuilt {
            self.synchronizer.reset_acquisitions();
            let extent = self.swapchain.swapchain()?.extent();
            self.viewport.update(extent);
        }
        Ok(rebuilt)
    }

    /// Wait until the GPU has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.context.wait_idle()
    }

    /// Frame synchronizer, for counters and slot inspection
    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.synchronizer
    }

    /// Swapchain manager
    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    /// Device context
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    /// Command pool the frame slots allocate from
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }
}

impl FrameRenderer for VulkanRenderer {
    fn draw_frame(&mut self) -> VulkanResult<FrameOutcome> {
        VulkanRenderer::draw_frame(self)
    }

    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<bool> {
        VulkanRenderer::recreate_swapchain(self, extent)
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        VulkanRenderer::wait_idle(self)
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::warn!("Device wait before teardown failed: {}", e);
        }
        self.swapchain.destroy();
        log::debug!("Renderer resources released");
    }
}

/// Frame protocol steps against the real device
struct DeviceFrameBackend<'a> {
    device: &'a LogicalDevice,
    frames: &'a [FrameSlot],
    swapchain: &'a SwapchainManager,
    swapchain_handle: vk::SwapchainKHR,
    render_pass: &'a RenderPass,
    pipeline: &'a GraphicsPipeline,
    viewport: &'a ViewportState,
    clear_color: [f32; 4],
    fence_timeout_ns: u64,
}

impl DeviceFrameBackend<'_> {
    fn slot(&self, slot: usize) -> VulkanResult<&FrameSlot> {
        self.frames
            .get(slot)
            .ok_or_else(|| VulkanError::invalid(format!("Frame slot {} does not exist", slot)))
    }
}

impl FrameBackend for DeviceFrameBackend<'_> {
    fn wait_for_fence(&mut self, slot: usize) -> VulkanResult<()> {
        let label = format!("Frame slot {} fence", slot);
        self.slot(slot)?
            .in_flight
            .wait_with_diagnostics(self.fence_timeout_ns, &label)
    }

    fn acquire_next_image(&mut self, slot: usize) -> VulkanResult<Acquired> {
        let semaphore = self.slot(slot)?.image_available.handle();
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain_handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        let command_buffer = self.slot(slot)?.command_buffer;
        let framebuffer = self.swapchain.framebuffer(image_index)?.handle();
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];

        let mut recorder = CommandRecorder::reset(&self.device.device, command_buffer)?;
        recorder.begin()?;
        {
            let mut pass = recorder.begin_render_pass(
                self.render_pass.handle(),
                framebuffer,
                self.viewport.scissor(),
                &clear_values,
            )?;
            pass.bind_pipeline(self.pipeline.pipeline());
            pass.set_viewport_state(self.viewport);
            pass.draw(TRIANGLE_VERTEX_COUNT, 1, 0, 0);
        }
        recorder.end()
    }

    fn reset_fence(&mut self, slot: usize) -> VulkanResult<()> {
        self.slot(slot)?.in_flight.reset()
    }

    fn submit(&mut self, slot: usize) -> VulkanResult<()> {
        let frame = self.slot(slot)?;
        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], frame.in_flight.handle())
        }
        .map_err(VulkanError::Api)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentStatus> {
        let wait_semaphores = [self.slot(slot)?.render_finished.handle()];
        let swapchains = [self.swapchain_handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present_queue, &present_info)
        } {
            Ok(false) => Ok(PresentStatus::Presented),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn release_slot(&mut self, slot: usize) -> VulkanResult<()> {
        let frame = self.slot(slot)?;
        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .build();

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], frame.in_flight.handle())
        }
        .map_err(VulkanError::Api)
    }
}
