//! Vulkan context management
//!
//! Instance creation (with optional validation layers), error types, and the
//! [`VulkanContext`] that owns instance, surface, selected device and logical
//! device. Field order of the context is the teardown order.

use std::ffi::{c_char, CStr, CString};
use std::fmt;

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry, Instance};
use thiserror::Error;

use super::device::{select_physical_device, LogicalDevice, PhysicalDeviceInfo};
use super::queue_family::QueueFamilyMap;
use super::surface::Surface;
use super::window::Window;
use crate::core::VulkanRendererConfig;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"Ember";

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Startup could not establish a device, surface or swapchain
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// A single frame's progression failed
    #[error("Frame failed during {stage}: {reason}")]
    Frame {
        /// Step of the frame protocol that failed
        stage: FrameStage,
        /// Underlying failure
        reason: String,
    },
}

impl VulkanError {
    /// Whether this error belongs to the startup phase
    pub fn is_initialization_failure(&self) -> bool {
        matches!(self, Self::InitializationFailed(_))
    }

    /// Whether this error is a frame-scoped runtime failure
    pub fn is_frame_failure(&self) -> bool {
        matches!(self, Self::Frame { .. })
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }

    /// Tag an error with the frame step it happened in
    ///
    /// Misuse errors are returned untouched so callers can tell them apart.
    pub(crate) fn in_frame(self, stage: FrameStage) -> Self {
        match self {
            Self::InvalidOperation { .. } | Self::Frame { .. } => self,
            other => Self::Frame {
                stage,
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Named steps of renderer bring-up, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Instance, extensions and validation layers
    Instance,
    /// Window surface binding
    Surface,
    /// GPU enumeration and selection
    PhysicalDevice,
    /// Graphics/present family resolution
    QueueFamilies,
    /// Logical device and queues
    LogicalDevice,
    /// Presentation parameter negotiation
    SwapchainSettings,
    /// Swapchain images and views
    Swapchain,
    /// Render pass
    RenderPass,
    /// Framebuffers per swapchain image
    Framebuffers,
    /// Shader modules and graphics pipeline
    Pipeline,
    /// Command pool and per-slot command buffers
    CommandBuffers,
    /// Per-slot semaphores and fences
    FrameSlots,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Instance => "instance",
            Self::Surface => "surface",
            Self::PhysicalDevice => "physical device selection",
            Self::QueueFamilies => "queue family resolution",
            Self::LogicalDevice => "logical device",
            Self::SwapchainSettings => "swapchain settings",
            Self::Swapchain => "swapchain",
            Self::RenderPass => "render pass",
            Self::Framebuffers => "framebuffers",
            Self::Pipeline => "graphics pipeline",
            Self::CommandBuffers => "command buffers",
            Self::FrameSlots => "frame slots",
        };
        f.write_str(name)
    }
}

/// Steps of the per-frame protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    /// Waiting on the slot's in-flight fence
    Wait,
    /// Acquiring a swapchain image
    Acquire,
    /// Recording the slot's command buffer
    Record,
    /// Submitting to the graphics queue
    Submit,
    /// Presenting on the present queue
    Present,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Wait => "fence wait",
            Self::Acquire => "image acquire",
            Self::Record => "command recording",
            Self::Submit => "queue submit",
            Self::Present => "present",
        };
        f.write_str(name)
    }
}

/// Run one bring-up step, logging and converting its failure
///
/// Every failure surfaces as [`VulkanError::InitializationFailed`] naming the
/// stage, so the first failing step aborts startup with a readable cause.
pub(crate) fn init_step<T>(stage: InitStage, result: VulkanResult<T>) -> VulkanResult<T> {
    result.map_err(|err| {
        log::error!("Initialization failed at {}: {}", stage, err);
        let cause = match err {
            VulkanError::InitializationFailed(msg) => msg,
            other => other.to_string(),
        };
        VulkanError::InitializationFailed(format!("{}: {}", stage, cause))
    })
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance
    ///
    /// Validation is a runtime choice: when enabled the Khronos validation
    /// layer must be installed, and a debug messenger forwards its output to
    /// the `log` facade.
    pub fn new(window: &Window, config: &VulkanRendererConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {}", e)))?;

        let enable_validation = config.validation_enabled();

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|_| VulkanError::InitializationFailed("Application name contains a NUL byte".to_string()))?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let required_extensions = window
            .required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to get required extensions: {}", e)))?;
        let mut extension_names = required_extensions
            .into_iter()
            .map(CString::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VulkanError::InitializationFailed("Invalid extension name".to_string()))?;

        let mut create_flags = vk::InstanceCreateFlags::empty();
        if cfg!(target_os = "macos") {
            extension_names.push(CString::from(vk::KhrPortabilityEnumerationFn::name()));
            create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }
        if enable_validation {
            extension_names.push(CString::from(DebugUtils::name()));
            Self::ensure_validation_layer(&entry)?;
        }

        for name in &extension_names {
            log::debug!("Instance extension: {}", name.to_string_lossy());
        }

        let extensions: Vec<*const c_char> = extension_names.iter().map(|ext| ext.as_ptr()).collect();
        let layers: Vec<*const c_char> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .flags(create_flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
            if e == vk::Result::ERROR_EXTENSION_NOT_PRESENT {
                Self::log_available_extensions(&entry);
            }
            VulkanError::Api(e)
        })?;

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!("Vulkan instance created (validation: {})", enable_validation);
        Ok(Self { entry, instance, debug })
    }

    fn ensure_validation_layer(entry: &Entry) -> VulkanResult<()> {
        let layers = entry.enumerate_instance_layer_properties().map_err(VulkanError::Api)?;
        let available = layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name == VALIDATION_LAYER
        });

        if available {
            Ok(())
        } else {
            Err(VulkanError::InitializationFailed(format!(
                "Validation requested but {} is not installed",
                VALIDATION_LAYER.to_string_lossy()
            )))
        }
    }

    fn log_available_extensions(entry: &Entry) {
        if let Ok(extensions) = entry.enumerate_instance_extension_properties(None) {
            log::error!("Available instance extensions:");
            for extension in extensions {
                let name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
                log::error!("\t{}", name.to_string_lossy());
            }
        }
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(VulkanError::Api)
    }

    /// Whether a debug messenger is attached
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan instance destroyed");
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Device-level Vulkan state owned by the renderer
///
/// Fields drop top to bottom: the logical device goes first, then the
/// surface, and the instance last.
pub struct VulkanContext {
    /// Logical device and its queues
    pub device: LogicalDevice,
    /// Resolved queue families of the selected device
    pub queue_families: QueueFamilyMap,
    /// Snapshot of the selected GPU
    pub physical_device: PhysicalDeviceInfo,
    /// Presentation surface
    pub surface: Surface,
    /// Vulkan instance and debug utilities
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Bring up instance, surface, device selection, queues and logical device
    pub fn new(window: &Window, config: &VulkanRendererConfig) -> VulkanResult<Self> {
        let instance = init_step(InitStage::Instance, VulkanInstance::new(window, config))?;
        let surface = init_step(InitStage::Surface, Surface::new(&instance, window))?;

        let physical_device = init_step(
            InitStage::PhysicalDevice,
            PhysicalDeviceInfo::enumerate(&instance.instance).and_then(select_physical_device),
        )?;

        let queue_families = init_step(
            InitStage::QueueFamilies,
            QueueFamilyMap::resolve(&physical_device.queue_families, |index| {
                surface.supports_present(physical_device.handle, index)
            }),
        )?;
        log::info!(
            "Queue families: graphics={}, present={}",
            queue_families.graphics_family(),
            queue_families.present_family()
        );

        let device = init_step(
            InitStage::LogicalDevice,
            LogicalDevice::new(&instance.instance, &physical_device, &queue_families),
        )?;

        Ok(Self {
            device,
            queue_families,
            physical_device,
            surface,
            instance,
        })
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the raw Device handle
    pub fn raw_device(&self) -> ash::Device {
        self.device.device.clone()
    }

    /// Wait until every queue of the logical device is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle() }.map_err(VulkanError::Api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_step_names_stage() {
        let result: VulkanResult<()> = init_step(InitStage::Swapchain, Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)));
        let err = result.unwrap_err();
        assert!(err.is_initialization_failure());
        assert!(err.to_string().contains("swapchain"));
    }

    #[test]
    fn test_init_step_keeps_inner_message() {
        let result: VulkanResult<()> = init_step(
            InitStage::PhysicalDevice,
            Err(VulkanError::InitializationFailed("No suitable GPU found".to_string())),
        );
        let message = result.unwrap_err().to_string();
        assert!(message.contains("physical device selection"));
        assert!(message.contains("No suitable GPU found"));
    }

    #[test]
    fn test_frame_tagging_preserves_misuse() {
        let misuse = VulkanError::invalid("presented twice").in_frame(FrameStage::Present);
        assert!(matches!(misuse, VulkanError::InvalidOperation { .. }));

        let api = VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).in_frame(FrameStage::Submit);
        assert!(api.is_frame_failure());
        assert!(matches!(api, VulkanError::Frame { stage: FrameStage::Submit, .. }));
    }
}
