//! Physical device selection and logical device creation

use std::ffi::CStr;

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device, Instance};

use super::context::{VulkanError, VulkanResult};
use super::queue_family::QueueFamilyMap;

/// One memory heap of a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeapInfo {
    /// Heap size in bytes
    pub size: vk::DeviceSize,
    /// Whether the heap is device-local (VRAM)
    pub device_local: bool,
}

/// Immutable snapshot of a candidate GPU
///
/// Taken once during enumeration and only used for selection and for the
/// later queue family and extension checks.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub handle: vk::PhysicalDevice,
    /// Human-readable device name
    pub name: String,
    /// Discrete, integrated, virtual, CPU...
    pub device_type: vk::PhysicalDeviceType,
    /// Supported Vulkan API version
    pub api_version: u32,
    /// Driver version as reported by the vendor
    pub driver_version: u32,
    /// PCI vendor id
    pub vendor_id: u32,
    /// PCI device id
    pub device_id: u32,
    /// Geometry shader support
    pub geometry_shader: bool,
    /// Tessellation shader support
    pub tessellation_shader: bool,
    /// Memory heaps
    pub memory_heaps: Vec<MemoryHeapInfo>,
    /// Queue family properties, indexed by family index
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Whether `VK_KHR_swapchain` is available
    pub supports_swapchain: bool,
}

impl PhysicalDeviceInfo {
    /// Snapshot every physical device visible to the instance
    pub fn enumerate(instance: &Instance) -> VulkanResult<Vec<Self>> {
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;
        devices.into_iter().map(|device| Self::query(instance, device)).collect()
    }

    fn query(instance: &Instance, device: vk::PhysicalDevice) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let extensions =
            unsafe { instance.enumerate_device_extension_properties(device) }.map_err(VulkanError::Api)?;

        let supports_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });

        let memory_heaps = memory.memory_heaps[..memory.memory_heap_count as usize]
            .iter()
            .map(|heap| MemoryHeapInfo {
                size: heap.size,
                device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
            })
            .collect();

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        Ok(Self {
            handle: device,
            name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            geometry_shader: features.geometry_shader == vk::TRUE,
            tessellation_shader: features.tessellation_shader == vk::TRUE,
            memory_heaps,
            queue_families,
            supports_swapchain,
        })
    }

    /// Size of the largest device-local heap, 0 when there is none
    pub fn device_local_memory(&self) -> vk::DeviceSize {
        self.memory_heaps
            .iter()
            .filter(|heap| heap.device_local)
            .map(|heap| heap.size)
            .max()
            .unwrap_or(0)
    }

    /// Discrete GPU with geometry and tessellation shaders
    pub fn is_qualified(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            && self.geometry_shader
            && self.tessellation_shader
    }

    fn log_summary(&self) {
        log::debug!("-{}:", self.name);
        log::debug!("\tType: {:?}", self.device_type);
        log::debug!(
            "\tAPI Version: {}.{}.{}",
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version)
        );
        log::debug!("\tDriver Version: {}", self.driver_version);
        log::debug!("\tVendor ID: {:#06x}, Device ID: {:#06x}", self.vendor_id, self.device_id);
        log::debug!("\tGeometry Shader: {}", yes_no(self.geometry_shader));
        log::debug!("\tTessellation Shader: {}", yes_no(self.tessellation_shader));
        for (index, heap) in self.memory_heaps.iter().enumerate() {
            log::debug!(
                "\tHeap {}: {}MB{}",
                index,
                heap.size / (1024 * 1024),
                if heap.device_local { " (device local)" } else { "" }
            );
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

/// Pick the GPU to render with
///
/// Only discrete GPUs with geometry and tessellation shaders qualify. The
/// qualifying candidate with the largest device-local heap wins, the first
/// one enumerated on a tie. There is no fallback to other device types.
pub fn select_physical_device(candidates: Vec<PhysicalDeviceInfo>) -> VulkanResult<PhysicalDeviceInfo> {
    if candidates.is_empty() {
        return Err(VulkanError::InitializationFailed(
            "Failed to find GPUs with Vulkan support".to_string(),
        ));
    }

    log::debug!("Physical Devices:");
    let mut chosen: Option<PhysicalDeviceInfo> = None;
    for candidate in candidates {
        candidate.log_summary();
        if !candidate.is_qualified() {
            continue;
        }
        let better = chosen
            .as_ref()
            .map_or(true, |current| candidate.device_local_memory() > current.device_local_memory());
        if better {
            chosen = Some(candidate);
        }
    }

    let chosen = chosen.ok_or_else(|| {
        VulkanError::InitializationFailed(
            "No suitable GPU found (requires a discrete GPU with geometry and tessellation shaders)".to_string(),
        )
    })?;

    log::info!(
        "Selected GPU: {} ({}MB device-local)",
        chosen.name,
        chosen.device_local_memory() / (1024 * 1024)
    );
    Ok(chosen)
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the logical device with one queue per unique family
    pub fn new(
        instance: &Instance,
        physical_device: &PhysicalDeviceInfo,
        queue_families: &QueueFamilyMap,
    ) -> VulkanResult<Self> {
        if !physical_device.supports_swapchain {
            return Err(VulkanError::InitializationFailed(format!(
                "Missing required device extension {}",
                SwapchainLoader::name().to_string_lossy()
            )));
        }

        // Must outlive create_device only
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .queue_create_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device.handle, &create_info, None) }
            .map_err(VulkanError::Api)?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics_family(), 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present_family(), 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        log::debug!("Logical device created with {} queue(s)", queue_infos.len());
        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
        log::debug!("Logical device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: vk::DeviceSize = 1024 * 1024 * 1024;

    fn candidate(
        name: &str,
        device_type: vk::PhysicalDeviceType,
        geometry_shader: bool,
        tessellation_shader: bool,
        heap: vk::DeviceSize,
    ) -> PhysicalDeviceInfo {
        PhysicalDeviceInfo {
            handle: vk::PhysicalDevice::null(),
            name: name.to_string(),
            device_type,
            api_version: vk::API_VERSION_1_0,
            driver_version: 0,
            vendor_id: 0,
            device_id: 0,
            geometry_shader,
            tessellation_shader,
            memory_heaps: vec![
                MemoryHeapInfo { size: 16 * GIB, device_local: false },
                MemoryHeapInfo { size: heap, device_local: true },
            ],
            queue_families: Vec::new(),
            supports_swapchain: true,
        }
    }

    #[test]
    fn test_selects_only_qualified_discrete_gpu() {
        let candidates = vec![
            candidate("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU, true, true, 8 * GIB),
            candidate("no-tess", vk::PhysicalDeviceType::DISCRETE_GPU, true, false, 8 * GIB),
            candidate("full", vk::PhysicalDeviceType::DISCRETE_GPU, true, true, 4 * GIB),
        ];

        let chosen = select_physical_device(candidates).unwrap();
        assert_eq!(chosen.name, "full");
    }

    #[test]
    fn test_largest_device_local_heap_wins() {
        let candidates = vec![
            candidate("small", vk::PhysicalDeviceType::DISCRETE_GPU, true, true, 2 * GIB),
            candidate("large", vk::PhysicalDeviceType::DISCRETE_GPU, true, true, 12 * GIB),
            candidate("medium", vk::PhysicalDeviceType::DISCRETE_GPU, true, true, 8 * GIB),
        ];

        assert_eq!(select_physical_device(candidates).unwrap().name, "large");
    }

    #[test]
    fn test_tie_resolves_to_first_enumerated() {
        let candidates = vec![
            candidate("first", vk::PhysicalDeviceType::DISCRETE_GPU, true, true, 8 * GIB),
            candidate("second", vk::PhysicalDeviceType::DISCRETE_GPU, true, true, 8 * GIB),
        ];

        assert_eq!(select_physical_device(candidates).unwrap().name, "first");
    }

    #[test]
    fn test_no_qualifying_device_fails() {
        let candidates = vec![
            candidate("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU, true, true, 8 * GIB),
            candidate("cpu", vk::PhysicalDeviceType::CPU, true, true, 8 * GIB),
            candidate("no-geom", vk::PhysicalDeviceType::DISCRETE_GPU, false, true, 8 * GIB),
        ];

        let err = select_physical_device(candidates).unwrap_err();
        assert!(err.is_initialization_failure());
    }

    #[test]
    fn test_empty_candidate_list_fails() {
        assert!(select_physical_device(Vec::new()).unwrap_err().is_initialization_failure());
    }

    #[test]
    fn test_host_heap_is_not_device_local() {
        let mut info = candidate("host-only", vk::PhysicalDeviceType::DISCRETE_GPU, true, true, 0);
        info.memory_heaps.retain(|heap| !heap.device_local);
        assert_eq!(info.device_local_memory(), 0);
    }
}
