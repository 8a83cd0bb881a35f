//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for semaphores and fences, and the per-frame slot that
//! bundles one command buffer with its synchronization objects.

use ash::{prelude::VkResult, vk, Device};

use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { device.create_semaphore(&create_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.create_fence(&create_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self { device, fence })
    }

    /// Wait for the fence, warning every `timeout_ns` it stays unsignaled
    pub fn wait_with_diagnostics(&self, timeout_ns: u64, label: &str) -> VulkanResult<()> {
        wait_reporting_timeouts(
            || unsafe { self.device.wait_for_fences(&[self.fence], true, timeout_ns) },
            timeout_ns,
            label,
        )
        .map(|_| ())
    }

    /// Reset fence to unsignaled
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]) }.map_err(VulkanError::Api)
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Repeat a bounded wait until it succeeds
///
/// `TIMEOUT` logs a warning and waits again; any other error aborts.
/// Returns how many timeouts elapsed.
pub(crate) fn wait_reporting_timeouts<F>(mut wait: F, timeout_ns: u64, label: &str) -> VulkanResult<u32>
where
    F: FnMut() -> VkResult<()>,
{
    let mut timeouts = 0u32;
    loop {
        match wait() {
            Ok(()) => return Ok(timeouts),
            Err(vk::Result::TIMEOUT) => {
                timeouts += 1;
                log::warn!(
                    "{} still busy after {} ms (x{}), waiting again",
                    label,
                    timeout_ns / 1_000_000,
                    timeouts
                );
            }
            Err(e) => return Err(VulkanError::Api(e)),
        }
    }
}

/// Per-frame resources: one command buffer and its synchronization objects
pub struct FrameSlot {
    /// Primary command buffer, re-recorded every use of the slot
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the acquired swapchain image is ready
    pub image_available: Semaphore,
    /// Signaled when rendering to the image has finished
    pub render_finished: Semaphore,
    /// Signaled when the slot's submission completes on the GPU
    pub in_flight: Fence,
}

impl FrameSlot {
    /// Create the slot's semaphores and a fence created signaled
    pub fn new(device: Device, command_buffer: vk::CommandBuffer) -> VulkanResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            in_flight,
        })
    }
}

/// Create one slot per command buffer
pub fn create_frame_slots(device: &Device, command_buffers: &[vk::CommandBuffer]) -> VulkanResult<Vec<FrameSlot>> {
    command_buffers
        .iter()
        .map(|&command_buffer| FrameSlot::new(device.clone(), command_buffer))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_retries_after_timeouts() {
        let mut results = vec![Ok(()), Err(vk::Result::TIMEOUT), Err(vk::Result::TIMEOUT)];
        let timeouts = wait_reporting_timeouts(|| results.pop().unwrap(), 1_000_000, "test fence").unwrap();
        assert_eq!(timeouts, 2);
        assert!(results.is_empty());
    }

    #[test]
    fn test_device_lost_aborts_wait() {
        let mut calls = 0;
        let err = wait_reporting_timeouts(
            || {
                calls += 1;
                Err(vk::Result::ERROR_DEVICE_LOST)
            },
            1_000_000,
            "test fence",
        )
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)));
    }
}
