//! Graphics and present queue family resolution

use ash::vk;

use super::context::{VulkanError, VulkanResult};

/// Queue families used by the renderer
///
/// Graphics and present may be the same family. When they differ, swapchain
/// images are shared concurrently between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyMap {
    graphics: u32,
    present: u32,
}

/// How swapchain images are shared between queue families
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSharing {
    /// Exclusive or concurrent ownership
    pub mode: vk::SharingMode,
    /// Families named for concurrent sharing, empty when exclusive
    pub queue_family_indices: Vec<u32>,
}

impl QueueFamilyMap {
    /// Resolve families from a device's queue family properties
    ///
    /// Graphics is the first family with graphics support. Present prefers
    /// the graphics family when it can present, then the first family that
    /// can. `supports_present` is queried per family index.
    pub fn resolve<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> VulkanResult<Self>
    where
        F: FnMut(u32) -> VulkanResult<bool>,
    {
        let graphics = families
            .iter()
            .position(|family| family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|index| index as u32)
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?;

        let present = if supports_present(graphics)? {
            graphics
        } else {
            let mut found = None;
            for index in 0..families.len() as u32 {
                if families[index as usize].queue_count > 0 && supports_present(index)? {
                    found = Some(index);
                    break;
                }
            }
            found.ok_or_else(|| VulkanError::InitializationFailed("No present queue family found".to_string()))?
        };

        Ok(Self { graphics, present })
    }

    /// Graphics family index
    pub fn graphics_family(&self) -> u32 {
        self.graphics
    }

    /// Present family index
    pub fn present_family(&self) -> u32 {
        self.present
    }

    /// Whether one family serves both roles
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families to request one queue from
    pub fn queue_create_families(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    /// Swapchain image sharing for these families
    pub fn image_sharing(&self) -> ImageSharing {
        if self.is_shared() {
            ImageSharing {
                mode: vk::SharingMode::EXCLUSIVE,
                queue_family_indices: Vec::new(),
            }
        } else {
            ImageSharing {
                mode: vk::SharingMode::CONCURRENT,
                queue_family_indices: vec![self.graphics, self.present],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_family_serves_both() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let map = QueueFamilyMap::resolve(&families, |_| Ok(true)).unwrap();

        assert_eq!(map.graphics_family(), 0);
        assert_eq!(map.present_family(), 0);
        assert_eq!(map.queue_create_families(), vec![0]);

        let sharing = map.image_sharing();
        assert_eq!(sharing.mode, vk::SharingMode::EXCLUSIVE);
        assert!(sharing.queue_family_indices.is_empty());
    }

    #[test]
    fn test_separate_present_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let map = QueueFamilyMap::resolve(&families, |index| Ok(index == 2)).unwrap();

        assert_eq!(map.graphics_family(), 1);
        assert_eq!(map.present_family(), 2);
        assert!(!map.is_shared());
        assert_eq!(map.queue_create_families(), vec![1, 2]);

        let sharing = map.image_sharing();
        assert_eq!(sharing.mode, vk::SharingMode::CONCURRENT);
        assert_eq!(sharing.queue_family_indices, vec![1, 2]);
    }

    #[test]
    fn test_graphics_family_preferred_for_present() {
        let families = [family(vk::QueueFlags::COMPUTE), family(vk::QueueFlags::GRAPHICS)];
        let map = QueueFamilyMap::resolve(&families, |_| Ok(true)).unwrap();

        assert_eq!(map.present_family(), 1);
        assert!(map.is_shared());
    }

    #[test]
    fn test_missing_graphics_family() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        let err = QueueFamilyMap::resolve(&families, |_| Ok(true)).unwrap_err();
        assert!(err.is_initialization_failure());
    }

    #[test]
    fn test_missing_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilyMap::resolve(&families, |_| Ok(false)).is_err());
    }

    #[test]
    fn test_present_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let err = QueueFamilyMap::resolve(&families, |_| Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)))
            .unwrap_err();
        assert!(matches!(err, VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)));
    }
}
