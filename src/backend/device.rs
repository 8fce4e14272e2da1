// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Logical device creation from a negotiated capability record
// - One queue per distinct family (graphics and present may alias)
// - Swapchain loader for the presentation chain
//
// Every GPU object created afterwards holds an `Arc<Device>`, so the device
// is destroyed only after all of them are gone.

use ash::{khr::swapchain, vk};
use std::ffi::c_char;
use std::sync::Arc;

use super::capability::{DeviceCapabilities, DeviceRequirements};
use super::error::{CapabilityError, InitError, ResourceCreationError};
use super::instance::Instance;

/// Resolved queue family indices of a created device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct Device {
    pub device: ash::Device,
    pub swapchain_loader: swapchain::Device,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    // Keeps the instance alive until the device is destroyed
    _instance: Arc<Instance>,
}

impl Device {
    /// Create the logical device described by `capabilities`
    pub fn new(
        instance: Arc<Instance>,
        capabilities: &DeviceCapabilities,
        requirements: &DeviceRequirements,
    ) -> Result<Arc<Self>, InitError> {
        let queue_families = QueueFamilies {
            graphics: capabilities
                .queue_families
                .graphics
                .ok_or(CapabilityError::IncompleteQueueFamilies("graphics"))?,
            present: capabilities
                .queue_families
                .present
                .ok_or(CapabilityError::IncompleteQueueFamilies("present"))?,
        };

        // One request per distinct family
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = capabilities
            .queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions: Vec<*const c_char> = requirements
            .extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(capabilities.physical_device, &create_info, None)
        }
        .map_err(ResourceCreationError::Device)?;

        // Same family means the same queue handle
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let swapchain_loader = swapchain::Device::new(&instance.instance, &device);

        if queue_families.is_shared() {
            log::info!(
                "Created logical device on {} (graphics and present family {})",
                capabilities.name,
                queue_families.graphics
            );
        } else {
            log::info!(
                "Created logical device on {} (graphics family {}, present family {})",
                capabilities.name,
                queue_families.graphics,
                queue_families.present
            );
        }

        Ok(Arc::new(Self {
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
            queue_families,
            _instance: instance,
        }))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        if let Err(e) = self.wait_idle() {
            log::error!("Device idle wait failed during teardown: {}", e);
        }

        unsafe {
            self.device.destroy_device(None);
        }
    }
}
