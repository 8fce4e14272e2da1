// Capability negotiation - pick a GPU that can draw to our surface
//
// Each physical device is summarized into a `DeviceCapabilities` record.
// Selection is first-fit in enumeration order; there is no scoring.

use ash::vk;
use std::ffi::{CStr, CString};
use std::fmt;

use super::error::CapabilityError;
use super::instance::{Instance, Surface};

/// Device-level requirements, passed in rather than hard-coded
#[derive(Debug, Clone)]
pub struct DeviceRequirements {
    pub extensions: Vec<CString>,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            extensions: vec![ash::khr::swapchain::NAME.to_owned()],
        }
    }
}

/// Queue family indices, resolved independently
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics.into_iter().chain(self.present).collect();
        families.dedup();
        families
    }
}

/// Why a candidate was passed over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsuitable {
    NoGraphicsQueue,
    NoPresentQueue,
    MissingExtension(String),
    NoSurfaceFormats,
    NoPresentModes,
}

impl fmt::Display for Unsuitable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoGraphicsQueue => f.write_str("no graphics queue family"),
            Self::NoPresentQueue => f.write_str("no queue family can present to the surface"),
            Self::MissingExtension(name) => write!(f, "missing device extension {name}"),
            Self::NoSurfaceFormats => f.write_str("surface reports no formats"),
            Self::NoPresentModes => f.write_str("surface reports no present modes"),
        }
    }
}

/// Everything we learned about one physical device
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub extensions: Vec<CString>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub surface_capabilities: vk::SurfaceCapabilitiesKHR,
}

impl DeviceCapabilities {
    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|ext| ext.as_c_str() == name)
    }

    /// Checks run in a fixed order so the first failing reason is reported
    pub fn check(&self, requirements: &DeviceRequirements) -> Result<(), Unsuitable> {
        if self.queue_families.graphics.is_none() {
            return Err(Unsuitable::NoGraphicsQueue);
        }
        if self.queue_families.present.is_none() {
            return Err(Unsuitable::NoPresentQueue);
        }
        if let Some(missing) = requirements
            .extensions
            .iter()
            .find(|ext| !self.supports_extension(ext))
        {
            return Err(Unsuitable::MissingExtension(
                missing.to_string_lossy().into_owned(),
            ));
        }
        if self.formats.is_empty() {
            return Err(Unsuitable::NoSurfaceFormats);
        }
        if self.present_modes.is_empty() {
            return Err(Unsuitable::NoPresentModes);
        }
        Ok(())
    }
}

/// Graphics and present families are discovered independently: the first
/// family with GRAPHICS, and the first family the surface accepts.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<QueueFamilyIndices, CapabilityError>
where
    F: FnMut(u32) -> Result<bool, CapabilityError>,
{
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }
        if indices.present.is_none() && supports_present(index)? {
            indices.present = Some(index);
        }
        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// First suitable candidate in enumeration order
pub fn first_suitable<I>(
    candidates: I,
    requirements: &DeviceRequirements,
) -> Result<DeviceCapabilities, CapabilityError>
where
    I: IntoIterator<Item = DeviceCapabilities>,
{
    for candidate in candidates {
        match candidate.check(requirements) {
            Ok(()) => return Ok(candidate),
            Err(reason) => log::info!("Skipping GPU {}: {}", candidate.name, reason),
        }
    }
    Err(CapabilityError::NoSuitableDevice)
}

/// Enumerate physical devices and pick the first one that can drive `surface`
pub fn select_device(
    instance: &Instance,
    surface: &Surface,
    requirements: &DeviceRequirements,
) -> Result<DeviceCapabilities, CapabilityError> {
    let devices = unsafe { instance.instance.enumerate_physical_devices() }
        .map_err(CapabilityError::query("vkEnumeratePhysicalDevices"))?;

    if devices.is_empty() {
        return Err(CapabilityError::NoSuitableDevice);
    }

    let candidates = devices
        .into_iter()
        .map(|device| query_capabilities(instance, surface, device))
        .collect::<Result<Vec<_>, _>>()?;

    let selected = first_suitable(candidates, requirements)?;
    log::info!("Selected GPU: {}", selected.name);
    Ok(selected)
}

/// Read-only queries that build one capability record
pub fn query_capabilities(
    instance: &Instance,
    surface: &Surface,
    physical_device: vk::PhysicalDevice,
) -> Result<DeviceCapabilities, CapabilityError> {
    let loader = surface.loader();

    let properties = unsafe { instance.instance.get_physical_device_properties(physical_device) };
    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_string());

    let families = unsafe {
        instance
            .instance
            .get_physical_device_queue_family_properties(physical_device)
    };
    let queue_families = find_queue_families(&families, |index| unsafe {
        loader
            .get_physical_device_surface_support(physical_device, index, surface.surface)
            .map_err(CapabilityError::query("vkGetPhysicalDeviceSurfaceSupportKHR"))
    })?;

    let extensions = unsafe {
        instance
            .instance
            .enumerate_device_extension_properties(physical_device)
    }
    .map_err(CapabilityError::query("vkEnumerateDeviceExtensionProperties"))?
    .iter()
    .filter_map(|ext| ext.extension_name_as_c_str().ok().map(CStr::to_owned))
    .collect();

    let formats = unsafe { loader.get_physical_device_surface_formats(physical_device, surface.surface) }
        .map_err(CapabilityError::query("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
    let present_modes = unsafe {
        loader.get_physical_device_surface_present_modes(physical_device, surface.surface)
    }
    .map_err(CapabilityError::query("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;
    let surface_capabilities = unsafe {
        loader.get_physical_device_surface_capabilities(physical_device, surface.surface)
    }
    .map_err(CapabilityError::query("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;

    log::debug!(
        "GPU {}: queues {:?}, {} formats, {} present modes",
        name,
        queue_families,
        formats.len(),
        present_modes.len()
    );

    Ok(DeviceCapabilities {
        physical_device,
        name,
        queue_families,
        extensions,
        formats,
        present_modes,
        surface_capabilities,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;

    pub(crate) fn capable_device(raw: u64, graphics: u32, present: u32) -> DeviceCapabilities {
        DeviceCapabilities {
            physical_device: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu-{raw}"),
            queue_families: QueueFamilyIndices {
                graphics: Some(graphics),
                present: Some(present),
            },
            extensions: vec![ash::khr::swapchain::NAME.to_owned()],
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            surface_capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D { width: 800, height: 600 },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
                ..Default::default()
            },
        }
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn graphics_and_present_found_independently() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];

        // Only the compute-only family can present
        let indices = find_queue_families(&families, |i| Ok(i == 2)).unwrap();

        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
        assert_eq!(indices.unique(), vec![1, 2]);
    }

    #[test]
    fn shared_family_is_deduplicated() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, indices.present);
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn missing_present_support_leaves_record_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| Ok(false)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, None);
        assert!(!indices.is_complete());
    }

    #[test]
    fn present_query_failure_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = find_queue_families(&families, |_| {
            Err(CapabilityError::query("vkGetPhysicalDeviceSurfaceSupportKHR")(
                vk::Result::ERROR_SURFACE_LOST_KHR,
            ))
        });

        assert!(matches!(
            result,
            Err(CapabilityError::Query { result: vk::Result::ERROR_SURFACE_LOST_KHR, .. })
        ));
    }

    #[test]
    fn rejection_reasons() {
        let requirements = DeviceRequirements::default();

        let mut no_present = capable_device(1, 0, 0);
        no_present.queue_families.present = None;
        assert_eq!(no_present.check(&requirements), Err(Unsuitable::NoPresentQueue));

        let mut no_swapchain = capable_device(2, 0, 0);
        no_swapchain.extensions.clear();
        assert_eq!(
            no_swapchain.check(&requirements),
            Err(Unsuitable::MissingExtension("VK_KHR_swapchain".to_string()))
        );

        let mut no_formats = capable_device(3, 0, 0);
        no_formats.formats.clear();
        assert_eq!(no_formats.check(&requirements), Err(Unsuitable::NoSurfaceFormats));

        let mut no_modes = capable_device(4, 0, 0);
        no_modes.present_modes.clear();
        assert_eq!(no_modes.check(&requirements), Err(Unsuitable::NoPresentModes));

        assert!(capable_device(5, 0, 1).check(&requirements).is_ok());
    }

    #[test]
    fn selects_first_suitable_in_enumeration_order() {
        let requirements = DeviceRequirements::default();

        let mut unsuitable = capable_device(1, 0, 0);
        unsuitable.queue_families.graphics = None;
        let candidates = vec![unsuitable, capable_device(2, 0, 1), capable_device(3, 0, 0)];

        for _ in 0..3 {
            let selected = first_suitable(candidates.clone(), &requirements).unwrap();
            assert_eq!(selected.physical_device.as_raw(), 2);
        }
    }

    #[test]
    fn no_candidates_is_an_error() {
        let result = first_suitable(Vec::new(), &DeviceRequirements::default());
        assert!(matches!(result, Err(CapabilityError::NoSuitableDevice)));
    }

    #[test]
    fn all_unsuitable_is_an_error() {
        let mut a = capable_device(1, 0, 0);
        a.formats.clear();
        let mut b = capable_device(2, 0, 0);
        b.extensions.clear();

        let result = first_suitable(vec![a, b], &DeviceRequirements::default());
        assert!(matches!(result, Err(CapabilityError::NoSuitableDevice)));
    }

    #[test]
    fn extra_requirements_are_honored() {
        let requirements = DeviceRequirements {
            extensions: vec![
                ash::khr::swapchain::NAME.to_owned(),
                c"VK_KHR_maintenance1".to_owned(),
            ],
        };

        let mut with_maintenance = capable_device(7, 0, 0);
        with_maintenance.extensions.push(c"VK_KHR_maintenance1".to_owned());

        let selected =
            first_suitable(vec![capable_device(6, 0, 0), with_maintenance], &requirements).unwrap();
        assert_eq!(selected.physical_device.as_raw(), 7);
    }
}
