// Vulkan instance and window surface
//
// Responsibilities:
// - Load the Vulkan library
// - Verify required instance extensions and layers before asking for them
// - Instance creation with optional validation layer
// - Route validation messages into `log`
// - Surface creation for the window

use ash::{ext::debug_utils, khr::surface, vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::borrow::Cow;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::error::{CapabilityError, InitError, ResourceCreationError};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Startup settings for the instance
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub app_name: String,
    pub enable_validation: bool,
}

/// Vulkan instance wrapper with automatic cleanup
pub struct Instance {
    debug_utils: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_loader: surface::Instance,
    pub instance: ash::Instance,
    pub entry: Entry,
}

impl Instance {
    /// Create the instance for a window living on `display`
    pub fn new(config: &InstanceConfig, display: RawDisplayHandle) -> Result<Arc<Self>, InitError> {
        log::info!("Creating Vulkan instance: {}", config.app_name);

        let entry = unsafe { Entry::load() }.map_err(CapabilityError::from)?;

        // Window-system extensions first, then debug utils
        let mut extensions: Vec<&CStr> = ash_window::enumerate_required_extensions(display)
            .map_err(CapabilityError::query("vkEnumerateInstanceExtensionProperties"))?
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) })
            .collect();
        if config.enable_validation {
            extensions.push(debug_utils::NAME);
        }

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(CapabilityError::query("vkEnumerateInstanceExtensionProperties"))?;
        let available_names: Vec<&CStr> = available
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();

        let missing = missing_names(&extensions, &available_names);
        if !missing.is_empty() {
            return Err(CapabilityError::MissingInstanceExtensions(missing).into());
        }

        let layers: Vec<&CStr> = if config.enable_validation {
            Self::check_validation_layer(&entry)?;
            vec![VALIDATION_LAYER]
        } else {
            vec![]
        };

        let instance = Self::create_instance(&entry, &config.app_name, &extensions, &layers)?;
        let surface_loader = surface::Instance::new(&entry, &instance);

        let mut this = Self {
            debug_utils: None,
            surface_loader,
            instance,
            entry,
        };

        // If the messenger fails, dropping `this` destroys the instance
        if config.enable_validation {
            this.debug_utils = Some(this.setup_debug_messenger()?);
            log::info!("Validation layer enabled");
        }

        Ok(Arc::new(this))
    }

    fn check_validation_layer(entry: &Entry) -> Result<(), CapabilityError> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(CapabilityError::query("vkEnumerateInstanceLayerProperties"))?;

        let found = layers
            .iter()
            .filter_map(|layer| layer.layer_name_as_c_str().ok())
            .any(|name| name == VALIDATION_LAYER);

        if found {
            Ok(())
        } else {
            Err(CapabilityError::MissingLayer(
                VALIDATION_LAYER.to_string_lossy().into_owned(),
            ))
        }
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        extensions: &[&CStr],
        layers: &[&CStr],
    ) -> Result<ash::Instance, ResourceCreationError> {
        let app_name = CString::new(app_name).unwrap_or_else(|_| c"triangle-renderer".to_owned());

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        unsafe { entry.create_instance(&create_info, None) }.map_err(ResourceCreationError::Instance)
    }

    fn setup_debug_messenger(
        &self,
    ) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT), ResourceCreationError> {
        let debug_utils = debug_utils::Instance::new(&self.entry, &self.instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(ResourceCreationError::DebugMessenger)?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Presentable surface for one window
pub struct Surface {
    pub surface: vk::SurfaceKHR,
    instance: Arc<Instance>,
}

impl Surface {
    pub fn new(
        instance: Arc<Instance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Arc<Self>, ResourceCreationError> {
        let surface = unsafe {
            ash_window::create_surface(&instance.entry, &instance.instance, display, window, None)
        }
        .map_err(ResourceCreationError::Surface)?;

        Ok(Arc::new(Self { surface, instance }))
    }

    pub fn loader(&self) -> &surface::Instance {
        &self.instance.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

/// Names in `required` that do not appear in `available`, in request order
pub(crate) fn missing_names(required: &[&CStr], available: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.contains(*name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message: Cow<'_, str> = if p_callback_data.is_null() {
        Cow::Borrowed("")
    } else {
        (*p_callback_data)
            .message_as_c_str()
            .map(CStr::to_string_lossy)
            .unwrap_or_default()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message);
        }
        _ => {
            log::debug!("[Vulkan] {}", message);
        }
    }

    vk::FALSE
}
