// Error taxonomy for the Vulkan backend
//
// Startup failures are either capability problems (nothing we can run on)
// or resource creation failures (the driver rejected a create call).
// Steady-state failures are frame errors. All of them are fatal.

use ash::vk;
use std::fmt;
use thiserror::Error;

use super::capability::Unsuitable;

/// Nothing on this machine satisfies what the renderer needs
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("required instance extensions are not available: {}", .0.join(", "))]
    MissingInstanceExtensions(Vec<String>),

    #[error("requested layer {0} is not installed")]
    MissingLayer(String),

    #[error("no suitable GPU found")]
    NoSuitableDevice,

    #[error("selected device is unsuitable: {0}")]
    Unsuitable(Unsuitable),

    #[error("capability record has no {0} queue family")]
    IncompleteQueueFamilies(&'static str),

    #[error("{query} failed: {result} (VkResult {code})", code = .result.as_raw())]
    Query {
        query: &'static str,
        result: vk::Result,
    },
}

impl CapabilityError {
    pub(crate) fn query(query: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Query { query, result }
    }
}

/// A device-object create call was rejected by the driver
#[derive(Debug, Error)]
pub enum ResourceCreationError {
    #[error("failed to create instance: {0} (VkResult {code})", code = .0.as_raw())]
    Instance(vk::Result),
    #[error("failed to create debug messenger: {0} (VkResult {code})", code = .0.as_raw())]
    DebugMessenger(vk::Result),
    #[error("failed to create window surface: {0} (VkResult {code})", code = .0.as_raw())]
    Surface(vk::Result),
    #[error("failed to create logical device: {0} (VkResult {code})", code = .0.as_raw())]
    Device(vk::Result),
    #[error("failed to create swapchain: {0} (VkResult {code})", code = .0.as_raw())]
    Swapchain(vk::Result),
    #[error("failed to create image view: {0} (VkResult {code})", code = .0.as_raw())]
    ImageView(vk::Result),
    #[error("failed to create framebuffer: {0} (VkResult {code})", code = .0.as_raw())]
    Framebuffer(vk::Result),
    #[error("failed to create render pass: {0} (VkResult {code})", code = .0.as_raw())]
    RenderPass(vk::Result),
    #[error("failed to create shader module: {0} (VkResult {code})", code = .0.as_raw())]
    ShaderModule(vk::Result),
    #[error("failed to create pipeline layout: {0} (VkResult {code})", code = .0.as_raw())]
    PipelineLayout(vk::Result),
    #[error("failed to create graphics pipeline: {0} (VkResult {code})", code = .0.as_raw())]
    Pipeline(vk::Result),
    #[error("failed to create command pool: {0} (VkResult {code})", code = .0.as_raw())]
    CommandPool(vk::Result),
    #[error("failed to allocate command buffer: {0} (VkResult {code})", code = .0.as_raw())]
    CommandBuffer(vk::Result),
    #[error("failed to create semaphore: {0} (VkResult {code})", code = .0.as_raw())]
    Semaphore(vk::Result),
    #[error("failed to create fence: {0} (VkResult {code})", code = .0.as_raw())]
    Fence(vk::Result),
}

impl ResourceCreationError {
    /// Native status code reported by the driver
    pub fn status(&self) -> vk::Result {
        match *self {
            Self::Instance(r)
            | Self::DebugMessenger(r)
            | Self::Surface(r)
            | Self::Device(r)
            | Self::Swapchain(r)
            | Self::ImageView(r)
            | Self::Framebuffer(r)
            | Self::RenderPass(r)
            | Self::ShaderModule(r)
            | Self::PipelineLayout(r)
            | Self::Pipeline(r)
            | Self::CommandPool(r)
            | Self::CommandBuffer(r)
            | Self::Semaphore(r)
            | Self::Fence(r) => r,
        }
    }
}

/// Step of the frame loop that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    FenceWait,
    Acquire,
    Record,
    Submit,
    Present,
    DeviceIdle,
}

impl fmt::Display for FrameStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FenceWait => "fence wait",
            Self::Acquire => "image acquire",
            Self::Record => "command recording",
            Self::Submit => "queue submit",
            Self::Present => "present",
            Self::DeviceIdle => "device idle wait",
        };
        f.write_str(name)
    }
}

/// Failure while driving the frame loop
#[derive(Debug, Error)]
pub enum FrameError {
    /// The swapchain no longer matches the surface. Recreation is not
    /// supported, so this ends the loop.
    #[error("swapchain is out of date ({0})")]
    ChainInvalidated(FrameStep),

    #[error("{step} failed: {result} (VkResult {code})", code = .result.as_raw())]
    Vulkan { step: FrameStep, result: vk::Result },

    #[error("frame loop halted by an earlier error")]
    Faulted,

    #[error("frame loop has been shut down")]
    Stopped,
}

impl FrameError {
    pub(crate) fn vulkan(step: FrameStep) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { step, result }
    }
}

/// Everything that can abort renderer construction
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Resource(#[from] ResourceCreationError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_error_names_operation_and_code() {
        let err = ResourceCreationError::Swapchain(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let message = err.to_string();

        assert!(message.starts_with("failed to create swapchain"));
        assert!(message.contains(&vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.as_raw().to_string()));
        assert_eq!(err.status(), vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    }

    #[test]
    fn frame_error_names_step() {
        let err = FrameError::vulkan(FrameStep::Submit)(vk::Result::ERROR_DEVICE_LOST);
        assert!(err.to_string().starts_with("queue submit failed"));

        let stale = FrameError::ChainInvalidated(FrameStep::Acquire);
        assert_eq!(stale.to_string(), "swapchain is out of date (image acquire)");
    }

    #[test]
    fn messages_carry_native_status_code() {
        let err = ResourceCreationError::Fence(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(err.to_string().ends_with("(VkResult -2)"));

        let err = FrameError::vulkan(FrameStep::Submit)(vk::Result::ERROR_DEVICE_LOST);
        assert!(err.to_string().ends_with("(VkResult -4)"));

        let err = CapabilityError::query("vkEnumeratePhysicalDevices")(
            vk::Result::ERROR_INITIALIZATION_FAILED,
        );
        let message = err.to_string();
        assert!(message.starts_with("vkEnumeratePhysicalDevices failed: "));
        assert!(message.ends_with("(VkResult -3)"));
    }

    #[test]
    fn missing_extensions_are_listed() {
        let err = CapabilityError::MissingInstanceExtensions(vec![
            "VK_KHR_surface".to_string(),
            "VK_KHR_xcb_surface".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "required instance extensions are not available: VK_KHR_surface, VK_KHR_xcb_surface"
        );
    }
}
