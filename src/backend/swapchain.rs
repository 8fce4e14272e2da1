// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// plus one image view and one framebuffer per image.
//
// Selection (format, present mode, extent, image count, sharing) is pure and
// lives in `ChainSettings::resolve`; `PresentationChain` only creates handles.

use ash::vk;
use std::sync::Arc;

use super::capability::{DeviceCapabilities, Unsuitable};
use super::device::Device;
use super::error::{CapabilityError, FrameError, FrameStep, ResourceCreationError};
use super::instance::Surface;
use super::pipeline::RenderPass;

/// Surfaces report this current extent when the swapchain decides the size
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Choose surface format (prefer 8-bit BGRA with sRGB transfer)
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
}

/// Choose present mode; FIFO is always supported
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's extent unless it leaves the choice to us
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != UNDEFINED_EXTENT {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: clamp_dimension(
            desired.width,
            caps.min_image_extent.width,
            caps.max_image_extent.width,
        ),
        height: clamp_dimension(
            desired.height,
            caps.min_image_extent.height,
            caps.max_image_extent.height,
        ),
    }
}

// Unlike u32::clamp, tolerates a driver reporting min > max (max wins)
fn clamp_dimension(value: u32, min: u32, max: u32) -> u32 {
    value.max(min).min(max)
}

/// One more than the minimum; a zero maximum means unbounded
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count.saturating_add(1);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Framebuffer for an acquired image. An index past the end means the chain
/// no longer matches what was acquired.
pub fn framebuffer_at(
    framebuffers: &[vk::Framebuffer],
    image_index: u32,
) -> Result<vk::Framebuffer, FrameError> {
    framebuffers
        .get(image_index as usize)
        .copied()
        .ok_or(FrameError::ChainInvalidated(FrameStep::Record))
}

/// How swapchain images are shared between queue families
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSharing {
    pub mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
}

impl ImageSharing {
    /// Distinct families share the images concurrently; a single family owns
    /// them exclusively and no ownership transfer is ever needed.
    pub fn for_families(graphics: u32, present: u32) -> Self {
        if graphics == present {
            Self {
                mode: vk::SharingMode::EXCLUSIVE,
                queue_family_indices: Vec::new(),
            }
        } else {
            Self {
                mode: vk::SharingMode::CONCURRENT,
                queue_family_indices: vec![graphics, present],
            }
        }
    }
}

/// Fully resolved swapchain parameters
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing: ImageSharing,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl ChainSettings {
    pub fn resolve(
        capabilities: &DeviceCapabilities,
        desired_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self, CapabilityError> {
        let caps = &capabilities.surface_capabilities;

        let surface_format = choose_surface_format(&capabilities.formats)
            .ok_or(CapabilityError::Unsuitable(Unsuitable::NoSurfaceFormats))?;
        let graphics = capabilities
            .queue_families
            .graphics
            .ok_or(CapabilityError::IncompleteQueueFamilies("graphics"))?;
        let present = capabilities
            .queue_families
            .present
            .ok_or(CapabilityError::IncompleteQueueFamilies("present"))?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&capabilities.present_modes, preferred_present_mode),
            extent: choose_extent(caps, desired_extent),
            image_count: choose_image_count(caps),
            sharing: ImageSharing::for_families(graphics, present),
            pre_transform: caps.current_transform,
        })
    }
}

pub struct PresentationChain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    // Framebuffers are bound to this pass, so it must outlive them
    _render_pass: Option<Arc<RenderPass>>,
    device: Arc<Device>,
    _surface: Arc<Surface>,
}

impl PresentationChain {
    /// Create the swapchain and one view per image
    pub fn new(
        device: Arc<Device>,
        surface: Arc<Surface>,
        settings: &ChainSettings,
    ) -> Result<Self, ResourceCreationError> {
        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images requested",
            settings.extent.width,
            settings.extent.height,
            settings.surface_format.format,
            settings.present_mode,
            settings.image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(settings.image_count)
            .image_format(settings.surface_format.format)
            .image_color_space(settings.surface_format.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(settings.sharing.mode)
            .queue_family_indices(&settings.sharing.queue_family_indices)
            .pre_transform(settings.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(settings.present_mode)
            .clipped(true);

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(ResourceCreationError::Swapchain)?;

        // From here on, an early return drops `chain` and releases what exists
        let mut chain = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: settings.surface_format.format,
            extent: settings.extent,
            _render_pass: None,
            device,
            _surface: surface,
        };

        chain.images = unsafe { chain.device.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(ResourceCreationError::Swapchain)?;
        log::info!("Created swapchain with {} images", chain.images.len());

        chain.create_views()?;
        Ok(chain)
    }

    fn create_views(&mut self) -> Result<(), ResourceCreationError> {
        self.image_views.reserve(self.images.len());

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { self.device.device.create_image_view(&create_info, None) }
                .map_err(ResourceCreationError::ImageView)?;
            self.image_views.push(view);
        }

        Ok(())
    }

    /// Create one framebuffer per image view, bound to `render_pass`
    pub fn create_framebuffers(
        &mut self,
        render_pass: Arc<RenderPass>,
    ) -> Result<(), ResourceCreationError> {
        self.framebuffers.reserve(self.image_views.len());
        self._render_pass = Some(render_pass.clone());

        for &view in &self.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
                .map_err(ResourceCreationError::Framebuffer)?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer, FrameError> {
        framebuffer_at(&self.framebuffers, image_index)
    }

    /// Acquire next image; `signal` is signaled once the image is usable
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<u32, FrameError> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::trace!("Swapchain is suboptimal for the surface");
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(FrameError::ChainInvalidated(FrameStep::Acquire))
            }
            Err(e) => Err(FrameError::vulkan(FrameStep::Acquire)(e)),
        }
    }

    /// Present rendered image to screen once `wait` is signaled
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<(), FrameError> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.device.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => {
                if suboptimal {
                    log::trace!("Presented to a suboptimal swapchain");
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(FrameError::ChainInvalidated(FrameStep::Present))
            }
            Err(e) => Err(FrameError::vulkan(FrameStep::Present)(e)),
        }
    }
}

impl Drop for PresentationChain {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            // Images belong to the swapchain
            self.device.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
