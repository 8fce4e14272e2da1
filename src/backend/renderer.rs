// Renderer - composition root for the triangle
//
// INITIALIZATION ORDER:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Instance ─> Surface ─> physical device selection ─> Device     │
// │    └── PresentationChain (swapchain + views)                    │
// │          └── RenderPass ─> Framebuffers ─> Pipeline             │
// │                └── FrameSync (command buffer, semaphores, fence)│
// └─────────────────────────────────────────────────────────────────┘
//
// Every object holds an Arc to what it was created from, so teardown runs in
// reverse dependency order no matter which step fails.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use super::capability::{self, DeviceRequirements};
use super::device::Device;
use super::error::{FrameError, FrameStep, InitError};
use super::frame::{FrameExecutor, FrameTarget};
use super::instance::{Instance, InstanceConfig, Surface};
use super::pipeline::{Pipeline, RenderPass};
use super::shader::ShaderCode;
use super::swapchain::{ChainSettings, PresentationChain};
use super::sync::FrameSync;

/// Everything the renderer needs besides the window and the shaders
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub instance: InstanceConfig,
    pub device: DeviceRequirements,
    pub preferred_present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
}

/// Color output waits for the presentation engine to release the image
pub const WAIT_STAGES: [vk::PipelineStageFlags; 1] =
    [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

/// Arguments of the single non-indexed draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// Three vertices, positions generated in the shader
pub const TRIANGLE_DRAW: DrawCall = DrawCall {
    vertex_count: 3,
    instance_count: 1,
    first_vertex: 0,
    first_instance: 0,
};

pub fn render_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Handles one queue submission refers to
#[derive(Debug, Clone, Copy)]
pub struct FrameSubmission {
    pub wait: [vk::Semaphore; 1],
    pub command_buffers: [vk::CommandBuffer; 1],
    pub signal: [vk::Semaphore; 1],
    pub fence: vk::Fence,
}

impl FrameSubmission {
    /// Wait for the acquired image, signal the present, retire through the fence
    pub fn new(sync: &FrameSync) -> Self {
        Self::from_handles(
            sync.command_buffer,
            sync.image_available,
            sync.render_finished,
            sync.in_flight,
        )
    }

    pub fn from_handles(
        command_buffer: vk::CommandBuffer,
        image_available: vk::Semaphore,
        render_finished: vk::Semaphore,
        in_flight: vk::Fence,
    ) -> Self {
        Self {
            wait: [image_available],
            command_buffers: [command_buffer],
            signal: [render_finished],
            fence: in_flight,
        }
    }

    pub fn info(&self) -> vk::SubmitInfo<'_> {
        vk::SubmitInfo::default()
            .wait_semaphores(&self.wait)
            .wait_dst_stage_mask(&WAIT_STAGES)
            .command_buffers(&self.command_buffers)
            .signal_semaphores(&self.signal)
    }
}

/// The Vulkan side of one frame: records into the single command buffer and
/// drives the presentation chain.
///
/// Field order is drop order.
pub struct SwapchainFrames {
    sync: FrameSync,
    pipeline: Pipeline,
    chain: PresentationChain,
    render_pass: Arc<RenderPass>,
    device: Arc<Device>,
    clear_color: [f32; 4],
}

impl SwapchainFrames {
    fn record_commands(&self, framebuffer: vk::Framebuffer) -> Result<(), vk::Result> {
        let device = &self.device.device;
        let cmd = self.sync.command_buffer;
        let extent = self.chain.extent;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        let render_area = render_area(extent);

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;

            let pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass.render_pass)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            let draw = TRIANGLE_DRAW;
            device.cmd_draw(
                cmd,
                draw.vertex_count,
                draw.instance_count,
                draw.first_vertex,
                draw.first_instance,
            );

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }
}

impl FrameTarget for SwapchainFrames {
    fn wait_for_previous_frame(&mut self) -> Result<(), FrameError> {
        self.sync.wait_and_reset()
    }

    fn acquire_image(&mut self) -> Result<u32, FrameError> {
        self.chain.acquire_next_image(self.sync.image_available)
    }

    fn record(&mut self, image_index: u32) -> Result<(), FrameError> {
        let framebuffer = self.chain.framebuffer(image_index)?;

        self.record_commands(framebuffer)
            .map_err(FrameError::vulkan(FrameStep::Record))
    }

    fn submit(&mut self) -> Result<(), FrameError> {
        let submission = FrameSubmission::new(&self.sync);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submission.info()],
                submission.fence,
            )
        }
        .map_err(FrameError::vulkan(FrameStep::Submit))
    }

    fn present(&mut self, image_index: u32) -> Result<(), FrameError> {
        self.chain
            .present(self.device.present_queue, image_index, self.sync.render_finished)
    }

    fn wait_idle(&mut self) -> Result<(), FrameError> {
        self.device
            .wait_idle()
            .map_err(FrameError::vulkan(FrameStep::DeviceIdle))
    }
}

/// Owns the whole GPU object graph and the frame loop
pub struct Renderer {
    executor: FrameExecutor<SwapchainFrames>,
}

impl Renderer {
    /// Build every GPU object needed to draw into `window`.
    ///
    /// `size` is the window's inner size in pixels; it is only used when the
    /// surface lets the swapchain pick its own extent.
    pub fn new<W>(
        window: &W,
        size: vk::Extent2D,
        config: &RendererConfig,
        vertex: &ShaderCode,
        fragment: &ShaderCode,
    ) -> Result<Self, InitError>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        let instance = Instance::new(&config.instance, display)?;
        let surface = Surface::new(instance.clone(), display, window_handle)?;

        let capabilities = capability::select_device(&instance, &surface, &config.device)?;
        let device = Device::new(instance, &capabilities, &config.device)?;

        let settings =
            ChainSettings::resolve(&capabilities, size, config.preferred_present_mode)?;
        let mut chain = PresentationChain::new(device.clone(), surface, &settings)?;

        let render_pass = RenderPass::new(&device, chain.format)?;
        chain.create_framebuffers(render_pass.clone())?;

        let pipeline = Pipeline::new(&device, &render_pass, vertex, fragment)?;
        let sync = FrameSync::new(&device)?;

        log::info!(
            "Renderer ready: {}x{} {:?}",
            chain.extent.width,
            chain.extent.height,
            chain.format
        );

        let frames = SwapchainFrames {
            sync,
            pipeline,
            chain,
            render_pass,
            device,
            clear_color: config.clear_color,
        };

        Ok(Self {
            executor: FrameExecutor::new(frames),
        })
    }

    pub fn draw_frame(&mut self) -> Result<(), FrameError> {
        self.executor.draw_frame()
    }

    /// Block until the GPU is idle; resources are released on drop
    pub fn shutdown(&mut self) -> Result<(), FrameError> {
        self.executor.shutdown()?;
        log::info!("Renderer stopped after {} frames", self.executor.frames_presented());
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU could still use it
        if let Err(e) = self.executor.shutdown() {
            log::error!("Device idle wait failed during teardown: {}", e);
        }
    }
}
