// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// This renderer has exactly one: a triangle whose vertices are generated in
// the vertex shader, drawn into a single color attachment.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::error::ResourceCreationError;
use super::shader::{ShaderCode, ShaderModule};

const SHADER_ENTRY_POINT: &std::ffi::CStr = c"main";

/// Viewport and scissor are set while recording, not baked in
pub const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// The swapchain image: cleared on load, kept for presentation
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

/// Color writes wait until the presentation engine is done reading the image
pub fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
}

pub fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false)
}

/// Opaque output, no blending
pub fn color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
}

/// Render pass with one color attachment and one subpass
pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    device: Arc<Device>,
}

impl RenderPass {
    pub fn new(device: &Arc<Device>, format: vk::Format) -> Result<Arc<Self>, ResourceCreationError> {
        let attachments = [color_attachment(format)];

        let color_attachment_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs)];

        let dependencies = [external_dependency()];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .map_err(ResourceCreationError::RenderPass)?;

        Ok(Arc::new(Self {
            render_pass,
            device: device.clone(),
        }))
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Immutable graphics pipeline and its (empty) layout
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<Device>,
}

impl Pipeline {
    /// Build the triangle pipeline for subpass 0 of `render_pass`
    pub fn new(
        device: &Arc<Device>,
        render_pass: &RenderPass,
        vertex: &ShaderCode,
        fragment: &ShaderCode,
    ) -> Result<Self, ResourceCreationError> {
        // Dropped at the end of this function, on success or failure
        let vert_module = ShaderModule::new(device, vertex)?;
        let frag_module = ShaderModule::new(device, fragment)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module.module)
                .name(SHADER_ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module.module)
                .name(SHADER_ENTRY_POINT),
        ];

        // No vertex buffers: positions come from gl_VertexIndex
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let rasterizer = rasterization_state();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments)
            .blend_constants([0.0; 4]);

        // No descriptor sets, no push constants
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(ResourceCreationError::PipelineLayout)?;

        let mut this = Self {
            pipeline: vk::Pipeline::null(),
            layout,
            device: device.clone(),
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(this.layout)
            .render_pass(render_pass.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| ResourceCreationError::Pipeline(e))?;

        this.pipeline = pipelines
            .into_iter()
            .next()
            .ok_or(ResourceCreationError::Pipeline(vk::Result::ERROR_UNKNOWN))?;

        log::info!("Created triangle pipeline");
        Ok(this)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.device.destroy_pipeline(self.pipeline, None);
            }
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_attachment_clears_and_presents() {
        let attachment = color_attachment(vk::Format::B8G8R8A8_SRGB);

        assert_eq!(attachment.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn external_dependency_orders_color_writes() {
        let dependency = external_dependency();

        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dependency.dst_subpass, 0);
        assert_eq!(dependency.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dependency.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dependency.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert!(dependency.src_access_mask.is_empty());
    }

    #[test]
    fn rasterizer_fills_and_culls_back_faces_clockwise() {
        let rasterizer = rasterization_state();

        assert_eq!(rasterizer.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(rasterizer.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(rasterizer.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(rasterizer.line_width, 1.0);
        assert_eq!(rasterizer.rasterizer_discard_enable, vk::FALSE);
    }

    #[test]
    fn blending_disabled_with_full_write_mask() {
        let blend = color_blend_attachment();

        assert_eq!(blend.blend_enable, vk::FALSE);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn viewport_and_scissor_are_dynamic() {
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::VIEWPORT));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::SCISSOR));
    }
}
