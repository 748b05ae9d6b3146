// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.
// Viewport and scissor are dynamic, so a pipeline outlives swapchain rebuilds.

use super::error::{RenderError, RenderResult, VkResultExt};
use super::geometry::Vertex;
use super::shader::{self, ShaderPair};
use super::VulkanDevice;
use ash::vk;

const SHADER_ENTRY: &std::ffi::CStr = c"main";

/// Create a render pass with one color attachment and an optional depth attachment
pub fn create_render_pass(
    device: &VulkanDevice,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
) -> RenderResult<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_attachment_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let mut attachments = vec![color_attachment];
    let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;

    if let Some(depth_format) = depth_format {
        // Depth is cleared every frame and never read back
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );
        stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }

    let color_attachments = [color_attachment_ref];
    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments);
    if depth_format.is_some() {
        subpass = subpass.depth_stencil_attachment(&depth_attachment_ref);
    }

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(access)
        .build();

    let subpasses = [subpass.build()];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .vk_context("Failed to create render pass")
}

/// Fixed-function rasterizer settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterState {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub depth_bias: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            depth_bias: false,
        }
    }
}

/// Depth test settings, used only when the render pass has a depth attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare_op: vk::CompareOp,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            compare_op: vk::CompareOp::LESS,
        }
    }
}

/// Pipeline and the layout it was created with
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Describes one graphics pipeline; `build` compiles it
pub struct PipelineBuilder<'a> {
    shaders: &'a ShaderPair,
    render_pass: vk::RenderPass,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    depth: Option<DepthState>,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(shaders: &'a ShaderPair, render_pass: vk::RenderPass) -> Self {
        Self {
            shaders,
            render_pass,
            set_layouts: Vec::new(),
            depth: None,
        }
    }

    pub fn descriptor_set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.set_layouts.push(layout);
        self
    }

    /// Enable depth testing; the render pass must carry a depth attachment
    pub fn depth(mut self, depth: DepthState) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn build(self, device: &VulkanDevice) -> RenderResult<GraphicsPipeline> {
        let vert_module = shader::create_shader_module(device, &self.shaders.vertex)?;
        let frag_module = match shader::create_shader_module(device, &self.shaders.fragment) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let result = self.build_with_modules(device, vert_module, frag_module);

        // Modules are only needed while the pipeline is compiled
        unsafe {
            device.device.destroy_shader_module(frag_module, None);
            device.device.destroy_shader_module(vert_module, None);
        }

        result
    }

    fn build_with_modules(
        &self,
        device: &VulkanDevice,
        vert_module: vk::ShaderModule,
        frag_module: vk::ShaderModule,
    ) -> RenderResult<GraphicsPipeline> {
        // Shader stages
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(SHADER_ENTRY)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(SHADER_ENTRY)
                .build(),
        ];

        // Vertex input
        let bindings = [Vertex::binding()];
        let attributes = Vertex::attributes();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        // Input assembly
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set per frame
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // Rasterization
        let raster = RasterState::default();
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(raster.polygon_mode)
            .line_width(raster.line_width)
            .cull_mode(raster.cull_mode)
            .front_face(raster.front_face)
            .depth_bias_enable(raster.depth_bias);

        // Multisampling (disabled)
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth = self.depth.unwrap_or(DepthState {
            test: false,
            write: false,
            compare_op: vk::CompareOp::ALWAYS,
        });
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(depth.test)
            .depth_write_enable(depth.write)
            .depth_compare_op(depth.compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // Color blending (no blending, opaque)
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        // Pipeline layout
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&self.set_layouts);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .vk_context("Failed to create pipeline layout")?;

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(self.render_pass)
            .subpass(0);
        if self.depth.is_some() {
            pipeline_info = pipeline_info.depth_stencil_state(&depth_stencil);
        }

        let created = unsafe {
            device.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info.build()],
                None,
            )
        };

        match created {
            Ok(pipelines) => Ok(GraphicsPipeline {
                pipeline: pipelines[0],
                layout,
            }),
            Err((_, result)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                Err(RenderError::Vulkan {
                    context: "Failed to create graphics pipeline",
                    result,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_defaults_cull_back_faces_wound_clockwise() {
        let raster = RasterState::default();
        assert_eq!(raster.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(raster.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(raster.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(raster.line_width, 1.0);
        assert!(!raster.depth_bias);
    }

    #[test]
    fn depth_defaults_to_less_with_writes() {
        let depth = DepthState::default();
        assert!(depth.test);
        assert!(depth.write);
        assert_eq!(depth.compare_op, vk::CompareOp::LESS);
    }

    #[test]
    fn builder_starts_without_depth() {
        let shaders = ShaderPair {
            vertex: Vec::new(),
            fragment: Vec::new(),
        };
        let builder = PipelineBuilder::new(&shaders, vk::RenderPass::null());
        assert!(builder.depth.is_none());
        assert!(builder.set_layouts.is_empty());

        let builder = builder.depth(DepthState::default());
        assert_eq!(builder.depth, Some(DepthState::default()));
    }
}
