// Renderer - owns every GPU object and drives the frame loop
//
// Creation order:
//   device -> render pass -> swapchain -> descriptor set layout -> pipeline
//   -> command pool -> texture -> vertex/index buffers -> frame slots
//   -> descriptor pool + sets
// Teardown runs the same list backwards after the device is idle. Vulkan
// accepts null handles in every destroy call, so a half-built renderer tears
// down with the same code.

use super::buffer::{self, GpuBuffer};
use super::descriptor::{self, UniformBlock};
use super::error::{RenderError, RenderResult, VkResultExt};
use super::frame::{FrameBackend, FrameLoop, FrameStatus, Submission, FRAMES_IN_FLIGHT};
use super::geometry::MeshData;
use super::pipeline::{self, DepthState, GraphicsPipeline, PipelineBuilder};
use super::shader::ShaderPair;
use super::surface::PresentationTarget;
use super::swapchain::{self, Swapchain, SwapchainFactory};
use super::sync::FrameSlot;
use super::upload::{self, Texture};
use super::VulkanDevice;
use crate::assets::{AssetArchive, TextureAsset};
use crate::timer::Timer;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

/// Device-level settings
#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub app_name: String,
    pub enable_validation: bool,
    pub clear_color: [f32; 4],
}

/// Everything drawn: shaders, the one texture, the one mesh
#[derive(Debug, Clone)]
pub struct Scene {
    pub shaders: ShaderPair,
    pub texture: TextureAsset,
    pub mesh: MeshData,
}

impl Scene {
    /// Resolve texture and model names against an archive
    ///
    /// No texture name means a plain white texture; no model name means the
    /// built-in quads.
    pub fn from_archive(
        archive: &AssetArchive,
        texture: Option<&str>,
        model: Option<&str>,
        shaders: ShaderPair,
    ) -> RenderResult<Self> {
        let texture = match texture {
            Some(name) => archive
                .texture(name)
                .cloned()
                .ok_or_else(|| RenderError::TextureNotFound(name.to_string()))?,
            None => Self::white_texture(),
        };

        let mesh = match model {
            Some(name) => {
                let model = archive
                    .model(name)
                    .ok_or_else(|| RenderError::ModelNotFound(name.to_string()))?;
                MeshData::from_model(model)?
            }
            None => MeshData::quads(),
        };

        Ok(Self {
            shaders,
            texture,
            mesh,
        })
    }

    pub fn white_texture() -> TextureAsset {
        TextureAsset {
            name: "white".into(),
            width: 1,
            height: 1,
            channels: 4,
            mip_levels: 1,
            pixels: vec![255; 4],
        }
    }
}

pub struct Renderer {
    frames: FrameLoop,
    gpu: GpuState,
    timer: Timer,
}

impl Renderer {
    pub fn new(
        target: Arc<dyn PresentationTarget>,
        settings: &RendererSettings,
        scene: &Scene,
    ) -> RenderResult<Self> {
        log::info!("Initializing renderer...");

        let device = VulkanDevice::new(&settings.app_name, target.as_ref(), settings.enable_validation)?;
        let mut gpu = GpuState::new(device, target, settings.clear_color);

        if let Err(e) = gpu.init(scene) {
            log::error!("Renderer initialization failed: {}", e);
            settle(gpu.device.wait_idle());
            gpu.destroy();
            return Err(e);
        }

        let slots = std::mem::take(&mut gpu.slots);
        log::info!("Renderer initialized");

        Ok(Self {
            frames: FrameLoop::new(slots),
            gpu,
            timer: Timer::start(),
        })
    }

    pub fn draw_frame(&mut self) -> RenderResult<FrameStatus> {
        let elapsed = self.timer.elapsed_secs();
        self.frames.draw_frame(&mut self.gpu, elapsed)
    }

    /// The window changed size; the swapchain is rebuilt after the next present
    pub fn request_resize(&mut self) {
        self.frames.request_resize();
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.gpu.swapchain.extent
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames.frames_submitted()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up renderer...");

        // Nothing may be destroyed while the GPU still uses it
        settle(self.gpu.device.wait_idle());

        self.gpu.slots = self.frames.take_slots();
        self.gpu.destroy();

        log::info!("Cleanup complete");
    }
}

/// Log a failed idle wait; teardown goes ahead either way
fn settle(idle: RenderResult<()>) -> bool {
    match idle {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to wait for device idle: {}", e);
            false
        }
    }
}

// =============================================================================
// GPU STATE
// =============================================================================

struct GpuState {
    device: Arc<VulkanDevice>,
    target: Arc<dyn PresentationTarget>,
    clear_color: [f32; 4],

    render_pass: vk::RenderPass,
    swapchain: Swapchain,
    set_layout: vk::DescriptorSetLayout,
    pipeline: GraphicsPipeline,
    command_pool: vk::CommandPool,
    texture: Texture,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    /// Held here only while building and tearing down
    slots: Vec<FrameSlot>,
    descriptor_pool: vk::DescriptorPool,
}

impl GpuState {
    fn new(device: Arc<VulkanDevice>, target: Arc<dyn PresentationTarget>, clear_color: [f32; 4]) -> Self {
        Self {
            device,
            target,
            clear_color,
            render_pass: vk::RenderPass::null(),
            swapchain: Swapchain::default(),
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline: GraphicsPipeline::default(),
            command_pool: vk::CommandPool::null(),
            texture: Texture::default(),
            vertex_buffer: GpuBuffer::default(),
            index_buffer: GpuBuffer::default(),
            index_count: 0,
            slots: Vec::new(),
            descriptor_pool: vk::DescriptorPool::null(),
        }
    }

    fn init(&mut self, scene: &Scene) -> RenderResult<()> {
        let device = Arc::clone(&self.device);

        // ─────────────────────────────────────────────────────────────────────
        // Render pass + swapchain
        // ─────────────────────────────────────────────────────────────────────
        let surface_format = swapchain::query_surface_format(&device)?;
        let depth_format = swapchain::find_depth_format(&device)?;
        self.render_pass =
            pipeline::create_render_pass(&device, surface_format.format, Some(depth_format))?;

        let mut factory = SwapchainFactory::new(&device, self.render_pass, self.target.drawable_size());
        self.swapchain = Swapchain::create(&mut factory)?;

        // ─────────────────────────────────────────────────────────────────────
        // Pipeline
        // ─────────────────────────────────────────────────────────────────────
        self.set_layout = descriptor::create_set_layout(&device)?;
        self.pipeline = PipelineBuilder::new(&scene.shaders, self.render_pass)
            .descriptor_set_layout(self.set_layout)
            .depth(DepthState::default())
            .build(&device)?;

        // ─────────────────────────────────────────────────────────────────────
        // Uploads
        // ─────────────────────────────────────────────────────────────────────
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        self.command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .vk_context("Failed to create command pool")?;

        self.texture = upload::upload_texture(&device, self.command_pool, &scene.texture)?;
        self.vertex_buffer = upload::upload_buffer(
            &device,
            self.command_pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &scene.mesh.vertices,
        )?;
        self.index_buffer = upload::upload_buffer(
            &device,
            self.command_pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &scene.mesh.indices,
        )?;
        self.index_count = scene.mesh.indices.len() as u32;

        // ─────────────────────────────────────────────────────────────────────
        // Frames in flight + their descriptor sets
        // ─────────────────────────────────────────────────────────────────────
        for _ in 0..FRAMES_IN_FLIGHT {
            let slot = FrameSlot::new(&device, self.command_pool)?;
            self.slots.push(slot);
        }

        self.descriptor_pool = descriptor::create_pool(&device, FRAMES_IN_FLIGHT as u32)?;
        let uniform_buffers: Vec<_> = self.slots.iter().map(|s| s.uniform.buffer).collect();
        let sets = descriptor::allocate_sets(
            &device,
            self.descriptor_pool,
            self.set_layout,
            &uniform_buffers,
            (self.texture.view, self.texture.sampler),
        )?;
        for (slot, set) in self.slots.iter_mut().zip(sets) {
            slot.descriptor_set = set;
        }

        Ok(())
    }

    /// Reverse of `init`; the device itself goes when the last Arc drops
    fn destroy(&mut self) {
        let device = &self.device.device;

        unsafe { device.destroy_descriptor_pool(self.descriptor_pool, None) };
        for slot in self.slots.drain(..) {
            slot.destroy(device, self.command_pool);
        }

        self.index_buffer.destroy(device);
        self.vertex_buffer.destroy(device);
        self.texture.destroy(device);
        unsafe { device.destroy_command_pool(self.command_pool, None) };

        self.pipeline.destroy(device);
        unsafe { device.destroy_descriptor_set_layout(self.set_layout, None) };

        let mut factory = SwapchainFactory::new(&self.device, self.render_pass, (0, 0));
        self.swapchain.cleanup(&mut factory);
        unsafe { device.destroy_render_pass(self.render_pass, None) };

        self.descriptor_pool = vk::DescriptorPool::null();
        self.command_pool = vk::CommandPool::null();
        self.set_layout = vk::DescriptorSetLayout::null();
        self.render_pass = vk::RenderPass::null();
        self.pipeline = GraphicsPipeline::default();
        self.texture = Texture::default();
        self.vertex_buffer = GpuBuffer::default();
        self.index_buffer = GpuBuffer::default();
    }
}

impl FrameBackend for GpuState {
    fn wait_for_fence(&mut self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX) }
            .vk_context("Failed to wait for in-flight fence")
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.device.device.reset_fences(&[fence]) }.vk_context("Failed to reset fence")
    }

    fn reset_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        unsafe {
            self.device
                .device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .vk_context("Failed to reset command buffer")
    }

    fn record_commands(&mut self, slot: &FrameSlot, image_index: u32) -> RenderResult<()> {
        let device = &self.device.device;
        let cmd = slot.command_buffer;
        let extent = self.swapchain.extent;

        let framebuffer = *self
            .swapchain
            .framebuffers
            .get(image_index as usize)
            .ok_or(RenderError::Vulkan {
                context: "Acquired image has no framebuffer",
                result: vk::Result::ERROR_UNKNOWN,
            })?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let begin_info = vk::CommandBufferBeginInfo::builder();
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .vk_context("Failed to begin command buffer")?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT16);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[slot.descriptor_set],
                &[],
            );
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .vk_context("Failed to record command buffer")?;
        }

        Ok(())
    }

    fn write_uniforms(&mut self, uniform: &GpuBuffer, block: &UniformBlock) -> RenderResult<()> {
        buffer::write_mapped(&self.device, uniform, bytemuck::bytes_of(block))
    }

    fn submit(&mut self, submission: &Submission) -> RenderResult<()> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal_semaphore];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                submission.fence,
            )
        }
        .vk_context("Failed to submit draw command buffer")
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present_queue, &present_info)
        }
    }

    fn surface_extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        let drawable = self.target.drawable_size();
        log::info!("Recreating swapchain for {}x{}", drawable.0, drawable.1);

        let mut factory = SwapchainFactory::new(&self.device, self.render_pass, drawable);
        self.swapchain.recreate(&mut factory)
    }

    fn renew_semaphore(&mut self, old: vk::Semaphore) -> RenderResult<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe {
            self.device.device.destroy_semaphore(old, None);
            self.device
                .device
                .create_semaphore(&semaphore_info, None)
                .vk_context("Failed to create semaphore")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{ArchiveVersion, MeshAsset, ModelAsset};

    fn shaders() -> ShaderPair {
        ShaderPair {
            vertex: vec![0; 4],
            fragment: vec![0; 4],
        }
    }

    fn archive() -> AssetArchive {
        let mut archive = AssetArchive::new(ArchiveVersion::Mipmapped);
        archive.textures.push(TextureAsset {
            name: "tex0".into(),
            width: 1,
            height: 1,
            channels: 4,
            mip_levels: 1,
            pixels: vec![1, 2, 3, 4],
        });
        archive.models.push(ModelAsset {
            name: "tri".into(),
            is_static: true,
            meshes: vec![MeshAsset {
                name: "tri_0".into(),
                vertices: vec![0.0; 24],
                indices: vec![0, 1, 2],
            }],
        });
        archive
    }

    #[test]
    fn scene_resolves_names_from_archive() {
        let scene = Scene::from_archive(&archive(), Some("tex0"), Some("tri"), shaders()).unwrap();
        assert_eq!(scene.texture.pixels, vec![1, 2, 3, 4]);
        assert_eq!(scene.mesh.vertices.len(), 3);
    }

    #[test]
    fn scene_defaults_to_white_texture_and_quads() {
        let scene = Scene::from_archive(&archive(), None, None, shaders()).unwrap();
        assert_eq!(scene.texture, Scene::white_texture());
        assert_eq!(scene.mesh, MeshData::quads());
    }

    #[test]
    fn missing_assets_are_fatal() {
        let err = Scene::from_archive(&archive(), Some("missing"), None, shaders()).unwrap_err();
        assert!(matches!(err, RenderError::TextureNotFound(ref n) if n == "missing"));
        assert!(err.is_fatal());

        let err = Scene::from_archive(&archive(), None, Some("missing"), shaders()).unwrap_err();
        assert!(matches!(err, RenderError::ModelNotFound(_)));
    }

    #[test]
    fn failed_idle_wait_does_not_stop_teardown() {
        assert!(settle(Ok(())));

        let lost = Err(RenderError::Vulkan {
            context: "Failed to wait for device idle",
            result: vk::Result::ERROR_DEVICE_LOST,
        });
        assert!(!settle(lost));
    }
}
