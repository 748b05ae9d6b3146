// Swapchain - Window presentation
//
// Owns the presentable images plus everything sized to them: one view and one
// framebuffer per image and a single depth buffer shared by every framebuffer.
// All of it is built together and torn down together; rebuilding never touches
// the device, the render pass or the pipeline.

use super::buffer::{self, ImageDesc};
use super::capability::{self, ImageSharing};
use super::error::{RenderError, RenderResult, VkResultExt};
use super::VulkanDevice;
use ash::vk;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Depth image, its memory and its view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthResources {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

/// What the presentation engine handed back for a new swapchain
#[derive(Debug, Clone)]
pub struct ChainInfo {
    pub handle: vk::SwapchainKHR,
    /// Authoritative image list; may be longer than requested
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Object creation and destruction used by `Swapchain`
pub trait SwapchainBackend {
    fn create_chain(&mut self) -> RenderResult<ChainInfo>;
    fn create_image_view(&mut self, image: vk::Image, format: vk::Format) -> RenderResult<vk::ImageView>;
    fn create_depth(&mut self, extent: vk::Extent2D) -> RenderResult<DepthResources>;
    fn create_framebuffer(
        &mut self,
        color: vk::ImageView,
        depth: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer>;

    fn destroy_depth_view(&mut self, view: vk::ImageView);
    fn destroy_depth_image(&mut self, image: vk::Image);
    fn free_depth_memory(&mut self, memory: vk::DeviceMemory);
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);
    fn destroy_image_view(&mut self, view: vk::ImageView);
    fn destroy_chain(&mut self, handle: vk::SwapchainKHR);

    /// Drain all GPU work on the device
    fn wait_idle(&mut self) -> RenderResult<()>;
}

#[derive(Debug, Default)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub depth: Option<DepthResources>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Build the chain, views, depth buffer and framebuffers
    ///
    /// On failure everything created so far is destroyed again.
    pub fn create(backend: &mut impl SwapchainBackend) -> RenderResult<Self> {
        let chain = backend.create_chain()?;

        let mut swapchain = Self {
            handle: chain.handle,
            images: chain.images,
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            depth: None,
            format: chain.format,
            extent: chain.extent,
        };

        if let Err(e) = swapchain.build_attachments(backend) {
            swapchain.cleanup(backend);
            return Err(e);
        }

        log::info!(
            "Created swapchain: {} images, {}x{}, {:?}",
            swapchain.images.len(),
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format
        );

        Ok(swapchain)
    }

    fn build_attachments(&mut self, backend: &mut impl SwapchainBackend) -> RenderResult<()> {
        for &image in &self.images {
            let view = backend.create_image_view(image, self.format)?;
            self.image_views.push(view);
        }

        let depth = backend.create_depth(self.extent)?;
        self.depth = Some(depth);

        for &view in &self.image_views {
            let framebuffer = backend.create_framebuffer(view, depth.view, self.extent)?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    /// Destroy depth view, depth image, depth memory, framebuffers, views and
    /// finally the swapchain. The images belong to the presentation engine.
    pub fn cleanup(&mut self, backend: &mut impl SwapchainBackend) {
        if let Some(depth) = self.depth.take() {
            backend.destroy_depth_view(depth.view);
            backend.destroy_depth_image(depth.image);
            backend.free_depth_memory(depth.memory);
        }

        for framebuffer in self.framebuffers.drain(..) {
            backend.destroy_framebuffer(framebuffer);
        }

        for view in self.image_views.drain(..) {
            backend.destroy_image_view(view);
        }

        if self.handle != vk::SwapchainKHR::null() {
            backend.destroy_chain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }

        self.images.clear();
    }

    /// Wait for the device to go idle, tear everything down and build it again
    pub fn recreate(&mut self, backend: &mut impl SwapchainBackend) -> RenderResult<()> {
        backend.wait_idle()?;
        self.cleanup(backend);
        *self = Self::create(backend)?;
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// One view and one framebuffer per image, and a depth buffer
    pub fn is_complete(&self) -> bool {
        self.image_views.len() == self.images.len()
            && self.framebuffers.len() == self.images.len()
            && self.depth.is_some()
    }
}

/// Surface format the swapchain will use, needed before the render pass exists
pub fn query_surface_format(device: &VulkanDevice) -> RenderResult<vk::SurfaceFormatKHR> {
    let support = capability::query_swapchain_support(
        &device.surface_loader,
        device.physical_device,
        device.surface,
    )?;

    capability::choose_surface_format(&support.formats).ok_or(RenderError::UnsupportedFormat(Vec::new()))
}

/// First depth format usable as an optimally tiled depth attachment
pub fn find_depth_format(device: &VulkanDevice) -> RenderResult<vk::Format> {
    capability::find_supported_format(
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |format| unsafe {
            device
                .instance
                .get_physical_device_format_properties(device.physical_device, format)
        },
    )
    .ok_or_else(|| RenderError::UnsupportedFormat(DEPTH_FORMAT_CANDIDATES.to_vec()))
}

/// Vulkan implementation of `SwapchainBackend`
///
/// Built for one create or recreate, with the drawable size at that moment.
pub struct SwapchainFactory<'a> {
    device: &'a VulkanDevice,
    render_pass: vk::RenderPass,
    drawable: (u32, u32),
}

impl<'a> SwapchainFactory<'a> {
    pub fn new(device: &'a VulkanDevice, render_pass: vk::RenderPass, drawable: (u32, u32)) -> Self {
        Self {
            device,
            render_pass,
            drawable,
        }
    }
}

impl SwapchainBackend for SwapchainFactory<'_> {
    fn create_chain(&mut self) -> RenderResult<ChainInfo> {
        let device = self.device;
        let support = capability::query_swapchain_support(
            &device.surface_loader,
            device.physical_device,
            device.surface,
        )?;

        let surface_format = capability::choose_surface_format(&support.formats)
            .ok_or(RenderError::UnsupportedFormat(Vec::new()))?;
        let present_mode = capability::choose_present_mode(&support.present_modes);
        let extent = capability::choose_extent(&support.capabilities, self.drawable);
        let image_count = capability::choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, requesting {} images",
            extent.width,
            extent.height,
            present_mode,
            image_count
        );

        let queue_family_indices;
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        match capability::image_sharing(device.queue_families) {
            ImageSharing::Exclusive => {
                create_info = create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
            }
            ImageSharing::Concurrent(families) => {
                queue_family_indices = families;
                create_info = create_info
                    .image_sharing_mode(vk::SharingMode::CONCURRENT)
                    .queue_family_indices(&queue_family_indices);
            }
        }

        let handle = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .vk_context("Failed to create swapchain")?;

        let images = match unsafe { device.swapchain_loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(result) => {
                unsafe { device.swapchain_loader.destroy_swapchain(handle, None) };
                return Err(RenderError::Vulkan {
                    context: "Failed to get swapchain images",
                    result,
                });
            }
        };

        Ok(ChainInfo {
            handle,
            images,
            format: surface_format.format,
            extent,
        })
    }

    fn create_image_view(&mut self, image: vk::Image, format: vk::Format) -> RenderResult<vk::ImageView> {
        buffer::create_image_view(self.device, image, format, vk::ImageAspectFlags::COLOR, 1)
    }

    fn create_depth(&mut self, extent: vk::Extent2D) -> RenderResult<DepthResources> {
        let format = find_depth_format(self.device)?;

        let image = buffer::create_image(
            self.device,
            &ImageDesc {
                width: extent.width,
                height: extent.height,
                mip_levels: 1,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let view = match buffer::create_image_view(
            self.device,
            image.image,
            format,
            vk::ImageAspectFlags::DEPTH,
            1,
        ) {
            Ok(view) => view,
            Err(e) => {
                image.destroy(&self.device.device);
                return Err(e);
            }
        };

        Ok(DepthResources {
            image: image.image,
            memory: image.memory,
            view,
            format,
        })
    }

    fn create_framebuffer(
        &mut self,
        color: vk::ImageView,
        depth: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        let attachments = [color, depth];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(self.render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
            .vk_context("Failed to create framebuffer")
    }

    fn destroy_depth_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.device.destroy_image_view(view, None) };
    }

    fn destroy_depth_image(&mut self, image: vk::Image) {
        unsafe { self.device.device.destroy_image(image, None) };
    }

    fn free_depth_memory(&mut self, memory: vk::DeviceMemory) {
        unsafe { self.device.device.free_memory(memory, None) };
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.device.destroy_image_view(view, None) };
    }

    fn destroy_chain(&mut self, handle: vk::SwapchainKHR) {
        unsafe { self.device.swapchain_loader.destroy_swapchain(handle, None) };
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.device.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::collections::HashSet;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        WaitIdle,
        Create,
        Destroy,
    }

    /// Hands out fake handles and tracks which are still alive
    #[derive(Default)]
    struct MockBackend {
        next_handle: u64,
        image_counts: Vec<usize>,
        chains_created: usize,
        live: HashSet<u64>,
        events: Vec<Event>,
        destroy_order: Vec<&'static str>,
        fail_framebuffer_at: Option<usize>,
        framebuffers_created: usize,
    }

    impl MockBackend {
        fn with_image_counts(counts: &[usize]) -> Self {
            Self {
                next_handle: 1,
                image_counts: counts.to_vec(),
                ..Default::default()
            }
        }

        fn alloc(&mut self) -> u64 {
            let raw = self.next_handle;
            self.next_handle += 1;
            self.live.insert(raw);
            self.events.push(Event::Create);
            raw
        }

        fn release(&mut self, raw: u64, what: &'static str) {
            assert!(self.live.remove(&raw), "{what} {raw} destroyed twice or never created");
            self.events.push(Event::Destroy);
            self.destroy_order.push(what);
        }
    }

    impl SwapchainBackend for MockBackend {
        fn create_chain(&mut self) -> RenderResult<ChainInfo> {
            let count = self.image_counts[self.chains_created % self.image_counts.len()];
            self.chains_created += 1;
            let handle = vk::SwapchainKHR::from_raw(self.alloc());
            // Images belong to the presentation engine, not tracked as live
            let images = (0..count)
                .map(|i| vk::Image::from_raw(10_000 + i as u64))
                .collect();
            Ok(ChainInfo {
                handle,
                images,
                format: vk::Format::B8G8R8A8_SRGB,
                extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
            })
        }

        fn create_image_view(&mut self, _: vk::Image, _: vk::Format) -> RenderResult<vk::ImageView> {
            Ok(vk::ImageView::from_raw(self.alloc()))
        }

        fn create_depth(&mut self, _: vk::Extent2D) -> RenderResult<DepthResources> {
            Ok(DepthResources {
                image: vk::Image::from_raw(self.alloc()),
                memory: vk::DeviceMemory::from_raw(self.alloc()),
                view: vk::ImageView::from_raw(self.alloc()),
                format: vk::Format::D32_SFLOAT,
            })
        }

        fn create_framebuffer(
            &mut self,
            _: vk::ImageView,
            _: vk::ImageView,
            _: vk::Extent2D,
        ) -> RenderResult<vk::Framebuffer> {
            if self.fail_framebuffer_at == Some(self.framebuffers_created) {
                return Err(RenderError::Vulkan {
                    context: "Failed to create framebuffer",
                    result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                });
            }
            self.framebuffers_created += 1;
            Ok(vk::Framebuffer::from_raw(self.alloc()))
        }

        fn destroy_depth_view(&mut self, view: vk::ImageView) {
            self.release(view.as_raw(), "depth view");
        }

        fn destroy_depth_image(&mut self, image: vk::Image) {
            self.release(image.as_raw(), "depth image");
        }

        fn free_depth_memory(&mut self, memory: vk::DeviceMemory) {
            self.release(memory.as_raw(), "depth memory");
        }

        fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
            self.release(framebuffer.as_raw(), "framebuffer");
        }

        fn destroy_image_view(&mut self, view: vk::ImageView) {
            self.release(view.as_raw(), "image view");
        }

        fn destroy_chain(&mut self, handle: vk::SwapchainKHR) {
            self.release(handle.as_raw(), "swapchain");
        }

        fn wait_idle(&mut self) -> RenderResult<()> {
            self.events.push(Event::WaitIdle);
            Ok(())
        }
    }

    #[test]
    fn create_builds_one_view_and_framebuffer_per_image() {
        let mut backend = MockBackend::with_image_counts(&[3]);
        let swapchain = Swapchain::create(&mut backend).unwrap();

        assert_eq!(swapchain.image_count(), 3);
        assert_eq!(swapchain.image_views.len(), 3);
        assert_eq!(swapchain.framebuffers.len(), 3);
        assert!(swapchain.is_complete());
    }

    #[test]
    fn invariant_holds_across_repeated_recreates() {
        // The presentation engine may return a different count each time
        let mut backend = MockBackend::with_image_counts(&[2, 3, 4, 3]);
        let mut swapchain = Swapchain::create(&mut backend).unwrap();

        for _ in 0..10 {
            swapchain.recreate(&mut backend).unwrap();
            assert!(swapchain.is_complete());
            assert_eq!(swapchain.image_views.len(), swapchain.image_count());
            assert_eq!(swapchain.framebuffers.len(), swapchain.image_count());
        }

        swapchain.cleanup(&mut backend);
        assert!(backend.live.is_empty(), "leaked handles: {:?}", backend.live);
    }

    #[test]
    fn recreate_waits_for_idle_before_destroying() {
        let mut backend = MockBackend::with_image_counts(&[2]);
        let mut swapchain = Swapchain::create(&mut backend).unwrap();
        backend.events.clear();

        swapchain.recreate(&mut backend).unwrap();

        assert_eq!(backend.events.first(), Some(&Event::WaitIdle));
        let first_create = backend
            .events
            .iter()
            .position(|e| *e == Event::Create)
            .unwrap();
        assert!(backend.events[1..first_create]
            .iter()
            .all(|e| *e == Event::Destroy));
    }

    #[test]
    fn cleanup_follows_dependency_order() {
        let mut backend = MockBackend::with_image_counts(&[2]);
        let mut swapchain = Swapchain::create(&mut backend).unwrap();
        swapchain.cleanup(&mut backend);

        assert_eq!(
            backend.destroy_order,
            vec![
                "depth view",
                "depth image",
                "depth memory",
                "framebuffer",
                "framebuffer",
                "image view",
                "image view",
                "swapchain",
            ]
        );
        assert!(swapchain.images.is_empty());
    }

    #[test]
    fn cleanup_twice_is_harmless() {
        let mut backend = MockBackend::with_image_counts(&[2]);
        let mut swapchain = Swapchain::create(&mut backend).unwrap();
        swapchain.cleanup(&mut backend);
        swapchain.cleanup(&mut backend);
        assert!(backend.live.is_empty());
    }

    #[test]
    fn failed_create_releases_partial_state() {
        let mut backend = MockBackend::with_image_counts(&[3]);
        backend.fail_framebuffer_at = Some(1);

        let err = Swapchain::create(&mut backend).unwrap_err();
        assert!(err.is_fatal());
        assert!(backend.live.is_empty(), "leaked handles: {:?}", backend.live);
    }
}
