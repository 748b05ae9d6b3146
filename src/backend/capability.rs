// Capability queries - read-only questions asked of the platform
//
// The selection policies (surface format, present mode, extent, image count,
// queue families, memory types, device choice) are plain functions over the
// query results so they can be checked without a GPU.

use super::error::{RenderResult, VkResultExt};
use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;

/// Device extensions the renderer cannot run without
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

/// Queue family indices used for drawing and presenting (may be equal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Everything the surface reports about what a swapchain may look like
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// How swapchain images are shared between the graphics and present families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSharing {
    Exclusive,
    Concurrent([u32; 2]),
}

/// Properties of one physical device, gathered up front for selection
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub geometry_shader: bool,
    pub sampler_anisotropy: bool,
    pub has_required_extensions: bool,
    pub queues: Option<QueueFamilyIndices>,
    pub swapchain_adequate: bool,
}

impl DeviceCandidate {
    pub fn is_suitable(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            && self.geometry_shader
            && self.sampler_anisotropy
            && self.has_required_extensions
            && self.queues.is_some()
            && self.swapchain_adequate
    }
}

/// Pick the last suitable device in enumeration order
pub fn select_device(candidates: &[DeviceCandidate]) -> Option<&DeviceCandidate> {
    candidates.iter().rev().find(|c| c.is_suitable())
}

/// Prefer B8G8R8A8_SRGB + SRGB_NONLINEAR, otherwise the first reported format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Prefer MAILBOX; FIFO is always available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's current extent when defined, else the drawable size clamped
/// into the allowed range
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: drawable
            .0
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable
            .1
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

pub fn image_sharing(queues: QueueFamilyIndices) -> ImageSharing {
    if queues.is_shared() {
        ImageSharing::Exclusive
    } else {
        ImageSharing::Concurrent([queues.graphics, queues.present])
    }
}

/// First graphics family; the present family is the graphics one when it can
/// present, otherwise the first family that can
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    present_support: &[bool],
) -> Option<QueueFamilyIndices> {
    let graphics = families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;

    let can_present = |i: usize| present_support.get(i).copied().unwrap_or(false);
    let present = if can_present(graphics) {
        graphics
    } else {
        (0..families.len()).find(|&i| can_present(i))?
    };

    Some(QueueFamilyIndices {
        graphics: graphics as u32,
        present: present as u32,
    })
}

/// First memory type allowed by `type_filter` whose flags contain all of `required`
pub fn find_memory_type_index(
    memory_types: &[vk::MemoryType],
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_types
        .iter()
        .enumerate()
        .take(32)
        .find(|(i, ty)| type_filter & (1 << i) != 0 && ty.property_flags.contains(required))
        .map(|(i, _)| i as u32)
}

/// First candidate whose tiling features contain `features`
pub fn find_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties_of: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        let props = properties_of(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

// =============================================================================
// Platform queries
// =============================================================================

pub fn query_swapchain_support(
    surface_loader: &khr::Surface,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> RenderResult<SwapchainSupport> {
    unsafe {
        let capabilities = surface_loader
            .get_physical_device_surface_capabilities(physical_device, surface)
            .vk_context("Failed to query surface capabilities")?;
        let formats = surface_loader
            .get_physical_device_surface_formats(physical_device, surface)
            .vk_context("Failed to query surface formats")?;
        let present_modes = surface_loader
            .get_physical_device_surface_present_modes(physical_device, surface)
            .vk_context("Failed to query present modes")?;

        Ok(SwapchainSupport {
            capabilities,
            formats,
            present_modes,
        })
    }
}

pub fn query_queue_families(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> RenderResult<Option<QueueFamilyIndices>> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let present_support = (0..families.len() as u32)
        .map(|i| unsafe {
            surface_loader
                .get_physical_device_surface_support(physical_device, i, surface)
                .vk_context("Failed to query present support")
        })
        .collect::<RenderResult<Vec<_>>>()?;

    Ok(find_queue_families(&families, &present_support))
}

fn supports_required_extensions(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> RenderResult<bool> {
    let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .vk_context("Failed to enumerate device extensions")?;

    Ok(required_device_extensions().iter().all(|required| {
        available
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == *required)
    }))
}

pub fn query_candidate(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> RenderResult<DeviceCandidate> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let features = unsafe { instance.get_physical_device_features(physical_device) };
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    let queues = query_queue_families(instance, surface_loader, physical_device, surface)?;
    let has_required_extensions = supports_required_extensions(instance, physical_device)?;

    // Only ask the surface once we know the swapchain extension is there
    let swapchain_adequate = has_required_extensions
        && query_swapchain_support(surface_loader, physical_device, surface)?.is_adequate();

    Ok(DeviceCandidate {
        handle: physical_device,
        name,
        device_type: properties.device_type,
        geometry_shader: features.geometry_shader == vk::TRUE,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        has_required_extensions,
        queues,
        swapchain_adequate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        }
    }

    fn candidate(raw: u64) -> DeviceCandidate {
        DeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu{raw}"),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            geometry_shader: true,
            sampler_anisotropy: true,
            has_required_extensions: true,
            queues: Some(QueueFamilyIndices {
                graphics: 0,
                present: 0,
            }),
            swapchain_adequate: true,
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
    fn surface_format_prefers_bgra_srgb() {
        let preferred = surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            preferred,
        ];
        assert_eq!(choose_surface_format(&formats), Some(preferred));
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // Right format, wrong color space: not the preferred pair
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_when_defined() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_extent(&c, (4000, 4000));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_clamps_drawable_size() {
        let c = caps(2, 3);
        let extent = choose_extent(&c, (4000, 10));
        assert_eq!((extent.width, extent.height), (1920, 64));

        let extent = choose_extent(&c, (1280, 720));
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn sharing_follows_family_equality() {
        let shared = QueueFamilyIndices {
            graphics: 1,
            present: 1,
        };
        assert_eq!(image_sharing(shared), ImageSharing::Exclusive);

        let split = QueueFamilyIndices {
            graphics: 0,
            present: 2,
        };
        assert_eq!(image_sharing(split), ImageSharing::Concurrent([0, 2]));
    }

    #[test]
    fn queue_families_collapse_when_graphics_can_present() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = find_queue_families(&families, &[true, true]).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 1 });
        assert!(indices.is_shared());
    }

    #[test]
    fn queue_families_split_when_needed() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = find_queue_families(&families, &[false, true]).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: 1 });

        assert_eq!(find_queue_families(&families, &[false, false]), None);
        assert_eq!(
            find_queue_families(&[family(vk::QueueFlags::COMPUTE)], &[true]),
            None
        );
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let types = [
            vk::MemoryType {
                property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                heap_index: 0,
            },
            vk::MemoryType {
                property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE,
                heap_index: 1,
            },
            vk::MemoryType {
                property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                heap_index: 1,
            },
        ];
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type_index(&types, 0b111, host), Some(2));
        assert_eq!(
            find_memory_type_index(&types, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
        // Type 2 is filtered out by the requirement bits
        assert_eq!(find_memory_type_index(&types, 0b011, host), None);
        assert_eq!(
            find_memory_type_index(&types, 0b110, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn memory_type_is_never_a_strict_subset_of_request() {
        let flags = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_CACHED,
        ];
        let combo = |bits: u32| {
            flags
                .iter()
                .enumerate()
                .filter(|(i, _)| bits & (1 << i) != 0)
                .fold(vk::MemoryPropertyFlags::empty(), |acc, (_, f)| acc | *f)
        };

        // Every table of 3 types drawn from the 16 flag combinations, every request
        for a in 0..16 {
            for b in 0..16 {
                for c in 0..16 {
                    let types = [a, b, c].map(|bits| vk::MemoryType {
                        property_flags: combo(bits),
                        heap_index: 0,
                    });
                    for request in 0..16 {
                        let required = combo(request);
                        for filter in 0..8u32 {
                            if let Some(i) = find_memory_type_index(&types, filter, required) {
                                let found = types[i as usize].property_flags;
                                assert!(found.contains(required));
                                assert!(filter & (1 << i) != 0);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn device_selection_takes_last_suitable() {
        let mut integrated = candidate(3);
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        let candidates = [candidate(1), candidate(2), integrated];

        let picked = select_device(&candidates).unwrap();
        assert_eq!(picked.handle.as_raw(), 2);
    }

    #[test]
    fn device_selection_requires_every_capability() {
        let mut no_geometry = candidate(1);
        no_geometry.geometry_shader = false;
        let mut no_aniso = candidate(2);
        no_aniso.sampler_anisotropy = false;
        let mut no_ext = candidate(3);
        no_ext.has_required_extensions = false;
        let mut no_queue = candidate(4);
        no_queue.queues = None;
        let mut no_formats = candidate(5);
        no_formats.swapchain_adequate = false;

        let candidates = [no_geometry, no_aniso, no_ext, no_queue, no_formats];
        assert!(select_device(&candidates).is_none());
        assert!(select_device(&[]).is_none());
    }

    #[test]
    fn supported_format_walks_candidates_in_order() {
        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        let depth = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let props = |format: vk::Format| vk::FormatProperties {
            optimal_tiling_features: if format == vk::Format::D32_SFLOAT {
                vk::FormatFeatureFlags::empty()
            } else {
                depth
            },
            ..Default::default()
        };

        assert_eq!(
            find_supported_format(&candidates, vk::ImageTiling::OPTIMAL, depth, props),
            Some(vk::Format::D32_SFLOAT_S8_UINT)
        );
        assert_eq!(
            find_supported_format(&candidates, vk::ImageTiling::LINEAR, depth, props),
            None
        );
    }
}
