// Resource factory - buffers and images backed by their own device memory
//
// Each resource gets a dedicated allocation bound at offset 0. The memory type
// is the first one allowed by the resource's requirements whose property flags
// contain everything requested.

use super::capability;
use super::error::{OrRelease, RenderError, RenderResult, VkResultExt};
use super::VulkanDevice;
use ash::vk;

/// A buffer and the memory bound to it
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub properties: vk::MemoryPropertyFlags,
}

impl GpuBuffer {
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// An image and the memory bound to it
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub properties: vk::MemoryPropertyFlags,
}

impl GpuImage {
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Parameters for a 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

/// Create a GPU buffer with specified usage and memory properties
pub fn create_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<GpuBuffer> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
        .vk_context("Failed to create buffer")?;

    let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
    let memory = match allocate(device, requirements, properties) {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    unsafe { device.device.bind_buffer_memory(buffer, memory, 0) }
        .vk_context("Failed to bind buffer memory")
        .or_release(|| unsafe {
            device.device.destroy_buffer(buffer, None);
            device.device.free_memory(memory, None);
        })?;

    Ok(GpuBuffer {
        buffer,
        memory,
        size,
        properties,
    })
}

/// Create a 2D image with its own memory
pub fn create_image(
    device: &VulkanDevice,
    desc: &ImageDesc,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<GpuImage> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        })
        .mip_levels(desc.mip_levels)
        .array_layers(1)
        .format(desc.format)
        .tiling(desc.tiling)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(desc.usage)
        .samples(vk::SampleCountFlags::TYPE_1)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = unsafe { device.device.create_image(&image_info, None) }
        .vk_context("Failed to create image")?;

    let requirements = unsafe { device.device.get_image_memory_requirements(image) };
    let memory = match allocate(device, requirements, properties) {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.device.destroy_image(image, None) };
            return Err(e);
        }
    };

    unsafe { device.device.bind_image_memory(image, memory, 0) }
        .vk_context("Failed to bind image memory")
        .or_release(|| unsafe {
            device.device.destroy_image(image, None);
            device.device.free_memory(memory, None);
        })?;

    Ok(GpuImage {
        image,
        memory,
        format: desc.format,
        extent: vk::Extent2D {
            width: desc.width,
            height: desc.height,
        },
        mip_levels: desc.mip_levels,
        properties,
    })
}

/// 2D view over `levels` mip levels with identity swizzle
pub fn create_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    levels: u32,
) -> RenderResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: levels,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.device.create_image_view(&create_info, None) }
        .vk_context("Failed to create image view")
}

/// Copy `bytes` into host-visible memory (map, copy, unmap)
pub fn write_mapped(device: &VulkanDevice, buffer: &GpuBuffer, bytes: &[u8]) -> RenderResult<()> {
    debug_assert!(buffer
        .properties
        .contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
    debug_assert!(bytes.len() as vk::DeviceSize <= buffer.size);

    unsafe {
        let ptr = device
            .device
            .map_memory(
                buffer.memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )
            .vk_context("Failed to map buffer memory")? as *mut u8;

        ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        device.device.unmap_memory(buffer.memory);
    }

    Ok(())
}

/// Find a suitable memory type index
pub fn find_memory_type(
    device: &VulkanDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    capability::find_memory_type_index(device.memory_types(), type_filter, properties).ok_or(
        RenderError::NoMemoryType {
            type_filter,
            properties,
        },
    )
}

fn allocate(
    device: &VulkanDevice,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(device, requirements.memory_type_bits, properties)?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { device.device.allocate_memory(&alloc_info, None) }
        .vk_context("Failed to allocate device memory")
}
