// Descriptors and the per-frame uniform block
//
// Binding 0: uniform buffer (vertex stage), one per frame slot
// Binding 1: combined image sampler (fragment stage), shared texture

use super::error::{RenderResult, VkResultExt};
use super::VulkanDevice;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Degrees per second the model spins about +Z
pub const ROTATION_DEG_PER_SEC: f32 = 90.0;

const UNIFORM_BINDING: u32 = 0;
const SAMPLER_BINDING: u32 = 1;

/// Transform block rewritten every frame
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBlock {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBlock {
    /// Transforms for `elapsed` seconds since start at the given extent
    pub fn at(elapsed: f32, extent: vk::Extent2D) -> Self {
        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };

        Self {
            model: Mat4::from_rotation_z(elapsed * ROTATION_DEG_PER_SEC.to_radians()),
            view: Mat4::look_at_rh(Vec3::new(0.0, 2.0, 2.0), Vec3::ZERO, Vec3::Y),
            proj: Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0),
        }
    }

    pub fn size() -> vk::DeviceSize {
        std::mem::size_of::<Self>() as vk::DeviceSize
    }
}

/// Binding 0: transform block (vertex), binding 1: texture (fragment)
pub fn create_set_layout(device: &VulkanDevice) -> RenderResult<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(UNIFORM_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ];

    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

    unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
        .vk_context("Failed to create descriptor set layout")
}

/// Exactly one descriptor per binding per slot
pub fn pool_sizes(slot_count: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: slot_count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: slot_count,
        },
    ]
}

pub fn create_pool(device: &VulkanDevice, slot_count: u32) -> RenderResult<vk::DescriptorPool> {
    let sizes = pool_sizes(slot_count);
    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&sizes)
        .max_sets(slot_count);

    unsafe { device.device.create_descriptor_pool(&pool_info, None) }
        .vk_context("Failed to create descriptor pool")
}

/// One set per uniform buffer, each also pointing at the texture
pub fn allocate_sets(
    device: &VulkanDevice,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    uniform_buffers: &[vk::Buffer],
    texture: (vk::ImageView, vk::Sampler),
) -> RenderResult<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; uniform_buffers.len()];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&layouts);

    let sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
        .vk_context("Failed to allocate descriptor sets")?;

    let (view, sampler) = texture;
    let image_info = [vk::DescriptorImageInfo {
        sampler,
        image_view: view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }];

    for (&set, &buffer) in sets.iter().zip(uniform_buffers) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: UniformBlock::size(),
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(UNIFORM_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(SAMPLER_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info)
                .build(),
        ];

        unsafe { device.device.update_descriptor_sets(&writes, &[]) };
    }

    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn block_is_three_matrices() {
        assert_eq!(UniformBlock::size(), 3 * 64);
    }

    #[test]
    fn model_rotates_quarter_turn_per_second() {
        let block = UniformBlock::at(1.0, EXTENT);
        let x = block.model * Vec4::X;
        assert!((x - Vec4::Y).length() < 1e-5, "got {x:?}");
    }

    #[test]
    fn model_starts_at_identity() {
        let block = UniformBlock::at(0.0, EXTENT);
        assert!(block.model.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn camera_is_fixed_over_time() {
        let a = UniformBlock::at(0.5, EXTENT);
        let b = UniformBlock::at(7.25, EXTENT);
        assert_eq!(a.view, b.view);
        assert_eq!(a.proj, b.proj);
    }

    #[test]
    fn zero_height_extent_does_not_produce_nan() {
        let block = UniformBlock::at(
            0.0,
            vk::Extent2D {
                width: 800,
                height: 0,
            },
        );
        assert!(!block.proj.is_nan());
    }

    #[test]
    fn pool_sized_per_slot_and_binding() {
        let sizes = pool_sizes(2);
        assert!(sizes.iter().all(|s| s.descriptor_count == 2));
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }
}
