// Synchronization primitives
//
// Everything one frame in flight needs: its command buffer, the two semaphores
// ordering acquire -> render -> present on the GPU, the fence the CPU waits on
// before reusing the slot, and the slot's own uniform buffer and descriptor set.

use super::buffer::{self, GpuBuffer};
use super::descriptor::UniformBlock;
use super::error::{OrRelease, RenderResult, VkResultExt};
use super::VulkanDevice;
use ash::vk;

/// Per-frame resources, one per frame in flight
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub uniform: GpuBuffer,
    pub descriptor_set: vk::DescriptorSet,
}

impl FrameSlot {
    /// Create the slot's objects; the fence starts signaled so the first wait returns at once
    ///
    /// `descriptor_set` is filled in once the descriptor sets exist. On failure
    /// whatever was already created is released.
    pub fn new(device: &VulkanDevice, command_pool: vk::CommandPool) -> RenderResult<Self> {
        let mut slot = Self::default();
        slot.create_objects(device, command_pool)
            .or_release(|| slot.destroy(&device.device, command_pool))?;
        Ok(slot)
    }

    fn create_objects(&mut self, device: &VulkanDevice, command_pool: vk::CommandPool) -> RenderResult<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        self.uniform = buffer::create_buffer(
            device,
            UniformBlock::size(),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        unsafe {
            self.command_buffer = device
                .device
                .allocate_command_buffers(&alloc_info)
                .vk_context("Failed to allocate command buffer")?[0];
            self.image_available = device
                .device
                .create_semaphore(&semaphore_info, None)
                .vk_context("Failed to create semaphore")?;
            self.render_finished = device
                .device
                .create_semaphore(&semaphore_info, None)
                .vk_context("Failed to create semaphore")?;
            self.in_flight = device
                .device
                .create_fence(&fence_info, None)
                .vk_context("Failed to create fence")?;
        }

        Ok(())
    }

    /// Release in reverse creation order; the descriptor set goes with its pool
    pub fn destroy(&self, device: &ash::Device, command_pool: vk::CommandPool) {
        unsafe {
            device.destroy_fence(self.in_flight, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.image_available, None);
            if self.command_buffer != vk::CommandBuffer::null() {
                device.free_command_buffers(command_pool, &[self.command_buffer]);
            }
        }
        self.uniform.destroy(device);
    }
}
