// Frame loop - acquire, record, submit, present
//
// Each frame in flight moves Idle -> Recording -> Submitted and back to Idle
// when its fence signals. The fence wait at the top of `draw_frame` is the only
// thing keeping the CPU at most FRAMES_IN_FLIGHT frames ahead of the GPU.
//
// A stale swapchain (out of date or suboptimal) or a pending resize is answered
// by rebuilding the swapchain, never by retrying the failed call.

use super::buffer::GpuBuffer;
use super::descriptor::UniformBlock;
use super::error::{RenderError, RenderResult};
use super::sync::FrameSlot;
use ash::prelude::VkResult;
use ash::vk;

pub const FRAMES_IN_FLIGHT: usize = 2;

/// One graphics queue submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// GPU operations the frame loop drives
pub trait FrameBackend {
    /// Block until `fence` is signaled
    fn wait_for_fence(&mut self, fence: vk::Fence) -> RenderResult<()>;
    /// Raw acquire result: image index and suboptimal flag
    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VkResult<(u32, bool)>;
    fn reset_fence(&mut self, fence: vk::Fence) -> RenderResult<()>;
    fn reset_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;
    fn record_commands(&mut self, slot: &FrameSlot, image_index: u32) -> RenderResult<()>;
    fn write_uniforms(&mut self, uniform: &GpuBuffer, block: &UniformBlock) -> RenderResult<()>;
    fn submit(&mut self, submission: &Submission) -> RenderResult<()>;
    /// Raw present result: suboptimal flag
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> VkResult<bool>;
    fn surface_extent(&self) -> vk::Extent2D;
    fn recreate_swapchain(&mut self) -> RenderResult<()>;
    /// Replace a semaphore that may be left signaled with no pending wait
    fn renew_semaphore(&mut self, old: vk::Semaphore) -> RenderResult<vk::Semaphore>;
}

/// What happened to one call of `draw_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Submitted and presented
    Presented,
    /// Submitted, then the swapchain was rebuilt
    SwapchainRecreated,
    /// Swapchain was stale at acquire; rebuilt, nothing submitted
    Skipped,
}

/// Map an acquire result to an image index; stale surfaces are recoverable
pub fn acquire_status(result: VkResult<(u32, bool)>) -> RenderResult<u32> {
    match result {
        Ok((image_index, false)) => Ok(image_index),
        Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SurfaceOutOfDate),
        Err(result) => Err(RenderError::Vulkan {
            context: "Failed to acquire swapchain image",
            result,
        }),
    }
}

/// Map a present result; stale surfaces are recoverable
pub fn present_status(result: VkResult<bool>) -> RenderResult<()> {
    match result {
        Ok(false) => Ok(()),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SurfaceOutOfDate),
        Err(result) => Err(RenderError::Vulkan {
            context: "Failed to present swapchain image",
            result,
        }),
    }
}

pub struct FrameLoop {
    slots: Vec<FrameSlot>,
    current_frame: usize,
    resize_requested: bool,
    frames_submitted: u64,
}

impl FrameLoop {
    pub fn new(slots: Vec<FrameSlot>) -> Self {
        debug_assert_eq!(slots.len(), FRAMES_IN_FLIGHT);
        Self {
            slots,
            current_frame: 0,
            resize_requested: false,
            frames_submitted: 0,
        }
    }

    /// Rebuild the swapchain after the next present
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current_frame]
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Hand the slots back for teardown
    pub fn take_slots(&mut self) -> Vec<FrameSlot> {
        std::mem::take(&mut self.slots)
    }

    /// Render one frame; `elapsed` drives the model rotation
    pub fn draw_frame(&mut self, backend: &mut impl FrameBackend, elapsed: f32) -> RenderResult<FrameStatus> {
        let slot = self.slots[self.current_frame];

        // Step 1: wait until the GPU is done with this slot
        backend.wait_for_fence(slot.in_flight)?;

        // Step 2: acquire; a stale swapchain skips the frame
        let acquired = backend.acquire_next_image(slot.image_available);
        let semaphore_signaled = matches!(acquired, Ok((_, true)));
        let image_index = match acquire_status(acquired) {
            Ok(index) => index,
            Err(e) if !e.is_fatal() => {
                log::debug!("Swapchain stale at acquire, skipping frame");
                backend.recreate_swapchain()?;
                self.resize_requested = false;
                if semaphore_signaled {
                    let renewed = backend.renew_semaphore(slot.image_available)?;
                    self.slots[self.current_frame].image_available = renewed;
                }
                return Ok(FrameStatus::Skipped);
            }
            Err(e) => return Err(e),
        };

        // Step 3: only now is this slot committed to a submission
        backend.reset_fence(slot.in_flight)?;
        backend.reset_command_buffer(slot.command_buffer)?;

        // Step 4-5: record and update uniforms
        backend.record_commands(&slot, image_index)?;
        let block = UniformBlock::at(elapsed, backend.surface_extent());
        backend.write_uniforms(&slot.uniform, &block)?;

        // Step 6: submit
        backend.submit(&Submission {
            command_buffer: slot.command_buffer,
            wait_semaphore: slot.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: slot.render_finished,
            fence: slot.in_flight,
        })?;
        self.frames_submitted += 1;

        // Step 7: present
        let status = match present_status(backend.present(image_index, slot.render_finished)) {
            Ok(()) if !self.resize_requested => FrameStatus::Presented,
            Ok(()) => {
                log::debug!("Resize requested, recreating swapchain");
                backend.recreate_swapchain()?;
                FrameStatus::SwapchainRecreated
            }
            Err(e) if !e.is_fatal() => {
                log::debug!("Swapchain stale at present, recreating");
                backend.recreate_swapchain()?;
                FrameStatus::SwapchainRecreated
            }
            Err(e) => return Err(e),
        };
        self.resize_requested = false;

        // Step 8: advance
        self.current_frame = (self.current_frame + 1) % self.slots.len();

        Ok(status)
    }
}
