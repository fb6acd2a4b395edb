//! Frame scheduling and CPU-GPU overlap
//!
//! The scheduler owns N frame slots, each with one command buffer, one
//! fence, and two semaphores. A frame waits only its own slot's fence, so
//! the CPU can run up to N-1 frames ahead of the GPU. Swapchain staleness
//! at acquire or present never surfaces as an error; it flips a debounced
//! rebuild flag and at worst costs one skipped frame.

use ash::vk;

use crate::render::vulkan::commands::{CommandPool, CommandRecorder};
use crate::render::vulkan::sync::{Fence, Semaphore};
use crate::render::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Upper bound on waiting for a slot's fence; expiry means a hung device
pub const FRAME_TIMEOUT_NS: u64 = 5_000_000_000;

/// Round-robin slot cursor
///
/// Pure index math, split out so slot fairness is testable without a
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRing {
    count: usize,
    index: usize,
}

impl SlotRing {
    pub fn new(count: usize) -> Self {
        Self { count, index: 0 }
    }

    /// Slot used by the frame currently in flight on the CPU
    pub fn current(&self) -> usize {
        self.index
    }

    /// Move to the next slot, wrapping at the slot count
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.count;
    }
}

/// Debounced swapchain-rebuild request
///
/// Any number of triggers between two rebuilds collapse into one.
#[derive(Debug, Default, Clone, Copy)]
pub struct RebuildFlag {
    requested: bool,
}

impl RebuildFlag {
    pub fn request(&mut self) {
        self.requested = true;
    }

    /// Consume the request, if any
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.requested)
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

/// Per-slot synchronization objects and command storage
struct FrameSlot {
    command_buffer: vk::CommandBuffer,
    in_flight: Fence,
    image_available: Semaphore,
    render_finished: Semaphore,
}

/// A frame that acquired a swapchain image and is ready to record
pub struct AcquiredFrame {
    pub image_index: u32,
    pub command_buffer: vk::CommandBuffer,
}

/// N-slot frame scheduler
pub struct FrameScheduler {
    slots: Vec<FrameSlot>,
    ring: SlotRing,
    rebuild: RebuildFlag,
}

impl FrameScheduler {
    /// Create a scheduler with `frames_in_flight` slots
    pub fn new(ctx: &VulkanContext, pool: &CommandPool, frames_in_flight: u32) -> VulkanResult<Self> {
        let device = ctx.raw_device();
        let command_buffers = pool.allocate_command_buffers(frames_in_flight)?;

        let slots = command_buffers
            .into_iter()
            .map(|command_buffer| {
                Ok(FrameSlot {
                    command_buffer,
                    // Signaled so the first pass through the slot never blocks.
                    in_flight: Fence::new(device.clone(), true)?,
                    image_available: Semaphore::new(device.clone())?,
                    render_finished: Semaphore::new(device.clone())?,
                })
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!("Frame scheduler created with {frames_in_flight} slots");

        Ok(Self {
            slots,
            ring: SlotRing::new(frames_in_flight as usize),
            rebuild: RebuildFlag::default(),
        })
    }

    /// Wait the current slot's fence and acquire a swapchain image
    ///
    /// Returns `None` when the swapchain is out of date: the rebuild flag is
    /// raised, the slot is left untouched, and the frame must be skipped.
    pub fn begin_frame(&mut self, ctx: &VulkanContext) -> VulkanResult<Option<AcquiredFrame>> {
        let slot = &self.slots[self.ring.current()];
        slot.in_flight.wait(FRAME_TIMEOUT_NS)?;

        let acquire_result = unsafe {
            ctx.swapchain_loader().acquire_next_image(
                ctx.swapchain().handle(),
                u64::MAX,
                slot.image_available.handle(),
                vk::Fence::null(),
            )
        };

        match acquire_result {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    self.rebuild.request();
                }
                Ok(Some(AcquiredFrame {
                    image_index,
                    command_buffer: slot.command_buffer,
                }))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date at acquire; skipping frame");
                self.rebuild.request();
                Ok(None)
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Begin recording into the current slot's command buffer
    pub fn recorder(&self, ctx: &VulkanContext, frame: &AcquiredFrame) -> VulkanResult<CommandRecorder> {
        let device = ctx.raw_device();
        unsafe {
            device
                .reset_command_buffer(frame.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
        }
        let mut recorder = CommandRecorder::new(frame.command_buffer, device);
        recorder.begin()?;
        Ok(recorder)
    }

    /// Submit the recorded frame to the graphics queue
    ///
    /// Waits the image-available semaphore at color-attachment output,
    /// signals render-finished and the slot fence.
    pub fn submit(&mut self, ctx: &VulkanContext, frame: &AcquiredFrame) -> VulkanResult<()> {
        let slot = &self.slots[self.ring.current()];

        slot.in_flight.reset()?;

        let wait_semaphores = [slot.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [slot.render_finished.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            ctx.raw_device()
                .queue_submit(ctx.graphics_queue(), &[submit_info], slot.in_flight.handle())
                .map_err(VulkanError::Api)?;
        }

        Ok(())
    }

    /// Present the submitted image and advance to the next slot
    ///
    /// Staleness reported here raises the rebuild flag; the cursor advances
    /// either way since the work was already submitted.
    pub fn present(&mut self, ctx: &VulkanContext, frame: &AcquiredFrame) -> VulkanResult<()> {
        let slot = &self.slots[self.ring.current()];

        let wait_semaphores = [slot.render_finished.handle()];
        let swapchains = [ctx.swapchain().handle()];
        let image_indices = [frame.image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let present_result = unsafe {
            ctx.swapchain_loader()
                .queue_present(ctx.present_queue(), &present_info)
        };

        match present_result {
            Ok(suboptimal) => {
                if suboptimal {
                    log::warn!("Swapchain suboptimal at present; requesting rebuild");
                    self.rebuild.request();
                }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date at present; requesting rebuild");
                self.rebuild.request();
            }
            Err(e) => return Err(VulkanError::Api(e)),
        }

        self.ring.advance();
        Ok(())
    }

    /// Consume the pending rebuild request, if any
    pub fn take_rebuild_request(&mut self) -> bool {
        self.rebuild.take()
    }

    /// Raise the rebuild flag from outside the present path
    pub fn request_rebuild(&mut self) {
        self.rebuild.request();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_visits_each_slot_twice_over_two_rounds() {
        let slot_count = 3;
        let mut ring = SlotRing::new(slot_count);
        let mut uses = vec![0u32; slot_count];

        for _ in 0..2 * slot_count {
            uses[ring.current()] += 1;
            ring.advance();
        }

        assert_eq!(uses, vec![2, 2, 2]);
        assert_eq!(ring.current(), 0);
    }

    #[test]
    fn consecutive_frames_use_consecutive_slots() {
        let mut ring = SlotRing::new(2);
        assert_eq!(ring.current(), 0);
        ring.advance();
        assert_eq!(ring.current(), 1);
        ring.advance();
        assert_eq!(ring.current(), 0);
    }

    #[test]
    fn rebuild_requests_are_debounced() {
        let mut flag = RebuildFlag::default();
        assert!(!flag.take());

        flag.request();
        flag.request();
        flag.request();
        assert!(flag.is_requested());

        // All three triggers collapse into a single rebuild.
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn skipped_frame_leaves_slot_cursor_in_place() {
        // An out-of-date acquire raises the flag without advancing, so the
        // next attempt reuses the same slot and its still-signaled fence.
        let mut ring = SlotRing::new(2);
        let mut flag = RebuildFlag::default();

        flag.request();
        assert_eq!(ring.current(), 0);
        assert!(flag.take());

        ring.advance();
        assert_eq!(ring.current(), 1);
    }
}
