//! Vulkan synchronization primitives
//!
//! RAII wrappers around semaphores and fences. Each frame slot in the
//! scheduler owns one fence and two semaphores built from these types.

use ash::{vk, Device};

use crate::render::vulkan::{VulkanError, VulkanResult};

/// Binary semaphore for GPU-GPU ordering
pub struct Semaphore {
    device: Device,
    handle: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let handle = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, handle })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.handle, None);
        }
    }
}

/// Fence for GPU-CPU synchronization
pub struct Fence {
    device: Device,
    handle: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled
    ///
    /// Frame-slot fences start signaled so the first pass through each slot
    /// does not block.
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let handle = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, handle })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Block until the fence signals or the wait bound expires
    ///
    /// A timeout is treated as fatal: the frame in this slot never completed,
    /// which in practice means a hung or lost device.
    pub fn wait(&self, timeout_ns: u64) -> VulkanResult<()> {
        let result = unsafe {
            self.device
                .wait_for_fences(&[self.handle], true, timeout_ns)
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(VulkanError::FenceTimeout { timeout_ns }),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.handle])
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.handle, None);
        }
    }
}
