// Synchronization primitives and the command buffer they guard
//
// One frame in flight: one command buffer, two semaphores for GPU-GPU
// ordering, one fence for GPU-CPU ordering.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::error::{FrameError, FrameStep, ResourceCreationError};

/// Per-frame command and sync objects
pub struct FrameSync {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by acquire, waited on by submit
    pub image_available: vk::Semaphore,
    /// Signaled by submit, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signaled when the GPU has consumed the command buffer
    pub in_flight: vk::Fence,
    device: Arc<Device>,
}

impl FrameSync {
    pub fn new(device: &Arc<Device>) -> Result<Self, ResourceCreationError> {
        // Null handles are skipped by vkDestroy*, so a partially built value
        // can be dropped safely
        let mut sync = Self {
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            device: device.clone(),
        };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families.graphics)
            // RESET: the single buffer is re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        sync.command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(ResourceCreationError::CommandPool)?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(sync.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        sync.command_buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .map_err(ResourceCreationError::CommandBuffer)?
            .into_iter()
            .next()
            .ok_or(ResourceCreationError::CommandBuffer(vk::Result::ERROR_UNKNOWN))?;

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        sync.image_available = unsafe { device.device.create_semaphore(&semaphore_info, None) }
            .map_err(ResourceCreationError::Semaphore)?;
        sync.render_finished = unsafe { device.device.create_semaphore(&semaphore_info, None) }
            .map_err(ResourceCreationError::Semaphore)?;

        // Start signaled so the first frame does not wait forever
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        sync.in_flight = unsafe { device.device.create_fence(&fence_info, None) }
            .map_err(ResourceCreationError::Fence)?;

        Ok(sync)
    }

    /// Block until the previous submission retired, then re-arm the fence
    pub fn wait_and_reset(&self) -> Result<(), FrameError> {
        let fences = [self.in_flight];
        unsafe {
            self.device
                .device
                .wait_for_fences(&fences, true, u64::MAX)
                .map_err(FrameError::vulkan(FrameStep::FenceWait))?;
            self.device
                .device
                .reset_fences(&fences)
                .map_err(FrameError::vulkan(FrameStep::FenceWait))?;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            let device = &self.device.device;
            device.destroy_fence(self.in_flight, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.image_available, None);
            // Also frees the command buffer
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}
