// Command pools and one-shot submissions

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Which queue a one-shot submission runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Graphics,
    /// The dedicated transfer queue, or graphics when the GPU has none
    Transfer,
}

pub struct CommandPools {
    pub graphics: vk::CommandPool,
    transfer: Option<vk::CommandPool>,
    device: Arc<VulkanDevice>,
}

impl CommandPools {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let graphics = Self::create_pool(&device, device.graphics_queue_family)?;

        let transfer = match device.queue_families.exclusive_transfer {
            Some(family) => match Self::create_pool(&device, family) {
                Ok(pool) => Some(pool),
                Err(e) => {
                    unsafe { device.device.destroy_command_pool(graphics, None) };
                    return Err(e);
                }
            },
            None => None,
        };

        log::info!(
            "Created command pools (dedicated transfer pool: {})",
            transfer.is_some()
        );

        Ok(Self {
            graphics,
            transfer,
            device,
        })
    }

    fn create_pool(device: &VulkanDevice, family: u32) -> Result<vk::CommandPool> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(family);

        unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")
    }

    /// Primary command buffers from the graphics pool
    pub fn allocate_primary(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.graphics)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    fn pool_and_queue(&self, kind: QueueKind) -> (vk::CommandPool, vk::Queue) {
        match (kind, self.transfer) {
            (QueueKind::Transfer, Some(pool)) => (pool, self.device.transfer_queue),
            _ => (self.graphics, self.device.graphics_queue),
        }
    }

    /// Record with `record`, submit, and block until the queue is idle
    pub fn one_time_submit<F>(&self, kind: QueueKind, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let (pool, queue) = self.pool_and_queue(kind);
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate one-shot command buffer")?;
        let cmd = command_buffers[0];

        let result = (|| {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(cmd, &begin_info) }
                .context("Failed to begin one-shot command buffer")?;

            record(cmd)?;

            unsafe { device.end_command_buffer(cmd) }
                .context("Failed to end one-shot command buffer")?;

            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            unsafe {
                device
                    .queue_submit(queue, &[submit_info.build()], vk::Fence::null())
                    .context("Failed to submit one-shot command buffer")?;
                device
                    .queue_wait_idle(queue)
                    .context("Failed to wait for one-shot submission")?;
            }
            Ok(())
        })();

        unsafe { device.free_command_buffers(pool, &command_buffers) };
        result
    }
}

impl Drop for CommandPools {
    fn drop(&mut self) {
        unsafe {
            if let Some(pool) = self.transfer {
                self.device.device.destroy_command_pool(pool, None);
            }
            self.device.device.destroy_command_pool(self.graphics, None);
        }
    }
}
