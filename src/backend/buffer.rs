// Buffer utilities for vertex, index, and uniform buffers
//
// Memory comes from gpu-allocator. Buffers the transfer queue writes are
// shared concurrently with the graphics family, so no ownership transfer is
// needed after an upload.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::command::{CommandPools, QueueKind};
use super::VulkanDevice;
use crate::uniform::UniformBufferObject;

pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: &Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        let (sharing_mode, families) = device.buffer_sharing();

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create {} buffer", name))?;

        // From here on Drop takes care of the handle
        let mut this = Self {
            buffer,
            size,
            allocation: None,
            device: Arc::clone(device),
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        this.allocation = Some(allocation);
        bound.with_context(|| format!("Failed to bind {} buffer memory", name))?;

        Ok(this)
    }

    /// Copy `data` to the start of a host-visible buffer
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);

        let mapped = self
            .allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .context("Buffer is not host visible")?;

        if bytes.len() > mapped.len() {
            anyhow::bail!(
                "Write of {} bytes overflows a {} byte buffer",
                bytes.len(),
                mapped.len()
            );
        }

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Device-local buffer filled through a staging copy on the transfer queue
    pub fn device_local_with_data<T: Pod>(
        device: &Arc<VulkanDevice>,
        commands: &CommandPools,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        if size == 0 {
            anyhow::bail!("Cannot create an empty {} buffer", name);
        }

        let mut staging = Buffer::new(
            device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &format!("{} staging", name),
        )?;
        staging.write(data)?;

        let buffer = Buffer::new(
            device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;

        commands.one_time_submit(QueueKind::Transfer, |cmd| {
            let region = vk::BufferCopy::builder().size(size).build();
            unsafe {
                device
                    .device
                    .cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region])
            };
            Ok(())
        })?;

        log::debug!("Uploaded {} bytes to {} buffer", size, name);
        Ok(buffer)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

/// One persistently mapped uniform buffer per frame in flight
pub struct UniformBuffers {
    buffers: Vec<Buffer>,
}

impl UniformBuffers {
    pub fn new(device: &Arc<VulkanDevice>, frames: usize) -> Result<Self> {
        let size = std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize;

        let buffers = (0..frames)
            .map(|i| {
                Buffer::new(
                    device,
                    size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    &format!("uniform {}", i),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { buffers })
    }

    pub fn update(&mut self, frame: usize, ubo: &UniformBufferObject) -> Result<()> {
        self.buffers
            .get_mut(frame)
            .with_context(|| format!("No uniform buffer for frame {}", frame))?
            .write(std::slice::from_ref(ubo))
    }

    pub fn descriptor_info(&self, frame: usize) -> Option<vk::DescriptorBufferInfo> {
        self.buffers.get(frame).map(|buffer| {
            vk::DescriptorBufferInfo::builder()
                .buffer(buffer.buffer)
                .offset(0)
                .range(buffer.size)
                .build()
        })
    }
}
