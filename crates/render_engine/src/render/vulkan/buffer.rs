//! Buffer management for vertex, index, and uniform data
//!
//! Memory management following RAII patterns with proper allocation and
//! cleanup. Uniform storage for materials is written through the offset
//! interface so one buffer can back many draws.

use std::mem;

use ash::{vk, Device, Instance};

use crate::render::vulkan::{VulkanError, VulkanResult};

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a new buffer with memory allocation
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = find_memory_type(
            instance,
            physical_device,
            mem_requirements.memory_type_bits,
            properties,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe {
            device
                .allocate_memory(&alloc_info, None)
                .map_err(VulkanError::Api)?
        };

        unsafe {
            device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(Self {
            device,
            buffer,
            memory,
            size,
        })
    }

    /// Create a host-visible, host-coherent buffer
    pub fn new_host_visible(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        Self::new(
            device,
            instance,
            physical_device,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Write a plain-old-data slice starting at offset zero
    pub fn write_data<T: bytemuck::Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes_at(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes at a byte offset into the buffer
    pub fn write_bytes_at(&self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let end = offset + bytes.len() as vk::DeviceSize;
        if end > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Write of {} bytes at offset {offset} exceeds buffer size {}",
                    bytes.len(),
                    self.size
                ),
            });
        }

        unsafe {
            let mapped = self
                .device
                .map_memory(
                    self.memory,
                    offset,
                    bytes.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped as *mut u8, bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Vertex buffer for interleaved vertex data
pub struct VertexBuffer {
    buffer: Buffer,
    vertex_count: u32,
}

impl VertexBuffer {
    /// Create a vertex buffer from interleaved bytes
    pub fn from_bytes(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        bytes: &[u8],
        vertex_count: u32,
    ) -> VulkanResult<Self> {
        let buffer = Buffer::new_host_visible(
            device,
            instance,
            physical_device,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        buffer.write_bytes_at(0, bytes)?;
        Ok(Self {
            buffer,
            vertex_count,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// Index buffer holding u32 indices
pub struct IndexBuffer {
    buffer: Buffer,
    index_count: u32,
}

impl IndexBuffer {
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        indices: &[u32],
    ) -> VulkanResult<Self> {
        let size = (indices.len() * mem::size_of::<u32>()) as vk::DeviceSize;
        let buffer = Buffer::new_host_visible(
            device,
            instance,
            physical_device,
            size,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        buffer.write_data(indices)?;
        Ok(Self {
            buffer,
            index_count: indices.len() as u32,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Locate a memory type matching the requirement mask and property flags
fn find_memory_type(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let mem_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

    for i in 0..mem_properties.memory_type_count {
        let type_matches = (type_filter & (1 << i)) != 0;
        let props_match = mem_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);
        if type_matches && props_match {
            return Ok(i);
        }
    }

    Err(VulkanError::NoSuitableMemoryType)
}
