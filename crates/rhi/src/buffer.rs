//! GPU buffers backed by gpu-allocator.
//!
//! - [`BufferUsage`] picks the usage flags and memory location
//! - [`Buffer`] wraps VkBuffer with its allocation
//!
//! Host-visible buffers stay persistently mapped, so per-frame uniform
//! updates are a plain memory copy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> lumen_rhi::RhiResult<()> {
//! let uniforms = Buffer::new(device, BufferUsage::Uniform, 256, "scene uniforms")?;
//! uniforms.write_pod(0, &[0.0f32; 16])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult, VkResultExt};

/// How a buffer is used; decides usage flags and memory location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Shader uniforms rewritten by the CPU every frame.
    Uniform,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }

    /// Returns the memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Uniform => MemoryLocation::CpuToGpu,
        }
    }

    /// Memory property flags some memory type must offer for this usage.
    pub fn required_memory_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferUsage::Uniform => vk::MemoryPropertyFlags::HOST_VISIBLE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Uniform => "uniform",
        }
    }
}

/// Checks that `len` bytes at `offset` fit in a buffer of `size` bytes.
fn check_write_range(size: vk::DeviceSize, offset: vk::DeviceSize, len: usize) -> RhiResult<()> {
    let end = offset.checked_add(len as vk::DeviceSize);
    if end.is_none_or(|end| end > size) {
        return Err(RhiError::InvalidState(format!(
            "write of {len} bytes at offset {offset} exceeds buffer of {size} bytes"
        )));
    }
    Ok(())
}

/// GPU buffer wrapper with managed memory.
///
/// Not thread-safe; synchronize access externally when sharing.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer of `size` bytes; `label` names the allocation in logs.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidState`] for a zero size
    /// - [`RhiError::ResourceExhaustion`] if no memory type fits the usage
    /// - [`RhiError::Allocator`] if gpu-allocator cannot place the buffer
    pub fn new(
        device: Arc<Device>,
        usage: BufferUsage,
        size: vk::DeviceSize,
        label: &str,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidState(format!(
                "{label} buffer size must be greater than 0"
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None) }
            .during("create buffer")?;

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device
            .require_memory_type(
                requirements.memory_type_bits,
                usage.required_memory_flags(),
                label,
            )
            .and_then(|_| {
                device.with_allocator(|allocator| {
                    Ok(allocator.allocate(&AllocationCreateDesc {
                        name: label,
                        requirements,
                        location: usage.memory_location(),
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })?)
                })
            });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .during("bind buffer memory");

        let created = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };
        // Drop releases both the allocation and the buffer on failure.
        bound?;

        debug!("Created {} buffer '{}': {} bytes", usage.name(), label, size);

        Ok(created)
    }

    /// Copies `data` into the buffer at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] if the write does not fit or the
    /// buffer is not host-visible.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        check_write_range(self.size, offset, data.len())?;

        let mapped_ptr = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                RhiError::InvalidState(format!("{} buffer is not host-visible", self.usage.name()))
            })?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Copies a plain-old-data value into the buffer at `offset`.
    pub fn write_pod<T: Pod>(&self, offset: vk::DeviceSize, value: &T) -> RhiResult<()> {
        self.write_data(offset, bytemuck::bytes_of(value))
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let freed = self
                .device
                .with_allocator(|allocator| Ok(allocator.free(allocation)?));
            if let Err(e) = freed {
                error!("Failed to free {} buffer allocation: {}", self.usage.name(), e);
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_usage_is_host_visible() {
        let usage = BufferUsage::Uniform;
        assert_eq!(usage.to_vk_usage(), vk::BufferUsageFlags::UNIFORM_BUFFER);
        assert_eq!(usage.memory_location(), MemoryLocation::CpuToGpu);
        assert_eq!(
            usage.required_memory_flags(),
            vk::MemoryPropertyFlags::HOST_VISIBLE
        );
        assert_eq!(usage.name(), "uniform");
    }

    #[test]
    fn test_check_write_range() {
        assert!(check_write_range(64, 0, 64).is_ok());
        assert!(check_write_range(64, 32, 32).is_ok());
        assert!(check_write_range(64, 33, 32).is_err());
        assert!(check_write_range(64, u64::MAX, 1).is_err());
    }

    #[test]
    fn test_buffer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Buffer>();
    }
}
