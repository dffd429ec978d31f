//! Vulkan logical device and queue management.
//!
//! This module handles VkDevice creation, queue retrieval, memory-type lookup
//! and gpu-allocator initialization.
//!
//! # Overview
//!
//! The [`Device`] struct provides a safe abstraction over the Vulkan logical device,
//! including:
//! - One queue per distinct family (graphics, presentation, transfer)
//! - Memory allocation via gpu-allocator
//! - [`find_memory_type`] for raw memory-type queries
//!
//! # Example
//!
//! ```no_run
//! use lumen_core::GraphicsConfig;
//! use lumen_rhi::instance::Instance;
//! use lumen_rhi::physical_device::select_physical_device;
//! use lumen_rhi::device::Device;
//! use ash::vk;
//!
//! let instance = Instance::new(&GraphicsConfig::default(), &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//! let extensions = [ash::khr::swapchain::NAME];
//!
//! let info = select_physical_device(instance.handle(), surface, &surface_loader, &extensions)
//!     .expect("No suitable GPU found");
//! let device = Device::new(&instance, &info, &extensions).expect("Failed to create device");
//!
//! let graphics_queue = device.graphics_queue();
//! let present_queue = device.present_queue();
//! ```

use std::ffi::{CStr, c_char};
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult, VkResultExt};
use crate::instance::Instance;
use crate::lifecycle::Subsystem;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Returns the first memory type allowed by `type_bits` whose flags include
/// every flag in `required`.
///
/// `None` means no memory type qualifies; callers treat that as fatal for the
/// allocation they were about to make.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
}

/// Vulkan logical device wrapper.
///
/// Shared as `Arc<Device>` by every component that creates GPU objects. The
/// allocator is released before the device is destroyed.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// Properties of the selected GPU, kept for limits and memory lookups.
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// GPU memory allocator; `None` once the device has shut down.
    allocator: Mutex<Option<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    /// Transfer queue (the graphics queue when no dedicated family exists).
    transfer_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    destroyed: bool,
}

impl Device {
    /// Creates the logical device.
    ///
    /// One queue is requested per distinct family at priority 1.0, and
    /// `extensions` are enabled. Sampler anisotropy is enabled when the GPU
    /// supports it.
    ///
    /// # Errors
    ///
    /// - [`RhiError::Configuration`] if the queue families are incomplete
    /// - [`RhiError::DeviceCreation`] if `vkCreateDevice` fails
    /// - [`RhiError::Allocator`] if the allocator cannot be created
    pub fn new(
        instance: &Instance,
        info: &PhysicalDeviceInfo,
        extensions: &[&CStr],
    ) -> RhiResult<Arc<Self>> {
        let queue_families = info.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::Configuration(format!(
                "GPU '{}' has no graphics or present queue family",
                info.device_name()
            )));
        };
        let transfer_family = queue_families.transfer_family.unwrap_or(graphics_family);

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(info.features.sampler_anisotropy == vk::TRUE);

        let extension_names: Vec<*const c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(info.device, &create_info, None)
        }
        .map_err(RhiError::DeviceCreation)?;

        info!(
            "Logical device created on '{}' with {} extension(s)",
            info.device_name(),
            extensions.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        let transfer_queue = unsafe { device.get_device_queue(transfer_family, 0) };
        debug!(
            "Queues retrieved: graphics={}, present={}, transfer={}",
            graphics_family, present_family, transfer_family
        );

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: info.device,
            properties: info.properties,
            memory_properties: info.memory_properties,
            allocator: Mutex::new(Some(allocator)),
            graphics_queue,
            present_queue,
            transfer_queue,
            queue_families,
            destroyed: false,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the properties of the selected GPU.
    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns the transfer queue handle.
    #[inline]
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Looks up a memory type on this device. See [`find_memory_type`].
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        find_memory_type(&self.memory_properties, type_bits, required)
    }

    /// Like [`Device::find_memory_type`], but reports a miss as
    /// [`RhiError::ResourceExhaustion`] naming `context`.
    pub fn require_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
        context: &str,
    ) -> RhiResult<u32> {
        self.find_memory_type(type_bits, required).ok_or_else(|| {
            error!(
                "No memory type for {} (type bits {:#x}, flags {:?})",
                context, type_bits, required
            );
            RhiError::ResourceExhaustion {
                context: format!("no memory type with {required:?} for {context}"),
            }
        })
    }

    /// Runs `f` with exclusive access to the allocator.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] if the allocator lock is poisoned or
    /// the device has already shut down, otherwise whatever `f` returns.
    pub fn with_allocator<R>(
        &self,
        f: impl FnOnce(&mut Allocator) -> RhiResult<R>,
    ) -> RhiResult<R> {
        let mut guard = self
            .allocator
            .lock()
            .map_err(|_| RhiError::InvalidState("allocator lock poisoned".to_string()))?;
        let allocator = guard
            .as_mut()
            .ok_or_else(|| RhiError::InvalidState("device has shut down".to_string()))?;
        f(allocator)
    }

    /// Waits for the device to become idle.
    ///
    /// Blocks until all outstanding operations on all queues have completed.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle() }.during("wait for device idle")
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and recorded
    /// - Synchronization is properly handled
    /// - The fence (if provided) is unsignaled and not in use
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)
        }
        .during("submit to the graphics queue")
    }
}

impl Subsystem for Device {
    fn name(&self) -> &'static str {
        "device"
    }

    fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during shutdown: {:?}", e);
            }
        }

        // The allocator frees its memory blocks through the device, so it
        // must go first.
        match self.allocator.get_mut() {
            Ok(allocator) => drop(allocator.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }

        unsafe {
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Safety: Device is Send+Sync because:
// - ash::Device is Send+Sync
// - vk::PhysicalDevice and vk::Queue are Copy handles
// - the allocator is protected by a Mutex
// - queue submission goes through &self only from the frame thread
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn test_find_memory_type_empty_type_bits() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        assert_eq!(
            find_memory_type(&props, 0x0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
    }

    #[test]
    fn test_find_memory_type_requires_superset() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let coherent = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, coherent]);

        assert_eq!(find_memory_type(&props, 0b111, host), Some(1));
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_COHERENT),
            Some(2)
        );
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::LAZILY_ALLOCATED),
            None
        );
    }

    #[test]
    fn test_find_memory_type_ignores_types_past_count() {
        let mut props = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(
            find_memory_type(&props, u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn test_device_is_send_sync() {
        // Compile-time check that Device is Send + Sync
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
