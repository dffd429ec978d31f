//! Depth attachment for the output render pass.
//!
//! The format is the first entry of [`DEPTH_FORMAT_CANDIDATES`] the GPU can
//! use as an optimal-tiling depth/stencil attachment.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult, VkResultExt};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 4] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Returns the first candidate accepted by `is_supported`.
pub fn first_supported_format(
    candidates: &[vk::Format],
    mut is_supported: impl FnMut(vk::Format) -> bool,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| is_supported(format))
}

/// Whether `format` carries a stencil component.
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Picks the depth format for `physical_device`.
///
/// # Errors
///
/// Returns [`RhiError::Configuration`] if none of the candidates is usable.
pub fn select_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> RhiResult<vk::Format> {
    let format = first_supported_format(&DEPTH_FORMAT_CANDIDATES, |format| {
        let properties =
            unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    .ok_or_else(|| {
        RhiError::Configuration("GPU supports none of the depth attachment formats".to_string())
    })?;

    debug!("Selected depth format {:?}", format);
    Ok(format)
}

/// Depth image, its memory and its view.
///
/// Partially built attachments release whatever they hold on drop, so a
/// failure midway through [`DepthAttachment::new`] leaks nothing.
pub struct DepthAttachment {
    device: Arc<Device>,
    image: vk::Image,
    image_view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl DepthAttachment {
    pub fn new(device: Arc<Device>, extent: vk::Extent2D, format: vk::Format) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidState(
                "depth attachment extent must be non-zero".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None) }
            .during("create depth image")?;

        let mut attachment = Self {
            device,
            image,
            image_view: vk::ImageView::null(),
            allocation: None,
            format,
            extent,
        };

        let device = attachment.device.clone();
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };
        device.require_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            "depth attachment",
        )?;

        let allocation = device.with_allocator(|allocator| {
            Ok(allocator.allocate(&AllocationCreateDesc {
                name: "depth attachment",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        })?;
        // SAFETY: the allocation is alive and stays owned by `attachment`,
        // which also owns `image`, so the memory outlives the binding.
        let bound = unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        attachment.allocation = Some(allocation);
        bound.during("bind depth image memory")?;

        let aspect_mask = if has_stencil(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        attachment.image_view = unsafe { device.handle().create_image_view(&view_info, None) }
            .during("create depth image view")?;

        info!(
            "Created depth attachment: {}x{} ({:?})",
            extent.width, extent.height, format
        );

        Ok(attachment)
    }

    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for DepthAttachment {
    fn drop(&mut self) {
        unsafe {
            if self.image_view != vk::ImageView::null() {
                self.device
                    .handle()
                    .destroy_image_view(self.image_view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            let freed = self
                .device
                .with_allocator(|allocator| Ok(allocator.free(allocation)?));
            if let Err(e) = freed {
                error!("Failed to free depth attachment allocation: {}", e);
            }
        }

        debug!(
            "Destroyed depth attachment: {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_supported_prefers_earlier_candidates() {
        let format = first_supported_format(&DEPTH_FORMAT_CANDIDATES, |_| true);
        assert_eq!(format, Some(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn test_first_supported_falls_back() {
        let format = first_supported_format(&DEPTH_FORMAT_CANDIDATES, |f| {
            matches!(f, vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM)
        });
        assert_eq!(format, Some(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn test_first_supported_none() {
        assert_eq!(first_supported_format(&DEPTH_FORMAT_CANDIDATES, |_| false), None);
    }

    #[test]
    fn test_has_stencil() {
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
        assert!(has_stencil(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil(vk::Format::D16_UNORM));
    }
}
