//! Physical device (GPU) selection.
//!
//! This module handles GPU enumeration and capability scoring.
//!
//! # Overview
//!
//! Selection works in three steps:
//! 1. Snapshot every GPU into a [`PhysicalDeviceInfo`]
//! 2. Score each snapshot with [`score_device`]; GPUs without a graphics and
//!    a present queue family, or missing a required extension, are
//!    disqualified outright
//! 3. Keep the highest score, breaking ties by enumeration order
//!    ([`pick_best`])
//!
//! Scoring and queue-family resolution are plain functions over the snapshot,
//! so they can be exercised without a GPU.
//!
//! # Example
//!
//! ```no_run
//! use lumen_core::GraphicsConfig;
//! use lumen_rhi::instance::Instance;
//! use lumen_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! let instance = Instance::new(&GraphicsConfig::default(), &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let device_info = select_physical_device(
//!     instance.handle(),
//!     surface,
//!     &surface_loader,
//!     &[ash::khr::swapchain::NAME],
//! )
//! .expect("No suitable GPU found");
//!
//! println!("Selected GPU: {}", device_info.device_name());
//! ```

use std::ffi::{CStr, CString};

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult, VkResultExt};

/// Bonus for discrete GPUs. Larger than any integrated GPU can reach.
pub const DISCRETE_GPU_BONUS: u64 = 500_000;
/// Bonus for integrated GPUs. Larger than any virtual, CPU or unknown device
/// can reach.
pub const INTEGRATED_GPU_BONUS: u64 = 50_000;
/// Bonus per supported optional feature.
pub const OPTIONAL_FEATURE_BONUS: u64 = 1_000;

/// Queue family indices for the queues the subsystem uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Index of the queue family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// Index of the queue family that can present to the target surface.
    pub present_family: Option<u32>,
    /// Index of the queue family used for transfers. Falls back to the
    /// graphics family when the GPU has no dedicated transfer family.
    pub transfer_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Checks if the minimum required queue families are available.
    ///
    /// For rendering, we need at least graphics and present queue families.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Returns the distinct family indices, in graphics, present, transfer
    /// order. One queue is created per entry.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);

        for family in [
            self.graphics_family,
            self.present_family,
            self.transfer_family,
        ]
        .into_iter()
        .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }

        families
    }
}

/// Immutable snapshot of one candidate GPU.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features.
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Raw queue-family table.
    pub queue_family_properties: Vec<vk::QueueFamilyProperties>,
    /// Queue families resolved for the target surface.
    pub queue_families: QueueFamilyIndices,
    /// Device extensions the GPU supports.
    pub extensions: Vec<CString>,
}

impl PhysicalDeviceInfo {
    /// Returns the device name.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Whether the GPU advertises the named device extension.
    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|ext| ext.as_c_str() == name)
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Scores a candidate GPU. `None` means the GPU is disqualified.
///
/// The score is the sum of, in evaluation order:
/// - a device-type bonus ([`DISCRETE_GPU_BONUS`], [`INTEGRATED_GPU_BONUS`],
///   nothing for other types)
/// - the maximum 2D image dimension
/// - [`OPTIONAL_FEATURE_BONUS`] each for geometry shaders, tessellation
///   shaders and any block texture compression format
pub fn score_device(info: &PhysicalDeviceInfo, required_extensions: &[&CStr]) -> Option<u64> {
    if !info.queue_families.is_complete() {
        debug!(
            "GPU '{}' disqualified: missing queue families (graphics={}, present={})",
            info.device_name(),
            info.queue_families.graphics_family.is_some(),
            info.queue_families.present_family.is_some()
        );
        return None;
    }

    if let Some(missing) = required_extensions
        .iter()
        .find(|&&ext| !info.supports_extension(ext))
    {
        debug!(
            "GPU '{}' disqualified: extension {:?} not supported",
            info.device_name(),
            missing
        );
        return None;
    }

    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => DISCRETE_GPU_BONUS,
        vk::PhysicalDeviceType::INTEGRATED_GPU => INTEGRATED_GPU_BONUS,
        _ => 0,
    };

    score += u64::from(info.properties.limits.max_image_dimension2_d);

    let features = &info.features;
    let texture_compression = features.texture_compression_bc == vk::TRUE
        || features.texture_compression_etc2 == vk::TRUE
        || features.texture_compression_astc_ldr == vk::TRUE;
    for supported in [
        features.geometry_shader == vk::TRUE,
        features.tessellation_shader == vk::TRUE,
        texture_compression,
    ] {
        if supported {
            score += OPTIONAL_FEATURE_BONUS;
        }
    }

    Some(score)
}

/// Index of the highest positive score. The first of equal scores wins.
pub fn pick_best(scores: &[Option<u64>]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (index, score) in scores.iter().enumerate() {
        if let Some(score) = *score
            && score > 0
            && best.is_none_or(|(_, best_score)| score > best_score)
        {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index)
}

/// Resolves which queue families to use.
///
/// `supports_present` answers whether a family index can present to the
/// target surface. Presentation prefers the graphics family so both can share
/// one queue; transfer prefers a family with neither graphics nor compute.
pub fn resolve_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    let mut dedicated_transfer = None;
    let mut first_present = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        let flags = family.queue_flags;
        if flags.contains(vk::QueueFlags::GRAPHICS) && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }

        if flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            && dedicated_transfer.is_none()
        {
            dedicated_transfer = Some(i);
        }

        if first_present.is_none() && supports_present(i) {
            first_present = Some(i);
        }
    }

    indices.present_family = match indices.graphics_family {
        Some(graphics) if first_present != Some(graphics) && supports_present(graphics) => {
            Some(graphics)
        }
        _ => first_present,
    };
    indices.transfer_family = dedicated_transfer.or(indices.graphics_family);

    indices
}

/// Selects the most suitable physical device for rendering to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableDevice`] if there are no GPUs or none of
/// them scores above zero.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    required_extensions: &[&CStr],
) -> RhiResult<PhysicalDeviceInfo> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.during("enumerate physical devices")?;

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableDevice);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut candidates = Vec::with_capacity(devices.len());
    for device in devices {
        candidates.push(query_device(instance, device, surface, surface_loader)?);
    }

    let scores: Vec<Option<u64>> = candidates
        .iter()
        .map(|info| {
            let score = score_device(info, required_extensions);
            debug!(
                "GPU '{}' ({}) - Score: {:?}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            score
        })
        .collect();

    let Some(best) = pick_best(&scores) else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableDevice);
    };
    let selected = candidates.swap_remove(best);

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}, {} MiB device-local",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        scores[best].unwrap_or_default(),
        selected.device_local_memory() / (1024 * 1024)
    );

    Ok(selected)
}

fn query_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let queue_family_properties =
        unsafe { instance.get_physical_device_queue_family_properties(device) };

    let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
        .during("enumerate device extensions")?
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect();

    let queue_families = resolve_queue_families(&queue_family_properties, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, index, surface)
            .unwrap_or(false)
    });

    Ok(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_family_properties,
        queue_families,
        extensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn candidate(
        device_type: vk::PhysicalDeviceType,
        max_dimension: u32,
        complete: bool,
    ) -> PhysicalDeviceInfo {
        let properties = vk::PhysicalDeviceProperties {
            device_type,
            limits: vk::PhysicalDeviceLimits {
                max_image_dimension2_d: max_dimension,
                ..Default::default()
            },
            ..Default::default()
        };
        PhysicalDeviceInfo {
            device: vk::PhysicalDevice::null(),
            properties,
            features: vk::PhysicalDeviceFeatures::default(),
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            queue_family_properties: vec![family(vk::QueueFlags::GRAPHICS)],
            queue_families: QueueFamilyIndices {
                graphics_family: Some(0),
                present_family: complete.then_some(0),
                transfer_family: Some(0),
            },
            extensions: vec![CString::from(ash::khr::swapchain::NAME)],
        }
    }

    const REQUIRED: &[&CStr] = &[ash::khr::swapchain::NAME];

    #[test]
    fn test_unique_families_deduplicates() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
            transfer_family: Some(2),
        };
        assert_eq!(indices.unique_families(), vec![0, 2]);

        let all_same = QueueFamilyIndices {
            graphics_family: Some(1),
            present_family: Some(1),
            transfer_family: Some(1),
        };
        assert_eq!(all_same.unique_families(), vec![1]);
    }

    #[test]
    fn test_queue_family_indices_incomplete() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            ..Default::default()
        };
        assert!(!indices.is_complete());
        assert!(!QueueFamilyIndices::default().is_complete());
    }

    #[test]
    fn test_resolve_prefers_dedicated_transfer() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = resolve_queue_families(&families, |i| i == 0);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(0));
        assert_eq!(indices.transfer_family, Some(2));
    }

    #[test]
    fn test_resolve_transfer_falls_back_to_graphics() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        let indices = resolve_queue_families(&families, |_| true);
        assert_eq!(indices.transfer_family, Some(0));
    }

    #[test]
    fn test_resolve_prefers_graphics_family_for_present() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = resolve_queue_families(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));

        // Only a separate family can present.
        let indices = resolve_queue_families(&families, |i| i == 0);
        assert_eq!(indices.present_family, Some(0));
    }

    #[test]
    fn test_resolve_skips_empty_families() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = resolve_queue_families(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_discrete_outscores_integrated_outscores_other() {
        let discrete = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4096, true);
        let integrated = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 32768, true);
        let cpu = candidate(vk::PhysicalDeviceType::CPU, 32768, true);

        let d = score_device(&discrete, REQUIRED).unwrap();
        let i = score_device(&integrated, REQUIRED).unwrap();
        let c = score_device(&cpu, REQUIRED).unwrap();
        assert!(d > i);
        assert!(i > c);
        assert_eq!(d, DISCRETE_GPU_BONUS + 4096);
    }

    #[test]
    fn test_optional_features_add_bonus() {
        let mut info = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 8192, true);
        let base = score_device(&info, REQUIRED).unwrap();

        info.features.geometry_shader = vk::TRUE;
        info.features.tessellation_shader = vk::TRUE;
        info.features.texture_compression_etc2 = vk::TRUE;
        info.features.texture_compression_bc = vk::TRUE;
        let boosted = score_device(&info, REQUIRED).unwrap();

        // Texture compression counts once regardless of how many formats.
        assert_eq!(boosted - base, 3 * OPTIONAL_FEATURE_BONUS);
    }

    #[test]
    fn test_disqualified_devices_are_never_chosen() {
        let missing_present = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, false);
        assert_eq!(score_device(&missing_present, REQUIRED), None);

        let mut missing_extension = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, true);
        missing_extension.extensions.clear();
        assert_eq!(score_device(&missing_extension, REQUIRED), None);

        let weak = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 1024, true);
        let scores: Vec<_> = [missing_present, missing_extension, weak]
            .iter()
            .map(|info| score_device(info, REQUIRED))
            .collect();
        assert_eq!(pick_best(&scores), Some(2));
    }

    #[test]
    fn test_pick_best_first_max_wins() {
        assert_eq!(pick_best(&[Some(10), Some(30), Some(30), Some(5)]), Some(1));
        assert_eq!(pick_best(&[None, Some(7)]), Some(1));
    }

    #[test]
    fn test_pick_best_requires_positive_score() {
        assert_eq!(pick_best(&[]), None);
        assert_eq!(pick_best(&[None, None]), None);
        assert_eq!(pick_best(&[Some(0)]), None);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let infos = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384, true),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 8192, true),
            candidate(vk::PhysicalDeviceType::VIRTUAL_GPU, 16384, true),
        ];
        let run = || {
            let scores: Vec<_> = infos.iter().map(|i| score_device(i, REQUIRED)).collect();
            pick_best(&scores)
        };
        assert_eq!(run(), Some(1));
        assert_eq!(run(), run());
    }
}
