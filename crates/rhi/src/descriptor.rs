//! Descriptor set management for shader resource binding.
//!
//! - [`DescriptorSetLayout`] defines the layout of shader bindings
//! - [`DescriptorPool`] hands out descriptor sets; each frame slot owns one
//! - [`pool_sizes`] turns a [`DescriptorPoolConfig`] budget into pool sizes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use lumen_core::DescriptorPoolConfig;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
//!
//! # fn example(device: Arc<Device>) -> lumen_rhi::RhiResult<()> {
//! let binding = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
//! let layout = DescriptorSetLayout::new(device.clone(), &[binding])?;
//!
//! let pool = DescriptorPool::from_config(device.clone(), &DescriptorPoolConfig::default())?;
//! let set = pool.allocate(layout.handle())?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use lumen_core::DescriptorPoolConfig;
use tracing::{debug, error, trace};

use crate::device::Device;
use crate::error::{RhiError, RhiResult, VkResultExt};

/// Descriptor set layout wrapper.
///
/// Immutable after creation; share it behind `Arc` when several owners need it.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a new descriptor set layout from `bindings`.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)
        }
        .during("create descriptor set layout")?;

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    /// Returns the Vulkan descriptor set layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Converts a per-pool budget into pool sizes, skipping zero counts.
pub fn pool_sizes(config: &DescriptorPoolConfig) -> Vec<vk::DescriptorPoolSize> {
    [
        (vk::DescriptorType::UNIFORM_BUFFER, config.uniform_buffers),
        (vk::DescriptorType::STORAGE_BUFFER, config.storage_buffers),
        (
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            config.combined_image_samplers,
        ),
    ]
    .into_iter()
    .filter(|&(_, count)| count > 0)
    .map(|(ty, count)| vk::DescriptorPoolSize::default().ty(ty).descriptor_count(count))
    .collect()
}

/// Descriptor pool for allocating descriptor sets.
///
/// Sets are never freed individually; the whole pool is reset once the
/// frame that used them has retired.
///
/// Pool operations are not thread-safe. Synchronize access externally when
/// sharing between threads.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a new descriptor pool.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Configuration`] for an empty budget, or a Vulkan
    /// error if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        if max_sets == 0 || pool_sizes.is_empty() {
            return Err(RhiError::Configuration(
                "descriptor pool needs at least one set and one descriptor type".to_string(),
            ));
        }

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None) }
            .during("create descriptor pool")?;

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Creates a pool sized by `config`.
    pub fn from_config(device: Arc<Device>, config: &DescriptorPoolConfig) -> RhiResult<Self> {
        Self::new(device, config.max_sets, &pool_sizes(config))
    }

    /// Allocates a single descriptor set with `layout`.
    ///
    /// # Errors
    ///
    /// An exhausted or fragmented pool is reported as
    /// [`RhiError::ResourceExhaustion`]; the pool itself stays usable.
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = match unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets,
            Err(
                status @ (vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL),
            ) => {
                error!(
                    "Descriptor pool exhausted ({:?}, max_sets={})",
                    status, self.max_sets
                );
                return Err(RhiError::ResourceExhaustion {
                    context: format!(
                        "descriptor set allocation ({status:?}, pool of {} sets)",
                        self.max_sets
                    ),
                });
            }
            Err(status) => return Err(RhiError::vulkan("allocate descriptor set", status)),
        };

        trace!("Allocated descriptor set");

        sets.into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidState("driver returned no descriptor set".to_string()))
    }

    /// Returns every set allocated from this pool.
    ///
    /// No set from this pool may be in use by the GPU.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
        }
        .during("reset descriptor pool")?;

        trace!("Reset descriptor pool");

        Ok(())
    }

    /// Returns the Vulkan descriptor pool handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Returns the maximum number of sets that can be allocated from this pool.
    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Writes resource bindings into descriptor sets.
pub fn update_descriptor_sets(device: &Device, writes: &[vk::WriteDescriptorSet]) {
    if writes.is_empty() {
        return;
    }

    unsafe {
        device.handle().update_descriptor_sets(writes, &[]);
    }

    trace!("Updated {} descriptor set(s)", writes.len());
}

/// Binds `buffer` to a uniform-buffer binding of `set`.
pub fn write_uniform_buffer(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    let buffer_infos = [buffer_info(buffer, 0, range)];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&buffer_infos);

    update_descriptor_sets(device, &[write]);
}

/// Creates a buffer info for descriptor set updates.
///
/// Pass `vk::WHOLE_SIZE` as `range` to bind the entire buffer.
#[inline]
pub fn buffer_info(
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range)
}

/// Shorthand constructors for single-descriptor layout bindings.
///
/// ```no_run
/// use ash::vk;
/// use lumen_rhi::descriptor::DescriptorBindingBuilder;
///
/// let bindings = [DescriptorBindingBuilder::uniform_buffer(
///     0,
///     vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
/// )];
/// ```
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    fn single(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_binding_builder_uniform_buffer() {
        let binding = DescriptorBindingBuilder::uniform_buffer(
            0,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        );
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert!(binding.stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_pool_sizes_from_default_config() {
        let sizes = pool_sizes(&DescriptorPoolConfig::default());
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 32);
        assert_eq!(sizes[1].ty, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(sizes[1].descriptor_count, 8);
    }

    #[test]
    fn test_pool_sizes_skip_zero_counts() {
        let config = DescriptorPoolConfig {
            max_sets: 4,
            uniform_buffers: 4,
            storage_buffers: 0,
            combined_image_samplers: 0,
        };
        let sizes = pool_sizes(&config);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn test_buffer_info_helper() {
        let info = buffer_info(vk::Buffer::null(), 64, 128);
        assert_eq!(info.buffer, vk::Buffer::null());
        assert_eq!(info.offset, 64);
        assert_eq!(info.range, 128);
    }
}
