//! Synchronization primitives.
//!
//! - [`Semaphore`] orders GPU work across queue operations
//! - [`Fence`] lets the host wait on GPU completion
//! - [`SyncTriple`] bundles the three objects one frame slot needs
//!
//! # Frame protocol
//!
//! ```text
//! 1. Wait on the slot fence (CPU waits for the GPU to release the slot)
//! 2. Acquire a surface image, signaling image_available
//! 3. Reset the slot fence once an image was actually acquired
//! 4. Submit: wait image_available, signal render_finished and the fence
//! 5. Present, waiting on render_finished
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::device::Device;
use crate::error::{RhiResult, VkResultExt};

/// Vulkan semaphore wrapper, created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new semaphore in the unsignaled state.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None) }
            .during("create semaphore")?;

        trace!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        trace!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
///
/// Owns the handle only. Frame pacing waits on and resets the raw handle
/// through [`wait_for_fence`] and [`reset_fence`]; the caller must not reset
/// a fence that a pending submission will signal.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// Pass `signaled = true` for fences that are waited on before the first
    /// submission that would signal them.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence =
            unsafe { device.handle().create_fence(&create_info, None) }.during("create fence")?;

        trace!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        trace!("Destroyed fence");
    }
}

/// Waits on a raw fence handle owned by `device`.
///
/// A timeout surfaces as [`crate::RhiError::Vulkan`] with `TIMEOUT`.
pub fn wait_for_fence(device: &Device, fence: vk::Fence, timeout: u64) -> RhiResult<()> {
    unsafe { device.handle().wait_for_fences(&[fence], true, timeout) }
        .during("wait for in-flight fence")
}

/// Resets a raw fence handle owned by `device`.
pub fn reset_fence(device: &Device, fence: vk::Fence) -> RhiResult<()> {
    unsafe { device.handle().reset_fences(&[fence]) }.during("reset in-flight fence")
}

/// The synchronization objects of one frame slot.
///
/// The fence starts signaled so the first admission of the slot does not
/// block.
pub struct SyncTriple {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl SyncTriple {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Signaled by image acquisition, waited on by the frame's submission.
    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    /// Signaled by the frame's submission, waited on by presentation.
    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    /// Signaled when the slot's submission retires.
    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}
