//! Frame slots and the acquire → record → submit → present cycle.
//!
//! Each of the `max_frames_in_flight` slots owns a command buffer, a
//! descriptor pool, a scene uniform buffer with its descriptor set, and a
//! [`SyncTriple`]. Slot rotation and fence bookkeeping live in
//! [`FramePacer`]; this module supplies the device-backed fences and the
//! GPU resources around it.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, trace, warn};

use lumen_core::GraphicsConfig;
use lumen_rhi::buffer::{Buffer, BufferUsage};
use lumen_rhi::command::{CommandBuffer, CommandPool};
use lumen_rhi::descriptor::{DescriptorPool, write_uniform_buffer};
use lumen_rhi::device::Device;
use lumen_rhi::surface_chain::{AcquireOutcome, PresentOutcome, SurfaceChain};
use lumen_rhi::sync::{self, SyncTriple};
use lumen_rhi::{RhiError, RhiResult};

use crate::pacing::{FenceOps, FramePacer};
use crate::scene::{CameraMatrices, SceneLight, SceneUniforms};

/// Binding of the scene uniform block in the scene descriptor set.
pub const SCENE_UNIFORM_BINDING: u32 = 0;

/// Outcome of a frame step that may find the surface chain stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus<T> {
    Ready(T),
    /// The surface chain must be recreated before the next frame.
    RecreateNeeded,
}

impl<T> FrameStatus<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, FrameStatus::Ready(_))
    }
}

/// What [`FrameOrchestrator::acquire`] hands back for a started frame.
#[derive(Debug, Clone, Copy)]
pub struct AcquiredFrame {
    pub slot: usize,
    pub image_index: u32,
    /// Command buffer of the slot, already in the recording state.
    pub command_buffer: vk::CommandBuffer,
    pub scene_set: vk::DescriptorSet,
    /// The image can be presented but no longer matches the surface exactly.
    pub suboptimal: bool,
}

/// Fence operations against the real device, waiting without a timeout.
struct DeviceFences<'a>(&'a Device);

impl FenceOps for DeviceFences<'_> {
    type Fence = vk::Fence;

    fn wait(&mut self, fence: vk::Fence) -> RhiResult<()> {
        sync::wait_for_fence(self.0, fence, u64::MAX)
    }

    fn reset(&mut self, fence: vk::Fence) -> RhiResult<()> {
        sync::reset_fence(self.0, fence)
    }
}

/// Resources of one frame in flight.
struct FrameSlot {
    command_buffer: CommandBuffer,
    descriptor_pool: DescriptorPool,
    uniform_buffer: Buffer,
    scene_set: vk::DescriptorSet,
    sync: SyncTriple,
}

impl FrameSlot {
    fn new(
        device: &Arc<Device>,
        command_pool: &CommandPool,
        scene_layout: vk::DescriptorSetLayout,
        config: &GraphicsConfig,
        index: usize,
    ) -> RhiResult<Self> {
        let command_buffer = CommandBuffer::new(device.clone(), command_pool)?;
        let descriptor_pool = DescriptorPool::from_config(device.clone(), &config.descriptor_pool)?;
        let uniform_buffer = Buffer::new(
            device.clone(),
            BufferUsage::Uniform,
            SceneUniforms::SIZE as vk::DeviceSize,
            &format!("scene uniforms {index}"),
        )?;
        uniform_buffer.write_pod(0, &SceneUniforms::default())?;
        let sync = SyncTriple::new(device.clone())?;

        let mut slot = Self {
            command_buffer,
            descriptor_pool,
            uniform_buffer,
            scene_set: vk::DescriptorSet::null(),
            sync,
        };
        slot.rebind_scene_set(device, scene_layout)?;

        debug!("Created frame slot {}", index);
        Ok(slot)
    }

    /// Returns every set to the pool and allocates a fresh scene set.
    ///
    /// The slot's previous submission must have retired.
    fn recycle(&mut self, device: &Device, scene_layout: vk::DescriptorSetLayout) -> RhiResult<()> {
        self.descriptor_pool.reset()?;
        self.rebind_scene_set(device, scene_layout)?;
        self.command_buffer.reset()
    }

    fn rebind_scene_set(
        &mut self,
        device: &Device,
        scene_layout: vk::DescriptorSetLayout,
    ) -> RhiResult<()> {
        self.scene_set = self.descriptor_pool.allocate(scene_layout)?;
        write_uniform_buffer(
            device,
            self.scene_set,
            SCENE_UNIFORM_BINDING,
            self.uniform_buffer.handle(),
            SceneUniforms::SIZE as vk::DeviceSize,
        );
        Ok(())
    }
}

/// Owns the frame slots and drives one frame at a time.
///
/// The orchestrator never owns the surface chain; every step that talks to
/// it borrows the chain from the caller.
///
/// Dropping it waits for the device to go idle before any slot object is
/// destroyed.
pub struct FrameOrchestrator {
    // Slots hold command buffers allocated from `command_pool`, so they are
    // declared (and dropped) first.
    slots: Vec<FrameSlot>,
    command_pool: CommandPool,
    pacer: FramePacer<vk::Fence>,
    scene_layout: vk::DescriptorSetLayout,
    device: Arc<Device>,
    warned_light_overflow: bool,
}

impl FrameOrchestrator {
    /// Creates `config.max_frames_in_flight` slots for `chain`.
    ///
    /// `scene_layout` must describe a uniform buffer at
    /// [`SCENE_UNIFORM_BINDING`] and outlive the orchestrator.
    pub fn new(
        device: Arc<Device>,
        chain: &SurfaceChain,
        scene_layout: vk::DescriptorSetLayout,
        config: &GraphicsConfig,
    ) -> RhiResult<Self> {
        if config.max_frames_in_flight == 0 {
            return Err(RhiError::Configuration(
                "max_frames_in_flight must be at least 1".to_string(),
            ));
        }

        let graphics_family = device.queue_families().graphics_family.ok_or_else(|| {
            RhiError::InvalidState("device has no graphics queue family".to_string())
        })?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let slots = (0..config.max_frames_in_flight)
            .map(|index| FrameSlot::new(&device, &command_pool, scene_layout, config, index))
            .collect::<RhiResult<Vec<_>>>()?;

        let fences = slots.iter().map(|slot| slot.sync.in_flight().handle()).collect();
        let pacer = FramePacer::new(fences, chain.image_count())?;

        info!(
            "Frame orchestrator ready: {} frames in flight, {} surface images",
            slots.len(),
            chain.image_count()
        );

        Ok(Self {
            slots,
            command_pool,
            pacer,
            scene_layout,
            device,
            warned_light_overflow: false,
        })
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot used by the current (or next) frame.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.pacer.slot()
    }

    /// Frames submitted so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.pacer.frame_number()
    }

    /// Whether a frame has been acquired and not yet submitted.
    #[inline]
    pub fn in_frame(&self) -> bool {
        self.pacer.image().is_some()
    }

    /// Admission, acquisition and command-buffer begin for the next frame.
    ///
    /// Blocks until the slot's previous submission retired and until the
    /// acquired image is no longer guarded by another slot's fence.
    pub fn acquire(&mut self, chain: &SurfaceChain) -> RhiResult<FrameStatus<AcquiredFrame>> {
        let slot_index = self.pacer.admit(&mut DeviceFences(&self.device))?;
        let slot = &mut self.slots[slot_index];
        slot.recycle(&self.device, self.scene_layout)?;

        let (image_index, suboptimal) = match chain.acquire_next_image(slot.sync.image_available())?
        {
            AcquireOutcome::Image { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("Surface chain out of date at acquire");
                return Ok(FrameStatus::RecreateNeeded);
            }
        };
        if suboptimal {
            trace!("Acquired suboptimal image {}", image_index);
        }

        self.pacer
            .claim_image(&mut DeviceFences(&self.device), image_index)?;

        let slot = &self.slots[slot_index];
        slot.command_buffer.begin()?;

        trace!(
            "Frame {} acquired: slot {}, image {}",
            self.pacer.frame_number(),
            slot_index,
            image_index
        );

        Ok(FrameStatus::Ready(AcquiredFrame {
            slot: slot_index,
            image_index,
            command_buffer: slot.command_buffer.handle(),
            scene_set: slot.scene_set,
            suboptimal,
        }))
    }

    /// Ends recording, submits the slot and presents its image.
    ///
    /// The slot advances even when presentation asks for a recreate, since
    /// the submission is already on the GPU timeline.
    pub fn submit_and_present(&mut self, chain: &SurfaceChain) -> RhiResult<FrameStatus<()>> {
        let image_index = self.pacer.image().ok_or_else(|| {
            RhiError::InvalidState("no acquired frame to submit".to_string())
        })?;
        let slot = &self.slots[self.pacer.slot()];

        slot.command_buffer.end()?;

        let wait_semaphores = [slot.sync.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.command_buffer.handle()];
        let signal_semaphores = [slot.sync.render_finished()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer finished recording above, and the slot
        // fence was reset when the image was claimed.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], slot.sync.in_flight().handle())?;
        }

        let presented = chain.present(
            self.device.present_queue(),
            image_index,
            slot.sync.render_finished(),
        );
        self.pacer.advance();

        match presented? {
            PresentOutcome::Presented => Ok(FrameStatus::Ready(())),
            PresentOutcome::RecreateNeeded => {
                debug!("Surface chain stale at present");
                Ok(FrameStatus::RecreateNeeded)
            }
        }
    }

    /// Resizes the image table after the chain was rebuilt.
    ///
    /// The device must be idle.
    pub fn on_surface_chain_rebuilt(&mut self, image_count: usize) {
        self.pacer.reset_images(image_count);
        debug!("Image table reset for {} surface images", image_count);
    }

    /// Allocates a set from `slot`'s pool. It stays valid until that slot is
    /// admitted again.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] unless `slot` belongs to the open frame.
    /// A set allocated between frames would be freed by the next admission
    /// of that slot before it was ever used.
    pub fn allocate_descriptor_set(
        &self,
        slot: usize,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        require_open_slot(self.pacer.open_slot(), slot)?;
        self.slots[slot].descriptor_pool.allocate(layout)
    }

    /// Writes the scene payload into the current slot's uniform buffer.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] outside an acquired frame.
    pub fn update_scene_uniforms(
        &mut self,
        camera: &CameraMatrices,
        lights: &[SceneLight],
    ) -> RhiResult<()> {
        if !self.in_frame() {
            return Err(RhiError::InvalidState(
                "scene uniforms can only be updated inside an acquired frame".to_string(),
            ));
        }

        let (uniforms, truncated) = SceneUniforms::new(camera, lights);
        if truncated && !self.warned_light_overflow {
            warn!(
                "{} lights submitted, only the first {} are uploaded",
                lights.len(),
                uniforms.light_count
            );
            self.warned_light_overflow = true;
        }

        self.slots[self.pacer.slot()]
            .uniform_buffer
            .write_pod(0, &uniforms)
    }

    /// Command buffer of the acquired frame, for recording.
    pub fn recorder(&self) -> Option<&CommandBuffer> {
        self.pacer
            .image()
            .map(|_| &self.slots[self.pacer.slot()].command_buffer)
    }

    /// Queue family the command buffers were allocated for.
    pub fn queue_family_index(&self) -> u32 {
        self.command_pool.queue_family_index()
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        debug!(
            "Destroying frame orchestrator after {} frames",
            self.pacer.frame_number()
        );
        // Slot buffers, pools and sync objects may still be referenced by
        // submitted work.
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle before frame teardown: {}", e);
        }
    }
}

/// Checks that `slot` is the slot of the open frame.
fn require_open_slot(open: Option<usize>, slot: usize) -> RhiResult<()> {
    match open {
        Some(open) if open == slot => Ok(()),
        Some(open) => Err(RhiError::InvalidState(format!(
            "frame slot {slot} is not the open frame's slot {open}"
        ))),
        None => Err(RhiError::InvalidState(format!(
            "cannot allocate from frame slot {slot} outside a frame"
        ))),
    }
}
