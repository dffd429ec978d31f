//! The graphics device facade.
//!
//! [`GraphicsDevice`] composes instance, surface, device, surface chain and
//! frame orchestrator into one lifecycle, and exposes the per-frame
//! contract pass recorders use:
//!
//! ```text
//! begin_frame() -> Ready(ticket) | RecreateNeeded
//!   record into recorder(&ticket)
//! end_frame(ticket) -> Ready(()) | RecreateNeeded
//! recreate_surface_chain(extent) whenever RecreateNeeded was reported
//! ```
//!
//! # Resource Destruction Order
//!
//! Components are torn down in reverse creation order:
//! 1. Frame orchestrator (slots, pools, uniform buffers, sync objects)
//! 2. Scene descriptor set layout
//! 3. Surface chain
//! 4. Logical device
//! 5. Presentation surface
//! 6. Instance

use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use lumen_core::GraphicsConfig;
use lumen_platform::{Surface, SurfaceSource};
use lumen_rhi::command::CommandBuffer;
use lumen_rhi::descriptor::{DescriptorBindingBuilder, DescriptorSetLayout};
use lumen_rhi::device::Device;
use lumen_rhi::instance::Instance;
use lumen_rhi::physical_device::select_physical_device;
use lumen_rhi::surface_chain::{ChainState, RebuildOutcome, SurfaceChain};
use lumen_rhi::{RhiError, RhiResult, Subsystem};

use crate::frame_orchestrator::{FrameOrchestrator, FrameStatus, SCENE_UNIFORM_BINDING};
use crate::scene::{CameraMatrices, SceneLight};

/// Everything a pass recorder needs for the frame it was issued for.
///
/// Consumed by [`GraphicsDevice::end_frame`]; a ticket from before a
/// surface chain rebuild is rejected there.
#[derive(Debug)]
pub struct FrameTicket {
    command_buffer: vk::CommandBuffer,
    slot: usize,
    image_index: u32,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    scene_set: vk::DescriptorSet,
    generation: u64,
}

impl FrameTicket {
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Frame slot the ticket belongs to.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Descriptor set bound to this slot's scene uniforms.
    #[inline]
    pub fn scene_set(&self) -> vk::DescriptorSet {
        self.scene_set
    }

    /// Surface chain generation the ticket was issued for.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Begin info for the output render pass over the whole framebuffer.
    pub fn render_pass_begin_info<'a>(
        &self,
        clear_values: &'a [vk::ClearValue],
    ) -> vk::RenderPassBeginInfo<'a> {
        vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            })
            .clear_values(clear_values)
    }
}

/// Result of [`GraphicsDevice::recreate_surface_chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateStatus {
    /// The chain was rebuilt at this extent.
    Rebuilt(vk::Extent2D),
    /// The surface has no drawable area; the current chain was kept.
    Deferred,
}

/// Owns the whole graphics stack for one window.
pub struct GraphicsDevice {
    orchestrator: ManuallyDrop<FrameOrchestrator>,
    scene_layout: ManuallyDrop<DescriptorSetLayout>,
    surface_chain: ManuallyDrop<SurfaceChain>,
    device: ManuallyDrop<Arc<Device>>,
    surface: ManuallyDrop<Surface>,
    instance: ManuallyDrop<Instance>,
    frames_in_flight: usize,
    final_frame_number: u64,
    shut_down: bool,
}

impl GraphicsDevice {
    /// Brings up the graphics stack for `window`.
    ///
    /// # Errors
    ///
    /// Any failing step aborts initialization; whatever was created before
    /// it is destroyed again. Error-severity validation messages reported
    /// during initialization abort it with [`RhiError::Diagnostics`].
    pub fn initialize(config: &GraphicsConfig, window: &dyn SurfaceSource) -> RhiResult<Self> {
        let surface_extensions = window
            .required_instance_extensions()
            .map_err(|e| RhiError::Surface(e.to_string()))?;
        let instance = Instance::new(config, &surface_extensions)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::Surface(e.to_string()))?;

        let device_extensions = device_extension_names(&config.device_extensions)?;
        let device_extension_refs: Vec<&CStr> =
            device_extensions.iter().map(CString::as_c_str).collect();

        let physical_device = select_physical_device(
            instance.handle(),
            surface.handle(),
            surface.loader(),
            &device_extension_refs,
        )?;
        let device = Device::new(&instance, &physical_device, &device_extension_refs)?;

        let surface_chain = SurfaceChain::new(
            &instance,
            device.clone(),
            surface.handle(),
            surface.loader(),
            window.drawable_extent(),
        )?;

        let scene_layout = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::uniform_buffer(
                SCENE_UNIFORM_BINDING,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;

        let orchestrator =
            FrameOrchestrator::new(device.clone(), &surface_chain, scene_layout.handle(), config)?;

        let errors = instance.diagnostic_error_count();
        if errors > 0 {
            return Err(RhiError::Diagnostics {
                operation: "graphics device initialization",
                count: errors,
            });
        }

        let extent = surface_chain.extent();
        info!(
            "Graphics device initialized on '{}': {}x{}, {} images, {} frames in flight",
            physical_device.device_name(),
            extent.width,
            extent.height,
            surface_chain.image_count(),
            orchestrator.frames_in_flight()
        );

        Ok(Self {
            frames_in_flight: orchestrator.frames_in_flight(),
            final_frame_number: 0,
            orchestrator: ManuallyDrop::new(orchestrator),
            scene_layout: ManuallyDrop::new(scene_layout),
            surface_chain: ManuallyDrop::new(surface_chain),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
            shut_down: false,
        })
    }

    /// Waits for a slot and an image, then opens the frame's command buffer.
    ///
    /// Returns [`FrameStatus::RecreateNeeded`] when the surface chain is
    /// stale or was never rebuilt after a deferred recreate.
    pub fn begin_frame(&mut self) -> RhiResult<FrameStatus<FrameTicket>> {
        self.require_running()?;
        if self.surface_chain.state() != ChainState::Built {
            return Ok(FrameStatus::RecreateNeeded);
        }

        let frame = match self.orchestrator.acquire(&self.surface_chain)? {
            FrameStatus::Ready(frame) => frame,
            FrameStatus::RecreateNeeded => return Ok(FrameStatus::RecreateNeeded),
        };

        let framebuffer = self
            .surface_chain
            .framebuffer(frame.image_index)
            .ok_or_else(|| {
                RhiError::InvalidState(format!(
                    "no framebuffer for acquired image {}",
                    frame.image_index
                ))
            })?;

        Ok(FrameStatus::Ready(FrameTicket {
            command_buffer: frame.command_buffer,
            slot: frame.slot,
            image_index: frame.image_index,
            render_pass: self.surface_chain.render_pass(),
            framebuffer,
            extent: self.surface_chain.extent(),
            scene_set: frame.scene_set,
            generation: self.surface_chain.generation(),
        }))
    }

    /// Command buffer to record into for `ticket`'s frame.
    pub fn recorder(&self, ticket: &FrameTicket) -> RhiResult<&CommandBuffer> {
        self.require_running()?;
        self.check_ticket(ticket)?;
        self.orchestrator
            .recorder()
            .ok_or_else(|| RhiError::InvalidState("no frame is being recorded".to_string()))
    }

    /// Submits and presents `ticket`'s frame.
    pub fn end_frame(&mut self, ticket: FrameTicket) -> RhiResult<FrameStatus<()>> {
        self.require_running()?;
        self.check_ticket(&ticket)?;

        let status = self.orchestrator.submit_and_present(&self.surface_chain)?;
        if let Err(e) = self.instance.update() {
            warn!("Instance housekeeping failed: {}", e);
        }
        Ok(status)
    }

    /// Rebuilds the surface chain at `extent`.
    ///
    /// A zero-area extent (minimized window), requested or reported by the
    /// surface, leaves the current chain in place and reports
    /// [`RecreateStatus::Deferred`]. Must not be called while a frame is open.
    pub fn recreate_surface_chain(&mut self, extent: vk::Extent2D) -> RhiResult<RecreateStatus> {
        self.require_running()?;
        if extent.width == 0 || extent.height == 0 {
            debug!(
                "Deferring surface chain recreate for {}x{}",
                extent.width, extent.height
            );
            return Ok(RecreateStatus::Deferred);
        }
        if self.orchestrator.in_frame() {
            return Err(RhiError::InvalidState(
                "cannot recreate the surface chain while a frame is open".to_string(),
            ));
        }

        self.device.wait_idle()?;
        match self.surface_chain.recreate(extent)? {
            RebuildOutcome::Rebuilt => {
                self.orchestrator
                    .on_surface_chain_rebuilt(self.surface_chain.image_count());
                Ok(RecreateStatus::Rebuilt(self.surface_chain.extent()))
            }
            RebuildOutcome::Deferred => Ok(RecreateStatus::Deferred),
        }
    }

    /// Extent of the current surface chain; zero after shutdown.
    pub fn surface_extent(&self) -> vk::Extent2D {
        if self.shut_down {
            return vk::Extent2D::default();
        }
        self.surface_chain.extent()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Allocates a set from the open frame's slot pool.
    ///
    /// The set is valid until the slot comes around again. Only callable
    /// between [`begin_frame`](Self::begin_frame) and
    /// [`end_frame`](Self::end_frame); otherwise returns
    /// [`RhiError::InvalidState`].
    pub fn allocate_descriptor_set(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        self.require_running()?;
        self.orchestrator
            .allocate_descriptor_set(self.orchestrator.current_slot(), layout)
    }

    /// Writes the scene payload for the open frame.
    pub fn update_scene_uniforms(
        &mut self,
        camera: &CameraMatrices,
        lights: &[SceneLight],
    ) -> RhiResult<()> {
        self.require_running()?;
        self.orchestrator.update_scene_uniforms(camera, lights)
    }

    /// Layout of the per-slot scene descriptor set; null after shutdown.
    pub fn scene_descriptor_layout(&self) -> vk::DescriptorSetLayout {
        if self.shut_down {
            return vk::DescriptorSetLayout::null();
        }
        self.scene_layout.handle()
    }

    /// Frames submitted so far.
    pub fn frame_number(&self) -> u64 {
        if self.shut_down {
            return self.final_frame_number;
        }
        self.orchestrator.frame_number()
    }

    fn require_running(&self) -> RhiResult<()> {
        if self.shut_down {
            Err(RhiError::InvalidState(
                "graphics device has been shut down".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn check_ticket(&self, ticket: &FrameTicket) -> RhiResult<()> {
        let generation = self.surface_chain.generation();
        if ticket.generation != generation {
            return Err(RhiError::InvalidState(format!(
                "frame ticket from surface chain generation {} used with generation {}",
                ticket.generation, generation
            )));
        }
        Ok(())
    }
}

impl Subsystem for GraphicsDevice {
    fn name(&self) -> &'static str {
        "graphics device"
    }

    fn update(&mut self) -> RhiResult<()> {
        self.require_running()?;
        self.instance.update()
    }

    /// Waits for the GPU and destroys everything in reverse creation order.
    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.final_frame_number = self.orchestrator.frame_number();

        info!("Shutting down graphics device");

        if let Err(e) = self.device.wait_idle() {
            warn!("Device did not go idle before shutdown: {}", e);
        }

        // SAFETY: each field is dropped exactly once, guarded by `shut_down`.
        // Every accessor checks the flag before touching them.
        unsafe {
            ManuallyDrop::drop(&mut self.orchestrator);
            ManuallyDrop::drop(&mut self.scene_layout);
            ManuallyDrop::drop(&mut self.surface_chain);

            if Arc::strong_count(&self.device) > 1 {
                warn!(
                    "Device still has {} other owner(s) at shutdown",
                    Arc::strong_count(&self.device) - 1
                );
            }
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Graphics device shut down");
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Converts configured extension names, making sure the swapchain extension
/// is always requested.
fn device_extension_names(configured: &[String]) -> RhiResult<Vec<CString>> {
    let mut names: Vec<CString> = Vec::with_capacity(configured.len() + 1);
    for name in configured {
        let name = CString::new(name.as_str()).map_err(|_| {
            RhiError::Configuration(format!("device extension {name:?} contains a NUL byte"))
        })?;
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let swapchain = ash::khr::swapchain::NAME;
    if !names.iter().any(|name| name.as_c_str() == swapchain) {
        names.push(swapchain.to_owned());
    }
    Ok(names)
}
