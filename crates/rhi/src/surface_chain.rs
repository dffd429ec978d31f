//! The surface chain: swapchain plus everything sized to it.
//!
//! A [`SurfaceChain`] owns the swapchain, one view per swapchain image, the
//! depth attachment, the output render pass and one framebuffer per image.
//! All of these are rebuilt together; each successful build bumps a
//! generation counter so frame tickets issued against an older chain can be
//! recognised.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --build--> Built --recreate--> Rebuilding --> Built
//!                            |                                  |
//!                            +------------shutdown--------------+--> Destroyed
//! ```
//!
//! A recreate against a surface with zero area (a minimized window) does not
//! leave `Built`; it reports [`RebuildOutcome::Deferred`] instead.
//!
//! Choosing the format, present mode, extent and image count is the pure
//! [`plan`] function.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::depth::{DepthAttachment, select_depth_format};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::lifecycle::Subsystem;
use crate::render_pass::{create_framebuffer, create_output_render_pass};

/// What a surface supports, as reported by the driver.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let creation = |operation: &'static str| {
            move |status| RhiError::SurfaceChainCreation { operation, status }
        };

        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(creation("query surface capabilities"))?;

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .map_err(creation("query surface formats"))?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .map_err(creation("query present modes"))?;

        debug!(
            "Surface support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// The choices a build makes before creating anything.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceChainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Picks format, present mode, extent and image count for `requested`.
///
/// # Errors
///
/// Returns [`RhiError::Surface`] if the surface offers no format or present
/// mode, and [`RhiError::ZeroAreaSurface`] if the resulting extent has zero
/// area.
pub fn plan(
    support: &SwapchainSupportDetails,
    requested: vk::Extent2D,
) -> RhiResult<SurfaceChainPlan> {
    if !support.is_adequate() {
        return Err(RhiError::Surface(
            "surface reports no formats or no present modes".to_string(),
        ));
    }

    let extent = choose_extent(&support.capabilities, requested);
    if extent.width == 0 || extent.height == 0 {
        return Err(RhiError::ZeroAreaSurface {
            width: extent.width,
            height: extent.height,
        });
    }

    Ok(SurfaceChainPlan {
        surface_format: choose_surface_format(&support.formats),
        present_mode: choose_present_mode(&support.present_modes),
        extent,
        image_count: determine_image_count(&support.capabilities),
        pre_transform: support.capabilities.current_transform,
    })
}

/// Like [`plan`], but a zero-area extent yields `None` instead of an error.
pub fn plan_or_defer(
    support: &SwapchainSupportDetails,
    requested: vk::Extent2D,
) -> RhiResult<Option<SurfaceChainPlan>> {
    match plan(support, requested) {
        Ok(plan) => Ok(Some(plan)),
        Err(RhiError::ZeroAreaSurface { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Prefers B8G8R8A8_SRGB with SRGB_NONLINEAR, else the first format.
///
/// A single `UNDEFINED` entry means the surface takes any format, so the
/// preferred one is used. `formats` must not be empty.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    if let [only] = formats
        && only.format == vk::Format::UNDEFINED
    {
        debug!("Surface accepts any format; using B8G8R8A8_SRGB");
        return preferred;
    }

    if formats
        .iter()
        .any(|f| f.format == preferred.format && f.color_space == preferred.color_space)
    {
        return preferred;
    }

    let fallback = formats.first().copied().unwrap_or(preferred);
    warn!(
        "Preferred surface format unavailable, using {:?} / {:?}",
        fallback.format, fallback.color_space
    );
    fallback
}

/// MAILBOX when offered, otherwise FIFO (always available).
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Uses the surface's current extent when it is definite; otherwise clamps
/// the requested size to the surface limits.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// Result of [`SurfaceChain::recreate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt,
    /// The surface has no drawable area; the previous chain is still built.
    Deferred,
}

/// Result of asking for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired. `suboptimal` images are still rendered to.
    Image { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface and must be recreated.
    OutOfDate,
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The image was consumed, but the chain should be recreated.
    RecreateNeeded,
}

/// Maps a raw acquire result to an [`AcquireOutcome`].
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(status) => Err(RhiError::vulkan("acquire next image", status)),
    }
}

/// Maps a raw present result to a [`PresentOutcome`].
///
/// Stale or suboptimal surfaces ask for a recreate; device loss and every
/// other failure are errors.
pub fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::RecreateNeeded),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost {
            operation: "present",
        }),
        Err(status) => Err(RhiError::Present(status)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Uninitialized,
    Built,
    Rebuilding,
    Destroyed,
}

/// Everything created by one build.
#[derive(Default)]
struct ChainResources {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Option<DepthAttachment>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    plan: Option<SurfaceChainPlan>,
}

impl ChainResources {
    /// Destroys whatever has been created so far, newest first.
    fn release(&mut self, device: &Device, swapchain_loader: &ash::khr::swapchain::Device) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.handle().destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.handle().destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
        self.depth = None;
        unsafe {
            for view in self.image_views.drain(..) {
                device.handle().destroy_image_view(view, None);
            }
            self.images.clear();
            if self.swapchain != vk::SwapchainKHR::null() {
                swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.plan = None;
    }
}

/// Re-labels a generic driver failure as a chain creation failure.
fn as_creation(error: RhiError) -> RhiError {
    match error {
        RhiError::Vulkan { operation, status } => {
            RhiError::SurfaceChainCreation { operation, status }
        }
        other => other,
    }
}

/// Swapchain, image views, depth attachment, render pass and framebuffers.
///
/// Exclusively owned by the graphics device; not thread-safe.
pub struct SurfaceChain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    depth_format: vk::Format,
    resources: ChainResources,
    state: ChainState,
    generation: u64,
}

impl SurfaceChain {
    /// Creates the chain and performs the first build.
    ///
    /// `surface` must stay alive until this chain has shut down.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        requested: vk::Extent2D,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let depth_format = select_depth_format(instance.handle(), device.physical_device())?;

        let mut chain = Self {
            device,
            swapchain_loader,
            surface_loader: surface_loader.clone(),
            surface,
            depth_format,
            resources: ChainResources::default(),
            state: ChainState::Uninitialized,
            generation: 0,
        };
        chain.build(requested)?;
        Ok(chain)
    }

    /// Builds every chain object for `requested`.
    ///
    /// On failure everything created by this call is released and the chain
    /// stays `Uninitialized`.
    pub fn build(&mut self, requested: vk::Extent2D) -> RhiResult<()> {
        if !matches!(
            self.state,
            ChainState::Uninitialized | ChainState::Rebuilding
        ) {
            return Err(RhiError::InvalidState(format!(
                "cannot build a surface chain in state {:?}",
                self.state
            )));
        }

        match self
            .query_support()
            .and_then(|support| plan(&support, requested))
        {
            Ok(plan) => self.build_planned(plan),
            Err(e) => {
                self.state = ChainState::Uninitialized;
                Err(e)
            }
        }
    }

    fn build_planned(&mut self, plan: SurfaceChainPlan) -> RhiResult<()> {
        let mut resources = ChainResources::default();
        match self.populate(&mut resources, &plan) {
            Ok(()) => {
                self.resources = resources;
                self.state = ChainState::Built;
                self.generation += 1;
                Ok(())
            }
            Err(e) => {
                resources.release(&self.device, &self.swapchain_loader);
                self.state = ChainState::Uninitialized;
                Err(e)
            }
        }
    }

    fn query_support(&self) -> RhiResult<SwapchainSupportDetails> {
        SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )
    }

    fn populate(&self, resources: &mut ChainResources, plan: &SurfaceChainPlan) -> RhiResult<()> {

        let queue_families = self.device.queue_families();
        let graphics_family = queue_families.graphics_family.unwrap_or_default();
        let present_family = queue_families.present_family.unwrap_or(graphics_family);
        let family_indices = [graphics_family, present_family];
        let (sharing_mode, shared_families) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        resources.swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|status| RhiError::SurfaceChainCreation {
                operation: "create swapchain",
                status,
            })?;

        resources.images = unsafe {
            self.swapchain_loader
                .get_swapchain_images(resources.swapchain)
        }
        .map_err(|status| RhiError::SurfaceChainCreation {
            operation: "get swapchain images",
            status,
        })?;

        for &image in &resources.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(plan.surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            let view = unsafe { self.device.handle().create_image_view(&view_info, None) }
                .map_err(|status| RhiError::SurfaceChainCreation {
                    operation: "create surface image view",
                    status,
                })?;
            resources.image_views.push(view);
        }

        let depth = DepthAttachment::new(self.device.clone(), plan.extent, self.depth_format)
            .map_err(as_creation)?;
        let depth_view = depth.image_view();
        resources.depth = Some(depth);

        resources.render_pass = create_output_render_pass(
            &self.device,
            plan.surface_format.format,
            self.depth_format,
        )
        .map_err(as_creation)?;

        for &view in &resources.image_views {
            let framebuffer = create_framebuffer(
                &self.device,
                resources.render_pass,
                view,
                depth_view,
                plan.extent,
            )
            .map_err(as_creation)?;
            resources.framebuffers.push(framebuffer);
        }

        resources.plan = Some(*plan);

        let message = format!(
            "Surface chain built: {}x{}, {:?}, {:?}, {} images",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.present_mode,
            resources.images.len()
        );
        if self.generation == 0 {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }

        Ok(())
    }

    /// Releases every chain object. The chain can be built again afterwards.
    pub fn destroy(&mut self) {
        self.resources
            .release(&self.device, &self.swapchain_loader);
        if self.state != ChainState::Destroyed {
            self.state = ChainState::Uninitialized;
        }
    }

    /// Destroys and rebuilds the chain for `requested`.
    ///
    /// The new configuration is planned before anything is released. When
    /// the surface has no drawable area the current chain is left untouched
    /// and [`RebuildOutcome::Deferred`] is returned.
    ///
    /// The caller must have waited for all GPU work that references the
    /// current chain to finish.
    pub fn recreate(&mut self, requested: vk::Extent2D) -> RhiResult<RebuildOutcome> {
        if self.state == ChainState::Destroyed {
            return Err(RhiError::InvalidState(
                "cannot recreate a destroyed surface chain".to_string(),
            ));
        }

        debug!(
            "Recreating surface chain for {}x{}",
            requested.width, requested.height
        );

        let Some(plan) = plan_or_defer(&self.query_support()?, requested)? else {
            debug!("Surface has zero area, keeping the current chain");
            return Ok(RebuildOutcome::Deferred);
        };

        self.resources
            .release(&self.device, &self.swapchain_loader);
        self.state = ChainState::Rebuilding;
        self.build_planned(plan)?;
        Ok(RebuildOutcome::Rebuilt)
    }

    /// Requests the next image, signalling `semaphore` when it is ready.
    ///
    /// Waits without a timeout.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        self.require_built()?;
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.resources.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        classify_acquire(result)
    }

    /// Presents `image_index` on `queue` once `wait_semaphore` signals.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        self.require_built()?;
        let swapchains = [self.resources.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        classify_present(unsafe { self.swapchain_loader.queue_present(queue, &present_info) })
    }

    fn require_built(&self) -> RhiResult<()> {
        if self.state == ChainState::Built {
            Ok(())
        } else {
            Err(RhiError::InvalidState(format!(
                "surface chain is {:?}",
                self.state
            )))
        }
    }

    #[inline]
    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Incremented by every successful build.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Extent of the current build, zero when not built.
    pub fn extent(&self) -> vk::Extent2D {
        self.resources
            .plan
            .map(|plan| plan.extent)
            .unwrap_or_default()
    }

    pub fn format(&self) -> vk::Format {
        self.resources
            .plan
            .map(|plan| plan.surface_format.format)
            .unwrap_or_default()
    }

    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.resources.plan.map(|plan| plan.present_mode)
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Number of presentable images in the current build.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.resources.images.len()
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.resources.render_pass
    }

    /// Framebuffer for image `index`, if it exists in the current build.
    pub fn framebuffer(&self, index: u32) -> Option<vk::Framebuffer> {
        self.resources.framebuffers.get(index as usize).copied()
    }
}

impl Subsystem for SurfaceChain {
    fn name(&self) -> &'static str {
        "surface chain"
    }

    fn shutdown(&mut self) {
        if self.state == ChainState::Destroyed {
            return;
        }
        self.resources
            .release(&self.device, &self.swapchain_loader);
        self.state = ChainState::Destroyed;
        info!("Surface chain destroyed");
    }
}

impl Drop for SurfaceChain {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn support(current: vk::Extent2D) -> SwapchainSupportDetails {
        SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: current,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![format(vk::Format::B8G8R8A8_SRGB)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
        ];
        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_choose_surface_format_lone_undefined_means_any() {
        let formats = [format(vk::Format::UNDEFINED)];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn test_choose_present_mode() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_clamps_when_undefined() {
        let caps = support(UNDEFINED_EXTENT).capabilities;
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 8000,
                height: 600,
            },
        );
        assert_eq!(extent.width, 4096);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_determine_image_count() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&caps), 2);

        caps.max_image_count = 0;
        assert_eq!(determine_image_count(&caps), 3);
    }

    #[test]
    fn test_plan_uses_current_extent() {
        let current = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let plan = plan(
            &support(current),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap();
        assert_eq!(plan.extent, current);
        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let requested = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let details = support(UNDEFINED_EXTENT);
        let first = plan(&details, requested).unwrap();
        let second = plan(&details, requested).unwrap();
        assert_eq!(first.extent, second.extent);
        assert_eq!(first.extent, requested);
        assert_eq!(first.image_count, second.image_count);
        assert_eq!(first.surface_format.format, second.surface_format.format);
        assert_eq!(first.present_mode, second.present_mode);
    }

    #[test]
    fn test_plan_rejects_inadequate_or_empty() {
        let mut details = support(UNDEFINED_EXTENT);
        details.present_modes.clear();
        assert!(matches!(
            plan(&details, vk::Extent2D { width: 1, height: 1 }),
            Err(RhiError::Surface(_))
        ));

        let minimized = support(vk::Extent2D {
            width: 0,
            height: 0,
        });
        let err = plan(&minimized, vk::Extent2D { width: 1, height: 1 }).unwrap_err();
        assert!(matches!(
            err,
            RhiError::ZeroAreaSurface {
                width: 0,
                height: 0
            }
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_minimized_surface_defers_rebuild() {
        let requested = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let minimized = support(vk::Extent2D {
            width: 0,
            height: 0,
        });
        assert!(plan_or_defer(&minimized, requested).unwrap().is_none());

        // The window reports a size but the surface collapsed one axis.
        let collapsed = support(vk::Extent2D {
            width: 800,
            height: 0,
        });
        assert!(plan_or_defer(&collapsed, requested).unwrap().is_none());

        let restored = plan_or_defer(&support(UNDEFINED_EXTENT), requested)
            .unwrap()
            .expect("drawable surface");
        assert_eq!(restored.extent, requested);
    }

    #[test]
    fn test_inadequate_surface_is_not_deferred() {
        let mut details = support(UNDEFINED_EXTENT);
        details.formats.clear();
        let err = plan_or_defer(
            &details,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_classify_acquire() {
        assert_eq!(
            classify_acquire(Ok((2, true))).unwrap(),
            AcquireOutcome::Image {
                index: 2,
                suboptimal: true
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(RhiError::DeviceLost { .. })
        ));
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(
            classify_present(Ok(false)).unwrap(),
            PresentOutcome::Presented
        );
        assert_eq!(
            classify_present(Ok(true)).unwrap(),
            PresentOutcome::RecreateNeeded
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::RecreateNeeded
        );

        let lost = classify_present(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert!(lost.is_fatal());
        assert!(matches!(lost, RhiError::DeviceLost { .. }));

        let other = classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).unwrap_err();
        assert!(matches!(
            other,
            RhiError::Present(vk::Result::ERROR_SURFACE_LOST_KHR)
        ));
    }

    #[test]
    fn test_as_creation_relabels_driver_errors() {
        let error = as_creation(RhiError::vulkan(
            "create framebuffer",
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        ));
        assert!(matches!(
            error,
            RhiError::SurfaceChainCreation {
                operation: "create framebuffer",
                ..
            }
        ));
        assert!(matches!(
            as_creation(RhiError::NoSuitableDevice),
            RhiError::NoSuitableDevice
        ));
    }
}
