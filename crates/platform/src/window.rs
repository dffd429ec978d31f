//! Window management using winit.
//!
//! This module provides window creation and presentation-surface creation.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use lumen_core::{Error, Result};

/// What the graphics device needs from a windowing system.
///
/// The device never talks to winit directly; anything that can name its
/// surface extensions, create a surface for an instance and report its
/// drawable size can be presented to.
pub trait SurfaceSource {
    /// Instance extensions required to present to this window.
    fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>>;

    /// Creates a presentation surface for `instance`.
    ///
    /// The instance must outlive the returned [`Surface`].
    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface>;

    /// Current drawable size in pixels. Either dimension may be zero while
    /// the window is minimized.
    fn drawable_extent(&self) -> vk::Extent2D;
}

/// RAII wrapper for a presentation surface.
///
/// The surface is destroyed when this value is dropped, so it must be
/// dropped before the instance that created it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Wraps an existing surface handle. Ownership moves to the wrapper.
    pub fn from_raw(handle: vk::SurfaceKHR, surface_loader: ash::khr::surface::Instance) -> Self {
        Self {
            handle,
            surface_loader,
        }
    }

    /// Raw surface handle, valid for the lifetime of this wrapper.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Surface extension loader, used for capability and format queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle came from this loader's instance and is destroyed
        // only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Presentation surface destroyed");
    }
}

/// A winit window that can be presented to.
pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    /// Create a new resizable window with the given size and title.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", width, height);

        Ok(Self {
            window: Arc::new(window),
        })
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Width over height of the drawable area, or 1.0 while minimized.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.drawable_extent();
        if extent.width == 0 || extent.height == 0 {
            return 1.0;
        }
        extent.width as f32 / extent.height as f32
    }
}

impl SurfaceSource for Window {
    fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {e}")))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| Error::Surface(format!("Failed to enumerate surface extensions: {e}")))?;

        // SAFETY: ash-window returns pointers to static, NUL-terminated
        // extension names.
        let names: Vec<&'static CStr> = extensions
            .iter()
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect();

        tracing::debug!("Surface extensions required by the window: {:?}", names);
        Ok(names)
    }

    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {e}")))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {e}")))?;

        // SAFETY: entry and instance are live, and the raw handles come from a
        // window that outlives this call. Surface::drop destroys the result.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Surface(format!("Failed to create presentation surface: {e}")))?
        };

        tracing::info!("Presentation surface created");

        Ok(Surface::from_raw(
            handle,
            ash::khr::surface::Instance::new(entry, instance),
        ))
    }

    fn drawable_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}
