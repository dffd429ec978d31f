//! Platform layer for the lumen graphics subsystem.
//!
//! This crate owns the windowing side of presentation:
//! - Window management via winit
//! - The [`SurfaceSource`] contract the graphics device consumes
//! - RAII presentation surfaces

mod window;

pub use window::{Surface, SurfaceSource, Window};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
