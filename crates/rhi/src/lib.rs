//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate wraps `ash` and `gpu-allocator` into the pieces the frame
//! orchestrator is built from:
//! - Instance creation with validation diagnostics
//! - GPU selection and logical device creation
//! - The surface chain (swapchain, depth attachment, output render pass)
//! - Command buffers, descriptors, buffers and synchronization primitives
//!
//! Every component receives its dependencies explicitly (`&Instance`,
//! `Arc<Device>`) and implements [`Subsystem`] for uniform teardown.

mod error;

pub mod buffer;
pub mod command;
pub mod depth;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod lifecycle;
pub mod physical_device;
pub mod render_pass;
pub mod surface_chain;
pub mod sync;

pub use error::{ErrorKind, RhiError, RhiResult, VkResultExt};
pub use lifecycle::Subsystem;

// Re-export ash types that users might need
pub use ash::vk;
