//! Frame orchestration for the lumen graphics subsystem.
//!
//! This crate turns the RHI building blocks into a frame loop:
//! - [`pacing`]: the slot/image fence protocol, independent of the driver
//! - [`frame_orchestrator`]: per-slot resources and acquire/submit/present
//! - [`graphics_device`]: the facade that owns the whole stack
//! - [`scene`]: the uniform payload written every frame

pub mod frame_orchestrator;
pub mod graphics_device;
pub mod pacing;
pub mod scene;

pub use frame_orchestrator::{AcquiredFrame, FrameOrchestrator, FrameStatus};
pub use graphics_device::{FrameTicket, GraphicsDevice, RecreateStatus};
pub use pacing::{FenceOps, FramePacer, ImageInFlightTable};
pub use scene::{CameraMatrices, MAX_SCENE_LIGHTS, SceneLight, SceneUniforms};
