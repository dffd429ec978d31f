//! Core utilities for the lumen graphics subsystem.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - The graphics configuration surface

mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    ApiVersion, DEFAULT_FRAMES_IN_FLIGHT, DescriptorPoolConfig, GraphicsConfig,
    MAX_FRAMES_IN_FLIGHT_LIMIT, Version,
};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
