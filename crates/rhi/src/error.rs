//! RHI-specific error types.
//!
//! Errors fall into a small number of [`ErrorKind`]s so callers can decide
//! between retrying, dropping one allocation and shutting down. Presentation
//! surfaces going stale is never an error here; the frame loop reports it as
//! a recreate request instead.

use ash::vk;
use thiserror::Error;

/// Coarse classification of an [`RhiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input detected before any driver call.
    Configuration,
    /// Creating an instance, device, surface chain or GPU object failed.
    Creation,
    /// The device stopped responding. Fatal.
    DeviceLost,
    /// A pool or memory heap could not satisfy one allocation.
    ResourceExhaustion,
    /// Presentation failed for a reason other than a stale surface.
    Presentation,
    /// The surface cannot be presented to right now, typically because the
    /// window is minimized. Retry once it has a drawable area again.
    TransientPresentation,
    /// Anything else: misuse of the API or an unexpected driver status.
    Runtime,
}

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Invalid configuration or an unsupported extension/layer request
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// Instance creation failed
    #[error("Instance creation failed: {0}")]
    InstanceCreation(vk::Result),

    /// The validation layer reported error-severity messages
    #[error("Validation layer reported {count} error(s) during {operation}")]
    Diagnostics {
        operation: &'static str,
        count: u32,
    },

    /// No candidate GPU passed the suitability checks
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Logical device creation failed
    #[error("Device creation failed: {0}")]
    DeviceCreation(vk::Result),

    /// A surface chain build step failed
    #[error("Surface chain creation failed while trying to {operation}: {status}")]
    SurfaceChainCreation {
        operation: &'static str,
        status: vk::Result,
    },

    /// A presentation surface could not be created
    #[error("Surface error: {0}")]
    Surface(String),

    /// The surface currently has no drawable area
    #[error("Surface extent {width}x{height} has zero area")]
    ZeroAreaSurface { width: u32, height: u32 },

    /// The device was lost
    #[error("Device lost while trying to {operation}")]
    DeviceLost { operation: &'static str },

    /// A descriptor pool or memory heap is exhausted
    #[error("Resource exhausted: {context}")]
    ResourceExhaustion { context: String },

    /// Presentation failed for a reason other than a stale surface
    #[error("Present failed: {0}")]
    Present(vk::Result),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// Any other driver failure
    #[error("Failed to {operation}: {status}")]
    Vulkan {
        operation: &'static str,
        status: vk::Result,
    },

    /// The API was used out of order
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl RhiError {
    /// Wraps a driver status, keeping device loss distinguishable.
    pub fn vulkan(operation: &'static str, status: vk::Result) -> Self {
        match status {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost { operation },
            status => Self::Vulkan { operation, status },
        }
    }

    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Loading(_) => ErrorKind::Configuration,
            Self::InstanceCreation(_)
            | Self::Diagnostics { .. }
            | Self::NoSuitableDevice
            | Self::DeviceCreation(_)
            | Self::SurfaceChainCreation { .. }
            | Self::Surface(_) => ErrorKind::Creation,
            Self::DeviceLost { .. } => ErrorKind::DeviceLost,
            Self::ResourceExhaustion { .. } => ErrorKind::ResourceExhaustion,
            Self::Allocator(
                gpu_allocator::AllocationError::OutOfMemory
                | gpu_allocator::AllocationError::NoCompatibleMemoryTypeFound,
            ) => ErrorKind::ResourceExhaustion,
            Self::Present(_) => ErrorKind::Presentation,
            Self::ZeroAreaSurface { .. } => ErrorKind::TransientPresentation,
            Self::Allocator(_) | Self::Vulkan { .. } | Self::InvalidState(_) => ErrorKind::Runtime,
        }
    }

    /// Whether the subsystem can keep running after this error.
    ///
    /// Resource exhaustion loses only the failed allocation, and a surface
    /// without drawable area only postpones presentation. Everything else
    /// leaves the subsystem unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::ResourceExhaustion | ErrorKind::TransientPresentation
        )
    }

    /// The driver status behind this error, if there is one.
    pub fn status(&self) -> Option<vk::Result> {
        match self {
            Self::InstanceCreation(status)
            | Self::DeviceCreation(status)
            | Self::Present(status)
            | Self::SurfaceChainCreation { status, .. }
            | Self::Vulkan { status, .. } => Some(*status),
            Self::DeviceLost { .. } => Some(vk::Result::ERROR_DEVICE_LOST),
            _ => None,
        }
    }
}

impl From<vk::Result> for RhiError {
    fn from(status: vk::Result) -> Self {
        Self::vulkan("complete a Vulkan call", status)
    }
}

/// Attaches the failing operation's name to a raw driver result.
pub trait VkResultExt<T> {
    fn during(self, operation: &'static str) -> RhiResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[inline]
    fn during(self, operation: &'static str) -> RhiResult<T> {
        self.map_err(|status| RhiError::vulkan(operation, status))
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_is_classified() {
        let err = RhiError::vulkan("submit frame", vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(
            err,
            RhiError::DeviceLost {
                operation: "submit frame"
            }
        ));
        assert_eq!(err.kind(), ErrorKind::DeviceLost);
        assert!(err.is_fatal());
        assert_eq!(err.status(), Some(vk::Result::ERROR_DEVICE_LOST));
    }

    #[test]
    fn test_during_keeps_operation_and_status() {
        let result: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let err = result.during("create fence").unwrap_err();
        assert_eq!(err.status(), Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert!(err.to_string().contains("create fence"));
    }

    #[test]
    fn test_resource_exhaustion_is_not_fatal() {
        let err = RhiError::ResourceExhaustion {
            context: "descriptor set for frame slot 1".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("frame slot 1"));
    }

    #[test]
    fn test_zero_area_surface_is_not_fatal() {
        let err = RhiError::ZeroAreaSurface {
            width: 0,
            height: 720,
        };
        assert_eq!(err.kind(), ErrorKind::TransientPresentation);
        assert!(!err.is_fatal());
        assert!(err.status().is_none());
        assert!(err.to_string().contains("0x720"));
    }

    #[test]
    fn test_creation_errors_are_grouped() {
        let errors = [
            RhiError::InstanceCreation(vk::Result::ERROR_INCOMPATIBLE_DRIVER),
            RhiError::DeviceCreation(vk::Result::ERROR_FEATURE_NOT_PRESENT),
            RhiError::NoSuitableDevice,
            RhiError::SurfaceChainCreation {
                operation: "create swapchain",
                status: vk::Result::ERROR_INITIALIZATION_FAILED,
            },
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::Creation);
        }
    }

    #[test]
    fn test_configuration_error_message() {
        let err = RhiError::Configuration("layer VK_LAYER_missing unsupported".into());
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.status().is_none());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RhiError>();
    }
}
