//! Graphics subsystem configuration.
//!
//! Configuration is read from TOML. Every field has a default, so an empty
//! file (or no file at all) yields a usable setup:
//!
//! ```toml
//! application_name = "editor"
//! application_version = "0.3.1"
//! api_version = "1.2"
//! diagnostics = true
//! max_frames_in_flight = 3
//!
//! [descriptor_pool]
//! max_sets = 64
//! uniform_buffers = 64
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Frames in flight used when the configuration does not say otherwise.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound accepted for `max_frames_in_flight`.
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 8;

/// A `major.minor.patch` version, written as a string in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts = parse_components(s)?;
        match parts.as_slice() {
            [major, minor, patch] => Ok(Self::new(*major, *minor, *patch)),
            [major, minor] => Ok(Self::new(*major, *minor, 0)),
            _ => Err(Error::Config(format!(
                "version '{s}' must look like 'major.minor.patch'"
            ))),
        }
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The minimum graphics API version (`major.minor`) the subsystem requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const V1_0: Self = Self::new(1, 0);
    pub const V1_2: Self = Self::new(1, 2);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl FromStr for ApiVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match parse_components(s)?.as_slice() {
            [major, minor] => Ok(Self::new(*major, *minor)),
            _ => Err(Error::Config(format!(
                "API version '{s}' must look like 'major.minor'"
            ))),
        }
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn parse_components(s: &str) -> Result<Vec<u32>> {
    s.trim()
        .split('.')
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| Error::Config(format!("invalid version component '{part}' in '{s}'")))
        })
        .collect()
}

/// Per-frame-slot descriptor pool budget.
///
/// Each frame slot owns one pool of this size, so the totals are per slot,
/// not per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DescriptorPoolConfig {
    pub max_sets: u32,
    pub uniform_buffers: u32,
    pub storage_buffers: u32,
    pub combined_image_samplers: u32,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            max_sets: 32,
            uniform_buffers: 32,
            storage_buffers: 8,
            combined_image_samplers: 32,
        }
    }
}

/// Everything the graphics subsystem needs to know before touching the driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphicsConfig {
    /// Application name reported to the driver.
    pub application_name: String,
    pub application_version: Version,
    /// Engine name reported to the driver.
    pub engine_name: String,
    pub engine_version: Version,
    /// Lowest API version the subsystem accepts from the runtime.
    pub api_version: ApiVersion,
    /// Enables validation layers and the diagnostic message callback.
    pub diagnostics: bool,
    /// Layers enabled when `diagnostics` is set.
    pub validation_layers: Vec<String>,
    /// Instance extensions requested on top of the window's surface extensions.
    pub instance_extensions: Vec<String>,
    /// Device extensions a GPU must support to be selected.
    pub device_extensions: Vec<String>,
    /// Number of frame slots the CPU may run ahead of the GPU.
    pub max_frames_in_flight: usize,
    pub descriptor_pool: DescriptorPoolConfig,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            application_name: "lumen".to_string(),
            application_version: Version::new(0, 1, 0),
            engine_name: "lumen".to_string(),
            engine_version: Version::new(0, 1, 0),
            api_version: ApiVersion::V1_2,
            diagnostics: cfg!(debug_assertions),
            validation_layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            instance_extensions: Vec::new(),
            device_extensions: vec!["VK_KHR_swapchain".to_string()],
            max_frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            descriptor_pool: DescriptorPoolConfig::default(),
        }
    }
}

impl GraphicsConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded graphics config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a configuration document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values that cannot be expressed in the type system.
    pub fn validate(&self) -> Result<()> {
        check_identifier("application_name", &self.application_name)?;
        check_identifier("engine_name", &self.engine_name)?;

        if self.api_version < ApiVersion::V1_0 {
            return Err(Error::Config(format!(
                "api_version {} is below 1.0",
                self.api_version
            )));
        }

        if !(1..=MAX_FRAMES_IN_FLIGHT_LIMIT).contains(&self.max_frames_in_flight) {
            return Err(Error::Config(format!(
                "max_frames_in_flight must be between 1 and {MAX_FRAMES_IN_FLIGHT_LIMIT}, got {}",
                self.max_frames_in_flight
            )));
        }

        if self.descriptor_pool.max_sets == 0 {
            return Err(Error::Config(
                "descriptor_pool.max_sets must be greater than 0".to_string(),
            ));
        }
        // The per-slot scene set always needs one uniform buffer descriptor.
        if self.descriptor_pool.uniform_buffers == 0 {
            return Err(Error::Config(
                "descriptor_pool.uniform_buffers must be greater than 0".to_string(),
            ));
        }

        for name in self
            .validation_layers
            .iter()
            .chain(&self.instance_extensions)
            .chain(&self.device_extensions)
        {
            check_identifier("extension or layer name", name)?;
        }

        Ok(())
    }
}

fn check_identifier(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{field} must not be empty")));
    }
    if value.contains('\0') {
        return Err(Error::Config(format!("{field} '{value}' contains a NUL byte")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = GraphicsConfig::from_toml_str("").unwrap();
        assert_eq!(config, GraphicsConfig::default());
        assert_eq!(config.max_frames_in_flight, DEFAULT_FRAMES_IN_FLIGHT);
        assert!(config.device_extensions.iter().any(|e| e == "VK_KHR_swapchain"));
    }

    #[test]
    fn test_parse_full_document() {
        let text = r#"
            application_name = "editor"
            application_version = "0.3.1"
            engine_name = "lumen"
            engine_version = "2.0"
            api_version = "1.3"
            diagnostics = false
            validation_layers = []
            device_extensions = ["VK_KHR_swapchain", "VK_KHR_maintenance1"]
            max_frames_in_flight = 3

            [descriptor_pool]
            max_sets = 64
            uniform_buffers = 16
        "#;

        let config = GraphicsConfig::from_toml_str(text).unwrap();
        assert_eq!(config.application_name, "editor");
        assert_eq!(config.application_version, Version::new(0, 3, 1));
        assert_eq!(config.engine_version, Version::new(2, 0, 0));
        assert_eq!(config.api_version, ApiVersion::new(1, 3));
        assert!(!config.diagnostics);
        assert_eq!(config.device_extensions.len(), 2);
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.descriptor_pool.max_sets, 64);
        assert_eq!(config.descriptor_pool.uniform_buffers, 16);
        // Unspecified pool fields keep their defaults.
        assert_eq!(
            config.descriptor_pool.combined_image_samplers,
            DescriptorPoolConfig::default().combined_image_samplers
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = GraphicsConfig::from_toml_str("frames = 2").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_bad_version_string_is_rejected() {
        let err = GraphicsConfig::from_toml_str(r#"api_version = "one.two""#).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_validate_frames_in_flight_bounds() {
        let mut config = GraphicsConfig {
            max_frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.max_frames_in_flight = MAX_FRAMES_IN_FLIGHT_LIMIT + 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.max_frames_in_flight = MAX_FRAMES_IN_FLIGHT_LIMIT;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let config = GraphicsConfig {
            application_name: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = GraphicsConfig {
            device_extensions: vec![String::new()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_api_floor_and_pool() {
        let config = GraphicsConfig {
            api_version: ApiVersion::new(0, 9),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = GraphicsConfig {
            descriptor_pool: DescriptorPoolConfig {
                uniform_buffers: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_version_display_round_trip() {
        let version: Version = "1.4.7".parse().unwrap();
        assert_eq!(version.to_string(), "1.4.7");
        let api: ApiVersion = "1.3".parse().unwrap();
        assert_eq!(api.to_string(), "1.3");
        assert!("1.3.0".parse::<ApiVersion>().is_err());
    }
}
