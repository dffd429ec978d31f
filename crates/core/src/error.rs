//! Error types shared by the lumen crates.

use thiserror::Error;

/// Main error type for configuration, windowing and I/O failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Surface creation or extension enumeration errors
    #[error("Surface error: {0}")]
    Surface(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML configuration
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration values that parse but are not usable
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the lumen core [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
