//! Vulkan instance management.
//!
//! This module handles VkInstance creation, extension and layer negotiation,
//! and the diagnostic messenger.
//!
//! # Overview
//!
//! [`Instance::new`] validates the [`GraphicsConfig`], checks every requested
//! extension and layer against what the runtime offers, and only then creates
//! the instance. When diagnostics are enabled a messenger forwards validation
//! messages to `tracing`, classified by [`MessageSeverity`]. Error-severity
//! messages are counted; any reported while the instance is being created
//! abort creation, and the graphics device checks the counter again once it
//! has finished initializing.
//!
//! # Example
//!
//! ```no_run
//! use lumen_core::GraphicsConfig;
//! use lumen_rhi::instance::Instance;
//!
//! let config = GraphicsConfig::default();
//! let instance = Instance::new(&config, &[]).expect("Failed to create Vulkan instance");
//!
//! let vk_instance = instance.handle();
//! let entry = instance.entry();
//! ```

use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::atomic::{AtomicU32, Ordering};

use ash::{Entry, vk};
use lumen_core::GraphicsConfig;
use tracing::{debug, error, info, trace, warn};

use crate::error::{RhiError, RhiResult, VkResultExt};
use crate::lifecycle::Subsystem;

/// Severity buckets for diagnostic messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageSeverity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl MessageSeverity {
    /// Maps driver severity flags to a bucket, picking the most severe bit set.
    pub fn classify(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Self::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Self::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Self::Info
        } else {
            Self::Verbose
        }
    }
}

/// Error counter the messenger callback writes into.
///
/// Lives in a `Box` owned by [`Instance`] so its address stays fixed while the
/// driver holds it as callback user data.
#[derive(Debug, Default)]
struct DiagnosticsSink {
    errors: AtomicU32,
}

/// Vulkan instance wrapper with optional diagnostics.
///
/// This struct manages the lifetime of the Vulkan instance and its debug
/// messenger. [`Subsystem::shutdown`] (or drop) destroys the messenger first,
/// then the instance.
pub struct Instance {
    /// Vulkan entry point loader
    entry: Entry,
    /// Vulkan instance handle
    instance: ash::Instance,
    /// Debug utils loader and messenger (only present with diagnostics)
    messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    /// Callback counter; must outlive the messenger
    diagnostics: Box<DiagnosticsSink>,
    /// Error count already reported by `update`
    reported_errors: u32,
    /// API version requested at creation
    api_version: u32,
    destroyed: bool,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Arguments
    ///
    /// * `config` - Application identity, API floor and diagnostics settings
    /// * `surface_extensions` - Extensions the window needs for presentation
    ///
    /// # Errors
    ///
    /// - [`RhiError::Configuration`] if the config is invalid, the runtime is
    ///   older than `config.api_version`, or a requested extension or layer is
    ///   not supported
    /// - [`RhiError::Loading`] if the Vulkan library cannot be loaded
    /// - [`RhiError::InstanceCreation`] if `vkCreateInstance` fails
    /// - [`RhiError::Diagnostics`] if the validation layer reported errors
    ///   during creation
    pub fn new(config: &GraphicsConfig, surface_extensions: &[&CStr]) -> RhiResult<Self> {
        config
            .validate()
            .map_err(|e| RhiError::Configuration(e.to_string()))?;

        let entry = unsafe { Entry::load()? };

        let runtime_version = unsafe { entry.try_enumerate_instance_version() }
            .during("query the instance version")?
            .unwrap_or(vk::API_VERSION_1_0);
        let api_version =
            vk::make_api_version(0, config.api_version.major, config.api_version.minor, 0);
        if !version_satisfies(runtime_version, api_version) {
            return Err(RhiError::Configuration(format!(
                "Vulkan runtime supports {}.{}, but {} was requested",
                vk::api_version_major(runtime_version),
                vk::api_version_minor(runtime_version),
                config.api_version
            )));
        }

        let application_name = to_cstring(&config.application_name)?;
        let engine_name = to_cstring(&config.engine_name)?;

        let mut extensions: Vec<CString> = surface_extensions.iter().map(|&e| e.into()).collect();
        for name in &config.instance_extensions {
            extensions.push(to_cstring(name)?);
        }
        if config.diagnostics {
            extensions.push(ash::ext::debug_utils::NAME.into());
        }
        dedup_preserving_order(&mut extensions);

        let available_extensions: Vec<CString> =
            unsafe { entry.enumerate_instance_extension_properties(None) }
                .during("enumerate instance extensions")?
                .iter()
                .filter_map(|p| p.extension_name_as_c_str().ok().map(CStr::to_owned))
                .collect();
        let missing = missing_names(&extensions, &available_extensions);
        if !missing.is_empty() {
            return Err(RhiError::Configuration(format!(
                "unsupported instance extension(s): {}",
                join_names(&missing)
            )));
        }

        let layers: Vec<CString> = if config.diagnostics {
            let requested = config
                .validation_layers
                .iter()
                .map(|name| to_cstring(name))
                .collect::<RhiResult<Vec<_>>>()?;
            let available_layers: Vec<CString> =
                unsafe { entry.enumerate_instance_layer_properties() }
                    .during("enumerate instance layers")?
                    .iter()
                    .filter_map(|p| p.layer_name_as_c_str().ok().map(CStr::to_owned))
                    .collect();
            let missing = missing_names(&requested, &available_layers);
            if !missing.is_empty() {
                return Err(RhiError::Configuration(format!(
                    "unsupported diagnostic layer(s): {}",
                    join_names(&missing)
                )));
            }
            requested
        } else {
            Vec::new()
        };

        let app_info = vk::ApplicationInfo::default()
            .application_name(&application_name)
            .application_version(version_bits(config.application_version))
            .engine_name(&engine_name)
            .engine_version(version_bits(config.engine_version))
            .api_version(api_version);

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        let diagnostics = Box::new(DiagnosticsSink::default());
        let user_data = std::ptr::from_ref::<DiagnosticsSink>(&*diagnostics) as *mut c_void;
        let mut messenger_info = messenger_create_info(user_data);

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        // Chaining the messenger info captures messages from vkCreateInstance
        // and vkDestroyInstance themselves.
        if config.diagnostics {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(RhiError::InstanceCreation)?;

        info!(
            "Vulkan instance created (API {}, {} extension(s), {} layer(s))",
            config.api_version,
            extensions.len(),
            layers.len()
        );

        let mut this = Self {
            entry,
            instance,
            messenger: None,
            diagnostics,
            reported_errors: 0,
            api_version,
            destroyed: false,
        };

        if config.diagnostics {
            let debug_utils = ash::ext::debug_utils::Instance::new(&this.entry, &this.instance);
            // Dropping `this` on error destroys the instance.
            let messenger =
                unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) }
                    .during("create the debug messenger")?;
            this.messenger = Some((debug_utils, messenger));
            debug!("Debug messenger registered");
        }

        let count = this.diagnostic_error_count();
        if count > 0 {
            return Err(RhiError::Diagnostics {
                operation: "instance creation",
                count,
            });
        }

        Ok(this)
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether the diagnostic messenger is registered.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.messenger.is_some()
    }

    /// The API version requested at creation, in packed Vulkan form.
    #[inline]
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Number of error-severity diagnostic messages seen so far.
    pub fn diagnostic_error_count(&self) -> u32 {
        self.diagnostics.errors.load(Ordering::Acquire)
    }
}

impl Subsystem for Instance {
    fn name(&self) -> &'static str {
        "instance"
    }

    /// Reports validation errors raised since the previous update.
    fn update(&mut self) -> RhiResult<()> {
        let errors = self.diagnostic_error_count();
        if errors > self.reported_errors {
            warn!(
                "Validation layer reported {} new error(s) ({} total)",
                errors - self.reported_errors,
                errors
            );
            self.reported_errors = errors;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        unsafe {
            if let Some((debug_utils, messenger)) = self.messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn messenger_create_info<'a>(user_data: *mut c_void) -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .user_data(user_data)
}

/// Whether a runtime at `available` can serve a request for `requested`.
/// Only major and minor take part; patch levels never gate creation.
fn version_satisfies(available: u32, requested: u32) -> bool {
    let key = |v: u32| (vk::api_version_major(v), vk::api_version_minor(v));
    key(available) >= key(requested)
}

fn version_bits(version: lumen_core::Version) -> u32 {
    vk::make_api_version(0, version.major, version.minor, version.patch)
}

fn to_cstring(value: &str) -> RhiResult<CString> {
    CString::new(value)
        .map_err(|_| RhiError::Configuration(format!("'{value}' contains a NUL byte")))
}

fn dedup_preserving_order(names: &mut Vec<CString>) {
    let mut seen = Vec::with_capacity(names.len());
    names.retain(|name| {
        if seen.contains(name) {
            false
        } else {
            seen.push(name.clone());
            true
        }
    });
}

/// Returns the entries of `requested` that `available` does not contain.
pub(crate) fn missing_names<'a>(requested: &'a [CString], available: &[CString]) -> Vec<&'a CStr> {
    requested
        .iter()
        .filter(|name| !available.contains(name))
        .map(CString::as_c_str)
        .collect()
}

pub(crate) fn join_names(names: &[&CStr]) -> String {
    names
        .iter()
        .map(|n| n.to_string_lossy())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Debug messenger callback.
///
/// Forwards the message to `tracing` at a level matching its severity and
/// counts errors in the [`DiagnosticsSink`] passed as user data.
///
/// # Safety
///
/// Called by the driver; `p_callback_data` and `user_data` are the pointers
/// registered through [`messenger_create_info`].
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    let severity = MessageSeverity::classify(message_severity);

    if severity == MessageSeverity::Error && !user_data.is_null() {
        let sink = unsafe { &*(user_data as *const DiagnosticsSink) };
        sink.errors.fetch_add(1, Ordering::AcqRel);
    }

    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    };

    match severity {
        MessageSeverity::Error => error!("[Vulkan {}] {}", type_str, message),
        MessageSeverity::Warning => warn!("[Vulkan {}] {}", type_str, message),
        MessageSeverity::Info => debug!("[Vulkan {}] {}", type_str, message),
        MessageSeverity::Verbose => trace!("[Vulkan {}] {}", type_str, message),
    }

    // Never abort the call that triggered the message.
    vk::FALSE
}
