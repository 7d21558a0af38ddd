//! Plugin descriptor validation.
//!
//! The raw [`PluginDescriptor`] is read through a pointer exported by the
//! plugin. Nothing is called through it until [`ParsedDescriptor::from_raw`]
//! has checked that the required pointers are present.

use std::ffi::{c_char, CStr};
use std::fmt::{self, Display, Formatter};
use std::ptr::NonNull;

use serde::Serialize;

use crate::abi::{PluginDescriptor, PluginEntryFn};

bitflags::bitflags! {
    /// Bit flags for plugin types (`VACCEL_PLUGIN_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PluginType: u32 {
        const GENERIC = 1 << 0;
        const CPU = 1 << 1;
        const GPU = 1 << 2;
        const FPGA = 1 << 3;
        const SOFTWARE = 1 << 4;
        const HARDWARE = 1 << 5;
        const DEBUG = 1 << 6;
    }
}

impl PluginType {
    /// Lowercase names of the set flags, in bit order.
    pub fn names(&self) -> Vec<String> {
        self.iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect()
    }
}

/// Descriptor validation errors.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor pointer is null")]
    NullDescriptor,

    #[error("descriptor info pointer is null")]
    NullInfo,

    #[error("missing entry point: {0}")]
    MissingEntryPoint(&'static str),

    #[error("invalid UTF-8 in field '{0}': {1}")]
    InvalidUtf8(&'static str, #[source] std::str::Utf8Error),
}

/// Validated view of a plugin descriptor.
///
/// Strings are copied out; the entry points and the descriptor pointer stay
/// owned by the plugin module and are only valid while it is loaded.
#[derive(Debug, Clone)]
pub struct ParsedDescriptor {
    /// Plugin name
    pub name: Option<String>,

    /// Plugin version
    pub version: Option<String>,

    /// vAccel version the plugin was built against
    pub vaccel_version: Option<String>,

    /// Whether this is a virtual (forwarding) plugin
    pub is_virtual: bool,

    /// Plugin type flags
    pub plugin_type: PluginType,

    raw: NonNull<PluginDescriptor>,
    init: PluginEntryFn,
    fini: Option<PluginEntryFn>,
}

// SAFETY: the descriptor is never dereferenced concurrently by the loader;
// the pointer is only handed to the runtime from the thread driving the loader.
unsafe impl Send for ParsedDescriptor {}

impl ParsedDescriptor {
    /// Validate and parse a raw descriptor.
    ///
    /// # Safety
    /// `raw` must be null or point to a `PluginDescriptor` whose non-null
    /// string fields are NUL-terminated, and which stays valid while the
    /// returned value is used.
    pub unsafe fn from_raw(raw: *const PluginDescriptor) -> Result<Self, DescriptorError> {
        let raw = NonNull::new(raw as *mut PluginDescriptor).ok_or(DescriptorError::NullDescriptor)?;
        let descriptor = raw.as_ref();

        let info = descriptor.info.as_ref().ok_or(DescriptorError::NullInfo)?;
        let init = info.init.ok_or(DescriptorError::MissingEntryPoint("init"))?;

        Ok(Self {
            name: read_string(info.name, "name")?,
            version: read_string(info.version, "version")?,
            vaccel_version: read_string(info.vaccel_version, "vaccel_version")?,
            is_virtual: info.is_virtual,
            plugin_type: PluginType::from_bits_retain(info.plugin_type),
            raw,
            init,
            fini: info.fini,
        })
    }

    /// Pointer handed to the runtime's registration functions.
    pub fn as_ptr(&self) -> *mut PluginDescriptor {
        self.raw.as_ptr()
    }

    /// The plugin's init entry point.
    pub fn init_fn(&self) -> PluginEntryFn {
        self.init
    }

    /// The plugin's fini entry point, if it has one.
    pub fn fini_fn(&self) -> Option<PluginEntryFn> {
        self.fini
    }

    /// Owned summary that outlives the plugin module.
    pub fn summary(&self) -> DescriptorSummary {
        DescriptorSummary {
            name: self.name.clone(),
            version: self.version.clone(),
            vaccel_version: self.vaccel_version.clone(),
            is_virtual: self.is_virtual,
            plugin_type: self.plugin_type.names(),
            has_fini: self.fini.is_some(),
        }
    }
}

impl Display for ParsedDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{}",
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.version.as_deref().unwrap_or("?")
        )?;
        if let Some(vaccel) = &self.vaccel_version {
            write!(f, " (vAccel {})", vaccel)?;
        }
        Ok(())
    }
}

/// Descriptor fields that remain valid after the plugin is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptorSummary {
    pub name: Option<String>,
    pub version: Option<String>,
    pub vaccel_version: Option<String>,
    pub is_virtual: bool,
    pub plugin_type: Vec<String>,
    pub has_fini: bool,
}

unsafe fn read_string(
    ptr: *const c_char,
    field: &'static str,
) -> Result<Option<String>, DescriptorError> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|e| DescriptorError::InvalidUtf8(field, e))
}

/// Whether a plugin built for vAccel `found` can run on runtime `expected`.
///
/// Versions are compared as semver without build metadata; a leading `v` is
/// ignored. Non-semver strings must match exactly.
pub fn versions_match(expected: &str, found: &str) -> bool {
    let parse = |s: &str| semver::Version::parse(s.trim().trim_start_matches('v'));
    match (parse(expected), parse(found)) {
        (Ok(a), Ok(b)) => (a.major, a.minor, a.patch, &a.pre) == (b.major, b.minor, b.patch, &b.pre),
        _ => expected.trim() == found.trim(),
    }
}
