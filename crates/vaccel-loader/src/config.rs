//! Loader configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables. The CLI applies its flags on top.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::abi;
use crate::error::{LoaderError, Result};

/// Environment variable names.
pub mod env_vars {
    /// Path of the plugin module to activate.
    pub const PLUGIN: &str = "PYTHON_VACCEL_PLUGIN";
    /// Runtime library name or path.
    pub const RUNTIME_LIBRARY: &str = "VACCEL_RUNTIME_LIBRARY";
    /// vAccel version of the runtime, checked against the plugin's.
    pub const RUNTIME_VERSION: &str = "VACCEL_RUNTIME_VERSION";
    /// Skip the plugin/runtime version check.
    pub const VERSION_IGNORE: &str = "VACCEL_VERSION_IGNORE";
    /// Emit logs as JSON (read by the CLI).
    pub const LOG_JSON: &str = "VACCEL_LOADER_LOG_JSON";
}

/// Default values.
pub mod defaults {
    pub const RUNTIME_LIBRARY: &str = "libvaccel.so";
}

/// Plugin loader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Runtime library, opened with global symbol visibility
    pub runtime_library: String,

    /// Plugin module path. No default: absence is a configuration error.
    #[serde(alias = "pluginPath", skip_serializing_if = "Option::is_none")]
    pub plugin_path: Option<String>,

    /// Data symbol holding the plugin's descriptor pointer
    pub descriptor_symbol: String,

    /// Runtime entry point that registers a plugin
    pub register_symbol: String,

    /// Runtime entry point that unregisters a plugin (optional export)
    pub unregister_symbol: String,

    /// Expected vAccel version of the runtime
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,

    /// Accept plugins built for a different vAccel version
    pub version_ignore: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            runtime_library: defaults::RUNTIME_LIBRARY.to_string(),
            plugin_path: None,
            descriptor_symbol: abi::DESCRIPTOR_SYMBOL.to_string(),
            register_symbol: abi::REGISTER_SYMBOL.to_string(),
            unregister_symbol: abi::UNREGISTER_SYMBOL.to_string(),
            runtime_version: None,
            version_ignore: false,
        }
    }
}

impl LoaderConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parse TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by [`env_vars`] names.
    ///
    /// A variable that is set but empty still overrides: an empty plugin path
    /// is reported as a configuration error rather than ignored.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(plugin) = lookup(env_vars::PLUGIN) {
            self.plugin_path = Some(plugin);
        }
        if let Some(runtime) = lookup(env_vars::RUNTIME_LIBRARY) {
            self.runtime_library = runtime;
        }
        if let Some(version) = lookup(env_vars::RUNTIME_VERSION) {
            self.runtime_version = Some(version).filter(|v| !v.trim().is_empty());
        }
        if let Some(raw) = lookup(env_vars::VERSION_IGNORE) {
            match parse_bool(&raw) {
                Some(ignore) => self.version_ignore = ignore,
                None => tracing::warn!(
                    "Ignoring {}={:?}: expected a boolean",
                    env_vars::VERSION_IGNORE,
                    raw
                ),
            }
        }
        self
    }

    /// The plugin path, or a configuration error if it is unset or blank.
    pub fn require_plugin_path(&self) -> Result<&str> {
        self.plugin_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| LoaderError::config("plugin path not set"))
    }

    /// Check that every value needed for activation is present.
    pub fn validate(&self) -> Result<()> {
        self.require_plugin_path()?;
        if self.runtime_library.trim().is_empty() {
            return Err(LoaderError::config("runtime library not set"));
        }
        for (key, value) in [
            ("descriptor_symbol", &self.descriptor_symbol),
            ("register_symbol", &self.register_symbol),
            ("unregister_symbol", &self.unregister_symbol),
        ] {
            if value.trim().is_empty() {
                return Err(LoaderError::config(format!("{} is empty", key)));
            }
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
