//! Error types for the plugin loader.

use crate::descriptor::DescriptorError;

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Loader error types.
///
/// Every step of loading and activation maps to its own variant so that a
/// caller can tell which stage failed without parsing the message.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// Required configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The runtime or plugin module could not be opened.
    #[error("Failed to load {what} '{target}': {reason}")]
    LoadFailure {
        what: &'static str,
        target: String,
        reason: String,
    },

    /// An expected exported symbol is absent.
    #[error("Symbol '{symbol}' not found: {reason}")]
    SymbolNotFound { symbol: String, reason: String },

    /// The plugin descriptor failed shape validation.
    #[error("Invalid plugin descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),

    /// The plugin was built against a different vAccel version.
    #[error("vAccel version mismatch: runtime is {expected}, plugin was built for {found}")]
    VersionMismatch { expected: String, found: String },

    /// The runtime rejected the plugin during registration.
    #[error("Plugin registration failed with code {0}")]
    RegistrationFailed(i32),

    /// The plugin's own init routine reported failure.
    #[error("Plugin initialization failed with code {0}")]
    InitializationFailed(i32),

    /// The runtime failed to unregister the plugin.
    #[error("Plugin unregistration failed with code {0}")]
    UnregistrationFailed(i32),

    /// The plugin's fini routine reported failure.
    #[error("Plugin finalization failed with code {0}")]
    FinalizationFailed(i32),

    /// A handle of this kind is already held by the loader.
    #[error("{what} already loaded from '{target}'")]
    AlreadyLoaded { what: &'static str, target: String },

    /// The operation is not valid in the loader's current stage.
    #[error("Cannot {operation} while loader is {stage}")]
    InvalidState {
        operation: &'static str,
        stage: String,
    },

    /// Closing a module handle failed.
    #[error("Failed to close '{target}': {reason}")]
    CloseFailed { target: String, reason: String },

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be rendered.
    #[error("Cannot serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl LoaderError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error came from code owned by the plugin or runtime,
    /// as opposed to the loader's own checks.
    pub fn is_plugin_reported(&self) -> bool {
        matches!(
            self,
            Self::RegistrationFailed(_)
                | Self::InitializationFailed(_)
                | Self::UnregistrationFailed(_)
                | Self::FinalizationFailed(_)
        )
    }
}
