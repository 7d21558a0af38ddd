//! One-call activation: configure, load the runtime, load the plugin, activate.

use std::fmt;
use std::sync::Arc;

use crate::backend::{ModuleBackend, SystemBackend};
use crate::config::LoaderConfig;
use crate::error::LoaderError;
use crate::loader::PluginLoader;
use crate::lock::with_target_lock;
use crate::state::{LoaderStage, Stage};

/// A failed bootstrap.
///
/// Carries the loader when one was created, so the caller can inspect the
/// handles that were opened before tearing them down.
pub struct BootstrapError {
    pub error: LoaderError,
    pub loader: Option<PluginLoader>,
}

impl BootstrapError {
    /// The step that failed.
    pub fn stage(&self) -> Stage {
        match self.loader.as_ref().map(PluginLoader::stage) {
            Some(LoaderStage::Failed { stage, .. }) => *stage,
            _ => Stage::Configuration,
        }
    }

    pub fn into_inner(self) -> LoaderError {
        self.error
    }
}

impl fmt::Debug for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapError")
            .field("stage", &self.stage())
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage(), self.error)
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Activate the plugin described by `config` using the system loader.
pub fn bootstrap(config: LoaderConfig) -> Result<PluginLoader, BootstrapError> {
    bootstrap_with_backend(config, Arc::new(SystemBackend))
}

/// Activate using configuration from the process environment.
pub fn bootstrap_from_env() -> Result<PluginLoader, BootstrapError> {
    bootstrap(LoaderConfig::from_env())
}

/// Activate the plugin described by `config` on `backend`.
///
/// Loads of the same plugin file are serialized across threads.
pub fn bootstrap_with_backend(
    config: LoaderConfig,
    backend: Arc<dyn ModuleBackend>,
) -> Result<PluginLoader, BootstrapError> {
    if let Err(error) = config.validate() {
        tracing::error!("Invalid loader configuration: {}", error);
        return Err(BootstrapError {
            error,
            loader: None,
        });
    }

    let plugin_path = config
        .plugin_path
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    with_target_lock(&plugin_path, || {
        let mut loader = PluginLoader::with_backend(config, backend);
        match activate_sequence(&mut loader, &plugin_path) {
            Ok(()) => Ok(loader),
            Err(error) => Err(BootstrapError {
                error,
                loader: Some(loader),
            }),
        }
    })
}

fn activate_sequence(loader: &mut PluginLoader, plugin_path: &str) -> crate::error::Result<()> {
    let runtime_library = loader.config().runtime_library.clone();
    loader.load_runtime(&runtime_library)?;
    loader.load_plugin(Some(plugin_path))?;
    loader.activate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::PluginEntryFn;
    use crate::testing::{entry_ok, register_ok, FakeBackend, FakeModule, FakePlugin};

    const PLUGIN: &str = "/opt/vaccel/lib/libvaccel-noop.so";

    fn config() -> LoaderConfig {
        LoaderConfig {
            plugin_path: Some(PLUGIN.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_bootstrap_activates() {
        let plugin = FakePlugin::new(Some(entry_ok as PluginEntryFn), None);
        let backend = Arc::new(
            FakeBackend::new()
                .with_module(
                    "libvaccel.so",
                    FakeModule::new().with_register("register_plugin", register_ok),
                )
                .with_module(
                    PLUGIN,
                    FakeModule::new().with_symbol("vaccel_plugin", plugin.symbol_address()),
                ),
        );

        let mut loader = bootstrap_with_backend(config(), backend.clone()).unwrap();
        assert!(loader.stage().is_initialized());
        loader.teardown().unwrap();
        assert_eq!(backend.closed().len(), 2);
    }

    #[test]
    fn test_missing_plugin_path_fails_before_loading() {
        let backend = Arc::new(FakeBackend::new());
        let err = bootstrap_with_backend(LoaderConfig::default(), backend.clone()).unwrap_err();

        assert!(err.loader.is_none());
        assert_eq!(err.stage(), Stage::Configuration);
        assert!(err.to_string().contains("plugin path not set"));
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn test_failure_returns_loader_with_handles() {
        let backend = Arc::new(FakeBackend::new().with_module(
            "libvaccel.so",
            FakeModule::new().with_register("register_plugin", register_ok),
        ));

        let err = bootstrap_with_backend(config(), backend.clone()).unwrap_err();
        assert_eq!(err.stage(), Stage::LoadPlugin);
        assert!(matches!(err.error, LoaderError::LoadFailure { what: "plugin", .. }));

        let mut loader = err.loader.unwrap();
        assert!(loader.runtime().is_some());
        loader.teardown().unwrap();
        assert_eq!(backend.closed(), vec!["libvaccel.so".to_string()]);
    }
}
