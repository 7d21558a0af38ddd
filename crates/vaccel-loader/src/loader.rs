//! Plugin loader.
//!
//! [`PluginLoader`] drives one runtime/plugin pair through
//! `Unloaded -> RuntimeLoaded -> PluginLoaded -> Registered -> Initialized`.
//! Every step returns a [`LoaderError`] instead of aborting, and a failed
//! step leaves all handles open so the caller can inspect them.

use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use crate::abi::{PluginDescriptor, RegisterFn};
use crate::backend::{ModuleBackend, OpenMode, SystemBackend};
use crate::config::LoaderConfig;
use crate::descriptor::{versions_match, DescriptorSummary, ParsedDescriptor};
use crate::error::{LoaderError, Result};
use crate::handle::LibraryHandle;
use crate::state::{LoaderStage, Stage, StateMachine, StateTransition};

/// Loads a runtime library and activates one plugin against it.
pub struct PluginLoader {
    config: LoaderConfig,
    backend: Arc<dyn ModuleBackend>,
    descriptor: Option<ParsedDescriptor>,
    // Drop order: the plugin must be closed before the runtime it links against.
    plugin: Option<LibraryHandle>,
    runtime: Option<LibraryHandle>,
    state: StateMachine,
}

impl PluginLoader {
    /// Create a loader on the system dynamic loader.
    pub fn new(config: LoaderConfig) -> Self {
        Self::with_backend(config, Arc::new(SystemBackend))
    }

    /// Create a loader on a custom backend.
    pub fn with_backend(config: LoaderConfig, backend: Arc<dyn ModuleBackend>) -> Self {
        Self {
            config,
            backend,
            descriptor: None,
            plugin: None,
            runtime: None,
            state: StateMachine::new(),
        }
    }

    /// Loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Current lifecycle stage.
    pub fn stage(&self) -> &LoaderStage {
        self.state.current()
    }

    /// Stage transitions so far, oldest first.
    pub fn history(&self) -> &[StateTransition] {
        self.state.history()
    }

    /// The runtime handle, if one is open.
    pub fn runtime(&self) -> Option<&LibraryHandle> {
        self.runtime.as_ref()
    }

    /// The plugin handle, if one is open.
    pub fn plugin(&self) -> Option<&LibraryHandle> {
        self.plugin.as_ref()
    }

    /// The validated descriptor, once the plugin has been registered.
    pub fn descriptor(&self) -> Option<&ParsedDescriptor> {
        self.descriptor.as_ref()
    }

    /// Open the runtime library with global symbol visibility.
    ///
    /// Returns `AlreadyLoaded` if a runtime handle is already held; the held
    /// handle and the stage are left untouched.
    pub fn load_runtime(&mut self, target: &str) -> Result<&LibraryHandle> {
        if let Some(held) = &self.runtime {
            return Err(LoaderError::AlreadyLoaded {
                what: "runtime",
                target: held.target().to_string(),
            });
        }
        self.state.require(&LoaderStage::Unloaded, "load runtime")?;

        tracing::info!(runtime = target, "Loading vAccel runtime");
        let handle = self.step(Stage::LoadRuntime, |l| {
            LibraryHandle::open(l.backend.as_ref(), "runtime", target, OpenMode::Global)
        })?;

        self.state
            .transition(LoaderStage::RuntimeLoaded, format!("opened {}", target))?;
        Ok(&*self.runtime.insert(handle))
    }

    /// Open the plugin module.
    ///
    /// A missing or blank path is a configuration error and never reaches the
    /// platform loader.
    pub fn load_plugin(&mut self, path: Option<&str>) -> Result<&LibraryHandle> {
        if let Some(held) = &self.plugin {
            return Err(LoaderError::AlreadyLoaded {
                what: "plugin",
                target: held.target().to_string(),
            });
        }
        self.state.require(&LoaderStage::RuntimeLoaded, "load plugin")?;

        let target = match path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(target) => target,
            None => {
                return Err(self.fail(
                    Stage::Configuration,
                    LoaderError::config("plugin path not set"),
                ))
            }
        };

        tracing::info!(plugin = target, "Loading plugin");
        let handle = self.step(Stage::LoadPlugin, |l| {
            LibraryHandle::open(l.backend.as_ref(), "plugin", target, OpenMode::Local)
        })?;

        self.state
            .transition(LoaderStage::PluginLoaded, format!("opened {}", target))?;
        Ok(&*self.plugin.insert(handle))
    }

    /// Open the plugin named by [`LoaderConfig::plugin_path`].
    pub fn load_plugin_from_config(&mut self) -> Result<&LibraryHandle> {
        let path = self.config.plugin_path.clone();
        self.load_plugin(path.as_deref())
    }

    /// Register the plugin with the runtime, then initialize it.
    ///
    /// On failure the stage becomes [`LoaderStage::Failed`] and both handles
    /// stay open.
    pub fn activate(&mut self) -> Result<()> {
        self.state.require(&LoaderStage::PluginLoaded, "activate")?;

        let register = self.step(Stage::ResolveRegister, |l| {
            l.runtime_handle()?.resolve_symbol(&l.config.register_symbol)
        })?;
        // SAFETY: the runtime contract types this export as `RegisterFn`.
        let register = unsafe { std::mem::transmute::<*mut c_void, RegisterFn>(register) };

        let slot = self.step(Stage::ResolveDescriptor, |l| {
            l.plugin_handle()?.resolve_symbol(&l.config.descriptor_symbol)
        })?;
        let descriptor = self.step(Stage::ValidateDescriptor, |l| {
            // SAFETY: the plugin contract types this export as a pointer to
            // its descriptor; `from_raw` checks everything reachable from it.
            let parsed = unsafe {
                let raw = *(slot as *const *const PluginDescriptor);
                ParsedDescriptor::from_raw(raw)?
            };
            l.check_version(&parsed)?;
            Ok(parsed)
        })?;

        tracing::info!(plugin = %descriptor, "Registering plugin");
        // SAFETY: `descriptor` was validated and its module is open.
        let code = unsafe { register(descriptor.as_ptr()) };
        if code != 0 {
            return Err(self.fail(Stage::Register, LoaderError::RegistrationFailed(code)));
        }
        let init = descriptor.init_fn();
        let name = descriptor.to_string();
        self.descriptor = Some(descriptor);
        self.state
            .transition(LoaderStage::Registered, format!("registered {}", name))?;

        tracing::info!(plugin = %name, "Initializing plugin");
        // SAFETY: `init` was checked non-null and belongs to the open plugin.
        let code = unsafe { init() };
        if code != 0 {
            return Err(self.fail(Stage::Initialize, LoaderError::InitializationFailed(code)));
        }
        self.state
            .transition(LoaderStage::Initialized, format!("initialized {}", name))?;

        tracing::info!(plugin = %name, "Plugin activated");
        Ok(())
    }

    /// Undo activation: unregister from the runtime, then call the plugin's
    /// `fini`.
    ///
    /// Unregistration is skipped if the runtime does not export it. On success
    /// the loader is back in [`LoaderStage::PluginLoaded`].
    pub fn shutdown(&mut self) -> Result<()> {
        self.state.require(&LoaderStage::Initialized, "shut down")?;
        let descriptor = self
            .descriptor
            .take()
            .ok_or_else(|| self.state.invalid("shut down"))?;

        self.unregister(&descriptor)?;

        if let Some(fini) = descriptor.fini_fn() {
            // SAFETY: `fini` belongs to the still-open plugin.
            let code = unsafe { fini() };
            if code != 0 {
                return Err(self.fail(Stage::Finalize, LoaderError::FinalizationFailed(code)));
            }
        }

        self.state
            .transition(LoaderStage::PluginLoaded, format!("shut down {}", descriptor))?;
        tracing::info!(plugin = %descriptor, "Plugin shut down");
        Ok(())
    }

    /// Close the plugin module.
    ///
    /// Refused while the plugin is registered with the runtime; call
    /// [`shutdown`](Self::shutdown) first. Allowed after a failure.
    pub fn unload_plugin(&mut self) -> Result<()> {
        let failed = self.stage().is_failed();
        if !failed && self.stage() != &LoaderStage::PluginLoaded {
            return Err(self.state.invalid("unload plugin"));
        }
        let handle = self
            .plugin
            .take()
            .ok_or_else(|| self.state.invalid("unload plugin"))?;

        self.descriptor = None;
        let target = handle.target().to_string();
        handle.close()?;
        if !failed {
            self.state
                .transition(LoaderStage::RuntimeLoaded, format!("closed {}", target))?;
        }
        Ok(())
    }

    /// Close the runtime library. The plugin must be closed first.
    pub fn unload_runtime(&mut self) -> Result<()> {
        if self.plugin.is_some() {
            return Err(self.state.invalid("unload runtime with a plugin open"));
        }
        let failed = self.stage().is_failed();
        if !failed && self.stage() != &LoaderStage::RuntimeLoaded {
            return Err(self.state.invalid("unload runtime"));
        }
        let handle = self
            .runtime
            .take()
            .ok_or_else(|| self.state.invalid("unload runtime"))?;

        let target = handle.target().to_string();
        handle.close()?;
        if !failed {
            self.state
                .transition(LoaderStage::Unloaded, format!("closed {}", target))?;
        }
        Ok(())
    }

    /// Shut down if initialized, then close the plugin and the runtime.
    ///
    /// A plugin that was registered but never initialized is unregistered
    /// before its module is closed. Both handles are released even if an
    /// earlier step fails; the first error is returned.
    pub fn teardown(&mut self) -> Result<()> {
        let mut first_error = None;

        if self.stage().is_initialized() {
            if let Err(e) = self.shutdown() {
                first_error.get_or_insert(e);
            }
        } else if let Some(descriptor) = self.descriptor.take() {
            if let Err(e) = self.unregister(&descriptor) {
                first_error.get_or_insert(e);
            }
        }
        if self.plugin.is_some() {
            if let Err(e) = self.unload_plugin() {
                first_error.get_or_insert(e);
            }
        }
        if self.runtime.is_some() {
            if let Err(e) = self.unload_runtime() {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Hand `descriptor` back to the runtime's unregister entry point, if it
    /// exports one.
    fn unregister(&mut self, descriptor: &ParsedDescriptor) -> Result<()> {
        let unregister = self
            .runtime_handle()
            .and_then(|runtime| runtime.resolve_symbol(&self.config.unregister_symbol));
        let address = match unregister {
            Ok(address) => address,
            Err(e) => {
                tracing::debug!("Skipping unregistration: {}", e);
                return Ok(());
            }
        };

        tracing::info!(plugin = %descriptor, "Unregistering plugin");
        // SAFETY: same signature as `register_plugin`.
        let unregister = unsafe { std::mem::transmute::<*mut c_void, RegisterFn>(address) };
        // SAFETY: the descriptor was registered and its module is still open.
        let code = unsafe { unregister(descriptor.as_ptr()) };
        if code != 0 {
            return Err(self.fail(Stage::Unregister, LoaderError::UnregistrationFailed(code)));
        }
        Ok(())
    }

    fn runtime_handle(&self) -> Result<&LibraryHandle> {
        self.runtime
            .as_ref()
            .ok_or_else(|| self.state.invalid("use the runtime"))
    }

    fn plugin_handle(&self) -> Result<&LibraryHandle> {
        self.plugin
            .as_ref()
            .ok_or_else(|| self.state.invalid("use the plugin"))
    }

    fn check_version(&self, descriptor: &ParsedDescriptor) -> Result<()> {
        let Some(expected) = self.config.runtime_version.as_deref() else {
            return Ok(());
        };
        let found = descriptor.vaccel_version.as_deref().unwrap_or("<unknown>");
        if versions_match(expected, found) {
            return Ok(());
        }
        if self.config.version_ignore {
            tracing::warn!(
                expected,
                found,
                "Plugin built for a different vAccel version; continuing"
            );
            return Ok(());
        }
        Err(LoaderError::VersionMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }

    /// Run one step; on error record `stage` as the failure point.
    fn step<T>(&mut self, stage: Stage, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        match f(self) {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(stage, e)),
        }
    }

    fn fail(&mut self, stage: Stage, error: LoaderError) -> LoaderError {
        tracing::error!(stage = %stage, "{}", error);
        self.state.fail(stage, error.to_string());
        error
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("stage", self.stage())
            .field("runtime", &self.runtime)
            .field("plugin", &self.plugin)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl Drop for PluginLoader {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!("Teardown on drop: {}", e);
        }
    }
}

/// Read a plugin's descriptor without a runtime and without activating it.
///
/// The module is opened with deferred binding, so plugins whose runtime
/// symbols are unresolved can still be inspected.
pub fn inspect_plugin(
    backend: &dyn ModuleBackend,
    path: &str,
    descriptor_symbol: &str,
) -> Result<DescriptorSummary> {
    let path = path.trim();
    if path.is_empty() {
        return Err(LoaderError::config("plugin path not set"));
    }

    let handle = LibraryHandle::open(backend, "plugin", path, OpenMode::Deferred)?;
    let slot = handle.resolve_symbol(descriptor_symbol)?;
    // SAFETY: see `PluginLoader::activate`.
    let summary = unsafe {
        let raw = *(slot as *const *const PluginDescriptor);
        ParsedDescriptor::from_raw(raw)?.summary()
    };
    handle.close()?;
    Ok(summary)
}
