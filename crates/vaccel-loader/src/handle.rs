//! Owned handle to a loaded module.

use std::ffi::c_void;
use std::fmt;

use crate::backend::{LoadedModule, ModuleBackend, OpenMode};
use crate::error::{LoaderError, Result};

/// Owned handle to a dynamically loaded module.
///
/// The module is released exactly once: by [`LibraryHandle::close`], or on
/// drop if it was never closed explicitly.
pub struct LibraryHandle {
    what: &'static str,
    target: String,
    mode: OpenMode,
    module: Option<Box<dyn LoadedModule>>,
}

impl LibraryHandle {
    /// Open `target` through `backend`.
    ///
    /// `what` names the module in diagnostics ("runtime", "plugin").
    pub fn open(
        backend: &dyn ModuleBackend,
        what: &'static str,
        target: &str,
        mode: OpenMode,
    ) -> Result<Self> {
        tracing::debug!(what, target_module = target, %mode, "Opening module");
        let module = backend
            .open(target, mode)
            .map_err(|reason| LoaderError::LoadFailure {
                what,
                target: target.to_string(),
                reason,
            })?;

        Ok(Self {
            what,
            target: target.to_string(),
            mode,
            module: Some(module),
        })
    }

    /// Path or library name this handle was opened from.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Mode the module was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Resolve an exported symbol to its address.
    ///
    /// A symbol that resolves to a null address is reported as missing.
    pub fn resolve_symbol(&self, name: &str) -> Result<*mut c_void> {
        let module = self.module.as_ref().ok_or_else(|| LoaderError::InvalidState {
            operation: "resolve symbols",
            stage: format!("closed ({})", self.target),
        })?;

        let address = module
            .symbol(name)
            .map_err(|reason| LoaderError::SymbolNotFound {
                symbol: name.to_string(),
                reason,
            })?;

        if address.is_null() {
            return Err(LoaderError::SymbolNotFound {
                symbol: name.to_string(),
                reason: format!("'{}' exports it with a null address", self.target),
            });
        }

        tracing::trace!(symbol = name, target_module = %self.target, "Resolved symbol");
        Ok(address)
    }

    /// Close the module.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let Some(module) = self.module.take() else {
            return Ok(());
        };
        tracing::debug!(what = self.what, target_module = %self.target, "Closing module");
        module.close().map_err(|reason| LoaderError::CloseFailed {
            target: self.target.clone(),
            reason,
        })
    }
}

impl Drop for LibraryHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("{}", e);
        }
    }
}

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("what", &self.what)
            .field("target", &self.target)
            .field("mode", &self.mode)
            .field("open", &self.module.is_some())
            .finish()
    }
}
