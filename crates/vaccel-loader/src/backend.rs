//! Platform dynamic loading backend.
//!
//! [`ModuleBackend`] is the only place that talks to the platform loader. The
//! production implementation, [`SystemBackend`], uses `libloading`; tests swap
//! in an in-memory backend to exercise the activation sequence.

use std::ffi::c_void;
use std::fmt::{self, Display, Formatter};

/// How a module is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Lazy binding, symbols visible to modules opened later (runtime library).
    Global,
    /// Immediate binding, symbols kept private (plugin modules).
    Local,
    /// Lazy binding, symbols kept private (inspecting a plugin without its runtime).
    Deferred,
}

impl Display for OpenMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpenMode::Global => "global",
            OpenMode::Local => "local",
            OpenMode::Deferred => "deferred",
        };
        f.write_str(s)
    }
}

/// Opens modules by path or library name.
///
/// Errors are the platform loader's diagnostic strings.
pub trait ModuleBackend: Send + Sync {
    /// Open `target`, resolving bare names through the platform search rules.
    fn open(&self, target: &str, mode: OpenMode) -> Result<Box<dyn LoadedModule>, String>;
}

/// A module opened by a [`ModuleBackend`].
pub trait LoadedModule: Send {
    /// Address of the exported symbol `name`.
    fn symbol(&self, name: &str) -> Result<*mut c_void, String>;

    /// Release the module.
    fn close(self: Box<Self>) -> Result<(), String>;
}

/// Backend on top of the system dynamic loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

#[cfg(unix)]
struct SystemModule(libloading::os::unix::Library);

#[cfg(not(unix))]
struct SystemModule(libloading::Library);

impl ModuleBackend for SystemBackend {
    #[cfg(unix)]
    fn open(&self, target: &str, mode: OpenMode) -> Result<Box<dyn LoadedModule>, String> {
        use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL, RTLD_NOW};

        let flags = match mode {
            OpenMode::Global => RTLD_LAZY | RTLD_GLOBAL,
            OpenMode::Local => RTLD_NOW | RTLD_LOCAL,
            OpenMode::Deferred => RTLD_LAZY | RTLD_LOCAL,
        };

        // SAFETY: opening a module runs its initializers. The caller chose to
        // trust `target`; nothing else is assumed about it here.
        let library = unsafe { Library::open(Some(target), flags) }.map_err(|e| e.to_string())?;
        Ok(Box::new(SystemModule(library)))
    }

    #[cfg(not(unix))]
    fn open(&self, target: &str, mode: OpenMode) -> Result<Box<dyn LoadedModule>, String> {
        // Windows resolves imports per module; there is no global namespace to opt into.
        tracing::debug!(target_module = target, %mode, "Open mode ignored on this platform");

        // SAFETY: see the unix implementation.
        let library = unsafe { libloading::Library::new(target) }.map_err(|e| e.to_string())?;
        Ok(Box::new(SystemModule(library)))
    }
}

impl LoadedModule for SystemModule {
    fn symbol(&self, name: &str) -> Result<*mut c_void, String> {
        // SAFETY: the symbol is read as an untyped address; callers decide
        // how to interpret it.
        let symbol = unsafe { self.0.get::<*mut c_void>(name.as_bytes()) }
            .map_err(|e| e.to_string())?;
        Ok(*symbol)
    }

    fn close(self: Box<Self>) -> Result<(), String> {
        self.0.close().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_display() {
        assert_eq!(OpenMode::Global.to_string(), "global");
        assert_eq!(OpenMode::Local.to_string(), "local");
        assert_eq!(OpenMode::Deferred.to_string(), "deferred");
    }

    #[test]
    fn test_missing_library_reports_platform_error() {
        let err = SystemBackend
            .open("/nonexistent/dir/libvaccel-missing.so", OpenMode::Local)
            .err()
            .expect("opening a missing file must fail");
        assert!(!err.is_empty());
    }
}
