//! In-memory module backend and descriptor fixtures for unit tests.

use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::abi::{ListEntry, PluginDescriptor, PluginEntryFn, PluginInfo, RegisterFn};
use crate::backend::{LoadedModule, ModuleBackend, OpenMode};
use crate::descriptor::PluginType;

/// Symbols exported by a fake module, stored as plain addresses.
#[derive(Debug, Clone, Default)]
pub struct FakeModule {
    symbols: HashMap<String, usize>,
}

impl FakeModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, name: &str, address: *const c_void) -> Self {
        self.symbols.insert(name.to_string(), address as usize);
        self
    }

    pub fn with_register(self, name: &str, f: RegisterFn) -> Self {
        self.with_symbol(name, f as *const c_void)
    }
}

/// Backend serving [`FakeModule`]s by target name and recording every call.
#[derive(Default)]
pub struct FakeBackend {
    modules: HashMap<String, FakeModule>,
    opens: Mutex<Vec<(String, OpenMode)>>,
    closes: Arc<Mutex<Vec<String>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, target: &str, module: FakeModule) -> Self {
        self.modules.insert(target.to_string(), module);
        self
    }

    pub fn opens(&self) -> Vec<(String, OpenMode)> {
        self.opens.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closes.lock().clone()
    }
}

impl ModuleBackend for FakeBackend {
    fn open(&self, target: &str, mode: OpenMode) -> Result<Box<dyn LoadedModule>, String> {
        self.opens.lock().push((target.to_string(), mode));
        let module = self.modules.get(target).ok_or_else(|| {
            format!("{}: cannot open shared object file: No such file or directory", target)
        })?;
        Ok(Box::new(OpenFakeModule {
            target: target.to_string(),
            symbols: module.symbols.clone(),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct OpenFakeModule {
    target: String,
    symbols: HashMap<String, usize>,
    closes: Arc<Mutex<Vec<String>>>,
}

impl LoadedModule for OpenFakeModule {
    fn symbol(&self, name: &str) -> Result<*mut c_void, String> {
        self.symbols
            .get(name)
            .map(|&address| address as *mut c_void)
            .ok_or_else(|| format!("{}: undefined symbol: {}", self.target, name))
    }

    fn close(self: Box<Self>) -> Result<(), String> {
        self.closes.lock().push(self.target);
        Ok(())
    }
}

/// Heap-pinned plugin descriptor, laid out the way a C plugin exports it.
pub struct FakePlugin {
    _info: Box<PluginInfo>,
    _descriptor: Box<PluginDescriptor>,
    slot: Box<*const PluginDescriptor>,
}

// SAFETY: the fixture owns all the memory its pointers refer to.
unsafe impl Send for FakePlugin {}
unsafe impl Sync for FakePlugin {}

impl FakePlugin {
    pub fn new(init: Option<PluginEntryFn>, fini: Option<PluginEntryFn>) -> Self {
        Self::with_version(init, fini, c"0.6.1".as_ptr())
    }

    pub fn with_version(
        init: Option<PluginEntryFn>,
        fini: Option<PluginEntryFn>,
        vaccel_version: *const std::ffi::c_char,
    ) -> Self {
        let info = Box::new(PluginInfo {
            name: c"fake".as_ptr(),
            version: c"1.0.0".as_ptr(),
            vaccel_version,
            init,
            fini,
            is_virtual: false,
            plugin_type: PluginType::GENERIC.bits(),
        });
        let descriptor = Box::new(PluginDescriptor {
            dl_handle: std::ptr::null_mut(),
            entry: ListEntry::empty(),
            ops: ListEntry::empty(),
            info: &*info,
        });
        let slot = Box::new(&*descriptor as *const PluginDescriptor);
        Self {
            _info: info,
            _descriptor: descriptor,
            slot,
        }
    }

    /// A plugin whose exported pointer is null.
    pub fn null() -> Self {
        let mut plugin = Self::new(None, None);
        *plugin.slot = std::ptr::null();
        plugin
    }

    /// Address of the exported `vaccel_plugin` variable.
    pub fn symbol_address(&self) -> *const c_void {
        &*self.slot as *const *const PluginDescriptor as *const c_void
    }

    /// The descriptor the runtime should receive.
    pub fn descriptor_ptr(&self) -> *const PluginDescriptor {
        *self.slot
    }
}

pub extern "C" fn register_ok(_plugin: *mut PluginDescriptor) -> c_int {
    0
}

pub extern "C" fn entry_ok() -> c_int {
    0
}
