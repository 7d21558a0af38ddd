//! C ABI mirror of the vAccel plugin structures.
//!
//! A plugin exports a data symbol named [`DESCRIPTOR_SYMBOL`] whose value is a
//! pointer to a [`PluginDescriptor`]. The runtime exports
//! [`REGISTER_SYMBOL`] and, optionally, [`UNREGISTER_SYMBOL`].
//!
//! These layouts must match `struct vaccel_plugin` and
//! `struct vaccel_plugin_info` from `vaccel.h`.

use std::ffi::{c_char, c_int, c_void};

/// Default name of the descriptor symbol exported by a plugin.
pub const DESCRIPTOR_SYMBOL: &str = "vaccel_plugin";

/// Default name of the registration entry point exported by the runtime.
pub const REGISTER_SYMBOL: &str = "register_plugin";

/// Default name of the unregistration entry point exported by the runtime.
pub const UNREGISTER_SYMBOL: &str = "unregister_plugin";

/// Intrusive list node (`struct vaccel_list_entry`).
#[repr(C)]
#[derive(Debug)]
pub struct ListEntry {
    pub next: *mut ListEntry,
    pub prev: *mut ListEntry,
}

impl ListEntry {
    /// An unlinked node.
    pub const fn empty() -> Self {
        Self {
            next: std::ptr::null_mut(),
            prev: std::ptr::null_mut(),
        }
    }
}

/// Plugin metadata and lifecycle entry points (`struct vaccel_plugin_info`).
#[repr(C)]
pub struct PluginInfo {
    /// Plugin name (NUL-terminated)
    pub name: *const c_char,

    /// Plugin version (NUL-terminated)
    pub version: *const c_char,

    /// vAccel version the plugin was built against (NUL-terminated)
    pub vaccel_version: *const c_char,

    /// Called once after registration; `0` means success
    pub init: Option<PluginEntryFn>,

    /// Called once before the plugin goes away; `0` means success
    pub fini: Option<PluginEntryFn>,

    /// Whether the plugin forwards operations to another host
    pub is_virtual: bool,

    /// Bitmask of `PluginType` flags
    pub plugin_type: u32,
}

/// Plugin descriptor exported by plugin modules (`struct vaccel_plugin`).
///
/// The list entries and `dl_handle` belong to the runtime, which links the
/// descriptor into its own tables during registration.
#[repr(C)]
pub struct PluginDescriptor {
    pub dl_handle: *mut c_void,
    pub entry: ListEntry,
    pub ops: ListEntry,
    pub info: *const PluginInfo,
}

/// Signature of a plugin's `init`/`fini` entry points.
pub type PluginEntryFn = unsafe extern "C" fn() -> c_int;

/// Signature of the runtime's `register_plugin`/`unregister_plugin`.
pub type RegisterFn = unsafe extern "C" fn(plugin: *mut PluginDescriptor) -> c_int;

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn test_descriptor_layout() {
        let word = size_of::<*const ()>();
        assert_eq!(size_of::<ListEntry>(), 2 * word);
        assert_eq!(size_of::<PluginDescriptor>(), 6 * word);
        assert_eq!(align_of::<PluginDescriptor>(), align_of::<*const ()>());
    }

    #[test]
    fn test_nullable_entry_points_are_pointer_sized() {
        assert_eq!(
            size_of::<Option<PluginEntryFn>>(),
            size_of::<*const ()>()
        );
    }
}
