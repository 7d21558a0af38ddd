//! vAccel plugin loader.
//!
//! Opens the vAccel runtime library with global symbol visibility, opens a
//! plugin module against it, then registers and initializes the plugin through
//! its exported C descriptor. Each step is fallible and reported as a
//! [`LoaderError`] tagged with the [`Stage`] where it happened.
//!
//! ```no_run
//! use vaccel_loader::{bootstrap, LoaderConfig};
//!
//! let config = LoaderConfig {
//!     plugin_path: Some("/usr/local/lib/libvaccel-noop.so".into()),
//!     ..Default::default()
//! };
//! match bootstrap(config) {
//!     Ok(mut loader) => {
//!         println!("activated {}", loader.descriptor().unwrap());
//!         loader.teardown().unwrap();
//!     }
//!     Err(e) => eprintln!("{}", e),
//! }
//! ```

pub mod abi;
pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod loader;
pub mod lock;
pub mod state;

#[cfg(test)]
mod testing;

pub use backend::{LoadedModule, ModuleBackend, OpenMode, SystemBackend};
pub use bootstrap::{bootstrap, bootstrap_from_env, bootstrap_with_backend, BootstrapError};
pub use config::{env_vars, LoaderConfig};
pub use descriptor::{DescriptorError, DescriptorSummary, ParsedDescriptor, PluginType};
pub use error::{LoaderError, Result};
pub use handle::LibraryHandle;
pub use loader::{inspect_plugin, PluginLoader};
pub use lock::with_target_lock;
pub use state::{LoaderStage, Stage, StateMachine, StateTransition};
