//! Plugin system
//!
//! Plugins are Rust dynamic libraries built against `goldhook_core`. They are
//! listed in the `[[plugins]]` section of `core.toml` and export three
//! functions, usually through [`declare_plugin!`](crate::declare_plugin):
//!
//! - `goldhook_query() -> &'static PluginInfo`
//! - `goldhook_init(&'static Goldhook) -> bool`
//! - `goldhook_shutdown()`
//!
//! An optional `goldhook_install_vhooks()` is called once the game library can
//! construct objects.
//!
//! # Example
//!
//! ```ignore
//! use goldhook_core::plugins::{PluginInfo, PluginKind};
//! use goldhook_core::{declare_plugin, Goldhook, GOLDHOOK_INTERFACE_VERSION};
//!
//! static INFO: PluginInfo = PluginInfo {
//!     name: "stats",
//!     version: "1.0.0",
//!     author: "someone",
//!     url: "https://example.org",
//!     date: "2024-01-01",
//!     interface_version: GOLDHOOK_INTERFACE_VERSION,
//!     kind: PluginKind::Extension,
//! };
//!
//! fn init(goldhook: &'static Goldhook) -> bool {
//!     goldhook.player_hooks().spawn.register_hook(|hook, args| hook.call_next(args), Default::default());
//!     true
//! }
//!
//! fn shutdown() {}
//!
//! declare_plugin!(INFO, init, shutdown);
//! ```

mod manager;
mod module;

use std::fmt;
use std::path::PathBuf;

use goldhook_engine::EngineError;
use serde::{Deserialize, Serialize};

pub use manager::{plugin_manager, Plugin, PluginManager};
pub use module::{
    InitFn, InstallVHooksFn, PluginModule, QueryFn, ShutdownFn, INIT_SYMBOL, INSTALL_VHOOKS_SYMBOL,
    QUERY_SYMBOL, SHUTDOWN_SYMBOL,
};

/// Plugin API version implemented by this build
pub const GOLDHOOK_INTERFACE_VERSION: InterfaceVersion = InterfaceVersion::new(1, 0);

/// Error type for plugin loading
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin not found {0}")]
    NotFound(PathBuf),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0} function not found")]
    MissingSymbol(&'static str),

    #[error("Invalid plugin type. Expected {expected} got {got}")]
    KindMismatch { expected: PluginKind, got: PluginKind },

    #[error("Major version mismatch. {plugin} is not compatible with this version of goldhook. Requested {requested} got {got}")]
    MajorVersion {
        plugin: String,
        requested: u16,
        got: u16,
    },

    #[error("Minor version mismatch. {plugin} is not compatible with this version of goldhook. Requested at least {requested} got {got}")]
    MinorVersion {
        plugin: String,
        requested: u16,
        got: u16,
    },

    #[error("Plugin {0} failed to initialize")]
    InitFailed(String),
}

/// How a plugin is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    #[default]
    Extension,
    /// Provides entity classes of the game library
    EntityLibrary,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Extension => f.write_str("extension"),
            PluginKind::EntityLibrary => f.write_str("entity library"),
        }
    }
}

/// Plugin API version, major in the high 16 bits and minor in the low 16 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceVersion(pub u32);

impl InterfaceVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self((major as u32) << 16 | minor as u32)
    }

    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn minor(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Check a version requested by `plugin` against this host version
    ///
    /// Majors must match. The host minor must be at least the requested one.
    pub fn check_compatible(self, requested: InterfaceVersion, plugin: &str) -> Result<(), PluginError> {
        if self.major() != requested.major() {
            return Err(PluginError::MajorVersion {
                plugin: plugin.to_string(),
                requested: requested.major(),
                got: self.major(),
            });
        }
        if self.minor() < requested.minor() {
            return Err(PluginError::MinorVersion {
                plugin: plugin.to_string(),
                requested: requested.minor(),
                got: self.minor(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for InterfaceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

/// Description a plugin returns from `goldhook_query`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub author: &'static str,
    pub url: &'static str,
    pub date: &'static str,
    pub interface_version: InterfaceVersion,
    pub kind: PluginKind,
}

/// Export the plugin entry points
///
/// Takes the `PluginInfo` static, the init function and the shutdown
/// function. A fourth argument names the optional vhooks installer.
///
/// The generated `goldhook_init` routes the plugin's `tracing` events to the
/// host's subscriber and points its config paths at the host's layout before
/// calling the init function.
#[macro_export]
macro_rules! declare_plugin {
    ($info:path, $init:path, $shutdown:path $(, $install_vhooks:path)? $(,)?) => {
        #[no_mangle]
        pub fn goldhook_query() -> &'static $crate::plugins::PluginInfo {
            &$info
        }

        #[no_mangle]
        pub fn goldhook_init(goldhook: &'static $crate::Goldhook) -> bool {
            goldhook.install_logger();
            goldhook.install_paths();
            $init(goldhook)
        }

        #[no_mangle]
        pub fn goldhook_shutdown() {
            $shutdown()
        }

        $(
            #[no_mangle]
            pub fn goldhook_install_vhooks() {
                $install_vhooks()
            }
        )?
    };
}
