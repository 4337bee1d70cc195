//! A loaded plugin library

use std::ops::Range;
use std::path::{Path, PathBuf};

use goldhook_engine::SystemModule;

use super::{PluginError, PluginInfo, PluginKind, GOLDHOOK_INTERFACE_VERSION};
use crate::Goldhook;

pub type QueryFn = fn() -> &'static PluginInfo;
pub type InitFn = fn(&'static Goldhook) -> bool;
pub type ShutdownFn = fn();
pub type InstallVHooksFn = fn();

pub const QUERY_SYMBOL: &[u8] = b"goldhook_query\0";
pub const INIT_SYMBOL: &[u8] = b"goldhook_init\0";
pub const SHUTDOWN_SYMBOL: &[u8] = b"goldhook_shutdown\0";
pub const INSTALL_VHOOKS_SYMBOL: &[u8] = b"goldhook_install_vhooks\0";

/// Plugin library with its resolved entry points
pub struct PluginModule {
    path: PathBuf,
    info: PluginInfo,
    init: InitFn,
    shutdown: ShutdownFn,
    install_vhooks: Option<InstallVHooksFn>,
    /// Mapped image of the library, where its hook callbacks live
    code: Option<Range<usize>>,
    // Declared last so the library is closed after everything pointing into it
    _module: SystemModule,
}

impl PluginModule {
    /// Load a plugin and check that it is an `expected` plugin this build supports
    ///
    /// # Safety
    /// Loading a library runs its initializers. The plugin must be built
    /// against this version of `goldhook_core` with the same compiler.
    pub unsafe fn load(path: &Path, expected: PluginKind) -> Result<Self, PluginError> {
        if !path.exists() {
            return Err(PluginError::NotFound(path.to_path_buf()));
        }
        let module = SystemModule::open(path)?;

        let query: QueryFn = module
            .try_symbol(QUERY_SYMBOL)
            .ok_or(PluginError::MissingSymbol("goldhook_query"))?;
        let info = *query();

        check_info(&info, expected)?;

        let init: InitFn = module
            .try_symbol(INIT_SYMBOL)
            .ok_or(PluginError::MissingSymbol("goldhook_init"))?;
        let shutdown: ShutdownFn = module
            .try_symbol(SHUTDOWN_SYMBOL)
            .ok_or(PluginError::MissingSymbol("goldhook_shutdown"))?;
        let install_vhooks = module.try_symbol::<InstallVHooksFn>(INSTALL_VHOOKS_SYMBOL);

        let code = match module.image() {
            Ok(image) => {
                let base = image.base() as usize;
                Some(base..base + image.len())
            }
            Err(e) => {
                tracing::warn!("Cannot map image of plugin '{}': {}", info.name, e);
                None
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            info,
            init,
            shutdown,
            install_vhooks,
            code,
            _module: module,
        })
    }
}

impl super::Plugin for PluginModule {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn init(&self, goldhook: &'static Goldhook) -> bool {
        (self.init)(goldhook)
    }

    fn install_vhooks(&self) {
        if let Some(install_vhooks) = self.install_vhooks {
            install_vhooks();
        }
    }

    fn shutdown(&self) {
        (self.shutdown)()
    }

    fn code_range(&self) -> Option<Range<usize>> {
        self.code.clone()
    }
}

/// Kind and interface version checks done before any other symbol is used
fn check_info(info: &PluginInfo, expected: PluginKind) -> Result<(), PluginError> {
    GOLDHOOK_INTERFACE_VERSION.check_compatible(info.interface_version, info.name)?;
    if info.kind != expected {
        return Err(PluginError::KindMismatch {
            expected,
            got: info.kind,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::InterfaceVersion;

    fn info(kind: PluginKind, interface_version: InterfaceVersion) -> PluginInfo {
        PluginInfo {
            name: "test",
            version: "0.1.0",
            author: "tester",
            url: "",
            date: "2024-01-01",
            interface_version,
            kind,
        }
    }

    #[test]
    fn test_check_info() {
        assert!(check_info(&info(PluginKind::Extension, GOLDHOOK_INTERFACE_VERSION), PluginKind::Extension).is_ok());

        let kind = check_info(
            &info(PluginKind::EntityLibrary, GOLDHOOK_INTERFACE_VERSION),
            PluginKind::Extension,
        );
        assert!(matches!(
            kind,
            Err(PluginError::KindMismatch {
                expected: PluginKind::Extension,
                got: PluginKind::EntityLibrary
            })
        ));

        let newer = InterfaceVersion::new(
            GOLDHOOK_INTERFACE_VERSION.major() + 1,
            GOLDHOOK_INTERFACE_VERSION.minor(),
        );
        assert!(matches!(
            check_info(&info(PluginKind::Extension, newer), PluginKind::Extension),
            Err(PluginError::MajorVersion { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("goldhook-no-such-plugin.so");
        let result = unsafe { PluginModule::load(&path, PluginKind::Extension) };
        assert!(matches!(result, Err(PluginError::NotFound(p)) if p == path));
    }
}
