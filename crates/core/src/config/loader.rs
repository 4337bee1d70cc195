//! Config path resolution
//!
//! Paths are derived from the location of the loaded goldhook module:
//! `<game>/addons/goldhook/dlls/goldhook.so` gives the base directory
//! `<game>/addons/goldhook/`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::{ConfigError, ConfigResult};

/// Well-known directories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Game directory (e.g. `cstrike/`)
    Game,
    /// `<game>/addons/goldhook/`
    Base,
    /// `<base>/configs/`
    Configs,
    /// `<base>/logs/`
    Logs,
    /// `<base>/plugins/`
    Plugins,
}

/// Resolved directory layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    game: PathBuf,
    base: PathBuf,
}

static PATHS: OnceLock<Paths> = OnceLock::new();

impl Paths {
    pub fn new(game: impl Into<PathBuf>, base: impl Into<PathBuf>) -> Self {
        Self {
            game: game.into(),
            base: base.into(),
        }
    }

    /// Derive the layout from the path of the goldhook module
    pub fn from_module_path(module: &Path) -> ConfigResult<Self> {
        // Navigate: goldhook.so -> dlls -> goldhook
        let base = module
            .parent() // dlls/
            .and_then(|p| p.parent()) // goldhook/
            .ok_or(ConfigError::NoConfigDirectory)?;

        // goldhook -> addons -> <game>
        let game = base
            .parent()
            .and_then(|p| p.parent())
            .ok_or(ConfigError::NoConfigDirectory)?;

        Ok(Self::new(game, base))
    }

    /// Fallback layout when the module path is unknown: `<game>/addons/goldhook`
    pub fn from_game_dir(game: impl Into<PathBuf>) -> Self {
        let game = game.into();
        let base = game.join("addons").join("goldhook");
        Self { game, base }
    }

    pub fn get(&self, kind: PathKind) -> PathBuf {
        match kind {
            PathKind::Game => self.game.clone(),
            PathKind::Base => self.base.clone(),
            PathKind::Configs => self.base.join("configs"),
            PathKind::Logs => self.base.join("logs"),
            PathKind::Plugins => self.base.join("plugins"),
        }
    }

    /// Resolve a path from the config: relative paths are relative to the game directory
    pub fn resolve_game_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.game.join(path)
        }
    }

    /// Resolve a path relative to the base directory
    pub fn resolve_base_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }
}

/// Set the global layout, once
pub fn init_paths(paths: Paths) -> ConfigResult<&'static Paths> {
    let paths = PATHS.get_or_init(|| paths);
    tracing::debug!("goldhook base directory: {}", paths.base.display());
    Ok(paths)
}

/// The global layout
pub fn paths() -> ConfigResult<&'static Paths> {
    PATHS.get().ok_or(ConfigError::NoConfigDirectory)
}

/// Returns the goldhook base directory.
///
/// Path: `<game>/addons/goldhook/`
pub fn goldhook_base_dir() -> ConfigResult<PathBuf> {
    Ok(paths()?.get(PathKind::Base))
}

/// Returns the base configs directory.
///
/// Path: `<game>/addons/goldhook/configs/`
pub fn configs_dir() -> ConfigResult<PathBuf> {
    Ok(paths()?.get(PathKind::Configs))
}

/// Returns the path for a plugin's config file.
///
/// Path: `<game>/addons/goldhook/configs/plugins/{plugin_name}/{plugin_name}.toml`
pub fn plugin_config_path(plugin_name: &str) -> ConfigResult<PathBuf> {
    Ok(plugin_config_path_in(&configs_dir()?, plugin_name))
}

fn plugin_config_path_in(configs: &Path, plugin_name: &str) -> PathBuf {
    configs
        .join("plugins")
        .join(plugin_name)
        .join(format!("{}.toml", plugin_name))
}

/// Returns the core framework config path.
///
/// Path: `<game>/addons/goldhook/configs/core.toml`
pub fn core_config_path() -> ConfigResult<PathBuf> {
    Ok(configs_dir()?.join("core.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_from_module() {
        let paths =
            Paths::from_module_path(Path::new("/hlds/cstrike/addons/goldhook/dlls/goldhook.so")).unwrap();

        assert_eq!(paths.get(PathKind::Game), PathBuf::from("/hlds/cstrike"));
        assert_eq!(paths.get(PathKind::Base), PathBuf::from("/hlds/cstrike/addons/goldhook"));
        assert_eq!(
            paths.get(PathKind::Configs),
            PathBuf::from("/hlds/cstrike/addons/goldhook/configs")
        );
        assert!(paths.get(PathKind::Logs).ends_with("goldhook/logs"));
        assert!(paths.get(PathKind::Plugins).ends_with("goldhook/plugins"));
    }

    #[test]
    fn test_paths_from_short_module_path() {
        assert!(Paths::from_module_path(Path::new("goldhook.so")).is_err());
    }

    #[test]
    fn test_paths_from_game_dir() {
        let paths = Paths::from_game_dir("cstrike");
        assert_eq!(paths.get(PathKind::Base), PathBuf::from("cstrike/addons/goldhook"));
    }

    #[test]
    fn test_resolve_game_path() {
        let paths = Paths::from_game_dir("/hlds/valve");
        assert_eq!(
            paths.resolve_game_path(Path::new("addons/foo/foo.so")),
            PathBuf::from("/hlds/valve/addons/foo/foo.so")
        );
        assert_eq!(
            paths.resolve_game_path(Path::new("/opt/foo.so")),
            PathBuf::from("/opt/foo.so")
        );
    }

    #[test]
    fn test_plugin_config_path_format() {
        let path = plugin_config_path_in(Path::new("/hlds/valve/addons/goldhook/configs"), "my_plugin");
        assert!(path.ends_with("plugins/my_plugin/my_plugin.toml"));
    }
}
