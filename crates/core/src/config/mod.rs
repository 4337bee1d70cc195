//! Configuration system for goldhook
//!
//! `configs/core.toml` holds the framework settings and the plugin list.
//! Plugins get a trait-based configuration system that supports:
//! - Type-safe config structs via serde
//! - TOML file format
//! - Auto-generation of default configs
//! - Manual reload capability
//!
//! # Example
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use goldhook_core::PluginConfig;
//!
//! #[derive(Default, Serialize, Deserialize)]
//! pub struct MyPluginConfig {
//!     pub max_players: i32,
//!     pub welcome_message: String,
//! }
//!
//! impl PluginConfig for MyPluginConfig {
//!     const PLUGIN_NAME: &'static str = "my_plugin";
//! }
//!
//! fn load_config() {
//!     let config = MyPluginConfig::load().unwrap_or_default();
//!     println!("Max players: {}", config.max_players);
//! }
//! ```

mod loader;

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::logging::LoggingConfig;
use crate::plugins::PluginKind;

pub use loader::{
    configs_dir, core_config_path, goldhook_base_dir, init_paths, paths, plugin_config_path,
    PathKind, Paths,
};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Could not determine config directory from plugin location
    #[error("Config directory not available - could not resolve plugin base path")]
    NoConfigDirectory,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Trait for plugin configuration types.
///
/// Implement this trait on your config struct to enable automatic loading,
/// saving, and reloading of configuration files.
///
/// # Requirements
///
/// Your config type must implement:
/// - `Default` - for generating initial config files
/// - `Serialize` - for saving to TOML
/// - `DeserializeOwned` - for loading from TOML
/// - `Send + Sync` - for thread-safe access
///
/// # File Location
///
/// Configs are stored at:
/// `<game>/addons/goldhook/configs/plugins/{PLUGIN_NAME}/{PLUGIN_NAME}.toml`
pub trait PluginConfig: Default + Serialize + DeserializeOwned + Send + Sync {
    /// The plugin name used for config file path resolution.
    ///
    /// This determines the config file location:
    /// `configs/plugins/{PLUGIN_NAME}/{PLUGIN_NAME}.toml`
    const PLUGIN_NAME: &'static str;

    /// Load config from file, creating default if missing.
    ///
    /// If the config file doesn't exist, a default config is created and saved.
    fn load() -> ConfigResult<Self> {
        let path = plugin_config_path(Self::PLUGIN_NAME)?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded config for {} from {:?}", Self::PLUGIN_NAME, path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save()?;
            tracing::info!(
                "Created default config for {} at {:?}",
                Self::PLUGIN_NAME,
                path
            );
            Ok(default)
        }
    }

    /// Save config to file.
    ///
    /// Creates parent directories if they don't exist.
    fn save(&self) -> ConfigResult<()> {
        let path = plugin_config_path(Self::PLUGIN_NAME)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        tracing::debug!("Saved config for {} to {:?}", Self::PLUGIN_NAME, path);
        Ok(())
    }

    /// Reload config from file.
    ///
    /// Updates self with the current file contents.
    fn reload(&mut self) -> ConfigResult<()> {
        let path = plugin_config_path(Self::PLUGIN_NAME)?;
        let content = std::fs::read_to_string(&path)?;
        *self = toml::from_str(&content)?;
        tracing::debug!("Reloaded config for {} from {:?}", Self::PLUGIN_NAME, path);
        Ok(())
    }
}

/// Operating system a plugin entry applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Linux,
    Windows,
}

impl TargetOs {
    /// The OS this build runs on
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "linux") {
            Some(TargetOs::Linux)
        } else if cfg!(windows) {
            Some(TargetOs::Windows)
        } else {
            None
        }
    }
}

/// `[[plugins]]` entry of the core config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Display name
    pub name: String,
    /// Library path, relative to the game directory unless absolute
    pub path: PathBuf,
    /// Only load on this OS
    pub os: TargetOs,
    #[serde(default)]
    pub kind: PluginKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl PluginEntry {
    /// Whether the entry should be loaded on this OS
    pub fn is_loadable(&self) -> bool {
        self.enabled && TargetOs::current() == Some(self.os)
    }
}

/// Core framework configuration.
///
/// This config controls framework-level settings and is loaded from:
/// `<game>/addons/goldhook/configs/core.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Config version for future migration support
    pub version: u32,

    pub logging: LoggingConfig,

    /// Path to the real game library, detected from the game directory when unset
    pub game_library: Option<PathBuf>,

    /// Gamedata directory, relative to the goldhook base directory
    pub gamedata_dir: PathBuf,

    pub plugins: Vec<PluginEntry>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            logging: LoggingConfig::default(),
            game_library: None,
            gamedata_dir: PathBuf::from("configs").join("gamedata"),
            plugins: Vec::new(),
        }
    }
}

impl CoreConfig {
    /// Load core config from file, creating default if missing.
    ///
    /// Uses the core config path instead of the plugin config path.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&core_config_path()?)
    }

    /// Load from an explicit path, creating default if missing.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded core config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save_to(path)?;
            tracing::info!("Created default core config at {:?}", path);
            Ok(default)
        }
    }

    /// Save core config to file.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&core_config_path()?)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved core config to {:?}", path);
        Ok(())
    }

    /// Reload core config from file.
    pub fn reload(&mut self) -> ConfigResult<()> {
        let path = core_config_path()?;
        let content = std::fs::read_to_string(&path)?;
        *self = toml::from_str(&content)?;
        tracing::debug!("Reloaded core config from {:?}", path);
        Ok(())
    }

    /// Plugin entries to load on this OS
    pub fn loadable_plugins(&self) -> impl Iterator<Item = &PluginEntry> {
        self.plugins.iter().filter(|p| p.is_loadable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogDest, LogLevel};

    #[derive(Default, Debug, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        pub value: i32,
        pub name: String,
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("goldhook-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    impl PluginConfig for TestConfig {
        const PLUGIN_NAME: &'static str = "config_test_plugin";
    }

    #[test]
    fn test_plugin_config_load_save_reload() {
        // keeps the layout set first if another test got there
        init_paths(Paths::from_game_dir(temp_dir("plugin-config"))).unwrap();
        let path = plugin_config_path(TestConfig::PLUGIN_NAME).unwrap();
        let _ = std::fs::remove_file(&path);

        let mut config = TestConfig::load().unwrap();
        assert_eq!(config, TestConfig::default());
        assert!(path.ends_with("configs/plugins/config_test_plugin/config_test_plugin.toml"));
        assert!(path.exists());

        config.value = 42;
        config.name = "stats".to_string();
        config.save().unwrap();
        assert_eq!(TestConfig::load().unwrap(), config);

        std::fs::write(&path, "value = 7\nname = \"edited\"\n").unwrap();
        config.reload().unwrap();
        assert_eq!(config.value, 7);
        assert_eq!(config.name, "edited");

        std::fs::write(&path, "value = \"seven\"").unwrap();
        assert!(matches!(config.reload(), Err(ConfigError::ParseError(_))));
        assert_eq!(config.value, 7);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_core_config_default() {
        let config = CoreConfig::default();
        assert_eq!(config.version, 1);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.destination, LogDest::ConsoleFile);
        assert_eq!(config.gamedata_dir, PathBuf::from("configs/gamedata"));
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_core_config_parse() {
        let toml_str = r#"
            version = 2

            [logging]
            level = "warning"
            destination = "file"

            [[plugins]]
            name = "stats"
            path = "addons/stats/stats.so"
            os = "linux"

            [[plugins]]
            name = "stats"
            path = "addons/stats/stats.dll"
            os = "windows"
            enabled = false
        "#;

        let config: CoreConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.version, 2);
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.destination, LogDest::File);
        assert_eq!(config.plugins.len(), 2);
        assert!(config.plugins[0].enabled);
        assert_eq!(config.plugins[0].kind, PluginKind::Extension);
        assert!(!config.plugins[1].enabled);

        let loadable: Vec<_> = config.loadable_plugins().collect();
        #[cfg(target_os = "linux")]
        assert_eq!(loadable, vec![&config.plugins[0]]);
        #[cfg(windows)]
        assert!(loadable.is_empty());
    }

    #[test]
    fn test_core_config_load_creates_default() {
        let dir = temp_dir("core-config");
        let path = dir.join("configs").join("core.toml");

        let config = CoreConfig::load_from(&path).unwrap();
        assert_eq!(config.version, 1);
        assert!(path.exists());

        let mut changed = config.clone();
        changed.version = 3;
        changed.save_to(&path).unwrap();
        assert_eq!(CoreConfig::load_from(&path).unwrap().version, 3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_core_config_malformed() {
        let dir = temp_dir("core-config-bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("core.toml");
        std::fs::write(&path, "version = \"one\"").unwrap();

        assert!(matches!(
            CoreConfig::load_from(&path),
            Err(ConfigError::ParseError(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
