//! Plugin manager

use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;

use parking_lot::Mutex;

use super::{PluginError, PluginInfo, PluginModule};
use crate::config::{CoreConfig, Paths};
use crate::hooks::HookChains;
use crate::Goldhook;

/// What the manager needs from a loaded plugin
pub trait Plugin: Send {
    fn info(&self) -> &PluginInfo;

    fn path(&self) -> &Path;

    /// Returns false if the plugin refused to start
    fn init(&self, goldhook: &'static Goldhook) -> bool;

    fn install_vhooks(&self);

    fn shutdown(&self);

    /// Address range of the plugin's code
    ///
    /// Hooks whose callbacks live there are removed before the plugin is
    /// dropped. None when unknown.
    fn code_range(&self) -> Option<Range<usize>>;
}

/// Remove hooks a plugin left registered, while its code is still mapped
fn release_hooks(plugin: &dyn Plugin, chains: &dyn HookChains) {
    let Some(code) = plugin.code_range() else {
        return;
    };
    let removed = chains.unregister_within(&code);
    if removed > 0 {
        tracing::warn!(
            "Plugin '{}' left {} hook(s) registered, removed",
            plugin.info().name,
            removed
        );
    }
}

struct LoadedPlugin {
    plugin: Box<dyn Plugin>,
    initialized: bool,
}

/// Loaded plugins, in load order
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<LoadedPlugin>,
}

static PLUGINS: LazyLock<Mutex<PluginManager>> = LazyLock::new(|| Mutex::new(PluginManager::new()));

/// The process wide plugin manager
pub fn plugin_manager() -> &'static Mutex<PluginManager> {
    &PLUGINS
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every plugin of `config` meant for this OS
    ///
    /// Plugins that fail to load are logged and skipped. Returns the number
    /// of plugins loaded.
    #[tracing::instrument(skip_all)]
    pub fn load_all(&mut self, config: &CoreConfig, paths: &Paths) -> usize {
        let mut loaded = 0;
        for entry in config.loadable_plugins() {
            let path = paths.resolve_game_path(&entry.path);
            // SAFETY: plugins listed in the config are trusted
            match unsafe { PluginModule::load(&path, entry.kind) } {
                Ok(module) => {
                    let info = module.info();
                    tracing::info!(
                        "Loaded plugin {} {} by {} ({})",
                        info.name,
                        info.version,
                        info.author,
                        path.display()
                    );
                    self.add(Box::new(module));
                    loaded += 1;
                }
                Err(e) => tracing::error!("Failed to load plugin '{}': {}", entry.name, e),
            }
        }
        loaded
    }

    pub fn add(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(LoadedPlugin {
            plugin,
            initialized: false,
        });
    }

    /// Initialize every plugin not initialized yet
    ///
    /// Plugins refusing to start are dropped, along with any hook they
    /// registered before refusing.
    pub fn init(&mut self, goldhook: &'static Goldhook) -> Vec<PluginError> {
        let mut errors = Vec::new();
        self.plugins.retain_mut(|loaded| {
            if loaded.initialized {
                return true;
            }
            if loaded.plugin.init(goldhook) {
                loaded.initialized = true;
                true
            } else {
                let name = loaded.plugin.info().name.to_string();
                tracing::error!("Plugin '{}' failed to initialize, unloading", name);
                release_hooks(&*loaded.plugin, goldhook);
                errors.push(PluginError::InitFailed(name));
                false
            }
        });
        errors
    }

    /// Let initialized plugins install hooks that need constructed objects
    pub fn install_vhooks_all(&self) {
        for loaded in self.plugins.iter().filter(|p| p.initialized) {
            loaded.plugin.install_vhooks();
        }
    }

    /// Shut down initialized plugins in reverse load order and unload all
    ///
    /// Hooks a plugin still has in `chains` are removed before its library is
    /// closed.
    pub fn shutdown_all(&mut self, chains: &dyn HookChains) {
        while let Some(loaded) = self.plugins.pop() {
            if loaded.initialized {
                tracing::debug!("Shutting down plugin '{}'", loaded.plugin.info().name);
                loaded.plugin.shutdown();
            }
            release_hooks(&*loaded.plugin, chains);
        }
    }

    pub fn list(&self) -> impl Iterator<Item = &PluginInfo> {
        self.plugins.iter().map(|p| p.plugin.info())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
