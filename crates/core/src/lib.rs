//! goldhook core
//!
//! Everything between the engine and the real game library:
//!
//! - [`gamedll`] - loads the game library and chains its exported functions
//! - [`game`] - player and game rules hook chains for Half-Life and Counter-Strike
//! - [`hooks`] - hook chains, vtable patching and chain bindings
//! - [`gamedata`] - offsets and addresses from JSON
//! - [`entities`] - cached entity wrappers
//! - [`plugins`] - plugin libraries
//!
//! Plugins receive a [`Goldhook`] reference in `goldhook_init` and reach all
//! of the above through it.
//!
//! # Re-exports
//!
//! - [`sdk`] - GoldSrc `repr(C)` types and interface versions
//! - [`engine`] - engine context and module loading

use std::ffi::c_void;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

pub use goldhook_engine as engine;
pub use goldhook_sdk as sdk;

pub mod config;
pub mod entities;
pub mod game;
pub mod gamedata;
pub mod gamedll;
pub mod hooks;
pub mod logging;
pub mod plugins;

use goldhook_engine::EngineContext;
use goldhook_sdk::edict_t;
use tracing::Dispatch;

pub use config::{ConfigError, ConfigResult, CoreConfig, Paths, PluginConfig};
pub use entities::{EntityHolder, GameEntity};
pub use game::{GameMod, GameRulesHooks, GameVariant, PlayerHooks};
pub use gamedll::{EngineHooks, GameDllHooks, GameLibrary};
pub use hooks::{Hook, HookChains, HookKey, HookPriority, HookRegistry, HookState};
pub use plugins::{InterfaceVersion, GOLDHOOK_INTERFACE_VERSION};

/// Host instances plugins reach through [`Goldhook`]
///
/// A plugin library links its own copy of this crate, statics included.
/// Everything a plugin touches has to come through these references to be
/// the host's.
#[derive(Clone, Copy)]
pub struct HostState {
    pub game_dll_hooks: &'static GameDllHooks,
    pub engine_hooks: &'static EngineHooks,
    pub player_hooks: &'static PlayerHooks,
    pub game_rules_hooks: &'static GameRulesHooks,
    pub entity_holder: &'static EntityHolder,
    pub game_library: Option<&'static GameLibrary>,
    pub variant: Option<&'static GameVariant>,
}

impl HostState {
    /// Instances of the crate copy this runs in
    ///
    /// Only meaningful in the host.
    pub fn current() -> Self {
        Self {
            game_dll_hooks: gamedll::hooks(),
            engine_hooks: gamedll::engine_hooks(),
            player_hooks: game::player_hooks(),
            game_rules_hooks: game::game_rules_hooks(),
            entity_holder: entities::holder(),
            game_library: gamedll::game_library(),
            variant: game::variant(),
        }
    }
}

impl HookChains for HostState {
    fn unregister_within(&self, code: &Range<usize>) -> usize {
        self.game_dll_hooks.unregister_within(code)
            + self.engine_hooks.unregister_within(code)
            + self.player_hooks.unregister_within(code)
            + self.game_rules_hooks.unregister_within(code)
    }

    fn unbind_all(&self) {
        self.game_dll_hooks.unbind_all();
        self.engine_hooks.unbind_all();
        self.player_hooks.unbind_all();
        self.game_rules_hooks.unbind_all();
    }
}

/// Plugin API
pub struct Goldhook {
    paths: &'static Paths,
    config: CoreConfig,
    engine: &'static EngineContext,
    game_mod: GameMod,
    host: HostState,
    log: Dispatch,
}

static GOLDHOOK: OnceLock<Goldhook> = OnceLock::new();

impl Goldhook {
    /// Plugin API over the host's instances and current subscriber
    ///
    /// Call after the game library and the variant are loaded.
    pub fn new(paths: &'static Paths, config: CoreConfig, engine: &'static EngineContext) -> Self {
        let log = tracing::dispatcher::get_default(Dispatch::clone);
        Self::with_host(paths, config, engine, HostState::current(), log)
    }

    pub fn with_host(
        paths: &'static Paths,
        config: CoreConfig,
        engine: &'static EngineContext,
        host: HostState,
        log: Dispatch,
    ) -> Self {
        Self {
            paths,
            config,
            engine,
            game_mod: GameMod::from_game_dir(engine.game_dir()),
            host,
            log,
        }
    }

    pub fn version(&self) -> InterfaceVersion {
        GOLDHOOK_INTERFACE_VERSION
    }

    pub fn paths(&self) -> &'static Paths {
        self.paths
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn engine(&self) -> &'static EngineContext {
        self.engine
    }

    pub fn game_mod(&self) -> GameMod {
        self.game_mod
    }

    /// Send this crate copy's `tracing` events to the host's subscriber
    ///
    /// Called by the `goldhook_init` export of [`declare_plugin!`]. Returns
    /// false if a subscriber was already set.
    pub fn install_logger(&self) -> bool {
        logging::install_dispatch(&self.log)
    }

    /// Resolve this crate copy's config paths against the host's layout
    ///
    /// Lets [`PluginConfig`] find `configs/plugins/` from inside a plugin.
    /// Returns false if a different layout was already set.
    pub fn install_paths(&self) -> bool {
        match config::init_paths(self.paths.clone()) {
            Ok(paths) => paths == self.paths,
            Err(_) => false,
        }
    }

    /// The real game library, once loaded
    pub fn game_library(&self) -> Option<&'static GameLibrary> {
        self.host.game_library
    }

    /// Chains of the game library's exported functions
    pub fn game_dll_hooks(&self) -> &'static GameDllHooks {
        self.host.game_dll_hooks
    }

    /// Chains of the engine functions the game library calls
    pub fn engine_hooks(&self) -> &'static EngineHooks {
        self.host.engine_hooks
    }

    pub fn player_hooks(&self) -> &'static PlayerHooks {
        self.host.player_hooks
    }

    /// Only bound on Counter-Strike
    pub fn game_rules_hooks(&self) -> &'static GameRulesHooks {
        self.host.game_rules_hooks
    }

    pub fn entity_holder(&self) -> &'static EntityHolder {
        self.host.entity_holder
    }

    /// Wrapper for an edict handed out by the engine
    ///
    /// # Safety
    /// `edict` must be null or an edict of the engine's edict list.
    pub unsafe fn entity_by_edict(&self, edict: *mut edict_t) -> Option<Arc<GameEntity>> {
        self.host.entity_holder.by_edict(self.engine, edict)
    }

    /// Wrapper for the entity at `index`, if the slot is in use
    pub fn entity_by_index(&self, index: u32) -> Option<Arc<GameEntity>> {
        let edict = self.engine.edict_of_index(index as i32).ok()??;
        // SAFETY: the engine returned the edict for this index
        Some(unsafe { self.host.entity_holder.get(edict, index) })
    }

    /// Current `CGameRules` of the game library
    ///
    /// `None` when the game has no variant, or before the world has spawned.
    pub fn game_rules(&self) -> Option<NonNull<c_void>> {
        self.host.variant?.game_rules()
    }

    /// Construct the game object of `edict` with the game library's
    /// `class_name` factory
    ///
    /// # Safety
    /// `edict` must be a freshly created engine edict.
    pub unsafe fn call_game_entity(&self, class_name: &str, edict: NonNull<edict_t>) -> bool {
        match self.host.game_library {
            Some(library) => library.call_game_entity(class_name, edict),
            None => false,
        }
    }

    pub fn server_print(&self, message: &str) {
        self.engine.server_print(message);
    }
}

impl HookChains for Goldhook {
    fn unregister_within(&self, code: &Range<usize>) -> usize {
        self.host.unregister_within(code)
    }

    fn unbind_all(&self) {
        self.host.unbind_all();
    }
}

/// Publish the plugin API, once
pub fn init_goldhook(goldhook: Goldhook) -> &'static Goldhook {
    GOLDHOOK.get_or_init(|| goldhook)
}

pub fn try_goldhook() -> Option<&'static Goldhook> {
    GOLDHOOK.get()
}

/// Install hooks that need objects constructed by the game library
///
/// Registered with [`gamedll::set_vhooks_handler`]. Runs the game variant
/// first so plugin hooks see bound chains.
pub fn install_vhooks() {
    if let Some(variant) = game::variant() {
        if let Err(e) = variant.install_vhooks() {
            tracing::error!("Failed to install virtual hooks: {}", e);
        }
    }
    plugins::plugin_manager().lock().install_vhooks_all();
}

/// Unload plugins and restore everything patched in the game library
///
/// Registered with [`gamedll::set_shutdown_handler`]. Plugin hooks are
/// removed before each plugin library closes.
pub fn shutdown() {
    tracing::info!("goldhook shutting down");
    let host = HostState::current();
    plugins::plugin_manager().lock().shutdown_all(&host);
    host.unbind_all();
    if let Some(variant) = host.variant {
        variant.shutdown();
    }
    host.entity_holder.clear();
}

#[cfg(test)]
pub(crate) mod testing {
    use std::ptr::NonNull;

    use goldhook_engine::EngineContext;
    use goldhook_sdk::{EngineFuncs, GlobalVars};
    use tracing::Dispatch;

    pub(crate) use super::HostState;
    use super::*;

    impl HostState {
        /// Fresh instances, separate from this crate's statics
        pub(crate) fn leaked() -> Self {
            Self {
                game_dll_hooks: Box::leak(Box::new(GameDllHooks::new())),
                engine_hooks: Box::leak(Box::new(EngineHooks::new())),
                player_hooks: Box::leak(Box::new(PlayerHooks::new())),
                game_rules_hooks: Box::leak(Box::new(GameRulesHooks::new())),
                entity_holder: Box::leak(Box::new(EntityHolder::new())),
                game_library: None,
                variant: None,
            }
        }
    }

    pub(crate) fn leaked_goldhook(host: HostState) -> &'static Goldhook {
        let globals = Box::leak(Box::new(unsafe { std::mem::zeroed::<GlobalVars>() }));
        let engine = Box::leak(Box::new(EngineContext::with_game_dir(
            EngineFuncs::default(),
            NonNull::from(globals),
            "valve".into(),
        )));
        let paths = Box::leak(Box::new(Paths::from_game_dir(std::env::temp_dir().join("valve"))));
        Box::leak(Box::new(Goldhook::with_host(
            paths,
            CoreConfig::default(),
            engine,
            host,
            Dispatch::none(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::leaked_goldhook;
    use super::*;
    use crate::plugins::{PluginInfo, PluginKind};

    /// What a plugin library built with `declare_plugin!` looks like
    mod stats_plugin {
        use super::*;

        pub static INFO: PluginInfo = PluginInfo {
            name: "stats",
            version: "1.0.0",
            author: "tester",
            url: "",
            date: "",
            interface_version: GOLDHOOK_INTERFACE_VERSION,
            kind: PluginKind::Extension,
        };

        fn init(goldhook: &'static Goldhook) -> bool {
            goldhook
                .game_dll_hooks()
                .start_frame
                .register_hook(|hook, args| hook.call_next(args), HookPriority::Default);
            goldhook.player_hooks().take_damage.register_hook(
                |hook, args| {
                    args.damage = 0.0;
                    hook.call_next(args)
                },
                HookPriority::High,
            );
            goldhook
                .engine_hooks()
                .server_print
                .register_hook(|hook, args| hook.call_next(args), HookPriority::Low);
            true
        }

        fn shutdown() {}

        crate::declare_plugin!(INFO, init, shutdown);
    }

    #[test]
    fn test_plugin_hooks_reach_host_instances() {
        let host = HostState::leaked();
        let goldhook = leaked_goldhook(host);

        assert!(stats_plugin::goldhook_init(goldhook));

        assert_eq!(host.game_dll_hooks.start_frame.len(), 1);
        assert_eq!(host.player_hooks.take_damage.len(), 1);
        assert_eq!(host.engine_hooks.server_print.len(), 1);
        // nothing landed in this crate copy's own statics
        assert!(gamedll::hooks().start_frame.is_empty());
        assert!(game::player_hooks().take_damage.is_empty());
        // plugin configs resolve once init ran
        assert!(config::plugin_config_path("stats").is_ok());
    }

    #[test]
    fn test_goldhook_chains_cover_every_group() {
        let host = HostState::leaked();
        let goldhook = leaked_goldhook(host);

        let a = host
            .game_dll_hooks
            .game_init
            .register_hook(|hook, args| hook.call_next(args), HookPriority::Default);
        let b = host
            .game_rules_hooks
            .round_freeze_end
            .register_hook(|hook, args| hook.call_next(args), HookPriority::Default);
        let code_of = |origin: usize| origin..origin + 1;

        let origin_a = host.game_dll_hooks.game_init.origin(a).unwrap();
        assert_eq!(goldhook.unregister_within(&code_of(origin_a)), 1);
        let origin_b = host.game_rules_hooks.round_freeze_end.origin(b).unwrap();
        assert_eq!(goldhook.unregister_within(&code_of(origin_b)), 1);
        assert!(host.game_dll_hooks.game_init.is_empty());
        assert!(host.game_rules_hooks.round_freeze_end.is_empty());
        assert!(goldhook.game_rules().is_none());
    }
}
