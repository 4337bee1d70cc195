//! Counter-Strike on ReGameDLL
//!
//! ReGameDLL exposes its own hookchains through the `ReGameDLL_005`
//! interface, so nothing is patched. Each of our registries registers one
//! function on the matching foreign `IHookChainRegistry` while it has hooks.
//!
//! Slot indices come from `cstrike.json`:
//!
//! - `regame_*`: methods of `IReGameApi`
//! - `hookchains_*`: registry accessors of `IReGameHookchains`
//! - `hookchain_call_next`, `hookchain_call_original`: methods of `IHookChain`
//! - `registry_register_hook`, `registry_unregister_hook`: methods of
//!   `IHookChainRegistry`, optional
//! - `pev`: byte offset of `CBaseEntity::pev`

pub mod hookchains;
pub mod regame;

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use goldhook_sdk::versions::REGAMEDLL_API;

use super::{GameError, GameRulesHooks, PlayerHooks};
use crate::gamedata::Gamedata;
use crate::gamedll::GameLibrary;
use crate::hooks::{
    call_member, member_fn, vtable, ChainBinding, HookchainBinding, HookchainSlots,
};

pub use hookchains::ChainContext;
pub use regame::{check_api_version, ApiSlots, ReGameApi};

type RegistryFn = member_fn!(() -> *mut c_void);

/// Counter-Strike game state
pub struct CStrikeGame {
    gamedata: Gamedata,
    api: ReGameApi,
    context: ChainContext,
}

impl CStrikeGame {
    /// Get the ReGameDLL API from the game library and bind every chain
    #[tracing::instrument(skip_all)]
    pub fn load(
        gamedata: Gamedata,
        library: &GameLibrary,
        player: &PlayerHooks,
        rules: &GameRulesHooks,
    ) -> Result<Self, GameError> {
        let factory = library.module().interface_factory()?;
        let slots = ApiSlots::from_gamedata(&gamedata)?;
        // SAFETY: the returned object is the IReGameApi of this library
        let api = unsafe { ReGameApi::new(factory.get::<c_void>(REGAMEDLL_API)?, slots) };
        Self::with_api(gamedata, api, player, rules)
    }

    fn with_api(
        gamedata: Gamedata,
        api: ReGameApi,
        player: &PlayerHooks,
        rules: &GameRulesHooks,
    ) -> Result<Self, GameError> {
        api.check_version()?;
        tracing::info!(
            "ReGameDLL API {}.{}",
            api.major_version(),
            api.minor_version()
        );

        let context = ChainContext {
            call_next: gamedata.get_index("hookchain_call_next")?,
            call_original: gamedata.get_index("hookchain_call_original")?,
            pev: gamedata.get_index("pev")?,
        };
        if !hookchains::set_context(context) {
            return Err(GameError::AlreadyLoaded);
        }

        let hookchains = api
            .hookchains()
            .ok_or(GameError::MissingInterface("IReGameHookchains"))?;

        let game = Self {
            gamedata,
            api,
            context,
        };
        let binder = ChainBinder {
            gamedata: &game.gamedata,
            hookchains: hookchains.as_ptr(),
            slots: registry_slots(&game.gamedata),
        };

        binder.bind("hookchains_player_spawn", hookchains::player_spawn as usize, |b| {
            player.spawn.bind(b)
        });
        binder.bind("hookchains_player_takedamage", hookchains::player_take_damage as usize, |b| {
            player.take_damage.bind(b)
        });
        binder.bind("hookchains_player_traceattack", hookchains::player_trace_attack as usize, |b| {
            player.trace_attack.bind(b)
        });
        binder.bind("hookchains_player_killed", hookchains::player_killed as usize, |b| {
            player.killed.bind(b)
        });
        binder.bind("hookchains_player_giveshield", hookchains::player_give_shield as usize, |b| {
            player.give_shield.bind(b)
        });
        binder.bind("hookchains_player_dropshield", hookchains::player_drop_shield as usize, |b| {
            player.drop_shield.bind(b)
        });
        binder.bind("hookchains_round_end", hookchains::round_end as usize, |b| {
            rules.round_end.bind(b)
        });
        binder.bind("hookchains_round_freeze_end", hookchains::round_freeze_end as usize, |b| {
            rules.round_freeze_end.bind(b)
        });

        Ok(game)
    }

    pub fn gamedata(&self) -> &Gamedata {
        &self.gamedata
    }

    pub fn api(&self) -> &ReGameApi {
        &self.api
    }

    pub fn chain_context(&self) -> ChainContext {
        self.context
    }

    /// Current `CGameRules`, asked from ReGameDLL on every call
    pub fn game_rules(&self) -> Option<NonNull<c_void>> {
        self.api.game_rules()
    }
}

fn registry_slots(gamedata: &Gamedata) -> HookchainSlots {
    let default = HookchainSlots::default();
    HookchainSlots {
        register_hook: gamedata
            .get_index("registry_register_hook")
            .unwrap_or(default.register_hook),
        unregister_hook: gamedata
            .get_index("registry_unregister_hook")
            .unwrap_or(default.unregister_hook),
    }
}

/// Resolves foreign registries and hands bindings to our registries
struct ChainBinder<'a> {
    gamedata: &'a Gamedata,
    hookchains: *mut c_void,
    slots: HookchainSlots,
}

impl ChainBinder<'_> {
    /// A chain that can't be resolved is logged and left unbound
    fn bind(&self, key: &'static str, hook: usize, bind: impl FnOnce(Arc<dyn ChainBinding>)) {
        match self.resolve(key, hook) {
            Ok(binding) => bind(Arc::new(binding)),
            Err(e) => tracing::error!("Hookchain '{}' not bound: {}", key, e),
        }
    }

    fn resolve(&self, key: &'static str, hook: usize) -> Result<HookchainBinding, GameError> {
        let index = self.gamedata.get_index(key)?;
        // SAFETY: the accessor slot comes from gamedata for this library
        let registry = unsafe {
            let accessor: RegistryFn =
                std::mem::transmute(vtable::virtual_function(self.hookchains, index));
            call_member!(accessor, self.hookchains)
        };
        Ok(unsafe { HookchainBinding::new(key, registry, hook, self.slots)? })
    }
}

#[cfg(test)]
mod tests {
    use super::hookchains::tests::TEST_CONTEXT;
    use super::regame::tests::{fake_api_vtable, FakeApi, FAKE_API_SLOTS};
    use super::*;
    use crate::hooks::{member_trampoline, HookPriority, REGAMEDLL_HOOK_PRIORITY};
    use std::ffi::c_int;

    /// Fake `IHookChainRegistry` recording the registered function
    #[repr(C)]
    struct FakeRegistry {
        vtable: *const usize,
        hook: usize,
        priority: c_int,
    }

    member_trampoline! {
        fn fake_register(this, hook: usize, priority: c_int) -> () {
            let registry = unsafe { &mut *(this as *mut FakeRegistry) };
            registry.hook = hook;
            registry.priority = priority;
        }
    }

    member_trampoline! {
        fn fake_unregister(this, hook: usize) -> () {
            let registry = unsafe { &mut *(this as *mut FakeRegistry) };
            if registry.hook == hook {
                registry.hook = 0;
            }
        }
    }

    /// Fake `IReGameHookchains`, every accessor returns `registry`
    #[repr(C)]
    struct FakeHookchains {
        vtable: *const usize,
        registry: *mut c_void,
    }

    member_trampoline! {
        fn fake_registry(this) -> *mut c_void {
            unsafe { (*(this as *const FakeHookchains)).registry }
        }
    }

    fn gamedata() -> Gamedata {
        let offsets = [
            ("regame_major_version", 0),
            ("regame_minor_version", 1),
            ("regame_game_rules", 2),
            ("regame_hookchains", 3),
            ("hookchain_call_next", TEST_CONTEXT.call_next),
            ("hookchain_call_original", TEST_CONTEXT.call_original),
            ("pev", TEST_CONTEXT.pev),
            ("hookchains_player_spawn", 0),
            ("hookchains_player_takedamage", 0),
            ("hookchains_player_traceattack", 0),
            ("hookchains_player_killed", 0),
            ("hookchains_player_giveshield", 0),
            ("hookchains_player_dropshield", 0),
            ("hookchains_round_end", 0),
        ];
        let entries: Vec<String> = offsets
            .iter()
            .map(|(name, index)| format!(r#""{}": {{ "linux": {}, "windows": {} }}"#, name, index, index))
            .collect();
        Gamedata::load_from_str(&format!(r#"{{ "offsets": {{ {} }} }}"#, entries.join(", "))).unwrap()
    }

    #[test]
    fn test_load_binds_chains() {
        let registry_table = [fake_register as usize, fake_unregister as usize];
        let mut registry = FakeRegistry {
            vtable: registry_table.as_ptr(),
            hook: 0,
            priority: 0,
        };
        let hookchains_table = [fake_registry as usize];
        let mut hookchains = FakeHookchains {
            vtable: hookchains_table.as_ptr(),
            registry: &mut registry as *mut FakeRegistry as *mut c_void,
        };
        let api_table = fake_api_vtable();
        let mut fake_api = FakeApi {
            vtable: api_table.as_ptr(),
            major: 5,
            minor: 1,
            hookchains: &mut hookchains as *mut FakeHookchains as *mut c_void,
            game_rules: std::ptr::null_mut(),
        };
        let api = unsafe { ReGameApi::new(NonNull::from(&mut fake_api).cast(), FAKE_API_SLOTS) };

        let player = PlayerHooks::new();
        let rules = GameRulesHooks::new();
        let game = CStrikeGame::with_api(gamedata(), api, &player, &rules).unwrap();

        assert_eq!(game.chain_context(), TEST_CONTEXT);
        assert!(game.game_rules().is_none());

        // Nothing is registered on the foreign side until a hook exists
        assert_eq!(registry.hook, 0);
        let key = player.take_damage.register_hook(|h, a| h.call_next(a), HookPriority::High);
        assert_eq!(registry.hook, hookchains::player_take_damage as usize);
        assert_eq!(registry.priority, REGAMEDLL_HOOK_PRIORITY);

        player.take_damage.unregister_hook(key);
        assert_eq!(registry.hook, 0);

        // round_freeze_end has no gamedata entry and stays unbound
        rules.round_freeze_end.register_hook(|h, a| h.call_next(a), HookPriority::Default);
        assert!(!rules.round_freeze_end.is_attached());
        assert_eq!(registry.hook, 0);
    }

    #[test]
    fn test_load_rejects_old_api() {
        let api_table = fake_api_vtable();
        let mut fake_api = FakeApi {
            vtable: api_table.as_ptr(),
            major: 5,
            minor: 0,
            hookchains: std::ptr::null_mut(),
            game_rules: std::ptr::null_mut(),
        };
        let api = unsafe { ReGameApi::new(NonNull::from(&mut fake_api).cast(), FAKE_API_SLOTS) };

        let result = CStrikeGame::with_api(gamedata(), api, &PlayerHooks::new(), &GameRulesHooks::new());
        assert!(matches!(result, Err(GameError::ApiVersion(_))));
    }

    #[test]
    fn test_shipped_gamedata() {
        let gamedata =
            Gamedata::load_from_str(include_str!("../../../../../configs/gamedata/cstrike.json")).unwrap();
        assert!(ApiSlots::from_gamedata(&gamedata).is_ok());
        for key in [
            "pev",
            "hookchain_call_next",
            "hookchain_call_original",
            "registry_register_hook",
            "registry_unregister_hook",
            "hookchains_player_spawn",
            "hookchains_player_traceattack",
            "hookchains_player_takedamage",
            "hookchains_player_killed",
            "hookchains_player_giveshield",
            "hookchains_player_dropshield",
            "hookchains_round_end",
            "hookchains_round_freeze_end",
        ] {
            assert!(gamedata.get_index(key).is_ok(), "{}", key);
        }
    }

    #[test]
    fn test_registry_slots_default() {
        let slots = registry_slots(&gamedata());
        assert_eq!(slots.register_hook, 0);
        assert_eq!(slots.unregister_hook, 1);
    }
}
