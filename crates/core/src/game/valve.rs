//! Half-Life game library
//!
//! Player methods are intercepted by patching slots of the `player` class
//! vtable. The vtable is found by constructing a throwaway `player` entity
//! and reading the vtable of its game object, so nothing is installed before
//! the game library can construct objects.
//!
//! Slot indices and the `pev` member offset come from `valve.json`:
//!
//! | offset        | meaning                                  |
//! |---------------|------------------------------------------|
//! | `spawn`       | `CBaseEntity::Spawn()`                   |
//! | `takedamage`  | `CBaseEntity::TakeDamage(...)`           |
//! | `traceattack` | `CBaseEntity::TraceAttack(...)`          |
//! | `killed`      | `CBaseEntity::Killed(...)`               |
//! | `pev`         | byte offset of `CBaseEntity::pev`        |
//!
//! The `worldspawn` vtable gets its `Spawn` slot patched from vtable
//! discovery until [`ValveGame::shutdown`]: once the world has spawned,
//! `g_pGameRules` (address `global::g_pGameRules`) is read and published.

use std::ffi::{c_int, c_void};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, OnceLock};

use goldhook_engine::{try_engine, EngineContext};
use goldhook_sdk::versions::{PLAYER_CLASS, WORLD_CLASS};
use goldhook_sdk::{entvars_t, TraceResult, Vector};
use paste::paste;

use super::{
    entity_of, entity_of_object, entvars_of, player_hooks, GameError, GameVariant, KilledArgs, PlayerHooks, SpawnArgs, TakeDamageArgs,
    TraceAttackArgs, DamageType, GibType,
};
use crate::entities::GameEntity;
use crate::gamedata::{Gamedata, GamedataError};
use crate::gamedll::{game_library, GameLibrary};
use crate::hooks::{call_member, member_fn, member_trampoline, vtable, ChainBinding, VTableBinding};

/// Slot indices and member offsets read from gamedata
#[derive(Debug, Clone, Copy)]
struct PlayerOffsets {
    spawn: usize,
    take_damage: usize,
    trace_attack: usize,
    killed: usize,
    pev: usize,
}

impl PlayerOffsets {
    fn from_gamedata(gamedata: &Gamedata) -> Result<Self, GamedataError> {
        Ok(Self {
            spawn: gamedata.get_index("spawn")?,
            take_damage: gamedata.get_index("takedamage")?,
            trace_attack: gamedata.get_index("traceattack")?,
            killed: gamedata.get_index("killed")?,
            pev: gamedata.get_index("pev")?,
        })
    }
}

/// Patched vtables, set once by [`ValveGame::install_vhooks`]
struct PlayerVTable {
    player: usize,
    /// Zero when the world vtable was not found
    world: usize,
    world_spawn: Option<VTableBinding>,
    offsets: PlayerOffsets,
    spawn: Arc<VTableBinding>,
    take_damage: Arc<VTableBinding>,
    trace_attack: Arc<VTableBinding>,
    killed: Arc<VTableBinding>,
}

impl PlayerVTable {
    fn player_of(&self, object: *mut c_void) -> Option<Arc<GameEntity>> {
        entity_of_object(object, self.offsets.pev)
    }
}

macro_rules! player_vfunc {
    ($name:ident, ($($arg:ty),*) -> $ret:ty) => {
        paste! {
            type [<$name:camel Fn>] = member_fn!(($($arg),*) -> $ret);

            /// Function the slot held before it was patched
            fn [<$name _original>](tables: &PlayerVTable) -> [<$name:camel Fn>] {
                // SAFETY: the slot holds a function of this type
                unsafe { std::mem::transmute::<usize, [<$name:camel Fn>]>(tables.$name.original()) }
            }
        }
    };
}

player_vfunc!(spawn, () -> ());
player_vfunc!(take_damage, (*mut entvars_t, *mut entvars_t, f32, c_int) -> c_int);
player_vfunc!(trace_attack, (*mut entvars_t, f32, Vector, *mut TraceResult, c_int) -> ());
player_vfunc!(killed, (*mut entvars_t, c_int) -> ());

/// Half-Life variant state
pub struct ValveGame {
    gamedata: Gamedata,
    vtables: OnceLock<PlayerVTable>,
    game_rules: AtomicPtr<c_void>,
}

impl ValveGame {
    pub fn new(gamedata: Gamedata) -> Self {
        Self {
            gamedata,
            vtables: OnceLock::new(),
            game_rules: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    pub fn gamedata(&self) -> &Gamedata {
        &self.gamedata
    }

    /// `g_pGameRules`, known once the world has spawned
    pub fn game_rules(&self) -> Option<NonNull<c_void>> {
        NonNull::new(self.game_rules.load(Ordering::Acquire))
    }

    /// Vtable of the `player` class, once found
    pub fn player_vtable(&self) -> Option<usize> {
        self.vtables.get().map(|tables| tables.player)
    }

    /// Find the vtables and bind the player hook chains
    #[tracing::instrument(skip_all)]
    pub fn install_vhooks(&self, hooks: &PlayerHooks) -> Result<(), GameError> {
        self.install_with(hooks, || {
            let engine = try_engine()?;
            let library = game_library().ok_or(GameError::NoGameLibrary)?;

            let player = unsafe { class_vtable(engine, library, PLAYER_CLASS)? };
            let world = match unsafe { class_vtable(engine, library, WORLD_CLASS) } {
                Ok(world) => Some(world),
                Err(e) => {
                    tracing::warn!("Game rules will not be available: {}", e);
                    None
                }
            };
            Ok((player, world))
        })
    }

    fn install_with<F>(&self, hooks: &PlayerHooks, find_vtables: F) -> Result<(), GameError>
    where
        F: FnOnce() -> Result<(*mut usize, Option<*mut usize>), GameError>,
    {
        // all offsets first, nothing is touched if one is missing
        let offsets = PlayerOffsets::from_gamedata(&self.gamedata)?;
        let (player, world) = find_vtables()?;
        unsafe { self.bind(hooks, offsets, player, world) }
    }

    /// # Safety
    /// Both vtables must hold at least as many slots as the offsets reach.
    unsafe fn bind(
        &self,
        hooks: &PlayerHooks,
        offsets: PlayerOffsets,
        player: *mut usize,
        world: Option<*mut usize>,
    ) -> Result<(), GameError> {
        if self.vtables.get().is_some() {
            return Err(GameError::AlreadyLoaded);
        }

        // world first, so a failure leaves no chain bound
        let world_spawn = match world {
            Some(world) => {
                let binding = VTableBinding::new("CWorld::Spawn", world, offsets.spawn, player_spawn as usize);
                binding.attach()?;
                Some(binding)
            }
            None => None,
        };

        let tables = PlayerVTable {
            player: player as usize,
            world: world.map_or(0, |world| world as usize),
            world_spawn,
            offsets,
            spawn: Arc::new(VTableBinding::new(
                "CBasePlayer::Spawn",
                player,
                offsets.spawn,
                player_spawn as usize,
            )),
            take_damage: Arc::new(VTableBinding::new(
                "CBasePlayer::TakeDamage",
                player,
                offsets.take_damage,
                player_take_damage as usize,
            )),
            trace_attack: Arc::new(VTableBinding::new(
                "CBasePlayer::TraceAttack",
                player,
                offsets.trace_attack,
                player_trace_attack as usize,
            )),
            killed: Arc::new(VTableBinding::new(
                "CBasePlayer::Killed",
                player,
                offsets.killed,
                player_killed as usize,
            )),
        };
        if let Err(tables) = self.vtables.set(tables) {
            if let Some(binding) = &tables.world_spawn {
                if let Err(e) = binding.detach() {
                    tracing::error!("Failed to restore world Spawn: {}", e);
                }
            }
            return Err(GameError::AlreadyLoaded);
        }
        let Some(tables) = self.vtables.get() else {
            return Err(GameError::AlreadyLoaded);
        };

        hooks.spawn.bind(tables.spawn.clone());
        hooks.take_damage.bind(tables.take_damage.clone());
        hooks.trace_attack.bind(tables.trace_attack.clone());
        hooks.killed.bind(tables.killed.clone());

        tracing::info!("Player vtable at {:#x}", tables.player);
        Ok(())
    }

    /// Restore the world `Spawn` slot
    ///
    /// The player slots belong to the hook chains and are restored by
    /// unbinding them.
    pub fn shutdown(&self) {
        let Some(binding) = self.vtables.get().and_then(|tables| tables.world_spawn.as_ref()) else {
            return;
        };
        if binding.is_installed() {
            if let Err(e) = binding.detach() {
                tracing::error!("Failed to restore world Spawn: {}", e);
            }
        }
    }

    fn world_spawn(&self, this: *mut c_void, tables: &PlayerVTable) {
        if let Some(binding) = &tables.world_spawn {
            // SAFETY: the world Spawn slot held this function
            let f: SpawnFn = unsafe { std::mem::transmute::<usize, SpawnFn>(binding.original()) };
            unsafe { call_member!(f, this) };
        }
        self.publish_game_rules();
    }

    fn publish_game_rules(&self) {
        let Some(library) = game_library() else {
            return;
        };
        match self
            .gamedata
            .get_address("global", "g_pGameRules", library.module())
        {
            Ok(address) => {
                // SAFETY: the address is the g_pGameRules variable
                let rules = unsafe { *(address as *const *mut c_void) };
                self.game_rules.store(rules, Ordering::Release);
                tracing::info!("Game rules at {:p}", rules);
            }
            Err(e) => tracing::error!("Cannot resolve g_pGameRules: {}", e),
        }
    }
}

/// Construct `class_name` on a temporary edict and read its vtable
///
/// # Safety
/// Must run on the main thread once the game library allocates private data.
unsafe fn class_vtable(
    engine: &EngineContext,
    library: &GameLibrary,
    class_name: &str,
) -> Result<*mut usize, GameError> {
    let edict = engine.create_entity()?;
    let vtable = if library.call_game_entity(class_name, edict) {
        let object = (*edict.as_ptr()).pvPrivateData;
        if object.is_null() {
            std::ptr::null_mut()
        } else {
            vtable::vtable_of(object)
        }
    } else {
        std::ptr::null_mut()
    };
    engine.remove_entity(edict)?;

    if vtable.is_null() {
        return Err(GameError::VTableNotFound(class_name.to_string()));
    }
    Ok(vtable)
}

fn context() -> Option<(&'static ValveGame, &'static PlayerVTable)> {
    match super::variant()? {
        GameVariant::Valve(game) => Some((game, game.vtables.get()?)),
        GameVariant::CStrike(_) => None,
    }
}

member_trampoline! {
    fn player_spawn(this) -> () {
        let Some((game, tables)) = context() else {
            tracing::error!("Spawn called before player vtable was set up");
            return;
        };
        let vtable = unsafe { vtable::vtable_of(this) } as usize;
        if tables.world != 0 && vtable == tables.world {
            game.world_spawn(this, tables);
            return;
        }

        let original = spawn_original(tables);
        let player = (vtable == tables.player).then(|| tables.player_of(this)).flatten();
        let Some(player) = player else {
            return unsafe { call_member!(original, this) };
        };

        player_hooks().spawn.call_chain(
            |_| unsafe { call_member!(original, this) },
            &mut SpawnArgs { player },
        )
    }
}

member_trampoline! {
    fn player_take_damage(
        this,
        inflictor: *mut entvars_t,
        attacker: *mut entvars_t,
        damage: f32,
        damage_type: c_int
    ) -> c_int {
        let Some((_, tables)) = context() else {
            return 0;
        };
        let original = take_damage_original(tables);
        let vtable = unsafe { vtable::vtable_of(this) } as usize;
        let player = (vtable == tables.player).then(|| tables.player_of(this)).flatten();
        let Some(player) = player else {
            return unsafe { call_member!(original, this, inflictor, attacker, damage, damage_type) };
        };

        let mut args = TakeDamageArgs {
            player,
            inflictor: entity_of(inflictor),
            attacker: entity_of(attacker),
            damage,
            damage_type: DamageType::from_raw(damage_type),
        };
        let taken = player_hooks().take_damage.call_chain(
            |args| unsafe {
                call_member!(
                    original,
                    this,
                    entvars_of(&args.inflictor),
                    entvars_of(&args.attacker),
                    args.damage,
                    args.damage_type.to_raw()
                ) != 0
            },
            &mut args,
        );
        c_int::from(taken)
    }
}

member_trampoline! {
    fn player_trace_attack(
        this,
        attacker: *mut entvars_t,
        damage: f32,
        direction: Vector,
        trace: *mut TraceResult,
        damage_type: c_int
    ) -> () {
        let Some((_, tables)) = context() else {
            return;
        };
        let original = trace_attack_original(tables);
        let vtable = unsafe { vtable::vtable_of(this) } as usize;
        let player = (vtable == tables.player).then(|| tables.player_of(this)).flatten();
        let Some(player) = player else {
            return unsafe { call_member!(original, this, attacker, damage, direction, trace, damage_type) };
        };

        let mut args = TraceAttackArgs {
            player,
            attacker: entity_of(attacker),
            damage,
            direction: direction.into(),
            trace,
            damage_type: DamageType::from_raw(damage_type),
        };
        player_hooks().trace_attack.call_chain(
            |args| unsafe {
                call_member!(
                    original,
                    this,
                    entvars_of(&args.attacker),
                    args.damage,
                    Vector::from(args.direction),
                    args.trace,
                    args.damage_type.to_raw()
                )
            },
            &mut args,
        )
    }
}

member_trampoline! {
    fn player_killed(this, attacker: *mut entvars_t, gib: c_int) -> () {
        let Some((_, tables)) = context() else {
            return;
        };
        let original = killed_original(tables);
        let vtable = unsafe { vtable::vtable_of(this) } as usize;
        let player = (vtable == tables.player).then(|| tables.player_of(this)).flatten();
        let Some(player) = player else {
            return unsafe { call_member!(original, this, attacker, gib) };
        };

        let mut args = KilledArgs {
            player,
            attacker: entity_of(attacker),
            gib: GibType::from_raw(gib),
        };
        player_hooks().killed.call_chain(
            |args| unsafe { call_member!(original, this, entvars_of(&args.attacker), args.gib.to_raw()) },
            &mut args,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookPriority;

    const OFFSETS: &str = r#"{
        "offsets": {
            "spawn": { "linux": 0, "windows": 0 },
            "takedamage": { "linux": 1, "windows": 1 },
            "traceattack": { "linux": 2, "windows": 2 },
            "killed": { "linux": 3, "windows": 3 },
            "pev": { "linux": 4, "windows": 4 }
        }
    }"#;

    const NO_SPAWN: &str = r#"{
        "offsets": {
            "takedamage": { "linux": 1, "windows": 1 },
            "traceattack": { "linux": 2, "windows": 2 },
            "killed": { "linux": 3, "windows": 3 },
            "pev": { "linux": 4, "windows": 4 }
        }
    }"#;

    extern "C" fn player_original() {}
    extern "C" fn world_original() {}

    #[test]
    fn test_missing_spawn_offset() {
        let game = ValveGame::new(Gamedata::load_from_str(NO_SPAWN).unwrap());
        let hooks = PlayerHooks::new();
        let mut table: Box<[usize]> = vec![player_original as usize; 4].into();
        let before = table.to_vec();
        let mut searched = false;

        let result = game.install_with(&hooks, || {
            searched = true;
            Ok((table.as_mut_ptr(), None))
        });

        assert!(matches!(
            result,
            Err(GameError::Gamedata(GamedataError::OffsetNotFound(ref name))) if name == "spawn"
        ));
        assert!(!searched);
        assert_eq!(table.to_vec(), before);
        assert!(game.player_vtable().is_none());
    }

    #[test]
    fn test_install_binds_player_chains() {
        let game = ValveGame::new(Gamedata::load_from_str(OFFSETS).unwrap());
        let hooks = PlayerHooks::new();
        let mut player: Box<[usize]> = vec![player_original as usize; 4].into();
        let mut world: Box<[usize]> = vec![world_original as usize; 4].into();
        let player_before = player.to_vec();
        let (player_ptr, world_ptr) = (player.as_mut_ptr(), world.as_mut_ptr());

        game.install_with(&hooks, || Ok((player_ptr, Some(world_ptr))))
            .unwrap();
        assert_eq!(game.player_vtable(), Some(player_ptr as usize));

        // world Spawn is patched at once, player slots only on demand
        assert_eq!(world[0], player_spawn as usize);
        assert_eq!(player.to_vec(), player_before);

        let key = hooks
            .take_damage
            .register_hook(|hook, args| hook.call_next(args), HookPriority::Default);
        assert_eq!(player[1], player_take_damage as usize);
        assert_eq!(player[0], player_original as usize);

        let tables = game.vtables.get().unwrap();
        assert_eq!(take_damage_original(tables) as usize, player_original as usize);
        let world_spawn = tables.world_spawn.as_ref().unwrap();
        assert_eq!(world_spawn.original(), world_original as usize);

        hooks.take_damage.unregister_hook(key);
        assert_eq!(player.to_vec(), player_before);

        // second install is refused and patches nothing
        let mut other_world: Box<[usize]> = vec![world_original as usize; 4].into();
        let other_ptr = other_world.as_mut_ptr();
        assert!(matches!(
            game.install_with(&hooks, || Ok((player_ptr, Some(other_ptr)))),
            Err(GameError::AlreadyLoaded)
        ));
        assert_eq!(other_world[0], world_original as usize);

        game.shutdown();
        assert_eq!(world[0], world_original as usize);
        assert!(!world_spawn.is_installed());
    }

    #[test]
    fn test_world_failure_leaves_player_chains_unbound() {
        let game = ValveGame::new(Gamedata::load_from_str(OFFSETS).unwrap());
        let hooks = PlayerHooks::new();
        let mut player: Box<[usize]> = vec![player_original as usize; 4].into();
        let player_before = player.to_vec();
        let player_ptr = player.as_mut_ptr();

        let result = game.install_with(&hooks, || Ok((player_ptr, Some(std::ptr::null_mut()))));
        assert!(matches!(result, Err(GameError::Hook(_))));
        assert!(game.player_vtable().is_none());

        hooks
            .take_damage
            .register_hook(|hook, args| hook.call_next(args), HookPriority::Default);
        assert!(!hooks.take_damage.is_attached());
        assert_eq!(player.to_vec(), player_before);

        // nothing to restore
        game.shutdown();
    }

    #[test]
    fn test_offsets_from_gamedata() {
        let gamedata = Gamedata::load_from_str(OFFSETS).unwrap();
        let offsets = PlayerOffsets::from_gamedata(&gamedata).unwrap();
        assert_eq!(offsets.spawn, 0);
        assert_eq!(offsets.killed, 3);
        assert_eq!(offsets.pev, 4);
    }

    #[test]
    fn test_shipped_gamedata() {
        let gamedata = Gamedata::load_from_str(include_str!("../../../../configs/gamedata/valve.json")).unwrap();
        let offsets = PlayerOffsets::from_gamedata(&gamedata).unwrap();
        assert_eq!(offsets.pev, 4);
        assert!(gamedata.get_locator("global", "g_pGameRules").is_ok());
    }
}
