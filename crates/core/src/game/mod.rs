//! Game library variants
//!
//! Player and game rules operations are exposed as hook chains that look the
//! same to plugins whatever game runs:
//!
//! - [`valve`] - Half-Life. Player methods are intercepted by patching the
//!   player vtable.
//! - [`cstrike`] - Counter-Strike on ReGameDLL. Operations are intercepted by
//!   registering on the library's own hookchains.
//!
//! Registries exist for the whole process. A variant binds them to the game
//! library once it is loaded; until then registering a hook has no effect on
//! the game.

pub mod cstrike;
pub mod valve;

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, LazyLock, OnceLock};

use bitflags::bitflags;
use goldhook_engine::{try_engine, EngineError};
use goldhook_sdk::{entvars_t, TraceResult};

use crate::entities::{self, Entity, GameEntity};
use crate::gamedata::{Gamedata, GamedataError};
use crate::hooks::{hook_chains, HookError, HookRegistry};

pub use cstrike::CStrikeGame;
pub use valve::ValveGame;

/// Error type for game variant setup
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error(transparent)]
    Gamedata(#[from] GamedataError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Cannot find vtable of '{0}'")]
    VTableNotFound(String),

    #[error("{0}")]
    ApiVersion(String),

    #[error("Game library returned no {0}")]
    MissingInterface(&'static str),

    #[error("Game variant already loaded")]
    AlreadyLoaded,

    #[error("Game library not loaded")]
    NoGameLibrary,
}

/// Game mods with a known game library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMod {
    Valve,
    CStrike,
    CZero,
    Other,
}

impl GameMod {
    /// Detect the mod from the game directory name
    pub fn from_game_dir(game_dir: &str) -> Self {
        let name = Path::new(game_dir)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(game_dir);

        match name {
            "valve" => GameMod::Valve,
            "cstrike" => GameMod::CStrike,
            "czero" => GameMod::CZero,
            _ => GameMod::Other,
        }
    }

    /// Game library path relative to the game directory
    pub fn library_name(self) -> Option<&'static str> {
        let (linux, windows) = match self {
            GameMod::Valve => ("hl.so", "hl.dll"),
            GameMod::CStrike | GameMod::CZero => ("cs.so", "mp.dll"),
            GameMod::Other => return None,
        };
        Some(if cfg!(windows) { windows } else { linux })
    }

    /// Gamedata file inside the gamedata directory
    pub fn gamedata_file(self) -> Option<&'static str> {
        match self {
            GameMod::Valve => Some("valve.json"),
            GameMod::CStrike | GameMod::CZero => Some("cstrike.json"),
            GameMod::Other => None,
        }
    }
}

bitflags! {
    /// `bitsDamageType`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DamageType: u32 {
        const GENERIC = 0;
        const CRUSH = 1 << 0;
        const BULLET = 1 << 1;
        const SLASH = 1 << 2;
        const BURN = 1 << 3;
        const FREEZE = 1 << 4;
        const FALL = 1 << 5;
        const BLAST = 1 << 6;
        const CLUB = 1 << 7;
        const SHOCK = 1 << 8;
        const SONIC = 1 << 9;
        const ENERGY_BEAM = 1 << 10;
        const NEVER_GIB = 1 << 12;
        const ALWAYS_GIB = 1 << 13;
        const DROWN = 1 << 14;
        const PARALYZE = 1 << 15;
        const NERVE_GAS = 1 << 16;
        const POISON = 1 << 17;
        const RADIATION = 1 << 18;
        const DROWN_RECOVER = 1 << 19;
        const ACID = 1 << 20;
        const SLOW_BURN = 1 << 21;
        const SLOW_FREEZE = 1 << 22;
        const MORTAR = 1 << 23;
        const EXPLOSION = 1 << 24;

        /// Damage types allowed to gib corpses
        const GIB_CORPSE = Self::CRUSH.bits() | Self::FALL.bits() | Self::BLAST.bits()
            | Self::SONIC.bits() | Self::CLUB.bits();
    }
}

impl DamageType {
    /// Mask of time based damage
    pub const TIME_BASED: u32 = !0x3FFF;

    /// Keep every bit, known or not, so the game gets back what it passed
    pub fn from_raw(bits: i32) -> Self {
        Self::from_bits_retain(bits as u32)
    }

    pub fn to_raw(self) -> i32 {
        self.bits() as i32
    }
}

/// How a killed player's corpse is gibbed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum GibType {
    /// Depending on the damage type and amount
    #[default]
    Normal = 0,
    Never = 1,
    Always = 2,
}

impl GibType {
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => GibType::Never,
            2 => GibType::Always,
            _ => GibType::Normal,
        }
    }

    pub fn to_raw(self) -> i32 {
        self as i32
    }
}

/// Round winner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum WinStatus {
    #[default]
    None = 0,
    CTs = 1,
    Terrorists = 2,
    Draw = 3,
}

impl WinStatus {
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => WinStatus::CTs,
            2 => WinStatus::Terrorists,
            3 => WinStatus::Draw,
            _ => WinStatus::None,
        }
    }

    pub fn to_raw(self) -> i32 {
        self as i32
    }
}

/// Why a round ended (`ScenarioEventEndRound`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundEndEvent(pub i32);

impl RoundEndEvent {
    pub const NONE: Self = Self(0);
    pub const TARGET_BOMB: Self = Self(1);
    pub const VIP_ESCAPED: Self = Self(2);
    pub const VIP_ASSASSINATED: Self = Self(3);
    pub const TERRORISTS_ESCAPED: Self = Self(4);
    pub const CTS_PREVENT_ESCAPE: Self = Self(5);
    pub const ESCAPING_TERRORISTS_NEUTRALIZED: Self = Self(6);
    pub const BOMB_DEFUSED: Self = Self(7);
    pub const CTS_WIN: Self = Self(8);
    pub const TERRORISTS_WIN: Self = Self(9);
    pub const DRAW: Self = Self(10);
    pub const ALL_HOSTAGES_RESCUED: Self = Self(11);
    pub const TARGET_SAVED: Self = Self(12);
    pub const HOSTAGES_NOT_RESCUED: Self = Self(13);
    pub const TERRORISTS_NOT_ESCAPED: Self = Self(14);
    pub const VIP_NOT_ESCAPED: Self = Self(15);
    pub const GAME_COMMENCE: Self = Self(16);
    pub const GAME_RESTART: Self = Self(17);
    pub const GAME_OVER: Self = Self(18);
}

pub struct SpawnArgs {
    pub player: Arc<GameEntity>,
}

pub struct TakeDamageArgs {
    pub player: Arc<GameEntity>,
    pub inflictor: Option<Arc<GameEntity>>,
    pub attacker: Option<Arc<GameEntity>>,
    pub damage: f32,
    pub damage_type: DamageType,
}

pub struct TraceAttackArgs {
    pub player: Arc<GameEntity>,
    pub attacker: Option<Arc<GameEntity>>,
    pub damage: f32,
    pub direction: [f32; 3],
    /// Trace of the attack, owned by the game library
    pub trace: *mut TraceResult,
    pub damage_type: DamageType,
}

pub struct KilledArgs {
    pub player: Arc<GameEntity>,
    pub attacker: Option<Arc<GameEntity>>,
    pub gib: GibType,
}

pub struct GiveShieldArgs {
    pub player: Arc<GameEntity>,
    pub deploy: bool,
}

pub struct DropShieldArgs {
    pub player: Arc<GameEntity>,
    pub deploy: bool,
}

pub struct RoundEndArgs {
    pub win_status: WinStatus,
    pub event: RoundEndEvent,
    pub delay: f32,
}

/// `CBasePlayer` operations
///
/// `give_shield` and `drop_shield` are only bound on Counter-Strike.
pub struct PlayerHooks {
    pub spawn: HookRegistry<SpawnArgs, ()>,
    pub take_damage: HookRegistry<TakeDamageArgs, bool>,
    pub trace_attack: HookRegistry<TraceAttackArgs, ()>,
    pub killed: HookRegistry<KilledArgs, ()>,
    pub give_shield: HookRegistry<GiveShieldArgs, ()>,
    pub drop_shield: HookRegistry<DropShieldArgs, Option<Arc<GameEntity>>>,
}

impl PlayerHooks {
    pub fn new() -> Self {
        Self {
            spawn: HookRegistry::new("CBasePlayer::Spawn"),
            take_damage: HookRegistry::new("CBasePlayer::TakeDamage"),
            trace_attack: HookRegistry::new("CBasePlayer::TraceAttack"),
            killed: HookRegistry::new("CBasePlayer::Killed"),
            give_shield: HookRegistry::new("CBasePlayer::GiveShield"),
            drop_shield: HookRegistry::new("CBasePlayer::DropShield"),
        }
    }
}

impl Default for PlayerHooks {
    fn default() -> Self {
        Self::new()
    }
}

hook_chains!(PlayerHooks {
    spawn,
    take_damage,
    trace_attack,
    killed,
    give_shield,
    drop_shield,
});

/// Game rules operations (Counter-Strike)
pub struct GameRulesHooks {
    pub round_end: HookRegistry<RoundEndArgs, bool>,
    pub round_freeze_end: HookRegistry<(), ()>,
}

impl GameRulesHooks {
    pub fn new() -> Self {
        Self {
            round_end: HookRegistry::new("RoundEnd"),
            round_freeze_end: HookRegistry::new("CSGameRules::OnRoundFreezeEnd"),
        }
    }
}

impl Default for GameRulesHooks {
    fn default() -> Self {
        Self::new()
    }
}

hook_chains!(GameRulesHooks { round_end, round_freeze_end });

static PLAYER_HOOKS: LazyLock<PlayerHooks> = LazyLock::new(PlayerHooks::new);
static GAME_RULES_HOOKS: LazyLock<GameRulesHooks> = LazyLock::new(GameRulesHooks::new);
static VARIANT: OnceLock<GameVariant> = OnceLock::new();

pub fn player_hooks() -> &'static PlayerHooks {
    &PLAYER_HOOKS
}

pub fn game_rules_hooks() -> &'static GameRulesHooks {
    &GAME_RULES_HOOKS
}

/// The loaded game variant, if the game is supported
pub fn variant() -> Option<&'static GameVariant> {
    VARIANT.get()
}

/// Game specific state
pub enum GameVariant {
    Valve(ValveGame),
    CStrike(CStrikeGame),
}

impl GameVariant {
    pub fn gamedata(&self) -> &Gamedata {
        match self {
            GameVariant::Valve(game) => game.gamedata(),
            GameVariant::CStrike(game) => game.gamedata(),
        }
    }

    /// Current `CGameRules` object of the game library
    pub fn game_rules(&self) -> Option<NonNull<c_void>> {
        match self {
            GameVariant::Valve(game) => game.game_rules(),
            GameVariant::CStrike(game) => game.game_rules(),
        }
    }

    /// Install hooks that need constructed game objects
    ///
    /// Runs once, the first time the game library allocates entity private
    /// data.
    pub fn install_vhooks(&self) -> Result<(), GameError> {
        match self {
            GameVariant::Valve(game) => game.install_vhooks(player_hooks()),
            GameVariant::CStrike(_) => Ok(()),
        }
    }

    /// Undo patches that no hook chain owns
    pub fn shutdown(&self) {
        match self {
            GameVariant::Valve(game) => game.shutdown(),
            GameVariant::CStrike(_) => {}
        }
    }
}

/// Wrapper of the entity owning `pev`
pub(crate) fn entity_of(pev: *mut entvars_t) -> Option<Arc<GameEntity>> {
    let engine = try_engine().ok()?;
    unsafe { entities::holder().by_entvars(engine, pev) }
}

/// Wrapper of a game object (`CBaseEntity*`)
pub(crate) fn entity_of_object(object: *mut c_void, pev_offset: usize) -> Option<Arc<GameEntity>> {
    let engine = try_engine().ok()?;
    unsafe { entities::holder().by_object(engine, object, pev_offset) }
}

/// `entvars_t` to hand back to the game, null for no entity
pub(crate) fn entvars_of(entity: &Option<Arc<GameEntity>>) -> *mut entvars_t {
    entity
        .as_ref()
        .map_or(std::ptr::null_mut(), |entity| entity.entvars())
}

/// Path of the gamedata file for `game_mod`
pub fn gamedata_path(gamedata_dir: &Path, game_mod: GameMod) -> Option<PathBuf> {
    game_mod.gamedata_file().map(|file| gamedata_dir.join(file))
}

/// Load the variant for the running game and bind its hook chains
///
/// Returns `Ok(None)` for games without a variant.
#[tracing::instrument(skip_all, fields(game_mod = ?game_mod))]
pub fn load_variant(
    game_mod: GameMod,
    gamedata_dir: &Path,
    library: &'static crate::gamedll::GameLibrary,
) -> Result<Option<&'static GameVariant>, GameError> {
    let Some(path) = gamedata_path(gamedata_dir, game_mod) else {
        tracing::info!("No virtual hooks for this game");
        return Ok(None);
    };
    let gamedata = Gamedata::load_from_file(&path)?;

    let variant = match game_mod {
        GameMod::Valve => GameVariant::Valve(ValveGame::new(gamedata)),
        GameMod::CStrike | GameMod::CZero => GameVariant::CStrike(CStrikeGame::load(
            gamedata,
            library,
            player_hooks(),
            game_rules_hooks(),
        )?),
        GameMod::Other => return Ok(None),
    };

    VARIANT.set(variant).map_err(|_| GameError::AlreadyLoaded)?;
    Ok(VARIANT.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{BaseEntity, BasePlayer, HasHealth};
    use crate::hooks::HookPriority;
    use goldhook_sdk::edict_t;

    #[test]
    fn test_game_mod_detection() {
        assert_eq!(GameMod::from_game_dir("valve"), GameMod::Valve);
        assert_eq!(GameMod::from_game_dir("/srv/hlds/cstrike"), GameMod::CStrike);
        assert_eq!(GameMod::from_game_dir("czero"), GameMod::CZero);
        assert_eq!(GameMod::from_game_dir("tfc"), GameMod::Other);
        assert!(GameMod::Other.gamedata_file().is_none());
        assert_eq!(GameMod::CZero.gamedata_file(), Some("cstrike.json"));
    }

    #[test]
    fn test_damage_type_keeps_unknown_bits() {
        let raw = (1 << 1) | (1 << 11) | (1 << 30);
        let damage = DamageType::from_raw(raw);
        assert!(damage.contains(DamageType::BULLET));
        assert_eq!(damage.to_raw(), raw);
        assert!(DamageType::GIB_CORPSE.contains(DamageType::CLUB));
    }

    #[test]
    fn test_raw_enums() {
        assert_eq!(GibType::from_raw(2), GibType::Always);
        assert_eq!(GibType::from_raw(7), GibType::Normal);
        assert_eq!(WinStatus::from_raw(1), WinStatus::CTs);
        assert_eq!(WinStatus::Draw.to_raw(), 3);
    }

    /// Leaked zeroed edict standing in for an engine slot
    fn fake_edict() -> NonNull<edict_t> {
        let edict = Box::leak(Box::new(unsafe { std::mem::zeroed::<edict_t>() }));
        edict.v.health = 100.0;
        NonNull::from(edict)
    }

    #[test]
    fn test_take_damage_chain() {
        let hooks = PlayerHooks::new();
        let player = Arc::new(GameEntity::Player(unsafe { BasePlayer::new(fake_edict(), 1) }));
        let attacker = Arc::new(GameEntity::Entity(unsafe { BaseEntity::new(fake_edict(), 9) }));

        // A forwards, B halves the damage
        hooks
            .take_damage
            .register_hook(|hook, args| hook.call_next(args), HookPriority::Default);
        hooks.take_damage.register_hook(
            |hook, args| {
                args.damage /= 2.0;
                hook.call_next(args)
            },
            HookPriority::High,
        );

        let mut args = TakeDamageArgs {
            player: Arc::clone(&player),
            inflictor: None,
            attacker: Some(attacker),
            damage: 100.0,
            damage_type: DamageType::BULLET,
        };

        let result = hooks.take_damage.call_chain(
            |args| {
                let health = args.player.health() - args.damage;
                args.player.set_health(health);
                true
            },
            &mut args,
        );

        assert!(result);
        assert_eq!(args.damage, 50.0);
        assert_eq!(player.health(), 50.0);
    }
}
