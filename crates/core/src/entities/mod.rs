//! Entity wrappers
//!
//! Wrappers expose capabilities through traits rather than a class
//! hierarchy:
//!
//! - [`Entity`] - index, serial number, classname, edict access
//! - [`HasHealth`] - health and max health
//! - [`HasTeam`] - team number
//! - [`Player`] - name and armor
//!
//! The concrete wrapper is picked at runtime by [`GameEntity`]: indices in
//! `1..=max_clients` are players, everything else is a plain entity.
//!
//! # Example
//!
//! ```ignore
//! use goldhook_core::entities::{Entity, HasHealth};
//!
//! goldhook.player_hooks().take_damage.register_hook(
//!     |hook, args| {
//!         if let Some(player) = args.player.as_player() {
//!             tracing::info!("{:?} hit at {} HP", player.netname(), player.health());
//!         }
//!         hook.call_next(args)
//!     },
//!     HookPriority::Default,
//! );
//! ```

mod entity;
mod holder;
mod player;

use std::fmt;
use std::sync::LazyLock;

use goldhook_sdk::edict_t;

pub use entity::{BaseEntity, Entity, HasHealth, HasTeam};
pub use holder::{EdictLookup, EntityHolder};
pub use player::{BasePlayer, Player};

static HOLDER: LazyLock<EntityHolder> = LazyLock::new(EntityHolder::new);

/// Process wide wrapper cache
pub fn holder() -> &'static EntityHolder {
    &HOLDER
}

/// Wrapper of an edict, tagged by what it holds
pub enum GameEntity {
    Player(BasePlayer),
    Entity(BaseEntity),
}

impl GameEntity {
    pub fn as_player(&self) -> Option<&BasePlayer> {
        match self {
            GameEntity::Player(player) => Some(player),
            GameEntity::Entity(_) => None,
        }
    }

    pub fn is_player(&self) -> bool {
        matches!(self, GameEntity::Player(_))
    }

    fn inner(&self) -> &dyn Entity {
        match self {
            GameEntity::Player(player) => player,
            GameEntity::Entity(entity) => entity,
        }
    }
}

impl Entity for GameEntity {
    fn edict_ptr(&self) -> *mut edict_t {
        self.inner().edict_ptr()
    }

    fn index(&self) -> u32 {
        self.inner().index()
    }

    fn serial(&self) -> i32 {
        self.inner().serial()
    }
}

impl HasHealth for GameEntity {}
impl HasTeam for GameEntity {}

impl fmt::Debug for GameEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameEntity::Player(player) => player.fmt(f),
            GameEntity::Entity(entity) => entity.fmt(f),
        }
    }
}
