//! Player entity wrapper

use std::fmt;
use std::ptr::NonNull;

use goldhook_engine::try_engine;
use goldhook_sdk::edict_t;

use super::entity::{BaseEntity, Entity, HasHealth, HasTeam};

/// Capabilities of player entities
pub trait Player: Entity + HasHealth + HasTeam {
    /// Player name
    fn netname(&self) -> Option<String> {
        let engine = try_engine().ok()?;
        engine.string_from_offset(unsafe { (*self.entvars()).netname })
    }

    fn armor(&self) -> f32 {
        unsafe { (*self.entvars()).armorvalue }
    }

    fn set_armor(&self, armor: f32) {
        unsafe { (*self.entvars()).armorvalue = armor }
    }

    /// Whether the player is alive (`deadflag == DEAD_NO`)
    fn is_alive(&self) -> bool {
        unsafe { (*self.entvars()).deadflag == 0 }
    }
}

/// Wrapper for a player edict (index `1..=max_clients`)
pub struct BasePlayer {
    base: BaseEntity,
}

impl BasePlayer {
    /// # Safety
    /// See [`BaseEntity::new`].
    pub unsafe fn new(edict: NonNull<edict_t>, index: u32) -> Self {
        Self {
            base: BaseEntity::new(edict, index),
        }
    }

    /// The underlying entity wrapper
    pub fn as_entity(&self) -> &BaseEntity {
        &self.base
    }
}

impl Entity for BasePlayer {
    fn edict_ptr(&self) -> *mut edict_t {
        self.base.edict_ptr()
    }

    fn index(&self) -> u32 {
        self.base.index()
    }

    fn serial(&self) -> i32 {
        self.base.serial()
    }
}

impl HasHealth for BasePlayer {}
impl HasTeam for BasePlayer {}
impl Player for BasePlayer {}

impl fmt::Debug for BasePlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasePlayer")
            .field("index", &self.index())
            .field("serial", &self.serial())
            .finish()
    }
}
