//! Cache of entity wrappers
//!
//! Edict slots are reused by the engine. Each reuse bumps the slot's serial
//! number, so a cached wrapper is only handed out while its serial still
//! matches the edict.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use goldhook_engine::EngineContext;
use goldhook_sdk::{edict_t, entvars_t};

use super::{BaseEntity, BasePlayer, Entity, GameEntity};

/// Edict queries the holder needs from the engine
pub trait EdictLookup {
    fn index_of(&self, edict: *const edict_t) -> Option<u32>;

    fn edict_of_entvars(&self, pev: *mut entvars_t) -> Option<NonNull<edict_t>>;
}

impl EdictLookup for EngineContext {
    fn index_of(&self, edict: *const edict_t) -> Option<u32> {
        self.index_of_edict(edict)
            .ok()
            .and_then(|index| u32::try_from(index).ok())
    }

    fn edict_of_entvars(&self, pev: *mut entvars_t) -> Option<NonNull<edict_t>> {
        EngineContext::edict_of_entvars(self, pev).ok().flatten()
    }
}

/// Wrappers keyed by edict index
#[derive(Default)]
pub struct EntityHolder {
    entities: DashMap<u32, Arc<GameEntity>>,
    max_clients: AtomicU32,
}

impl EntityHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the player slot count, from `ServerActivate`
    ///
    /// Wrappers made under another count may be of the wrong kind, so a
    /// change drops them.
    pub fn set_max_clients(&self, max_clients: u32) {
        if self.max_clients.swap(max_clients, Ordering::AcqRel) != max_clients {
            self.entities.clear();
        }
    }

    pub fn max_clients(&self) -> u32 {
        self.max_clients.load(Ordering::Relaxed)
    }

    /// Wrapper for `edict` at `index`, created on first use or serial change
    ///
    /// # Safety
    /// `edict` must point into the engine's edict array at `index`.
    pub unsafe fn get(&self, edict: NonNull<edict_t>, index: u32) -> Arc<GameEntity> {
        let serial = edict.as_ref().serialnumber;

        if let Some(cached) = self.entities.get(&index) {
            if cached.serial() == serial
                && cached.edict_ptr() == edict.as_ptr()
                && cached.is_player() == self.is_player_index(index)
            {
                return Arc::clone(&cached);
            }
        }

        let entity = Arc::new(self.wrap(edict, index));
        self.entities.insert(index, Arc::clone(&entity));
        entity
    }

    /// # Safety
    /// `edict` must be null or an engine edict.
    pub unsafe fn by_edict(
        &self,
        lookup: &dyn EdictLookup,
        edict: *mut edict_t,
    ) -> Option<Arc<GameEntity>> {
        let edict = NonNull::new(edict)?;
        let index = lookup.index_of(edict.as_ptr())?;
        Some(self.get(edict, index))
    }

    /// # Safety
    /// `pev` must be null or the entity variables of an engine edict.
    pub unsafe fn by_entvars(
        &self,
        lookup: &dyn EdictLookup,
        pev: *mut entvars_t,
    ) -> Option<Arc<GameEntity>> {
        if pev.is_null() {
            return None;
        }
        let edict = match NonNull::new((*pev).pContainingEntity) {
            Some(edict) => edict,
            None => lookup.edict_of_entvars(pev)?,
        };
        self.by_edict(lookup, edict.as_ptr())
    }

    /// Wrapper for a game library object (`CBaseEntity*`)
    ///
    /// `pev_offset` is the byte offset of the object's `pev` member.
    ///
    /// # Safety
    /// `object` must be null or a game object with a `pev` at `pev_offset`.
    pub unsafe fn by_object(
        &self,
        lookup: &dyn EdictLookup,
        object: *mut c_void,
        pev_offset: usize,
    ) -> Option<Arc<GameEntity>> {
        if object.is_null() {
            return None;
        }
        let pev = (object as *const u8)
            .add(pev_offset)
            .cast::<*mut entvars_t>()
            .read_unaligned();
        self.by_entvars(lookup, pev)
    }

    pub fn remove(&self, index: u32) -> Option<Arc<GameEntity>> {
        self.entities.remove(&index).map(|(_, entity)| entity)
    }

    /// Drop every wrapper, on map change
    pub fn clear(&self) {
        self.entities.clear();
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn is_player_index(&self, index: u32) -> bool {
        (1..=self.max_clients()).contains(&index)
    }

    unsafe fn wrap(&self, edict: NonNull<edict_t>, index: u32) -> GameEntity {
        if self.is_player_index(index) {
            GameEntity::Player(BasePlayer::new(edict, index))
        } else {
            GameEntity::Entity(BaseEntity::new(edict, index))
        }
    }
}
