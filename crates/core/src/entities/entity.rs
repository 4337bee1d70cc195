//! Base entity wrapper
//!
//! Entity state lives in the edict's `entvars_t`, which the engine shares with
//! the game library. Wrappers read and write it in place.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use goldhook_engine::try_engine;
use goldhook_sdk::{edict_t, entvars_t, string_t, vec3_t};

/// Capabilities of every entity
pub trait Entity {
    /// The engine edict
    fn edict_ptr(&self) -> *mut edict_t;

    /// Engine index of the edict
    fn index(&self) -> u32;

    /// Serial number observed when the wrapper was created
    fn serial(&self) -> i32;

    /// Whether the edict still holds the entity this wrapper was created for
    fn is_valid(&self) -> bool {
        // SAFETY: edicts live in the engine's fixed array for the whole map
        let edict = unsafe { &*self.edict_ptr() };
        edict.free == 0 && edict.serialnumber == self.serial()
    }

    /// Entity variables of the edict
    fn entvars(&self) -> *mut entvars_t {
        // SAFETY: as above
        unsafe { std::ptr::addr_of_mut!((*self.edict_ptr()).v) }
    }

    /// Game library object (`CBaseEntity`)
    fn private_data(&self) -> *mut c_void {
        unsafe { (*self.edict_ptr()).pvPrivateData }
    }

    /// Classname as an engine string offset
    fn classname_offset(&self) -> string_t {
        unsafe { (*self.entvars()).classname }
    }

    /// Classname, resolved against the engine string pool
    fn classname(&self) -> Option<String> {
        let engine = try_engine().ok()?;
        engine.string_from_offset(self.classname_offset())
    }

    fn origin(&self) -> vec3_t {
        unsafe { (*self.entvars()).origin }
    }
}

/// Entities with health
pub trait HasHealth: Entity {
    fn health(&self) -> f32 {
        unsafe { (*self.entvars()).health }
    }

    fn max_health(&self) -> f32 {
        unsafe { (*self.entvars()).max_health }
    }

    fn set_health(&self, health: f32) {
        unsafe { (*self.entvars()).health = health }
    }
}

/// Entities on a team
pub trait HasTeam: Entity {
    fn team(&self) -> i32 {
        unsafe { (*self.entvars()).team }
    }
}

/// Wrapper for any edict
pub struct BaseEntity {
    edict: NonNull<edict_t>,
    index: u32,
    serial: i32,
}

// SAFETY: edicts are engine memory valid for the whole map. The engine only
// calls into the game from its main thread.
unsafe impl Send for BaseEntity {}
unsafe impl Sync for BaseEntity {}

impl BaseEntity {
    /// Wrap an edict, recording its current serial number
    ///
    /// # Safety
    /// `edict` must point into the engine's edict array.
    pub unsafe fn new(edict: NonNull<edict_t>, index: u32) -> Self {
        Self {
            edict,
            index,
            serial: edict.as_ref().serialnumber,
        }
    }
}

impl Entity for BaseEntity {
    fn edict_ptr(&self) -> *mut edict_t {
        self.edict.as_ptr()
    }

    fn index(&self) -> u32 {
        self.index
    }

    fn serial(&self) -> i32 {
        self.serial
    }
}

impl HasHealth for BaseEntity {}
impl HasTeam for BaseEntity {}

impl fmt::Debug for BaseEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseEntity")
            .field("edict", &self.edict)
            .field("index", &self.index)
            .field("serial", &self.serial)
            .finish()
    }
}
