//! Edict and entity variable layouts
//!
//! Field names follow the engine headers so the layouts can be checked
//! against them line by line.

#![allow(non_camel_case_types, non_snake_case)]

use std::ffi::{c_int, c_short, c_uchar, c_void};

/// Offset into the engine string pool (`globals.pStringBase`)
pub type string_t = c_int;

/// Engine vector type
pub type vec3_t = [f32; 3];

/// `Vector` class passed by value to game library methods
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<vec3_t> for Vector {
    fn from(v: vec3_t) -> Self {
        Self { x: v[0], y: v[1], z: v[2] }
    }
}

impl From<Vector> for vec3_t {
    fn from(v: Vector) -> Self {
        [v.x, v.y, v.z]
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct link_t {
    pub prev: *mut link_t,
    pub next: *mut link_t,
}

/// Per-entity state shared between the engine and the game library
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct entvars_t {
    pub classname: string_t,
    pub globalname: string_t,
    pub origin: vec3_t,
    pub oldorigin: vec3_t,
    pub velocity: vec3_t,
    pub basevelocity: vec3_t,
    pub clbasevelocity: vec3_t,
    pub movedir: vec3_t,
    pub angles: vec3_t,
    pub avelocity: vec3_t,
    pub punchangle: vec3_t,
    pub v_angle: vec3_t,
    pub endpos: vec3_t,
    pub startpos: vec3_t,
    pub impacttime: f32,
    pub starttime: f32,
    pub fixangle: c_int,
    pub idealpitch: f32,
    pub pitch_speed: f32,
    pub ideal_yaw: f32,
    pub yaw_speed: f32,
    pub modelindex: c_int,
    pub model: string_t,
    pub viewmodel: c_int,
    pub weaponmodel: c_int,
    pub absmin: vec3_t,
    pub absmax: vec3_t,
    pub mins: vec3_t,
    pub maxs: vec3_t,
    pub size: vec3_t,
    pub ltime: f32,
    pub nextthink: f32,
    pub movetype: c_int,
    pub solid: c_int,
    pub skin: c_int,
    pub body: c_int,
    pub effects: c_int,
    pub gravity: f32,
    pub friction: f32,
    pub light_level: c_int,
    pub sequence: c_int,
    pub gaitsequence: c_int,
    pub frame: f32,
    pub animtime: f32,
    pub framerate: f32,
    pub controller: [c_uchar; 4],
    pub blending: [c_uchar; 2],
    pub scale: f32,
    pub rendermode: c_int,
    pub renderamt: f32,
    pub rendercolor: vec3_t,
    pub renderfx: c_int,
    pub health: f32,
    pub frags: f32,
    pub weapons: c_int,
    pub takedamage: f32,
    pub deadflag: c_int,
    pub view_ofs: vec3_t,
    pub button: c_int,
    pub impulse: c_int,
    pub chain: *mut edict_t,
    pub dmg_inflictor: *mut edict_t,
    pub enemy: *mut edict_t,
    pub aiment: *mut edict_t,
    pub owner: *mut edict_t,
    pub groundentity: *mut edict_t,
    pub spawnflags: c_int,
    pub flags: c_int,
    pub colormap: c_int,
    pub team: c_int,
    pub max_health: f32,
    pub teleport_time: f32,
    pub armortype: f32,
    pub armorvalue: f32,
    pub waterlevel: c_int,
    pub watertype: c_int,
    pub target: string_t,
    pub targetname: string_t,
    pub netname: string_t,
    pub message: string_t,
    pub dmg_take: f32,
    pub dmg_save: f32,
    pub dmg: f32,
    pub dmgtime: f32,
    pub noise: string_t,
    pub noise1: string_t,
    pub noise2: string_t,
    pub noise3: string_t,
    pub speed: f32,
    pub air_finished: f32,
    pub pain_finished: f32,
    pub radsuit_finished: f32,
    pub pContainingEntity: *mut edict_t,
    pub playerclass: c_int,
    pub maxspeed: f32,
    pub fov: f32,
    pub weaponanim: c_int,
    pub pushmsec: c_int,
    pub bInDuck: c_int,
    pub flTimeStepSound: c_int,
    pub flSwimTime: c_int,
    pub flDuckTime: c_int,
    pub iStepLeft: c_int,
    pub flFallVelocity: f32,
    pub gamestate: c_int,
    pub oldbuttons: c_int,
    pub groupinfo: c_int,
    pub iuser1: c_int,
    pub iuser2: c_int,
    pub iuser3: c_int,
    pub iuser4: c_int,
    pub fuser1: f32,
    pub fuser2: f32,
    pub fuser3: f32,
    pub fuser4: f32,
    pub vuser1: vec3_t,
    pub vuser2: vec3_t,
    pub vuser3: vec3_t,
    pub vuser4: vec3_t,
    pub euser1: *mut edict_t,
    pub euser2: *mut edict_t,
    pub euser3: *mut edict_t,
    pub euser4: *mut edict_t,
}

/// Engine entity slot
///
/// `serialnumber` is bumped every time the engine reuses the slot.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct edict_t {
    pub free: c_int,
    pub serialnumber: c_int,
    pub area: link_t,
    pub headnode: c_int,
    pub num_leafs: c_int,
    pub leafnums: [c_short; 48],
    pub freetime: f32,
    /// Game library object (`CBaseEntity` and descendants)
    pub pvPrivateData: *mut c_void,
    pub v: entvars_t,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct plane_t {
    pub normal: vec3_t,
    pub dist: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct TraceResult {
    pub fAllSolid: c_int,
    pub fStartSolid: c_int,
    pub fInOpen: c_int,
    pub fInWater: c_int,
    pub flFraction: f32,
    pub vecEndPos: vec3_t,
    pub flPlaneDist: f32,
    pub vecPlaneNormal: vec3_t,
    pub pHit: *mut edict_t,
    pub iHitgroup: c_int,
}

#[cfg(all(test, target_pointer_width = "32"))]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_entvars_layout() {
        assert_eq!(size_of::<entvars_t>(), 676);
        assert_eq!(offset_of!(entvars_t, euser4), 672);
    }

    #[test]
    fn test_edict_layout() {
        assert_eq!(size_of::<edict_t>(), 804);
        assert_eq!(offset_of!(edict_t, pvPrivateData), 124);
        assert_eq!(offset_of!(edict_t, v), 128);
    }
}
