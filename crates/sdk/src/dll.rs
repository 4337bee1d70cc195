//! Game library export tables and entry point signatures

use std::ffi::{c_char, c_float, c_int, c_uchar, c_uint, c_void};

use crate::edict::{edict_t, entvars_t};
use crate::engine::{EngineFuncs, GlobalVars};

/// Game library function table (`DLL_FUNCTIONS`)
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct DllFunctions {
    pub pfn_game_init: Option<unsafe extern "C" fn()>,
    pub pfn_spawn: Option<unsafe extern "C" fn(*mut edict_t) -> c_int>,
    pub pfn_think: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_use: Option<unsafe extern "C" fn(*mut edict_t, *mut edict_t)>,
    pub pfn_touch: Option<unsafe extern "C" fn(*mut edict_t, *mut edict_t)>,
    pub pfn_blocked: Option<unsafe extern "C" fn(*mut edict_t, *mut edict_t)>,
    pub pfn_keyvalue: Option<unsafe extern "C" fn(*mut edict_t, *mut c_void)>,
    pub pfn_save: Option<unsafe extern "C" fn(*mut edict_t, *mut c_void)>,
    pub pfn_restore: Option<unsafe extern "C" fn(*mut edict_t, *mut c_void, c_int) -> c_int>,
    pub pfn_set_abs_box: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_save_write_fields: Option<unsafe extern "C" fn(*mut c_void, *const c_char, *mut c_void, *mut c_void, c_int)>,
    pub pfn_save_read_fields: Option<unsafe extern "C" fn(*mut c_void, *const c_char, *mut c_void, *mut c_void, c_int)>,
    pub pfn_save_global_state: Option<unsafe extern "C" fn(*mut c_void)>,
    pub pfn_restore_global_state: Option<unsafe extern "C" fn(*mut c_void)>,
    pub pfn_reset_global_state: Option<unsafe extern "C" fn()>,
    pub pfn_client_connect: Option<unsafe extern "C" fn(*mut edict_t, *const c_char, *const c_char, *mut c_char) -> c_int>,
    pub pfn_client_disconnect: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_client_kill: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_client_put_in_server: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_client_command: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_client_user_info_changed: Option<unsafe extern "C" fn(*mut edict_t, *mut c_char)>,
    pub pfn_server_activate: Option<unsafe extern "C" fn(*mut edict_t, c_int, c_int)>,
    pub pfn_server_deactivate: Option<unsafe extern "C" fn()>,
    pub pfn_player_pre_think: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_player_post_think: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_start_frame: Option<unsafe extern "C" fn()>,
    pub pfn_params_new_level: Option<unsafe extern "C" fn()>,
    pub pfn_params_change_level: Option<unsafe extern "C" fn()>,
    pub pfn_get_game_description: Option<unsafe extern "C" fn() -> *const c_char>,
    pub pfn_player_customization: Option<unsafe extern "C" fn(*mut edict_t, *mut c_void)>,
    pub pfn_spectator_connect: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_spectator_disconnect: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_spectator_think: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_sys_error: Option<unsafe extern "C" fn(*const c_char)>,
    pub pfn_pm_move: Option<unsafe extern "C" fn(*mut c_void, c_int)>,
    pub pfn_pm_init: Option<unsafe extern "C" fn(*mut c_void)>,
    pub pfn_pm_find_texture_type: Option<unsafe extern "C" fn(*mut c_char) -> c_char>,
    pub pfn_setup_visibility: Option<unsafe extern "C" fn(*mut edict_t, *mut edict_t, *mut *mut c_uchar, *mut *mut c_uchar)>,
    pub pfn_update_client_data: Option<unsafe extern "C" fn(*const edict_t, c_int, *mut c_void)>,
    pub pfn_add_to_full_pack: Option<unsafe extern "C" fn(*mut c_void, c_int, *mut edict_t, *mut edict_t, c_int, c_int, *mut c_uchar) -> c_int>,
    pub pfn_create_baseline: Option<unsafe extern "C" fn(c_int, c_int, *mut c_void, *mut edict_t, c_int, *const c_float, *const c_float)>,
    pub pfn_register_encoders: Option<unsafe extern "C" fn()>,
    pub pfn_get_weapon_data: Option<unsafe extern "C" fn(*mut edict_t, *mut c_void) -> c_int>,
    pub pfn_cmd_start: Option<unsafe extern "C" fn(*const edict_t, *const c_void, c_uint)>,
    pub pfn_cmd_end: Option<unsafe extern "C" fn(*const edict_t)>,
    pub pfn_connection_less_packet: Option<unsafe extern "C" fn(*const c_void, *const c_char, *mut c_char, *mut c_int) -> c_int>,
    pub pfn_get_hull_bounds: Option<unsafe extern "C" fn(c_int, *mut c_float, *mut c_float) -> c_int>,
    pub pfn_create_instanced_baselines: Option<unsafe extern "C" fn()>,
    pub pfn_inconsistent_file: Option<unsafe extern "C" fn(*const edict_t, *const c_char, *mut c_char) -> c_int>,
    pub pfn_allow_lag_compensation: Option<unsafe extern "C" fn() -> c_int>,
}

/// Extended game library function table (`NEW_DLL_FUNCTIONS`)
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct NewDllFunctions {
    pub pfn_on_free_ent_private_data: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_game_shutdown: Option<unsafe extern "C" fn()>,
    pub pfn_should_collide: Option<unsafe extern "C" fn(*mut edict_t, *mut edict_t) -> c_int>,
    pub pfn_cvar_value: Option<unsafe extern "C" fn(*const edict_t, *const c_char)>,
    pub pfn_cvar_value2: Option<unsafe extern "C" fn(*const edict_t, c_int, *const c_char, *const c_char)>,
}

/// `GiveFnptrsToDll`
pub type GiveFnptrsToDllFn = unsafe extern "system" fn(*mut EngineFuncs, *mut GlobalVars);
/// `GetEntityAPI`
pub type GetEntityApiFn = unsafe extern "C" fn(*mut DllFunctions, c_int) -> c_int;
/// `GetEntityAPI2`
pub type GetEntityApi2Fn = unsafe extern "C" fn(*mut DllFunctions, *mut c_int) -> c_int;
/// `GetNewDLLFunctions`
pub type GetNewDllFunctionsFn = unsafe extern "C" fn(*mut NewDllFunctions, *mut c_int) -> c_int;
/// `CreateInterface` factory exported by interface-providing libraries
pub type CreateInterfaceFn =
    unsafe extern "C" fn(name: *const c_char, return_code: *mut c_int) -> *mut c_void;

/// Exported entity class factory, e.g. `player` or `worldspawn`
pub type EntityFactoryFn = unsafe extern "C" fn(*mut entvars_t);
