//! Engine-side tables: globals and the engine function table

use std::ffi::{c_char, c_float, c_int, c_uchar, c_uint, c_ushort, c_void};

use crate::edict::{edict_t, entvars_t, string_t, TraceResult};

#[repr(C)]
#[allow(non_camel_case_types)]
pub struct cvar_t {
    pub name: *const c_char,
    pub string: *mut c_char,
    pub flags: c_int,
    pub value: c_float,
    pub next: *mut cvar_t,
}

/// Engine global variables
#[repr(C)]
pub struct GlobalVars {
    pub time: c_float,
    pub frametime: c_float,
    pub force_retouch: c_float,
    pub mapname: string_t,
    pub startspot: string_t,
    pub deathmatch: c_float,
    pub coop: c_float,
    pub teamplay: c_float,
    pub serverflags: c_float,
    pub found_secrets: c_float,
    pub v_forward: [c_float; 3],
    pub v_up: [c_float; 3],
    pub v_right: [c_float; 3],
    pub trace_allsolid: c_float,
    pub trace_startsolid: c_float,
    pub trace_fraction: c_float,
    pub trace_endpos: [c_float; 3],
    pub trace_plane_normal: [c_float; 3],
    pub trace_plane_dist: c_float,
    pub trace_ent: *mut edict_t,
    pub trace_inopen: c_float,
    pub trace_inwater: c_float,
    pub trace_hitgroup: c_int,
    pub trace_flags: c_int,
    pub msg_entity: c_int,
    pub cd_audio_track: c_int,
    pub max_clients: c_int,
    pub max_entities: c_int,
    pub p_string_base: *const c_char,
    pub p_save_data: *mut c_void,
    pub vec_landmark_offset: [c_float; 3],
}

/// Engine function table handed to the game library by `GiveFnptrsToDll`
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct EngineFuncs {
    pub pfn_precache_model: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub pfn_precache_sound: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub pfn_set_model: Option<unsafe extern "C" fn(*mut edict_t, *const c_char)>,
    pub pfn_model_index: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub pfn_model_frames: Option<unsafe extern "C" fn(c_int) -> c_int>,
    pub pfn_set_size: Option<unsafe extern "C" fn(*mut edict_t, *const c_float, *const c_float)>,
    pub pfn_change_level: Option<unsafe extern "C" fn(*const c_char, *const c_char)>,
    pub pfn_get_spawn_parms: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_save_spawn_parms: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_vec_to_yaw: Option<unsafe extern "C" fn(*const c_float) -> c_float>,
    pub pfn_vec_to_angles: Option<unsafe extern "C" fn(*const c_float, *mut c_float)>,
    pub pfn_move_to_origin: Option<unsafe extern "C" fn(*mut edict_t, *const c_float, c_float, c_int)>,
    pub pfn_change_yaw: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_change_pitch: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_find_entity_by_string: Option<unsafe extern "C" fn(*mut edict_t, *const c_char, *const c_char) -> *mut edict_t>,
    pub pfn_get_entity_illum: Option<unsafe extern "C" fn(*mut edict_t) -> c_int>,
    pub pfn_find_entity_in_sphere: Option<unsafe extern "C" fn(*mut edict_t, *const c_float, c_float) -> *mut edict_t>,
    pub pfn_find_client_in_pvs: Option<unsafe extern "C" fn(*mut edict_t) -> *mut edict_t>,
    pub pfn_entities_in_pvs: Option<unsafe extern "C" fn(*mut edict_t) -> *mut edict_t>,
    pub pfn_make_vectors: Option<unsafe extern "C" fn(*const c_float)>,
    pub pfn_angle_vectors: Option<unsafe extern "C" fn(*const c_float, *mut c_float, *mut c_float, *mut c_float)>,
    pub pfn_create_entity: Option<unsafe extern "C" fn() -> *mut edict_t>,
    pub pfn_remove_entity: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_create_named_entity: Option<unsafe extern "C" fn(c_int) -> *mut edict_t>,
    pub pfn_make_static: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_ent_is_on_floor: Option<unsafe extern "C" fn(*mut edict_t) -> c_int>,
    pub pfn_drop_to_floor: Option<unsafe extern "C" fn(*mut edict_t) -> c_int>,
    pub pfn_walk_move: Option<unsafe extern "C" fn(*mut edict_t, c_float, c_float, c_int) -> c_int>,
    pub pfn_set_origin: Option<unsafe extern "C" fn(*mut edict_t, *const c_float)>,
    pub pfn_emit_sound: Option<unsafe extern "C" fn(*mut edict_t, c_int, *const c_char, c_float, c_float, c_int, c_int)>,
    pub pfn_emit_ambient_sound: Option<unsafe extern "C" fn(*mut edict_t, *mut c_float, *const c_char, c_float, c_float, c_int, c_int)>,
    pub pfn_trace_line: Option<unsafe extern "C" fn(*const c_float, *const c_float, c_int, *mut edict_t, *mut TraceResult)>,
    pub pfn_trace_toss: Option<unsafe extern "C" fn(*mut edict_t, *mut edict_t, *mut TraceResult)>,
    pub pfn_trace_monster_hull: Option<unsafe extern "C" fn(*mut edict_t, *const c_float, *const c_float, c_int, *mut edict_t, *mut TraceResult) -> c_int>,
    pub pfn_trace_hull: Option<unsafe extern "C" fn(*const c_float, *const c_float, c_int, c_int, *mut edict_t, *mut TraceResult)>,
    pub pfn_trace_model: Option<unsafe extern "C" fn(*const c_float, *const c_float, c_int, *mut edict_t, *mut TraceResult)>,
    pub pfn_trace_texture: Option<unsafe extern "C" fn(*mut edict_t, *const c_float, *const c_float) -> *const c_char>,
    pub pfn_trace_sphere: Option<unsafe extern "C" fn(*const c_float, *const c_float, c_int, c_float, *mut edict_t, *mut TraceResult)>,
    pub pfn_get_aim_vector: Option<unsafe extern "C" fn(*mut edict_t, c_float, *mut c_float)>,
    pub pfn_server_command: Option<unsafe extern "C" fn(*const c_char)>,
    pub pfn_server_execute: Option<unsafe extern "C" fn()>,
    pub pfn_client_command: Option<unsafe extern "C" fn(*mut edict_t, *const c_char, ...)>,
    pub pfn_particle_effect: Option<unsafe extern "C" fn(*const c_float, *const c_float, c_float, c_float)>,
    pub pfn_light_style: Option<unsafe extern "C" fn(c_int, *const c_char)>,
    pub pfn_decal_index: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub pfn_point_contents: Option<unsafe extern "C" fn(*const c_float) -> c_int>,
    pub pfn_message_begin: Option<unsafe extern "C" fn(c_int, c_int, *const c_float, *mut edict_t)>,
    pub pfn_message_end: Option<unsafe extern "C" fn()>,
    pub pfn_write_byte: Option<unsafe extern "C" fn(c_int)>,
    pub pfn_write_char: Option<unsafe extern "C" fn(c_int)>,
    pub pfn_write_short: Option<unsafe extern "C" fn(c_int)>,
    pub pfn_write_long: Option<unsafe extern "C" fn(c_int)>,
    pub pfn_write_angle: Option<unsafe extern "C" fn(c_float)>,
    pub pfn_write_coord: Option<unsafe extern "C" fn(c_float)>,
    pub pfn_write_string: Option<unsafe extern "C" fn(*const c_char)>,
    pub pfn_write_entity: Option<unsafe extern "C" fn(c_int)>,
    pub pfn_cvar_register: Option<unsafe extern "C" fn(*mut cvar_t)>,
    pub pfn_cvar_get_float: Option<unsafe extern "C" fn(*const c_char) -> c_float>,
    pub pfn_cvar_get_string: Option<unsafe extern "C" fn(*const c_char) -> *const c_char>,
    pub pfn_cvar_set_float: Option<unsafe extern "C" fn(*const c_char, c_float)>,
    pub pfn_cvar_set_string: Option<unsafe extern "C" fn(*const c_char, *const c_char)>,
    pub pfn_alert_message: Option<unsafe extern "C" fn(c_int, *const c_char, ...)>,
    pub pfn_engine_fprintf: Option<unsafe extern "C" fn(*mut c_void, *const c_char, ...)>,
    pub pfn_alloc_ent_private_data: Option<unsafe extern "C" fn(*mut edict_t, c_int) -> *mut c_void>,
    pub pfn_ent_private_data: Option<unsafe extern "C" fn(*mut edict_t) -> *mut c_void>,
    pub pfn_free_ent_private_data: Option<unsafe extern "C" fn(*mut edict_t)>,
    pub pfn_sz_from_index: Option<unsafe extern "C" fn(c_int) -> *const c_char>,
    pub pfn_alloc_string: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub pfn_get_vars_of_ent: Option<unsafe extern "C" fn(*mut edict_t) -> *mut entvars_t>,
    pub pfn_pent_of_ent_offset: Option<unsafe extern "C" fn(c_int) -> *mut edict_t>,
    pub pfn_ent_offset_of_pent: Option<unsafe extern "C" fn(*const edict_t) -> c_int>,
    pub pfn_index_of_edict: Option<unsafe extern "C" fn(*const edict_t) -> c_int>,
    pub pfn_pent_of_ent_index: Option<unsafe extern "C" fn(c_int) -> *mut edict_t>,
    pub pfn_find_entity_by_vars: Option<unsafe extern "C" fn(*mut entvars_t) -> *mut edict_t>,
    pub pfn_get_model_ptr: Option<unsafe extern "C" fn(*mut edict_t) -> *mut c_void>,
    pub pfn_reg_user_msg: Option<unsafe extern "C" fn(*const c_char, c_int) -> c_int>,
    pub pfn_animation_auto_move: Option<unsafe extern "C" fn(*const edict_t, c_float)>,
    pub pfn_get_bone_position: Option<unsafe extern "C" fn(*const edict_t, c_int, *mut c_float, *mut c_float)>,
    pub pfn_function_from_name: Option<unsafe extern "C" fn(*const c_char) -> c_uchar>,
    pub pfn_name_for_function: Option<unsafe extern "C" fn(c_uchar) -> *const c_char>,
    pub pfn_client_printf: Option<unsafe extern "C" fn(*mut edict_t, c_int, *const c_char)>,
    pub pfn_server_print: Option<unsafe extern "C" fn(*const c_char)>,
    pub pfn_cmd_args: Option<unsafe extern "C" fn() -> *const c_char>,
    pub pfn_cmd_argv: Option<unsafe extern "C" fn(c_int) -> *const c_char>,
    pub pfn_cmd_argc: Option<unsafe extern "C" fn() -> c_int>,
    pub pfn_get_attachment: Option<unsafe extern "C" fn(*const edict_t, c_int, *mut c_float, *mut c_float)>,
    pub pfn_crc32_init: Option<unsafe extern "C" fn(*mut c_uchar)>,
    pub pfn_crc32_process_buffer: Option<unsafe extern "C" fn(*mut c_uchar, *mut c_void, c_int)>,
    pub pfn_crc32_process_byte: Option<unsafe extern "C" fn(*mut c_uchar, c_uchar)>,
    pub pfn_crc32_final: Option<unsafe extern "C" fn(c_uchar) -> c_uchar>,
    pub pfn_random_long: Option<unsafe extern "C" fn(c_int, c_int) -> c_int>,
    pub pfn_random_float: Option<unsafe extern "C" fn(c_float, c_float) -> c_float>,
    pub pfn_set_view: Option<unsafe extern "C" fn(*const edict_t, *const edict_t)>,
    pub pfn_time: Option<unsafe extern "C" fn() -> c_float>,
    pub pfn_crosshair_angle: Option<unsafe extern "C" fn(*const edict_t, c_float, c_float)>,
    pub pfn_load_file_for_me: Option<unsafe extern "C" fn(*const c_char, *mut c_int) -> *mut c_uchar>,
    pub pfn_free_file: Option<unsafe extern "C" fn(*mut c_void)>,
    pub pfn_end_section: Option<unsafe extern "C" fn(*const c_char)>,
    pub pfn_compare_file_time: Option<unsafe extern "C" fn(*const c_char, *const c_char, *mut c_int) -> c_int>,
    pub pfn_get_game_dir: Option<unsafe extern "C" fn(*mut c_char)>,
    pub pfn_cvar_register_variable: Option<unsafe extern "C" fn(*mut cvar_t)>,
    pub pfn_fade_client_volume: Option<unsafe extern "C" fn(*const edict_t, c_int, c_int, c_int, c_int)>,
    pub pfn_set_client_max_speed: Option<unsafe extern "C" fn(*mut edict_t, c_float)>,
    pub pfn_create_fake_client: Option<unsafe extern "C" fn(*const c_char) -> *mut edict_t>,
    pub pfn_run_player_move: Option<unsafe extern "C" fn(*mut edict_t, *const c_float, c_float, c_float, c_float, c_ushort, c_uchar, c_uchar)>,
    pub pfn_number_of_entities: Option<unsafe extern "C" fn() -> c_int>,
    pub pfn_get_info_key_buffer: Option<unsafe extern "C" fn(*mut edict_t) -> *mut c_char>,
    pub pfn_info_key_value: Option<unsafe extern "C" fn(*mut c_char, *const c_char) -> *mut c_char>,
    pub pfn_set_key_value: Option<unsafe extern "C" fn(*mut c_char, *const c_char, *const c_char)>,
    pub pfn_set_client_key_value: Option<unsafe extern "C" fn(c_int, *mut c_char, *const c_char, *const c_char)>,
    pub pfn_is_map_valid: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub pfn_static_decal: Option<unsafe extern "C" fn(*const c_float, c_int, c_int, c_int)>,
    pub pfn_precache_generic: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub pfn_get_player_userid: Option<unsafe extern "C" fn(*mut edict_t) -> c_int>,
    pub pfn_build_sound_msg: Option<unsafe extern "C" fn(*mut edict_t, c_int, *const c_char, c_float, c_float, c_int, c_int, c_int, c_int, *const c_float, *mut edict_t)>,
    pub pfn_is_dedicated_server: Option<unsafe extern "C" fn() -> c_int>,
    pub pfn_cvar_get_pointer: Option<unsafe extern "C" fn(*const c_char) -> *mut cvar_t>,
    pub pfn_get_player_wonid: Option<unsafe extern "C" fn(*mut edict_t) -> c_uint>,
    pub pfn_info_remove_key: Option<unsafe extern "C" fn(*mut c_char, *const c_char)>,
    pub pfn_get_physics_key_value: Option<unsafe extern "C" fn(*const edict_t, *const c_char) -> *const c_char>,
    pub pfn_set_physics_key_value: Option<unsafe extern "C" fn(*const edict_t, *const c_char, *const c_char)>,
    pub pfn_get_physics_info_string: Option<unsafe extern "C" fn(*const edict_t) -> *const c_char>,
    pub pfn_precache_event: Option<unsafe extern "C" fn(c_int, *const c_char) -> c_ushort>,
    pub pfn_playback_event: Option<unsafe extern "C" fn(c_int, *const edict_t, c_ushort, c_float, *const c_float, *const c_float, c_float, c_float, c_int, c_int, c_int, c_int)>,
    pub pfn_set_fat_pvs: Option<unsafe extern "C" fn(*mut c_float) -> *mut c_uchar>,
    pub pfn_set_fat_pas: Option<unsafe extern "C" fn(*mut c_float) -> *mut c_uchar>,
    pub pfn_check_visibility: Option<unsafe extern "C" fn(*const edict_t, *mut c_uchar) -> c_int>,
    pub pfn_delta_set_field: Option<unsafe extern "C" fn(*mut c_void, *const c_char)>,
    pub pfn_delta_unset_field: Option<unsafe extern "C" fn(*mut c_void, *const c_char)>,
    pub pfn_delta_add_encoder: Option<unsafe extern "C" fn(*const c_char, Option<unsafe extern "C" fn(*mut c_void, *const c_uchar, *const c_uchar)>)>,
    pub pfn_get_current_player: Option<unsafe extern "C" fn() -> c_int>,
    pub pfn_can_skip_player: Option<unsafe extern "C" fn(*const edict_t) -> c_int>,
    pub pfn_delta_find_field: Option<unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int>,
    pub pfn_delta_set_field_by_index: Option<unsafe extern "C" fn(*mut c_void, c_int)>,
    pub pfn_delta_unset_field_by_index: Option<unsafe extern "C" fn(*mut c_void, c_int)>,
    pub pfn_set_group_mask: Option<unsafe extern "C" fn(c_int, c_int)>,
    pub pfn_engine_stub1: Option<unsafe extern "C" fn(c_int, *const c_char) -> c_int>,
    pub pfn_engine_stub2: Option<unsafe extern "C" fn()>,
    pub pfn_voice_get_client_listening: Option<unsafe extern "C" fn(c_int, c_int) -> c_int>,
    pub pfn_voice_set_client_listening: Option<unsafe extern "C" fn(c_int, c_int, c_int) -> c_int>,
    pub pfn_get_player_auth_id: Option<unsafe extern "C" fn(*mut edict_t) -> *const c_char>,
    pub pfn_sequence_get: Option<unsafe extern "C" fn(*const c_char, *const c_char) -> *mut c_void>,
    pub pfn_sequence_pickup_sentence: Option<unsafe extern "C" fn(*const c_char, c_int, *mut c_int) -> *mut c_void>,
    pub pfn_get_file_size: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub pfn_get_approx_wave_play_len: Option<unsafe extern "C" fn(*const c_char) -> c_uint>,
    pub pfn_is_career_match: Option<unsafe extern "C" fn() -> c_int>,
    pub pfn_get_localized_string_length: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub pfn_register_tutor_message_shown: Option<unsafe extern "C" fn(c_int)>,
    pub pfn_get_times_tutor_message_shown: Option<unsafe extern "C" fn(c_int) -> c_int>,
    pub pfn_process_tutor_message_decay_buffer: Option<unsafe extern "C" fn(*mut c_int, c_int)>,
    pub pfn_construct_tutor_message_decay_buffer: Option<unsafe extern "C" fn(*mut c_int, c_int)>,
    pub pfn_reset_tutor_message_decay_data: Option<unsafe extern "C" fn()>,
    pub pfn_query_client_cvar_value: Option<unsafe extern "C" fn(*const edict_t, *const c_char)>,
    pub pfn_query_client_cvar_value2: Option<unsafe extern "C" fn(*const edict_t, *const c_char, c_int)>,
    pub pfn_check_parm: Option<unsafe extern "C" fn(*const c_char, *mut *mut c_char) -> c_int>,
}
