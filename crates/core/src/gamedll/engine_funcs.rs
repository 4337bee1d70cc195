//! Hook chains on the engine table handed to the game library
//!
//! The game library calls the engine through the copy of [`EngineFuncs`] it
//! received in `GiveFnptrsToDll`. goldhook hands it a copy whose hooked
//! entries dispatch through [`EngineHooks`] before reaching the engine.
//!
//! Variadic entries (`pfnClientCommand`, `pfnAlertMessage`,
//! `pfnEngineFprintf`) are left untouched.

use std::ffi::{c_char, c_float, c_int, c_void, CString};
use std::ptr;
use std::sync::{LazyLock, OnceLock};

use goldhook_sdk::{cvar_t, edict_t, EngineFuncs};
use paste::paste;

use super::{owned_c_string, trigger_vhooks};
use crate::hooks::{abort_on_panic, hook_chains, HookRegistry};

/// Conversion between a hook argument and what crosses the C boundary
trait ForeignArg {
    type Raw: Copy;

    /// # Safety
    /// `raw` must be valid for the engine function it was passed to.
    unsafe fn from_raw(raw: Self::Raw) -> Self;

    fn as_raw(&self) -> Self::Raw;
}

macro_rules! plain_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ForeignArg for $ty {
                type Raw = $ty;

                unsafe fn from_raw(raw: $ty) -> Self {
                    raw
                }

                fn as_raw(&self) -> $ty {
                    *self
                }
            }
        )*
    };
}

plain_arg!(
    c_int,
    c_float,
    *mut edict_t,
    *const edict_t,
    *mut c_char,
    *mut *mut c_char,
    *mut cvar_t,
);

impl ForeignArg for CString {
    type Raw = *const c_char;

    unsafe fn from_raw(raw: *const c_char) -> Self {
        owned_c_string(raw)
    }

    fn as_raw(&self) -> *const c_char {
        self.as_ptr()
    }
}

/// Null stays null
impl ForeignArg for Option<CString> {
    type Raw = *const c_char;

    unsafe fn from_raw(raw: *const c_char) -> Self {
        (!raw.is_null()).then(|| owned_c_string(raw))
    }

    fn as_raw(&self) -> *const c_char {
        self.as_ref().map_or(ptr::null(), |s| s.as_ptr())
    }
}

/// A vector passed as `const float *`, null when absent
impl ForeignArg for Option<[f32; 3]> {
    type Raw = *const c_float;

    unsafe fn from_raw(raw: *const c_float) -> Self {
        (!raw.is_null()).then(|| ptr::read(raw.cast::<[f32; 3]>()))
    }

    fn as_raw(&self) -> *const c_float {
        self.as_ref().map_or(ptr::null(), |v| v.as_ptr())
    }
}

static ENGINE_HOOKS: LazyLock<EngineHooks> = LazyLock::new(EngineHooks::new);
static ORIGINALS: OnceLock<EngineFuncs> = OnceLock::new();

pub fn engine_hooks() -> &'static EngineHooks {
    &ENGINE_HOOKS
}

fn originals() -> Option<&'static EngineFuncs> {
    ORIGINALS.get()
}

macro_rules! engine_hooks {
    (@args $args:ident) => { () };
    (@args $args:ident $($arg:ident)+) => { $args };

    (@struct $pfn:ident $args:ident) => {};
    (@struct $pfn:ident $args:ident $($arg:ident: $ty:ty),+) => {
        #[doc = concat!("Args of `", stringify!($pfn), "`")]
        pub struct $args {
            $(pub $arg: $ty,)+
        }
    };

    (@value $args:ident) => { () };
    (@value $args:ident $($arg:ident)+) => {
        $args {
            $($arg: unsafe { ForeignArg::from_raw($arg) },)+
        }
    };

    ($(
        $(#[$meta:meta])*
        $name:ident => $pfn:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty = $default:expr
            $(, before $before:path)?;
    )*) => {
        paste! {
            $(engine_hooks!(@struct $pfn [<$name:camel Args>] $($arg: $ty),*);)*

            /// Hook chains of the engine table handed to the game library
            pub struct EngineHooks {
                $(
                    $(#[$meta])*
                    pub $name: HookRegistry<engine_hooks!(@args [<$name:camel Args>] $($arg)*), $ret>,
                )*
            }

            impl EngineHooks {
                pub fn new() -> Self {
                    Self {
                        $($name: HookRegistry::new(stringify!([<$name:camel>])),)*
                    }
                }
            }

            hook_chains!(EngineHooks { $($name),* });

            $(
                unsafe extern "C" fn [<engine_ $name>]($($arg: <$ty as ForeignArg>::Raw),*) -> $ret {
                    abort_on_panic(|| {
                        $($before();)?
                        let original = originals().and_then(|f| f.$pfn);
                        let mut args = engine_hooks!(@value [<$name:camel Args>] $($arg)*);
                        engine_hooks().$name.call_chain(
                            |_args| match original {
                                Some(f) => unsafe { f($(ForeignArg::as_raw(&_args.$arg)),*) },
                                None => $default,
                            },
                            &mut args,
                        )
                    })
                }
            )*

            /// Copy of `funcs` whose hooked entries dispatch through [`engine_hooks`]
            ///
            /// The first table passed in is kept as the originals.
            pub(super) fn interpose_engine(funcs: &EngineFuncs) -> EngineFuncs {
                let originals = ORIGINALS.get_or_init(|| *funcs);
                EngineFuncs {
                    $($pfn: Some([<engine_ $name>]),)*
                    ..*originals
                }
            }
        }
    };
}

impl Default for EngineHooks {
    fn default() -> Self {
        Self::new()
    }
}

engine_hooks! {
    precache_model => pfn_precache_model(name: CString) -> c_int = 0;
    precache_sound => pfn_precache_sound(name: CString) -> c_int = 0;
    precache_generic => pfn_precache_generic(name: CString) -> c_int = 0;
    model_index => pfn_model_index(name: CString) -> c_int = 0;
    set_model => pfn_set_model(edict: *mut edict_t, model: CString) -> () = ();
    /// `landmark` is None for a plain map change
    change_level => pfn_change_level(map: CString, landmark: Option<CString>) -> () = ();
    server_command => pfn_server_command(command: CString) -> () = ();
    server_execute => pfn_server_execute() -> () = ();
    create_entity => pfn_create_entity() -> *mut edict_t = ptr::null_mut();
    remove_entity => pfn_remove_entity(edict: *mut edict_t) -> () = ();

    message_begin => pfn_message_begin(
        dest: c_int,
        msg_type: c_int,
        origin: Option<[f32; 3]>,
        edict: *mut edict_t,
    ) -> () = ();
    message_end => pfn_message_end() -> () = ();
    write_byte => pfn_write_byte(value: c_int) -> () = ();
    write_char => pfn_write_char(value: c_int) -> () = ();
    write_short => pfn_write_short(value: c_int) -> () = ();
    write_long => pfn_write_long(value: c_int) -> () = ();
    write_angle => pfn_write_angle(value: c_float) -> () = ();
    write_coord => pfn_write_coord(value: c_float) -> () = ();
    write_string => pfn_write_string(value: CString) -> () = ();
    write_entity => pfn_write_entity(value: c_int) -> () = ();
    /// Returns the message id
    reg_user_msg => pfn_reg_user_msg(name: CString, size: c_int) -> c_int = 0;

    cvar_register => pfn_cvar_register(cvar: *mut cvar_t) -> () = ();
    cvar_get_pointer => pfn_cvar_get_pointer(name: CString) -> *mut cvar_t = ptr::null_mut();
    cvar_get_float => pfn_cvar_get_float(name: CString) -> c_float = 0.0;
    cvar_get_string => pfn_cvar_get_string(name: CString) -> *const c_char = ptr::null();
    cvar_set_float => pfn_cvar_set_float(name: CString, value: c_float) -> () = ();
    cvar_set_string => pfn_cvar_set_string(name: CString, value: CString) -> () = ();

    /// Runs the virtual hooks handler before the first allocation
    alloc_ent_private_data => pfn_alloc_ent_private_data(edict: *mut edict_t, size: c_int)
        -> *mut c_void = ptr::null_mut(), before trigger_vhooks;
    alloc_string => pfn_alloc_string(value: CString) -> c_int = 0;
    string_from_offset => pfn_sz_from_index(offset: c_int) -> *const c_char = ptr::null();
    ent_offset_of_edict => pfn_ent_offset_of_pent(edict: *const edict_t) -> c_int = 0;
    edict_of_ent_offset => pfn_pent_of_ent_offset(offset: c_int) -> *mut edict_t = ptr::null_mut();
    index_of_edict => pfn_index_of_edict(edict: *const edict_t) -> c_int = 0;
    edict_of_index => pfn_pent_of_ent_index(index: c_int) -> *mut edict_t = ptr::null_mut();

    client_printf => pfn_client_printf(edict: *mut edict_t, print_type: c_int, message: CString)
        -> () = ();
    server_print => pfn_server_print(message: CString) -> () = ();
    cmd_args => pfn_cmd_args() -> *const c_char = ptr::null();
    cmd_argv => pfn_cmd_argv(index: c_int) -> *const c_char = ptr::null();
    cmd_argc => pfn_cmd_argc() -> c_int = 0;
    get_game_dir => pfn_get_game_dir(buffer: *mut c_char) -> () = ();
    info_key_value => pfn_info_key_value(buffer: *mut c_char, key: CString) -> *mut c_char
        = ptr::null_mut();
    random_long => pfn_random_long(low: c_int, high: c_int) -> c_int = 0;
    random_float => pfn_random_float(low: c_float, high: c_float) -> c_float = 0.0;
    get_player_userid => pfn_get_player_userid(edict: *mut edict_t) -> c_int = 0;
    get_player_auth_id => pfn_get_player_auth_id(edict: *mut edict_t) -> *const c_char = ptr::null();
    is_dedicated_server => pfn_is_dedicated_server() -> c_int = 0;
    check_parm => pfn_check_parm(parm: CString, next: *mut *mut c_char) -> c_int = 0;
    query_client_cvar_value => pfn_query_client_cvar_value(edict: *const edict_t, cvar: CString)
        -> () = ();
    query_client_cvar_value2 => pfn_query_client_cvar_value2(
        edict: *const edict_t,
        cvar: CString,
        request_id: c_int,
    ) -> () = ();
}
