//! Game library interposition
//!
//! goldhook sits between the engine and the real game library. The engine
//! loads goldhook as its game library; goldhook loads the real one and hands
//! the engine copies of its function tables in which selected entries are
//! replaced by hook chain callbacks.
//!
//! The engine table handed to the game library is interposed as well. Its
//! entries dispatch through [`EngineHooks`], and the first
//! `pfnPvAllocEntPrivateData` call installs virtual hooks once game objects
//! become constructible.
//!
//! Strings crossing the boundary are carried as [`CString`] and keep their
//! bytes as the engine sent them. Player names are not always UTF-8.

mod callbacks;
mod engine_funcs;
mod library;

use std::ffi::{c_char, CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, OnceLock};

use goldhook_sdk::edict_t;

use crate::hooks::{hook_chains, HookRegistry};

pub use engine_funcs::*;
pub use library::{
    check_interface_version, default_library_path, GameLibrary, GameLibraryError, InterfaceSide,
};

/// Args of callbacks taking a single edict
pub struct EdictArgs {
    pub edict: *mut edict_t,
}

pub struct ClientConnectArgs {
    pub edict: *mut edict_t,
    pub name: CString,
    pub address: CString,
    /// Message shown to the client when the connection is refused
    pub reject_reason: CString,
}

pub struct ClientUserInfoChangedArgs {
    pub edict: *mut edict_t,
    pub info_buffer: *mut c_char,
}

pub struct ServerActivateArgs {
    pub edict_list: *mut edict_t,
    pub edict_count: u32,
    pub client_max: u32,
}

pub struct CvarValueArgs {
    pub edict: *const edict_t,
    pub value: CString,
}

pub struct CvarValue2Args {
    pub edict: *const edict_t,
    pub request_id: i32,
    pub cvar: CString,
    pub value: CString,
}

/// Hook chains of the game library exports
pub struct GameDllHooks {
    pub game_init: HookRegistry<(), ()>,
    pub spawn: HookRegistry<EdictArgs, i32>,
    pub client_connect: HookRegistry<ClientConnectArgs, bool>,
    pub client_put_in_server: HookRegistry<EdictArgs, ()>,
    pub client_command: HookRegistry<EdictArgs, ()>,
    pub client_user_info_changed: HookRegistry<ClientUserInfoChangedArgs, ()>,
    pub client_disconnect: HookRegistry<EdictArgs, ()>,
    pub server_activate: HookRegistry<ServerActivateArgs, ()>,
    pub server_deactivate: HookRegistry<(), ()>,
    pub start_frame: HookRegistry<(), ()>,
    pub game_shutdown: HookRegistry<(), ()>,
    pub cvar_value: HookRegistry<CvarValueArgs, ()>,
    pub cvar_value2: HookRegistry<CvarValue2Args, ()>,
}

impl GameDllHooks {
    pub fn new() -> Self {
        Self {
            game_init: HookRegistry::new("GameInit"),
            spawn: HookRegistry::new("Spawn"),
            client_connect: HookRegistry::new("ClientConnect"),
            client_put_in_server: HookRegistry::new("ClientPutInServer"),
            client_command: HookRegistry::new("ClientCommand"),
            client_user_info_changed: HookRegistry::new("ClientUserInfoChanged"),
            client_disconnect: HookRegistry::new("ClientDisconnect"),
            server_activate: HookRegistry::new("ServerActivate"),
            server_deactivate: HookRegistry::new("ServerDeactivate"),
            start_frame: HookRegistry::new("StartFrame"),
            game_shutdown: HookRegistry::new("GameShutdown"),
            cvar_value: HookRegistry::new("CvarValue"),
            cvar_value2: HookRegistry::new("CvarValue2"),
        }
    }
}

impl Default for GameDllHooks {
    fn default() -> Self {
        Self::new()
    }
}

hook_chains!(GameDllHooks {
    game_init,
    spawn,
    client_connect,
    client_put_in_server,
    client_command,
    client_user_info_changed,
    client_disconnect,
    server_activate,
    server_deactivate,
    start_frame,
    game_shutdown,
    cvar_value,
    cvar_value2,
});

static HOOKS: LazyLock<GameDllHooks> = LazyLock::new(GameDllHooks::new);
static LIBRARY: OnceLock<GameLibrary> = OnceLock::new();

type Handler = Box<dyn Fn() + Send + Sync>;

static VHOOKS_HANDLER: OnceLock<Handler> = OnceLock::new();
static VHOOKS_INSTALLED: AtomicBool = AtomicBool::new(false);
static SHUTDOWN_HANDLER: OnceLock<Handler> = OnceLock::new();

pub fn hooks() -> &'static GameDllHooks {
    &HOOKS
}

/// Store the loaded game library for the process lifetime
pub fn init_game_library(library: GameLibrary) -> Result<&'static GameLibrary, GameLibraryError> {
    LIBRARY
        .set(library)
        .map_err(|_| GameLibraryError::AlreadyLoaded)?;
    LIBRARY.get().ok_or(GameLibraryError::AlreadyLoaded)
}

pub fn game_library() -> Option<&'static GameLibrary> {
    LIBRARY.get()
}

/// Set what runs on the first entity private data allocation
pub fn set_vhooks_handler<F>(handler: F) -> bool
where
    F: Fn() + Send + Sync + 'static,
{
    VHOOKS_HANDLER.set(Box::new(handler)).is_ok()
}

/// Run the virtual hooks handler unless it already ran
///
/// Returns true if this call ran it.
pub(crate) fn trigger_vhooks() -> bool {
    if VHOOKS_INSTALLED.swap(true, Ordering::AcqRel) {
        return false;
    }
    match VHOOKS_HANDLER.get() {
        Some(handler) => handler(),
        None => tracing::warn!("Entity private data allocated before virtual hooks were set up"),
    }
    true
}

pub fn vhooks_installed() -> bool {
    VHOOKS_INSTALLED.load(Ordering::Acquire)
}

/// Set what runs once `GameShutdown` went through its hook chain
///
/// The chain has finished dispatching by then, so the handler may unload
/// plugins whose hooks were part of it.
pub fn set_shutdown_handler<F>(handler: F) -> bool
where
    F: Fn() + Send + Sync + 'static,
{
    SHUTDOWN_HANDLER.set(Box::new(handler)).is_ok()
}

fn run_shutdown_handler() {
    if let Some(handler) = SHUTDOWN_HANDLER.get() {
        handler();
    }
}

/// Byte exact copy of a C string, empty for null
///
/// # Safety
/// `ptr` must be null or point to a nul terminated string.
pub(crate) unsafe fn owned_c_string(ptr: *const c_char) -> CString {
    if ptr.is_null() {
        return CString::default();
    }
    CStr::from_ptr(ptr).to_owned()
}

/// Copy `value` into a C buffer of `len` bytes, truncating
///
/// # Safety
/// `buffer` must be null or valid for `len` bytes.
pub(crate) unsafe fn write_c_string(buffer: *mut c_char, value: &CStr, len: usize) {
    if buffer.is_null() || len == 0 {
        return;
    }
    let bytes = value.to_bytes();
    let count = bytes.len().min(len - 1);
    std::ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), buffer, count);
    *buffer.add(count) = 0;
}
