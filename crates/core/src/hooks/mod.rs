//! Hook system
//!
//! - [`chain`]: priority ordered hook chains with call-next / call-original dispatch
//! - [`vtable`]: virtual table slot access and patching
//! - [`binding`]: what a chain patches in the game library once it has hooks
//!
//! Trampolines that the game library calls are generated with
//! [`member_trampoline!`]. They convert the foreign `this` convention and abort
//! the process if a hook panics.

pub mod binding;
pub mod chain;
pub mod vtable;

use std::panic::{catch_unwind, AssertUnwindSafe};

use goldhook_engine::EngineError;

use crate::gamedata::GamedataError;

pub use binding::{
    ChainBinding, HookchainBinding, HookchainSlots, VTableBinding, REGAMEDLL_HOOK_PRIORITY,
};
pub use chain::{Hook, HookChains, HookKey, HookPriority, HookRegistry, HookState};
pub(crate) use chain::hook_chains;

/// Error type for hook installation
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Memory protection failed: {0}")]
    MemoryProtection(String),

    #[error("Invalid address: {0:#x}")]
    InvalidAddress(usize),

    #[error("Hook already installed")]
    AlreadyInstalled,

    #[error("Hook not installed")]
    NotInstalled,

    #[error(transparent)]
    Gamedata(#[from] GamedataError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Run `f`, logging and aborting the process if it panics
///
/// Used at every point where the game library calls back into us.
pub fn abort_on_panic<R, F: FnOnce() -> R>(f: F) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(rv) => rv,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Panic in hook, aborting: {}", message);
            std::process::abort()
        }
    }
}

/// Type of a virtual member function of the game library
///
/// `this` travels in `ecx` on 32-bit Windows, which `fastcall` reaches through
/// a dummy `edx` argument. Everywhere else it is the first stack argument.
#[cfg(all(windows, target_arch = "x86"))]
macro_rules! member_fn {
    (($($arg:ty),* $(,)?) -> $ret:ty) => {
        unsafe extern "fastcall" fn(*mut ::std::ffi::c_void, usize $(, $arg)*) -> $ret
    };
}

#[cfg(not(all(windows, target_arch = "x86")))]
macro_rules! member_fn {
    (($($arg:ty),* $(,)?) -> $ret:ty) => {
        unsafe extern "C" fn(*mut ::std::ffi::c_void $(, $arg)*) -> $ret
    };
}

/// Call a function of type [`member_fn!`]
#[cfg(all(windows, target_arch = "x86"))]
macro_rules! call_member {
    ($f:expr, $this:expr $(, $arg:expr)* $(,)?) => {
        ($f)($this, 0 $(, $arg)*)
    };
}

#[cfg(not(all(windows, target_arch = "x86")))]
macro_rules! call_member {
    ($f:expr, $this:expr $(, $arg:expr)* $(,)?) => {
        ($f)($this $(, $arg)*)
    };
}

/// Define a function that can be written into a virtual table slot
#[cfg(all(windows, target_arch = "x86"))]
macro_rules! member_trampoline {
    ($vis:vis fn $name:ident($this:ident $(, $arg:ident: $ty:ty)* $(,)?) -> $ret:ty $body:block) => {
        $vis unsafe extern "fastcall" fn $name(
            $this: *mut ::std::ffi::c_void,
            _edx: usize
            $(, $arg: $ty)*
        ) -> $ret {
            $crate::hooks::abort_on_panic(move || $body)
        }
    };
}

#[cfg(not(all(windows, target_arch = "x86")))]
macro_rules! member_trampoline {
    ($vis:vis fn $name:ident($this:ident $(, $arg:ident: $ty:ty)* $(,)?) -> $ret:ty $body:block) => {
        $vis unsafe extern "C" fn $name($this: *mut ::std::ffi::c_void $(, $arg: $ty)*) -> $ret {
            $crate::hooks::abort_on_panic(move || $body)
        }
    };
}

pub(crate) use {call_member, member_fn, member_trampoline};
