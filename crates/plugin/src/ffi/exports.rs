//! Game library exports
//!
//! The engine calls `GiveFnptrsToDll` first, then asks for the function
//! tables. Both tables come from the real game library with our chain
//! callbacks swapped in.

#![allow(non_snake_case)]

use std::ffi::{c_int, c_void, CString};

use goldhook_core::gamedll::game_library;
use goldhook_core::hooks::abort_on_panic;
use goldhook_sdk::versions::{INTERFACE_VERSION, NEW_DLL_FUNCTIONS_VERSION};
use goldhook_sdk::{DllFunctions, EngineFuncs, GlobalVars, NewDllFunctions};

use crate::startup::startup;

/// Engine handshake, where everything starts
///
/// # Safety
/// Called by the engine with its function table and globals.
#[no_mangle]
pub unsafe extern "system" fn GiveFnptrsToDll(funcs: *mut EngineFuncs, globals: *mut GlobalVars) {
    abort_on_panic(|| {
        let own_address = GiveFnptrsToDll as *const c_void;
        if let Err(e) = unsafe { startup(funcs, globals, own_address) } {
            unsafe { fatal(funcs, &e.to_string()) };
        }
    })
}

/// # Safety
/// `functions` and `version` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn GetEntityAPI2(functions: *mut DllFunctions, version: *mut c_int) -> c_int {
    abort_on_panic(|| {
        if functions.is_null() || version.is_null() {
            return 0;
        }
        if !negotiate(unsafe { &mut *version }, INTERFACE_VERSION, "EntityAPI2") {
            return 0;
        }
        match game_library() {
            Some(library) => {
                unsafe { *functions = *library.hooked_functions() };
                1
            }
            None => 0,
        }
    })
}

/// Older engines ask for the table without a writable version
///
/// # Safety
/// `functions` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn GetEntityAPI(functions: *mut DllFunctions, version: c_int) -> c_int {
    let mut version = version;
    GetEntityAPI2(functions, &mut version)
}

/// # Safety
/// `functions` and `version` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn GetNewDLLFunctions(
    functions: *mut NewDllFunctions,
    version: *mut c_int,
) -> c_int {
    abort_on_panic(|| {
        if functions.is_null() || version.is_null() {
            return 0;
        }
        if !negotiate(unsafe { &mut *version }, NEW_DLL_FUNCTIONS_VERSION, "New DLL API") {
            return 0;
        }
        match game_library() {
            Some(library) => {
                unsafe { *functions = *library.hooked_new_functions() };
                1
            }
            None => 0,
        }
    })
}

/// Compare the engine's version with ours, writing ours back on mismatch
fn negotiate(version: &mut c_int, expected: c_int, interface: &str) -> bool {
    if *version == expected {
        return true;
    }
    let outdated = if *version > expected { "goldhook" } else { "engine" };
    tracing::error!(
        "{} functions not compatible. {} outdated. Expected {} got {}",
        interface,
        outdated,
        expected,
        *version
    );
    *version = expected;
    false
}

/// Report a startup failure and exit, the engine has no way to handle it
unsafe fn fatal(funcs: *const EngineFuncs, message: &str) -> ! {
    tracing::error!("goldhook failed to start: {}", message);
    let print = funcs.as_ref().and_then(|f| f.pfn_server_print);
    if let (Some(print), Ok(line)) = (print, CString::new(format!("[goldhook] {}\n", message))) {
        print(line.as_ptr());
    }
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_writes_back_expected() {
        let mut version = INTERFACE_VERSION;
        assert!(negotiate(&mut version, INTERFACE_VERSION, "EntityAPI2"));

        let mut version = INTERFACE_VERSION - 1;
        assert!(!negotiate(&mut version, INTERFACE_VERSION, "EntityAPI2"));
        assert_eq!(version, INTERFACE_VERSION);
    }

    #[test]
    fn test_get_entity_api2_rejects() {
        let mut table = DllFunctions::default();

        let mut version = INTERFACE_VERSION + 1;
        assert_eq!(unsafe { GetEntityAPI2(&mut table, &mut version) }, 0);
        assert_eq!(version, INTERFACE_VERSION);

        assert_eq!(unsafe { GetEntityAPI2(std::ptr::null_mut(), &mut version) }, 0);

        // No game library in tests
        let mut version = INTERFACE_VERSION;
        assert_eq!(unsafe { GetEntityAPI2(&mut table, &mut version) }, 0);
    }

    #[test]
    fn test_get_new_dll_functions_rejects() {
        let mut table = NewDllFunctions::default();
        let mut version = 0;
        assert_eq!(unsafe { GetNewDLLFunctions(&mut table, &mut version) }, 0);
        assert_eq!(version, NEW_DLL_FUNCTIONS_VERSION);
    }
}
