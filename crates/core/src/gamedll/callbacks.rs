//! Entries of the tables handed to the engine and the game library

use std::ffi::{c_char, c_int};

use goldhook_engine::try_engine;
use goldhook_sdk::{edict_t, DllFunctions, NewDllFunctions};

use super::{
    game_library, hooks, owned_c_string, run_shutdown_handler, write_c_string, ClientConnectArgs,
    ClientUserInfoChangedArgs, CvarValue2Args, CvarValueArgs, EdictArgs, GameLibrary,
    ServerActivateArgs,
};
use crate::entities;
use crate::hooks::{abort_on_panic, HookRegistry};

/// Size of the reject reason buffer the engine passes to ClientConnect
const REJECT_REASON_LEN: usize = 128;

type ClientConnectFn =
    unsafe extern "C" fn(*mut edict_t, *const c_char, *const c_char, *mut c_char) -> c_int;
type CvarValueFn = unsafe extern "C" fn(*const edict_t, *const c_char);
type CvarValue2Fn = unsafe extern "C" fn(*const edict_t, c_int, *const c_char, *const c_char);

pub(super) fn interpose_functions(functions: &DllFunctions) -> DllFunctions {
    DllFunctions {
        pfn_game_init: Some(game_init),
        pfn_spawn: Some(spawn),
        pfn_client_connect: Some(client_connect),
        pfn_client_disconnect: Some(client_disconnect),
        pfn_client_put_in_server: Some(client_put_in_server),
        pfn_client_command: Some(client_command),
        pfn_client_user_info_changed: Some(client_user_info_changed),
        pfn_server_activate: Some(server_activate),
        pfn_server_deactivate: Some(server_deactivate),
        pfn_start_frame: Some(start_frame),
        ..*functions
    }
}

pub(super) fn interpose_new_functions(functions: &NewDllFunctions) -> NewDllFunctions {
    NewDllFunctions {
        pfn_game_shutdown: Some(game_shutdown),
        pfn_cvar_value: Some(cvar_value),
        pfn_cvar_value2: Some(cvar_value2),
        ..*functions
    }
}

fn originals() -> Option<&'static DllFunctions> {
    game_library().map(GameLibrary::functions)
}

fn new_originals() -> Option<&'static NewDllFunctions> {
    game_library().and_then(GameLibrary::new_functions)
}

unsafe extern "C" fn game_init() {
    abort_on_panic(|| {
        let original = originals().and_then(|f| f.pfn_game_init);
        hooks().game_init.call_chain(
            |_| {
                if let Some(f) = original {
                    unsafe { f() }
                }
            },
            &mut (),
        )
    })
}

unsafe extern "C" fn spawn(edict: *mut edict_t) -> c_int {
    abort_on_panic(|| {
        let original = originals().and_then(|f| f.pfn_spawn);
        let mut args = EdictArgs { edict };
        hooks().spawn.call_chain(
            |args| original.map_or(0, |f| unsafe { f(args.edict) }),
            &mut args,
        )
    })
}

unsafe extern "C" fn client_connect(
    edict: *mut edict_t,
    name: *const c_char,
    address: *const c_char,
    reject_reason: *mut c_char,
) -> c_int {
    abort_on_panic(|| unsafe {
        let original = originals().and_then(|f| f.pfn_client_connect);
        dispatch_client_connect(&hooks().client_connect, original, edict, name, address, reject_reason)
    })
}

unsafe fn dispatch_client_connect(
    registry: &HookRegistry<ClientConnectArgs, bool>,
    original: Option<ClientConnectFn>,
    edict: *mut edict_t,
    name: *const c_char,
    address: *const c_char,
    reject_reason: *mut c_char,
) -> c_int {
    let mut args = ClientConnectArgs {
        edict,
        name: owned_c_string(name),
        address: owned_c_string(address),
        reject_reason: Default::default(),
    };

    let allowed = registry.call_chain(
        |args| {
            let Some(f) = original else {
                return true;
            };
            let mut buffer = [0 as c_char; REJECT_REASON_LEN];
            let allowed = unsafe {
                f(args.edict, args.name.as_ptr(), args.address.as_ptr(), buffer.as_mut_ptr())
            } != 0;
            args.reject_reason = unsafe { owned_c_string(buffer.as_ptr()) };
            allowed
        },
        &mut args,
    );

    if !allowed {
        write_c_string(reject_reason, &args.reject_reason, REJECT_REASON_LEN);
    }
    c_int::from(allowed)
}

unsafe extern "C" fn client_put_in_server(edict: *mut edict_t) {
    abort_on_panic(|| {
        let original = originals().and_then(|f| f.pfn_client_put_in_server);
        hooks().client_put_in_server.call_chain(
            |args| {
                if let Some(f) = original {
                    unsafe { f(args.edict) }
                }
            },
            &mut EdictArgs { edict },
        )
    })
}

unsafe extern "C" fn client_command(edict: *mut edict_t) {
    abort_on_panic(|| {
        let original = originals().and_then(|f| f.pfn_client_command);
        hooks().client_command.call_chain(
            |args| {
                if let Some(f) = original {
                    unsafe { f(args.edict) }
                }
            },
            &mut EdictArgs { edict },
        )
    })
}

unsafe extern "C" fn client_user_info_changed(edict: *mut edict_t, info_buffer: *mut c_char) {
    abort_on_panic(|| {
        let original = originals().and_then(|f| f.pfn_client_user_info_changed);
        hooks().client_user_info_changed.call_chain(
            |args| {
                if let Some(f) = original {
                    unsafe { f(args.edict, args.info_buffer) }
                }
            },
            &mut ClientUserInfoChangedArgs { edict, info_buffer },
        )
    })
}

unsafe extern "C" fn client_disconnect(edict: *mut edict_t) {
    abort_on_panic(|| {
        let original = originals().and_then(|f| f.pfn_client_disconnect);
        hooks().client_disconnect.call_chain(
            |args| {
                if let Some(f) = original {
                    unsafe { f(args.edict) }
                }
            },
            &mut EdictArgs { edict },
        )
    })
}

unsafe extern "C" fn server_activate(edict_list: *mut edict_t, edict_count: c_int, client_max: c_int) {
    abort_on_panic(|| {
        if let Ok(engine) = try_engine() {
            engine.set_server_state(edict_list, client_max);
        }
        entities::holder().set_max_clients(u32::try_from(client_max).unwrap_or(0));

        let original = originals().and_then(|f| f.pfn_server_activate);
        let mut args = ServerActivateArgs {
            edict_list,
            edict_count: u32::try_from(edict_count).unwrap_or(0),
            client_max: u32::try_from(client_max).unwrap_or(0),
        };
        hooks().server_activate.call_chain(
            |args| {
                if let Some(f) = original {
                    unsafe { f(args.edict_list, args.edict_count as c_int, args.client_max as c_int) }
                }
            },
            &mut args,
        )
    })
}

unsafe extern "C" fn server_deactivate() {
    abort_on_panic(|| {
        let original = originals().and_then(|f| f.pfn_server_deactivate);
        hooks().server_deactivate.call_chain(
            |_| {
                if let Some(f) = original {
                    unsafe { f() }
                }
            },
            &mut (),
        );

        entities::holder().clear();
        if let Ok(engine) = try_engine() {
            engine.clear_server_state();
        }
    })
}

unsafe extern "C" fn start_frame() {
    abort_on_panic(|| {
        let original = originals().and_then(|f| f.pfn_start_frame);
        hooks().start_frame.call_chain(
            |_| {
                if let Some(f) = original {
                    unsafe { f() }
                }
            },
            &mut (),
        )
    })
}

unsafe extern "C" fn game_shutdown() {
    abort_on_panic(|| {
        let original = new_originals().and_then(|f| f.pfn_game_shutdown);
        hooks().game_shutdown.call_chain(
            |_| {
                if let Some(f) = original {
                    unsafe { f() }
                }
            },
            &mut (),
        );
        run_shutdown_handler();
    })
}

unsafe extern "C" fn cvar_value(edict: *const edict_t, value: *const c_char) {
    abort_on_panic(|| unsafe {
        let original = new_originals().and_then(|f| f.pfn_cvar_value);
        dispatch_cvar_value(&hooks().cvar_value, original, edict, value)
    })
}

unsafe fn dispatch_cvar_value(
    registry: &HookRegistry<CvarValueArgs, ()>,
    original: Option<CvarValueFn>,
    edict: *const edict_t,
    value: *const c_char,
) {
    let mut args = CvarValueArgs {
        edict,
        value: owned_c_string(value),
    };
    registry.call_chain(
        |args| {
            if let Some(f) = original {
                unsafe { f(args.edict, args.value.as_ptr()) }
            }
        },
        &mut args,
    )
}

unsafe extern "C" fn cvar_value2(
    edict: *const edict_t,
    request_id: c_int,
    cvar: *const c_char,
    value: *const c_char,
) {
    abort_on_panic(|| unsafe {
        let original = new_originals().and_then(|f| f.pfn_cvar_value2);
        dispatch_cvar_value2(&hooks().cvar_value2, original, edict, request_id, cvar, value)
    })
}

unsafe fn dispatch_cvar_value2(
    registry: &HookRegistry<CvarValue2Args, ()>,
    original: Option<CvarValue2Fn>,
    edict: *const edict_t,
    request_id: c_int,
    cvar: *const c_char,
    value: *const c_char,
) {
    let mut args = CvarValue2Args {
        edict,
        request_id,
        cvar: owned_c_string(cvar),
        value: owned_c_string(value),
    };
    registry.call_chain(
        |args| {
            if let Some(f) = original {
                unsafe { f(args.edict, args.request_id, args.cvar.as_ptr(), args.value.as_ptr()) }
            }
        },
        &mut args,
    )
}

#[cfg(test)]
mod tests {
    use std::ffi::{CStr, CString};

    use parking_lot::Mutex;

    use super::*;
    use crate::hooks::HookPriority;

    const CP1251_NAME: [u8; 5] = [0xC8, 0xE3, 0xF0, 0xEE, 0xEA];

    static SEEN: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

    unsafe extern "C" fn record_connect(
        _: *mut edict_t,
        name: *const c_char,
        address: *const c_char,
        reject: *mut c_char,
    ) -> c_int {
        let mut seen = SEEN.lock();
        seen.push(CStr::from_ptr(name).to_bytes().to_vec());
        seen.push(CStr::from_ptr(address).to_bytes().to_vec());
        write_c_string(reject, c"\xD0\xE5\xE9\xE4", REJECT_REASON_LEN);
        0
    }

    unsafe extern "C" fn record_cvar_value2(
        _: *const edict_t,
        _: c_int,
        cvar: *const c_char,
        value: *const c_char,
    ) {
        let mut seen = SEEN.lock();
        seen.push(CStr::from_ptr(cvar).to_bytes().to_vec());
        seen.push(CStr::from_ptr(value).to_bytes().to_vec());
    }

    #[test]
    fn test_interpose_keeps_other_entries() {
        unsafe extern "C" fn think(_: *mut edict_t) {}

        let functions = DllFunctions {
            pfn_think: Some(think),
            ..Default::default()
        };
        let hooked = interpose_functions(&functions);

        assert_eq!(hooked.pfn_think.map(|f| f as usize), Some(think as usize));
        assert_eq!(hooked.pfn_spawn.map(|f| f as usize), Some(spawn as usize));
        assert!(hooked.pfn_touch.is_none());

        let hooked_new = interpose_new_functions(&NewDllFunctions::default());
        assert!(hooked_new.pfn_game_shutdown.is_some());
        assert!(hooked_new.pfn_should_collide.is_none());
    }

    // One test owns SEEN so parallel tests do not interleave records
    #[test]
    fn test_non_utf8_strings_pass_through_unchanged() {
        SEEN.lock().clear();
        let registry = HookRegistry::<ClientConnectArgs, bool>::new("ClientConnect");
        let hook_saw = std::sync::Arc::new(Mutex::new(Vec::new()));
        let record = std::sync::Arc::clone(&hook_saw);
        registry.register_hook(
            move |hook, args| {
                record.lock().extend_from_slice(args.name.as_bytes());
                hook.call_next(args)
            },
            HookPriority::Default,
        );

        let name = CString::new(CP1251_NAME.to_vec()).unwrap();
        let address = c"10.0.0.1:27005";
        let mut reject = [0 as c_char; REJECT_REASON_LEN];
        let allowed = unsafe {
            dispatch_client_connect(
                &registry,
                Some(record_connect),
                std::ptr::null_mut(),
                name.as_ptr(),
                address.as_ptr(),
                reject.as_mut_ptr(),
            )
        };

        assert_eq!(allowed, 0);
        assert_eq!(*hook_saw.lock(), CP1251_NAME);
        let reject = unsafe { CStr::from_ptr(reject.as_ptr()) };
        assert_eq!(reject.to_bytes(), &[0xD0, 0xE5, 0xE9, 0xE4]);

        let cvar_registry = HookRegistry::<CvarValue2Args, ()>::new("CvarValue2");
        let value = CString::new(CP1251_NAME.to_vec()).unwrap();
        unsafe {
            dispatch_cvar_value2(
                &cvar_registry,
                Some(record_cvar_value2),
                std::ptr::null(),
                7,
                c"name".as_ptr(),
                value.as_ptr(),
            )
        };

        let seen = SEEN.lock();
        assert_eq!(seen[0], CP1251_NAME);
        assert_eq!(seen[1], b"10.0.0.1:27005");
        assert_eq!(seen[2], b"name");
        assert_eq!(seen[3], CP1251_NAME);
    }

    #[test]
    fn test_hook_rewrites_cvar_value() {
        static REWRITTEN: Mutex<Vec<u8>> = Mutex::new(Vec::new());

        unsafe extern "C" fn record_value(_: *const edict_t, value: *const c_char) {
            *REWRITTEN.lock() = CStr::from_ptr(value).to_bytes().to_vec();
        }

        let registry = HookRegistry::<CvarValueArgs, ()>::new("CvarValue");
        registry.register_hook(
            |hook, args| {
                args.value = CString::new(vec![0xFF, b'1']).unwrap();
                hook.call_next(args)
            },
            HookPriority::Default,
        );

        unsafe { dispatch_cvar_value(&registry, Some(record_value), std::ptr::null(), c"0".as_ptr()) };
        assert_eq!(*REWRITTEN.lock(), [0xFF, b'1']);
    }
}
