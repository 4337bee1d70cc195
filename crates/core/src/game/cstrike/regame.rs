//! ReGameDLL API object
//!
//! `IReGameApi` is a C++ interface, so every call goes through its vtable.
//! Slot indices come from gamedata because the virtual destructor takes a
//! different number of slots per platform.

use std::ffi::{c_int, c_void};
use std::ptr::NonNull;

use goldhook_sdk::versions::{REGAMEDLL_API_VERSION_MAJOR, REGAMEDLL_API_VERSION_MINOR};

use crate::game::GameError;
use crate::gamedata::{Gamedata, GamedataError};
use crate::hooks::{call_member, member_fn, vtable};

/// `IReGameApi` method slots
#[derive(Debug, Clone, Copy)]
pub struct ApiSlots {
    pub major_version: usize,
    pub minor_version: usize,
    pub game_rules: usize,
    pub hookchains: usize,
}

impl ApiSlots {
    pub fn from_gamedata(gamedata: &Gamedata) -> Result<Self, GamedataError> {
        Ok(Self {
            major_version: gamedata.get_index("regame_major_version")?,
            minor_version: gamedata.get_index("regame_minor_version")?,
            game_rules: gamedata.get_index("regame_game_rules")?,
            hookchains: gamedata.get_index("regame_hookchains")?,
        })
    }
}

type VersionFn = member_fn!(() -> c_int);
type ObjectFn = member_fn!(() -> *mut c_void);

/// Check the API version the game library reports
///
/// The major version must match, the minor version must be at least the one
/// goldhook was built against.
pub fn check_api_version(major: u32, minor: u32) -> Result<(), GameError> {
    if major != REGAMEDLL_API_VERSION_MAJOR {
        return Err(GameError::ApiVersion(format!(
            "ReGameDLL API major version mismatch. Expected {} got {}",
            REGAMEDLL_API_VERSION_MAJOR, major
        )));
    }
    if minor < REGAMEDLL_API_VERSION_MINOR {
        return Err(GameError::ApiVersion(format!(
            "ReGameDLL API minor version mismatch. Expected at least {} got {}",
            REGAMEDLL_API_VERSION_MINOR, minor
        )));
    }
    Ok(())
}

/// Handle on the game library's `IReGameApi`
pub struct ReGameApi {
    api: NonNull<c_void>,
    slots: ApiSlots,
}

// SAFETY: the API object lives as long as the game library and is only used
// from the main thread
unsafe impl Send for ReGameApi {}
unsafe impl Sync for ReGameApi {}

impl ReGameApi {
    /// # Safety
    /// `api` must be the object returned for `ReGameDLL_005` and the slots
    /// must match its vtable.
    pub unsafe fn new(api: NonNull<c_void>, slots: ApiSlots) -> Self {
        Self { api, slots }
    }

    fn call_version(&self, slot: usize) -> u32 {
        let this = self.api.as_ptr();
        unsafe {
            let f: VersionFn = std::mem::transmute(vtable::virtual_function(this, slot));
            call_member!(f, this) as u32
        }
    }

    fn call_object(&self, slot: usize) -> Option<NonNull<c_void>> {
        let this = self.api.as_ptr();
        unsafe {
            let f: ObjectFn = std::mem::transmute(vtable::virtual_function(this, slot));
            NonNull::new(call_member!(f, this))
        }
    }

    pub fn major_version(&self) -> u32 {
        self.call_version(self.slots.major_version)
    }

    pub fn minor_version(&self) -> u32 {
        self.call_version(self.slots.minor_version)
    }

    pub fn check_version(&self) -> Result<(), GameError> {
        check_api_version(self.major_version(), self.minor_version())
    }

    /// `IReGameHookchains`
    pub fn hookchains(&self) -> Option<NonNull<c_void>> {
        self.call_object(self.slots.hookchains)
    }

    /// Current `CGameRules`, null between maps
    pub fn game_rules(&self) -> Option<NonNull<c_void>> {
        self.call_object(self.slots.game_rules)
    }
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::hooks::member_trampoline;

    /// Fake `IReGameApi`: version 5.1, hookchains and game rules from fields
    #[repr(C)]
    pub struct FakeApi {
        pub vtable: *const usize,
        pub major: c_int,
        pub minor: c_int,
        pub hookchains: *mut c_void,
        pub game_rules: *mut c_void,
    }

    member_trampoline! {
        fn fake_major(this) -> c_int {
            unsafe { (*(this as *const FakeApi)).major }
        }
    }

    member_trampoline! {
        fn fake_minor(this) -> c_int {
            unsafe { (*(this as *const FakeApi)).minor }
        }
    }

    member_trampoline! {
        fn fake_hookchains(this) -> *mut c_void {
            unsafe { (*(this as *const FakeApi)).hookchains }
        }
    }

    member_trampoline! {
        fn fake_game_rules(this) -> *mut c_void {
            unsafe { (*(this as *const FakeApi)).game_rules }
        }
    }

    pub const FAKE_API_SLOTS: ApiSlots = ApiSlots {
        major_version: 0,
        minor_version: 1,
        game_rules: 2,
        hookchains: 3,
    };

    pub fn fake_api_vtable() -> [usize; 4] {
        [
            fake_major as usize,
            fake_minor as usize,
            fake_game_rules as usize,
            fake_hookchains as usize,
        ]
    }

    #[test]
    fn test_version_check() {
        assert!(check_api_version(5, 1).is_ok());
        assert!(check_api_version(5, 7).is_ok());

        let major = check_api_version(4, 9).unwrap_err().to_string();
        assert_eq!(major, "ReGameDLL API major version mismatch. Expected 5 got 4");

        let minor = check_api_version(5, 0).unwrap_err().to_string();
        assert_eq!(minor, "ReGameDLL API minor version mismatch. Expected at least 1 got 0");
    }

    #[test]
    fn test_api_calls() {
        let table = fake_api_vtable();
        let mut rules = 0u8;
        let mut fake = FakeApi {
            vtable: table.as_ptr(),
            major: 5,
            minor: 3,
            hookchains: std::ptr::null_mut(),
            game_rules: &mut rules as *mut u8 as *mut c_void,
        };
        let api = unsafe { ReGameApi::new(NonNull::from(&mut fake).cast(), FAKE_API_SLOTS) };

        assert_eq!(api.major_version(), 5);
        assert_eq!(api.minor_version(), 3);
        assert!(api.check_version().is_ok());
        assert!(api.hookchains().is_none());
        assert_eq!(
            api.game_rules().map(|p| p.as_ptr() as usize),
            Some(&mut rules as *mut u8 as usize)
        );
    }

    #[test]
    fn test_slots_from_gamedata() {
        let gamedata = Gamedata::load_from_str(
            r#"{ "offsets": {
                "regame_major_version": { "linux": 2, "windows": 1 },
                "regame_minor_version": { "linux": 3, "windows": 2 },
                "regame_game_rules": { "linux": 6, "windows": 5 },
                "regame_hookchains": { "linux": 5, "windows": 4 }
            } }"#,
        )
        .unwrap();
        let slots = ApiSlots::from_gamedata(&gamedata).unwrap();
        let expected_major = if cfg!(windows) { 1 } else { 2 };
        assert_eq!(slots.major_version, expected_major);

        let missing = Gamedata::load_from_str(r#"{ "offsets": {} }"#).unwrap();
        assert!(ApiSlots::from_gamedata(&missing).is_err());
    }
}
