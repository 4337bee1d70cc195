//! Loading and negotiating with the real game library

use std::ffi::{c_int, CStr, CString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use goldhook_engine::{EngineError, SystemModule};
use goldhook_sdk::versions::{
    GET_ENTITY_API, GET_ENTITY_API2, GET_NEW_DLL_FUNCTIONS, GIVE_FNPTRS_TO_DLL, INTERFACE_VERSION,
    NEW_DLL_FUNCTIONS_VERSION,
};
use goldhook_sdk::{
    edict_t, DllFunctions, EngineFuncs, EntityFactoryFn, GetEntityApi2Fn, GetEntityApiFn,
    GetNewDllFunctionsFn, GiveFnptrsToDllFn, GlobalVars, NewDllFunctions,
};

use super::{callbacks, engine_funcs};
use crate::game::GameMod;

/// Which side of an interface negotiation is behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceSide {
    Goldhook,
    GameLibrary,
}

impl fmt::Display for InterfaceSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceSide::Goldhook => f.write_str("goldhook"),
            InterfaceSide::GameLibrary => f.write_str("game library"),
        }
    }
}

/// Error type for game library loading
#[derive(Debug, thiserror::Error)]
pub enum GameLibraryError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Game mod '{0}' is not supported")]
    UnknownGame(String),

    #[error("Cannot find {0} in the game library")]
    MissingExport(&'static str),

    #[error("{interface} functions not compatible. {outdated} outdated.")]
    Outdated {
        interface: &'static str,
        outdated: InterfaceSide,
    },

    #[error("Cannot retrieve {0} functions from the game library")]
    Refused(&'static str),

    #[error("Game library already loaded")]
    AlreadyLoaded,
}

/// Decide who is outdated after a failed version negotiation
///
/// Both sides pass in their own version and the callee writes back the one
/// it expects.
pub fn check_interface_version(
    accepted: bool,
    ours: i32,
    theirs: i32,
    interface: &'static str,
) -> Result<(), GameLibraryError> {
    if accepted {
        return Ok(());
    }
    let outdated = if theirs > ours {
        InterfaceSide::Goldhook
    } else {
        InterfaceSide::GameLibrary
    };
    Err(GameLibraryError::Outdated { interface, outdated })
}

/// The real game library
pub struct GameLibrary {
    module: SystemModule,
    game_mod: GameMod,
    /// Engine table handed to the game library, must outlive it
    engine_funcs: Box<EngineFuncs>,
    /// The game library's own tables
    functions: DllFunctions,
    new_functions: Option<NewDllFunctions>,
    /// Tables handed to the engine
    hooked_functions: DllFunctions,
    hooked_new_functions: NewDllFunctions,
}

// SAFETY: the tables only hold function pointers into loaded modules
unsafe impl Send for GameLibrary {}
unsafe impl Sync for GameLibrary {}

impl GameLibrary {
    /// Load the game library and give it the interposed engine table
    ///
    /// # Safety
    /// `globals` must be the engine globals and `engine_funcs` the engine
    /// table received in `GiveFnptrsToDll`.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub unsafe fn load(
        path: impl AsRef<Path>,
        game_mod: GameMod,
        engine_funcs: &EngineFuncs,
        globals: *mut GlobalVars,
    ) -> Result<Self, GameLibraryError> {
        let module = SystemModule::open(path.as_ref())?;

        let give_fnptrs: GiveFnptrsToDllFn = module
            .symbol(GIVE_FNPTRS_TO_DLL)
            .map_err(|_| GameLibraryError::MissingExport("GiveFnptrsToDll"))?;

        let mut engine_funcs = Box::new(engine_funcs::interpose_engine(engine_funcs));
        give_fnptrs(&mut *engine_funcs, globals);

        let new_functions = Self::get_new_functions(&module)?;
        let functions = Self::get_functions(&module)?;

        tracing::info!("Loaded game library {}", module.path().display());

        Ok(Self {
            hooked_functions: callbacks::interpose_functions(&functions),
            hooked_new_functions: callbacks::interpose_new_functions(
                &new_functions.unwrap_or_default(),
            ),
            module,
            game_mod,
            engine_funcs,
            functions,
            new_functions,
        })
    }

    unsafe fn get_new_functions(
        module: &SystemModule,
    ) -> Result<Option<NewDllFunctions>, GameLibraryError> {
        let Some(get_new) = module.try_symbol::<GetNewDllFunctionsFn>(GET_NEW_DLL_FUNCTIONS) else {
            tracing::debug!("Game library has no GetNewDLLFunctions");
            return Ok(None);
        };

        let mut table = NewDllFunctions::default();
        let mut version: c_int = NEW_DLL_FUNCTIONS_VERSION;
        let accepted = get_new(&mut table, &mut version) != 0;
        check_interface_version(accepted, NEW_DLL_FUNCTIONS_VERSION, version, "New DLL API")?;
        Ok(Some(table))
    }

    unsafe fn get_functions(module: &SystemModule) -> Result<DllFunctions, GameLibraryError> {
        let mut table = DllFunctions::default();

        if let Some(get_api2) = module.try_symbol::<GetEntityApi2Fn>(GET_ENTITY_API2) {
            let mut version: c_int = INTERFACE_VERSION;
            let accepted = get_api2(&mut table, &mut version) != 0;
            check_interface_version(accepted, INTERFACE_VERSION, version, "EntityAPI2")?;
            return Ok(table);
        }

        let get_api: GetEntityApiFn = module
            .symbol(GET_ENTITY_API)
            .map_err(|_| GameLibraryError::Refused("EntityAPI"))?;
        if get_api(&mut table, INTERFACE_VERSION) == 0 {
            return Err(GameLibraryError::Refused("EntityAPI"));
        }
        Ok(table)
    }

    pub fn module(&self) -> &SystemModule {
        &self.module
    }

    pub fn path(&self) -> &Path {
        self.module.path()
    }

    pub fn game_mod(&self) -> GameMod {
        self.game_mod
    }

    /// The game library's own export table, for calls that skip hooks
    pub fn functions(&self) -> &DllFunctions {
        &self.functions
    }

    pub fn new_functions(&self) -> Option<&NewDllFunctions> {
        self.new_functions.as_ref()
    }

    /// Export table handed to the engine
    pub fn hooked_functions(&self) -> &DllFunctions {
        &self.hooked_functions
    }

    pub fn hooked_new_functions(&self) -> &NewDllFunctions {
        &self.hooked_new_functions
    }

    /// Engine table the game library received
    pub fn engine_funcs(&self) -> &EngineFuncs {
        &self.engine_funcs
    }

    /// Game description reported by the game library
    pub fn description(&self) -> Option<String> {
        let get = self.functions.pfn_get_game_description?;
        // SAFETY: the game returns a static string
        let ptr = unsafe { get() };
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    /// Call the exported class factory `class_name` (e.g. `player`) on `edict`
    ///
    /// Returns false if the game library has no such class.
    ///
    /// # Safety
    /// `edict` must be a live engine edict.
    pub unsafe fn call_game_entity(&self, class_name: &str, edict: NonNull<edict_t>) -> bool {
        let Ok(name) = CString::new(class_name) else {
            return false;
        };
        let Some(factory) = self
            .module
            .try_symbol::<EntityFactoryFn>(name.as_bytes_with_nul())
        else {
            tracing::debug!("Game library has no entity class '{}'", class_name);
            return false;
        };
        factory(std::ptr::addr_of_mut!((*edict.as_ptr()).v));
        true
    }
}

impl fmt::Debug for GameLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameLibrary")
            .field("path", &self.module.path())
            .field("game_mod", &self.game_mod)
            .finish()
    }
}

/// Default location of a mod's game library: `<game>/dlls/<library>`
pub fn default_library_path(game_dir: &Path, game_mod: GameMod) -> Result<PathBuf, GameLibraryError> {
    let name = game_mod
        .library_name()
        .ok_or_else(|| GameLibraryError::UnknownGame(game_dir.display().to_string()))?;
    Ok(game_dir.join("dlls").join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_accepted() {
        assert!(check_interface_version(true, 140, 140, "EntityAPI2").is_ok());
    }

    #[test]
    fn test_goldhook_outdated() {
        let err = check_interface_version(false, 140, 141, "EntityAPI2").unwrap_err();
        assert!(matches!(
            err,
            GameLibraryError::Outdated {
                outdated: InterfaceSide::Goldhook,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "EntityAPI2 functions not compatible. goldhook outdated."
        );
    }

    #[test]
    fn test_game_library_outdated() {
        let err = check_interface_version(false, 1, 0, "New DLL API").unwrap_err();
        assert_eq!(
            err.to_string(),
            "New DLL API functions not compatible. game library outdated."
        );
    }

    #[test]
    fn test_default_library_path() {
        let path = default_library_path(Path::new("/hlds/valve"), GameMod::Valve).unwrap();
        let expected = if cfg!(windows) { "hl.dll" } else { "hl.so" };
        assert_eq!(path, Path::new("/hlds/valve/dlls").join(expected));
        assert!(matches!(
            default_library_path(Path::new("/hlds/tfc"), GameMod::Other),
            Err(GameLibraryError::UnknownGame(_))
        ));
    }

    #[test]
    fn test_load_missing_library() {
        let funcs = EngineFuncs::default();
        let result = unsafe {
            GameLibrary::load(
                "/nonexistent/dlls/hl.so",
                GameMod::Valve,
                &funcs,
                std::ptr::null_mut(),
            )
        };
        assert!(matches!(result, Err(GameLibraryError::Engine(_))));
    }
}
