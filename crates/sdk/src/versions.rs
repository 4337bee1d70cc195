//! Interface versions negotiated with the engine and the game library
//!
//! Byte strings are null-terminated so they can be handed to C directly.

/// `DLL_FUNCTIONS` version expected by `GetEntityAPI`/`GetEntityAPI2`
pub const INTERFACE_VERSION: i32 = 140;

/// `NEW_DLL_FUNCTIONS` version expected by `GetNewDLLFunctions`
pub const NEW_DLL_FUNCTIONS_VERSION: i32 = 1;

/// Engine entry point exported by every game library
pub const GIVE_FNPTRS_TO_DLL: &[u8] = b"GiveFnptrsToDll\0";
pub const GET_ENTITY_API: &[u8] = b"GetEntityAPI\0";
pub const GET_ENTITY_API2: &[u8] = b"GetEntityAPI2\0";
pub const GET_NEW_DLL_FUNCTIONS: &[u8] = b"GetNewDLLFunctions\0";

/// Interface factory exported by ReGameDLL
pub const CREATE_INTERFACE: &[u8] = b"CreateInterface\0";

/// ReGameDLL API interface name
pub const REGAMEDLL_API: &[u8] = b"ReGameDLL_005\0";

/// ReGameDLL API major version (exact match required)
pub const REGAMEDLL_API_VERSION_MAJOR: u32 = 5;

/// ReGameDLL API minor version (at least)
pub const REGAMEDLL_API_VERSION_MINOR: u32 = 1;

/// Entity class factories looked up in the game library
pub const PLAYER_CLASS: &str = "player";
pub const WORLD_CLASS: &str = "worldspawn";
