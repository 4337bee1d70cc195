//! Host startup, run from `GiveFnptrsToDll`

use std::ffi::c_void;
use std::path::PathBuf;

use goldhook_core::config::{init_paths, PathKind, Paths};
use goldhook_core::game::{self, GameMod};
use goldhook_core::gamedll::{self, default_library_path, GameLibrary, GameLibraryError};
use goldhook_core::logging::init_logging;
use goldhook_core::plugins::plugin_manager;
use goldhook_core::{init_goldhook, ConfigError, CoreConfig, Goldhook};
use goldhook_engine::{init_engine, module_path_of, EngineContext, EngineError};
use goldhook_sdk::{EngineFuncs, GlobalVars};

/// Error type for host startup
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Engine passed a null function table")]
    NullEngineTable,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to set up logging: {0}")]
    Logging(#[from] std::io::Error),

    #[error(transparent)]
    GameLibrary(#[from] GameLibraryError),
}

/// Bring up everything behind the exported entry points
///
/// # Safety
/// `funcs` and `globals` must be what the engine passed to `GiveFnptrsToDll`.
pub(crate) unsafe fn startup(
    funcs: *const EngineFuncs,
    globals: *mut GlobalVars,
    own_address: *const c_void,
) -> Result<(), StartupError> {
    let funcs = funcs.as_ref().copied().ok_or(StartupError::NullEngineTable)?;
    let context = EngineContext::new(&funcs, globals)?;

    let paths = match module_path_of(own_address) {
        Ok(module) => Paths::from_module_path(&module)?,
        Err(_) => Paths::from_game_dir(context.game_dir()),
    };
    let paths = init_paths(paths)?;

    let config = CoreConfig::load_from(&paths.get(PathKind::Configs).join("core.toml"))?;
    init_logging(&config.logging, &paths.get(PathKind::Logs))?;
    tracing::info!("goldhook {} starting", env!("CARGO_PKG_VERSION"));

    let engine = init_engine(context)?;
    let game_mod = GameMod::from_game_dir(engine.game_dir());

    let library_path = library_path(&config, paths, game_mod)?;
    let library = GameLibrary::load(&library_path, game_mod, &funcs, globals)?;
    let library = gamedll::init_game_library(library)?;
    if let Some(description) = library.description() {
        tracing::info!("Game: {}", description);
    }

    let gamedata_dir = paths.resolve_base_path(&config.gamedata_dir);
    if let Err(e) = game::load_variant(game_mod, &gamedata_dir, library) {
        tracing::error!("Player and game rules hooks unavailable: {}", e);
    }

    gamedll::set_vhooks_handler(goldhook_core::install_vhooks);
    gamedll::set_shutdown_handler(goldhook_core::shutdown);

    // after the variant, so plugins see the host's bound instances
    let goldhook = init_goldhook(Goldhook::new(paths, config, engine));
    let mut plugins = plugin_manager().lock();
    let loaded = plugins.load_all(goldhook.config(), paths);
    plugins.init(goldhook);
    tracing::info!("Started {} of {} plugins", plugins.len(), loaded);

    Ok(())
}

fn library_path(config: &CoreConfig, paths: &Paths, game_mod: GameMod) -> Result<PathBuf, StartupError> {
    match &config.game_library {
        Some(path) => Ok(paths.resolve_game_path(path)),
        None => Ok(default_library_path(&paths.get(PathKind::Game), game_mod)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_path_default_and_override() {
        let paths = Paths::from_game_dir("/srv/hlds/cstrike");

        let default = library_path(&CoreConfig::default(), &paths, GameMod::CStrike).unwrap();
        let name = if cfg!(windows) { "mp.dll" } else { "cs.so" };
        assert_eq!(default, PathBuf::from("/srv/hlds/cstrike/dlls").join(name));

        let config = CoreConfig {
            game_library: Some(PathBuf::from("dlls/cs_custom.so")),
            ..CoreConfig::default()
        };
        assert_eq!(
            library_path(&config, &paths, GameMod::CStrike).unwrap(),
            PathBuf::from("/srv/hlds/cstrike/dlls/cs_custom.so")
        );

        assert!(matches!(
            library_path(&CoreConfig::default(), &paths, GameMod::Other),
            Err(StartupError::GameLibrary(GameLibraryError::UnknownGame(_)))
        ));
    }
}
