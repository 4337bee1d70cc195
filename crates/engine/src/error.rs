//! Error types for engine access and module loading

use std::path::PathBuf;

/// Error type for engine and module operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Engine context was already initialized
    #[error("Engine already initialized")]
    AlreadyInitialized,

    /// Engine context was used before `GiveFnptrsToDll`
    #[error("Engine not initialized")]
    NotInitialized,

    /// The engine table handed to us has an empty slot we depend on
    #[error("Engine function missing: {0}")]
    MissingEngineFunction(&'static str),

    /// Engine handed us a null pointer
    #[error("Null pointer: {0}")]
    NullPointer(String),

    /// Shared library could not be opened
    #[error("Failed to load {path}: {source}")]
    ModuleLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// Exported symbol was not found
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Module is not mapped into the process
    #[error("Module not loaded: {0}")]
    ModuleNotFound(String),

    /// Invalid interface or symbol name (not null-terminated)
    #[error("Invalid version string: {0}")]
    InvalidVersionString(String),
}
