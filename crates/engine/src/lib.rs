//! goldhook engine - engine context and module access
//!
//! This crate handles:
//! - Holding the engine function table handed over in `GiveFnptrsToDll`
//! - Loading shared libraries and resolving their exports
//! - Describing the in-memory image of a loaded module for pattern scans
//!
//! # Architecture
//!
//! The engine table is copied once during load and stored in an
//! [`EngineContext`] via [`init_engine`]. Access is provided via the
//! [`engine()`] and [`try_engine()`] functions.
//!
//! # Thread Safety
//!
//! The engine only calls into the game from its main thread. The thread that
//! initialised the context is recorded for runtime checks via [`is_main_thread()`].

pub mod error;
pub mod globals;
pub mod image;
pub mod loader;

pub use error::EngineError;
pub use globals::{
    engine, init_engine, is_engine_initialized, is_main_thread, try_engine, EngineContext,
};
pub use image::ModuleImage;
pub use loader::{module_path_of, InterfaceFactory, SystemModule};
