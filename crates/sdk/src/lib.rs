//! goldhook SDK - GoldSrc engine type definitions
//!
//! This crate contains `repr(C)` layouts for the tables and structures the
//! engine shares with game libraries. It has no dependencies and compiles
//! quickly, allowing parallel compilation of dependent crates.
//!
//! # Modules
//!
//! - [`edict`] - Entity slots, entity variables and trace results
//! - [`engine`] - Engine globals and the engine function table
//! - [`dll`] - Game library function tables and entry point signatures
//! - [`versions`] - Interface versions and exported symbol names

pub mod dll;
pub mod edict;
pub mod engine;
pub mod versions;

pub use dll::*;
pub use edict::*;
pub use engine::*;
