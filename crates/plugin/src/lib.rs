//! goldhook host library
//!
//! The engine loads this library as the game library. It exports the game
//! library entry points, loads the real game library behind them and starts
//! the plugins.

pub mod ffi;
mod startup;

pub use goldhook_core::shutdown;
