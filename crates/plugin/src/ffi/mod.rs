//! Entry points the engine resolves by name

pub mod exports;
