//! Seacrest engine crate.
//!
//! A small Direct3D 12 engine: the platform runtime, the application
//! contract and the GPU command/resource lifecycle underneath them.

pub mod device;
pub mod window;
pub mod input;
pub mod time;
pub mod core;

pub mod logging;
