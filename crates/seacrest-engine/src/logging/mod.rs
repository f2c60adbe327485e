//! Logging subsystem.
//!
//! The engine logs through the `log` facade. Binaries call `init_logging`
//! once, early in `main`.
//!
//! Engine internals log under [`CORE_TARGET`]; applications built on the
//! engine are expected to use [`CLIENT_TARGET`] so the two can be filtered
//! independently (`RUST_LOG=seacrest::core=warn,seacrest::client=debug`).

mod init;

pub use init::{init_logging, LoggingConfig};

/// Log target for engine internals.
pub const CORE_TARGET: &str = "seacrest::core";

/// Log target for application code.
pub const CLIENT_TARGET: &str = "seacrest::client";
