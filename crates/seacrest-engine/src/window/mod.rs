//! Platform runtime: window creation, the event pump and the frame loop.
//!
//! [`Runtime::run`] drives an [`App`](crate::core::App) inside a winit
//! window; [`Runtime::run_headless`] drives the same app for a fixed number
//! of frames without one.

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeCtx};
