//! Time subsystem.
//!
//! - `FrameClock`: one per render loop; call `tick()` once per frame.
//! - `LifetimeTimer`: background thread publishing how long the application
//!   has been running.

mod frame_clock;
mod timer;

pub use frame_clock::{FrameClock, FrameTime};
pub use timer::{write_elapsed, LifetimeTimer};
