//! Application contract: the callbacks an application implements and the
//! per-frame context the runtime hands to it.

mod app;
mod ctx;

pub use app::{App, AppControl};
pub use ctx::{FrameCtx, WindowCtx};
