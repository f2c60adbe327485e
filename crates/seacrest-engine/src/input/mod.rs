//! Input subsystem.
//!
//! Engine input types carry no winit types; `window` translates platform
//! events through [`translate_window_event`] and feeds them to
//! [`InputState::apply_event`].

mod state;
mod types;
mod platform;

pub use state::{InputFrame, InputState};
pub use types::{InputEvent, Key, KeyState};
pub use platform::translate_window_event;
