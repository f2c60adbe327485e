use std::collections::HashSet;

use super::types::{InputEvent, Key, KeyState};

/// Per-frame input transitions. Cleared by the runtime after each frame.
#[derive(Debug, Default)]
pub struct InputFrame {
    pub keys_pressed: HashSet<Key>,
    pub keys_released: HashSet<Key>,
}

impl InputFrame {
    pub fn clear(&mut self) {
        self.keys_pressed.clear();
        self.keys_released.clear();
    }
}

/// Current input state for the window.
#[derive(Debug, Default)]
pub struct InputState {
    pub focused: bool,

    /// Pointer position in logical pixels; `None` while outside the window.
    pub pointer_pos: Option<(f32, f32)>,

    pub keys_down: HashSet<Key>,
}

impl InputState {
    /// Applies `ev` and records transitions into `frame`.
    pub fn apply_event(&mut self, frame: &mut InputFrame, ev: &InputEvent) {
        match ev {
            InputEvent::Focused(focused) => {
                self.focused = *focused;
                // Releases arriving while unfocused are never delivered.
                if !*focused {
                    self.keys_down.clear();
                }
            }
            InputEvent::PointerMoved { x, y } => self.pointer_pos = Some((*x, *y)),
            InputEvent::PointerLeft => self.pointer_pos = None,
            InputEvent::Key { key, state, .. } => match state {
                KeyState::Pressed => {
                    if self.keys_down.insert(*key) {
                        frame.keys_pressed.insert(*key);
                    }
                }
                KeyState::Released => {
                    if self.keys_down.remove(key) {
                        frame.keys_released.insert(*key);
                    }
                }
            },
        }
    }

    pub fn key_down(&self, key: Key) -> bool {
        self.keys_down.contains(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(key: Key, state: KeyState, repeat: bool) -> InputEvent {
        InputEvent::Key {
            key,
            state,
            code: 0,
            repeat,
        }
    }

    #[test]
    fn press_is_reported_once_per_hold() {
        let mut state = InputState::default();
        let mut frame = InputFrame::default();

        state.apply_event(&mut frame, &key(Key::Space, KeyState::Pressed, false));
        assert!(frame.keys_pressed.contains(&Key::Space));

        frame.clear();
        state.apply_event(&mut frame, &key(Key::Space, KeyState::Pressed, true));
        assert!(frame.keys_pressed.is_empty());
        assert!(state.key_down(Key::Space));

        state.apply_event(&mut frame, &key(Key::Space, KeyState::Released, false));
        assert!(frame.keys_released.contains(&Key::Space));
        assert!(!state.key_down(Key::Space));
    }

    #[test]
    fn focus_loss_releases_held_keys() {
        let mut state = InputState::default();
        let mut frame = InputFrame::default();
        state.apply_event(&mut frame, &key(Key::W, KeyState::Pressed, false));
        state.apply_event(&mut frame, &InputEvent::Focused(false));
        assert!(state.keys_down.is_empty());
    }

    #[test]
    fn pointer_tracks_until_it_leaves() {
        let mut state = InputState::default();
        let mut frame = InputFrame::default();
        state.apply_event(&mut frame, &InputEvent::PointerMoved { x: 12.0, y: 34.5 });
        assert_eq!(state.pointer_pos, Some((12.0, 34.5)));
        state.apply_event(&mut frame, &InputEvent::PointerLeft);
        assert_eq!(state.pointer_pos, None);
    }
}
