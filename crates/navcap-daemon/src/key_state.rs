//! Last-known key values of the physical keyboard

use std::collections::HashMap;

use evdev::{EventType, InputEvent, Key};

/// Keys whose simultaneous press ends the session
pub const ABORT_COMBO: [Key; 4] = [
    Key::KEY_LEFTCTRL,
    Key::KEY_LEFTALT,
    Key::KEY_LEFTSHIFT,
    Key::KEY_F12,
];

/// Snapshot of the last value seen for each key code.
///
/// 0 is up, 1 is down and anything above (autorepeat) also counts as down.
/// Only the dispatch loop mutates it; there is no internal locking.
#[derive(Debug, Default)]
pub struct KeyState {
    keys: HashMap<u16, i32>,
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the value of a key event; other event types are ignored
    pub fn update(&mut self, event: &InputEvent) {
        if event.event_type() == EventType::KEY {
            self.keys.insert(event.code(), event.value());
        }
    }

    /// True if every key is currently down. An empty slice is trivially pressed.
    pub fn is_pressed(&self, keys: &[Key]) -> bool {
        keys.iter().all(|key| self.value(*key) != 0)
    }

    /// Last value seen for `key`, 0 if it was never seen
    pub fn value(&self, key: Key) -> i32 {
        self.keys.get(&key.code()).copied().unwrap_or(0)
    }

    /// True if the abort combination is held
    pub fn abort_requested(&self) -> bool {
        self.is_pressed(&ABORT_COMBO)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::{key_event, scan_marker, sync_marker};
    use proptest::prelude::*;
    use proptest::test_runner::Config as ProptestConfig;

    #[test]
    fn test_empty_combo_is_pressed() {
        let state = KeyState::new();
        assert!(state.is_pressed(&[]));
    }

    #[test]
    fn test_unseen_key_is_up() {
        let state = KeyState::new();
        assert!(!state.is_pressed(&[Key::KEY_CAPSLOCK]));
        assert_eq!(state.value(Key::KEY_CAPSLOCK), 0);
    }

    #[test]
    fn test_press_release_repeat() {
        let mut state = KeyState::new();

        state.update(&key_event(Key::KEY_CAPSLOCK, 1));
        assert!(state.is_pressed(&[Key::KEY_CAPSLOCK]));

        state.update(&key_event(Key::KEY_CAPSLOCK, 2));
        assert!(state.is_pressed(&[Key::KEY_CAPSLOCK]), "repeat counts as down");

        state.update(&key_event(Key::KEY_CAPSLOCK, 0));
        assert!(!state.is_pressed(&[Key::KEY_CAPSLOCK]));
    }

    #[test]
    fn test_non_key_events_ignored() {
        let mut state = KeyState::new();
        state.update(&key_event(Key::KEY_A, 1));

        // MSC_SCAN code 4 and SYN_REPORT code 0 must not touch key codes 4/0
        state.update(&scan_marker());
        state.update(&sync_marker());

        assert_eq!(state.value(Key::new(4)), 0);
        assert_eq!(state.value(Key::new(0)), 0);
        assert!(state.is_pressed(&[Key::KEY_A]));
    }

    #[test]
    fn test_released_key_breaks_combo() {
        let mut state = KeyState::new();
        for key in ABORT_COMBO {
            state.update(&key_event(key, 1));
        }
        assert!(state.abort_requested());

        // Any member released (most recent value 0) means not pressed
        for released in ABORT_COMBO {
            state.update(&key_event(released, 0));
            assert!(!state.abort_requested());
            assert!(!state.is_pressed(&[released, Key::KEY_A]));
            state.update(&key_event(released, 1));
        }
    }

    #[test]
    fn test_partial_combo_does_not_abort() {
        let mut state = KeyState::new();
        for key in &ABORT_COMBO[..3] {
            state.update(&key_event(*key, 1));
        }
        state.update(&key_event(Key::KEY_F11, 1));
        assert!(!state.abort_requested());
    }

    /// Key codes drawn from a small pool so presses and releases collide
    pub(crate) fn key_code() -> impl Strategy<Value = u16> {
        prop_oneof![
            (0usize..ABORT_COMBO.len()).prop_map(|i| ABORT_COMBO[i].code()),
            1u16..64,
        ]
    }

    pub(crate) fn key_events() -> impl Strategy<Value = Vec<(u16, i32)>> {
        proptest::collection::vec((key_code(), 0i32..=2), 0..48)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn released_key_is_never_pressed(
            events in key_events(),
            released in key_code(),
            other in key_code(),
        ) {
            let mut state = KeyState::new();
            for (code, value) in events {
                state.update(&key_event(Key::new(code), value));
            }
            state.update(&key_event(Key::new(released), 0));

            prop_assert!(!state.is_pressed(&[Key::new(released)]));
            prop_assert!(!state.is_pressed(&[Key::new(released), Key::new(other)]));
            prop_assert!(!state.is_pressed(&[Key::new(other), Key::new(released)]));
        }
    }
}
