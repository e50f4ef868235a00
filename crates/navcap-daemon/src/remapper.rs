//! Remap decisions
//!
//! # Capslock Mouse Remap
//!
//! While capslock is held, the primary and secondary mouse buttons turn into
//! the middle button combined with a modifier, which is what Blender expects
//! for pan and zoom on a laptop-style setup:
//!
//! | Button held with capslock | Emitted                  |
//! |---------------------------|--------------------------|
//! | `BTN_LEFT`                | `KEY_LEFTSHIFT` + middle |
//! | `BTN_RIGHT`               | `KEY_LEFTCTRL` + middle  |
//!
//! ## Ordering
//!
//! ```text
//!  button down                          button up
//!  ───────────                          ─────────
//!  modifier down   (keyboard, now)      middle up     (mouse, now)
//!        │                                    │
//!        │ modifier delay                     │ modifier delay
//!        ▼                                    ▼
//!  middle down     (mouse, replayed)    modifier up   (keyboard, scheduled)
//! ```
//!
//! The modifier is always observed before the button goes down and after it
//! comes up. The replayed middle-down re-enters the mouse channel as a
//! [`RoutedEvent::Replayed`] frame and is written as-is, in one piece.
//!
//! Capslock itself never reaches the virtual keyboard. The remapper holds no
//! state of its own; every decision is made from the [`KeyState`] snapshot.

use std::time::Duration;

use evdev::{InputEvent, Key};

use crate::event::{as_key, event_value, key_triplet, triplet, with_code, RoutedEvent};
use crate::key_state::KeyState;
use crate::scheduler::ScheduledAction;

/// Key whose held state activates the mouse remap
pub const TRIGGER_KEY: Key = Key::KEY_CAPSLOCK;

/// Button code that remapped buttons are rewritten to
pub const REMAP_TARGET: Key = Key::BTN_MIDDLE;

/// Default gap between the synthetic modifier and the rewritten button
pub const DEFAULT_MODIFIER_DELAY: Duration = Duration::from_millis(20);

/// Mouse buttons that are remapped, with the modifier each one adds
pub const BUTTON_MODIFIERS: [(Key, Key); 2] = [
    (Key::BTN_LEFT, Key::KEY_LEFTSHIFT),
    (Key::BTN_RIGHT, Key::KEY_LEFTCTRL),
];

/// Modifier paired with a remappable button
pub fn modifier_for(button: Key) -> Option<Key> {
    BUTTON_MODIFIERS
        .iter()
        .find(|(candidate, _)| *candidate == button)
        .map(|(_, modifier)| *modifier)
}

/// What to do with a keyboard event after the key state was updated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardVerdict {
    /// The abort combination is held; end the session
    Abort,
    /// Swallow the event
    Consume,
    /// Write the event to the virtual keyboard unchanged
    Forward,
}

/// An output produced by a mouse decision, applied in order
#[derive(Debug, Clone)]
pub enum Effect {
    /// Write to the virtual keyboard now
    Keyboard(Vec<InputEvent>),
    /// Write to the virtual mouse now
    Mouse(Vec<InputEvent>),
    /// Write a complete frame to the virtual mouse now, leaving any
    /// half-received live frame untouched
    MouseFrame(Vec<InputEvent>),
    /// Hand an action to the scheduler
    Schedule {
        delay: Duration,
        action: ScheduledAction,
    },
}

/// Stateless remap rules for the keyboard and mouse streams
#[derive(Debug, Clone, Copy)]
pub struct Remapper {
    modifier_delay: Duration,
}

impl Default for Remapper {
    fn default() -> Self {
        Self::new(DEFAULT_MODIFIER_DELAY)
    }
}

impl Remapper {
    pub fn new(modifier_delay: Duration) -> Self {
        Self { modifier_delay }
    }

    /// Decide what happens to a keyboard event.
    ///
    /// `keys` must already include `event`.
    pub fn keyboard(&self, keys: &KeyState, event: &InputEvent) -> KeyboardVerdict {
        if keys.abort_requested() {
            return KeyboardVerdict::Abort;
        }

        if as_key(event) == Some(TRIGGER_KEY) {
            return KeyboardVerdict::Consume;
        }

        KeyboardVerdict::Forward
    }

    /// Decide what happens to a mouse event
    pub fn mouse(&self, keys: &KeyState, routed: RoutedEvent) -> Vec<Effect> {
        let event = match routed {
            RoutedEvent::Live(event) => event,
            // Replayed frames were already remapped on their first pass
            RoutedEvent::Replayed(frame) => return vec![Effect::MouseFrame(frame)],
        };

        if !keys.is_pressed(&[TRIGGER_KEY]) {
            return vec![Effect::Mouse(vec![event])];
        }

        let Some(modifier) = as_key(&event).and_then(modifier_for) else {
            return vec![Effect::Mouse(vec![event])];
        };

        let rewritten = with_code(&event, REMAP_TARGET);

        match event.value() {
            event_value::PRESS => vec![
                Effect::Keyboard(key_triplet(modifier, event_value::PRESS).to_vec()),
                Effect::Schedule {
                    delay: self.modifier_delay,
                    action: ScheduledAction::ReplayMouse(triplet(rewritten).to_vec()),
                },
            ],
            event_value::RELEASE => vec![
                Effect::Mouse(vec![rewritten]),
                Effect::Schedule {
                    delay: self.modifier_delay,
                    action: ScheduledAction::EmitKeyboard(
                        key_triplet(modifier, event_value::RELEASE).to_vec(),
                    ),
                },
            ],
            // Buttons do not autorepeat; keep the code consistent anyway
            _ => vec![Effect::Mouse(vec![rewritten])],
        }
    }
}
