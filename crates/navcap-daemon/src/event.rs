//! Wire-level event helpers
//!
//! Physical devices deliver key presses as a triplet: an `MSC_SCAN` marker,
//! the `EV_KEY` event itself and a `SYN_REPORT`. Synthetic presses are
//! emitted in the same shape so consumers cannot tell them apart.

use evdev::{EventType, InputEvent, Key, MiscType, Synchronization};

/// Event values for `EV_KEY` events
pub mod event_value {
    pub const RELEASE: i32 = 0;
    pub const PRESS: i32 = 1;
}

/// Scan code carried by every synthetic `MSC_SCAN` marker
pub const SCAN_VALUE: i32 = 458976;

/// `MSC_SCAN` marker preceding a synthetic key event
pub fn scan_marker() -> InputEvent {
    InputEvent::new(EventType::MISC, MiscType::MSC_SCAN.0, SCAN_VALUE)
}

/// `SYN_REPORT` marker closing a synthetic key event
pub fn sync_marker() -> InputEvent {
    InputEvent::new(EventType::SYNCHRONIZATION, Synchronization::SYN_REPORT.0, 0)
}

pub fn key_event(key: Key, value: i32) -> InputEvent {
    InputEvent::new(EventType::KEY, key.code(), value)
}

/// Wrap a single event in scan + sync markers
pub fn triplet(event: InputEvent) -> [InputEvent; 3] {
    [scan_marker(), event, sync_marker()]
}

/// Scan marker, key event and sync marker for one synthetic key transition
pub fn key_triplet(key: Key, value: i32) -> [InputEvent; 3] {
    triplet(key_event(key, value))
}

/// Returns the key if this is an `EV_KEY` event
pub fn as_key(event: &InputEvent) -> Option<Key> {
    (event.event_type() == EventType::KEY).then(|| Key::new(event.code()))
}

/// Copy of `event` with its code replaced
pub fn with_code(event: &InputEvent, key: Key) -> InputEvent {
    InputEvent::new(event.event_type(), key.code(), event.value())
}

/// An event on its way into the dispatch loop.
///
/// Frames replayed by the scheduler travel through the same mouse channel as
/// live events; the variant keeps them from being remapped a second time.
#[derive(Debug, Clone)]
pub enum RoutedEvent {
    /// Read from a physical device
    Live(InputEvent),
    /// A complete frame re-injected by a scheduled action
    Replayed(Vec<InputEvent>),
}

impl RoutedEvent {
    pub fn live(event: InputEvent) -> Self {
        Self::Live(event)
    }

    pub fn replayed(frame: Vec<InputEvent>) -> Self {
        Self::Replayed(frame)
    }
}
