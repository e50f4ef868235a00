//! The dispatch loop
//!
//! A single task owns every remap decision and every write to the virtual
//! devices. It waits on the keyboard channel, the mouse channel (live and
//! replayed events), the synthetic channel fed by the scheduler, the error
//! channel and the cancellation signal, then applies the result of the
//! [`Remapper`] to its outputs.
//!
//! Abort combo, a listener error and requested shutdown all end in the same
//! place: the token is cancelled and [`Dispatcher::run`] returns.

use std::io;

use evdev::InputEvent;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{DeviceRole, ListenerError};
use crate::event::RoutedEvent;
use crate::key_state::KeyState;
use crate::remapper::{Effect, KeyboardVerdict, Remapper};
use crate::scheduler::Scheduler;

/// Something the dispatch loop can write events to
pub trait EventSink {
    fn emit(&mut self, events: &[InputEvent]) -> io::Result<()>;

    /// Write a complete frame, ending in `SYN_REPORT`, as one unit
    fn emit_frame(&mut self, frame: &[InputEvent]) -> io::Result<()> {
        self.emit(frame)
    }
}

/// Everything the dispatch loop can wake up for
#[derive(Debug)]
pub enum Source {
    Keyboard(RoutedEvent),
    Mouse(RoutedEvent),
    /// Keyboard output handed back by the scheduler
    Synthetic(Vec<InputEvent>),
    Error(ListenerError),
    Cancelled,
}

/// Why a session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// The abort combination was pressed
    Aborted,
    /// A listener failed to read its device
    Failed(ListenerError),
    /// Shutdown was requested from outside
    Shutdown,
}

/// Receiving ends of the channels the dispatch loop selects over
pub struct Inputs {
    pub keyboard: mpsc::Receiver<RoutedEvent>,
    pub mouse: mpsc::Receiver<RoutedEvent>,
    pub synthetic: mpsc::Receiver<Vec<InputEvent>>,
    pub errors: mpsc::Receiver<ListenerError>,
}

pub struct Dispatcher<K, M> {
    inputs: Inputs,
    keyboard_out: K,
    mouse_out: M,
    keys: KeyState,
    remapper: Remapper,
    scheduler: Scheduler,
    cancel: CancelToken,
}

impl<K: EventSink, M: EventSink> Dispatcher<K, M> {
    pub fn new(
        inputs: Inputs,
        keyboard_out: K,
        mouse_out: M,
        remapper: Remapper,
        scheduler: Scheduler,
        cancel: CancelToken,
    ) -> Self {
        Self {
            inputs,
            keyboard_out,
            mouse_out,
            keys: KeyState::new(),
            remapper,
            scheduler,
            cancel,
        }
    }

    /// Process events until the session ends.
    ///
    /// Always leaves the token cancelled so listeners and the scheduler stop.
    /// Gives the output devices back for teardown.
    pub async fn run(mut self) -> (SessionEnd, K, M) {
        let end = loop {
            let source = self.next_source().await;
            if let Some(end) = self.handle(source) {
                break end;
            }
        };

        self.cancel.cancel();
        (end, self.keyboard_out, self.mouse_out)
    }

    /// Wait for whichever input is ready first
    pub async fn next_source(&mut self) -> Source {
        if self.cancel.is_cancelled() {
            return Source::Cancelled;
        }

        let inputs = &mut self.inputs;
        tokio::select! {
            _ = self.cancel.cancelled() => Source::Cancelled,
            Some(error) = inputs.errors.recv() => Source::Error(error),
            Some(routed) = inputs.keyboard.recv() => Source::Keyboard(routed),
            Some(routed) = inputs.mouse.recv() => Source::Mouse(routed),
            Some(events) = inputs.synthetic.recv() => Source::Synthetic(events),
        }
    }

    /// Apply one input. Returns `Some` when the session is over.
    pub fn handle(&mut self, source: Source) -> Option<SessionEnd> {
        match source {
            Source::Keyboard(RoutedEvent::Live(event)) => self.on_keyboard(event),
            Source::Keyboard(RoutedEvent::Replayed(frame)) => {
                self.write_frame(DeviceRole::Keyboard, &frame);
                None
            }
            Source::Mouse(routed) => {
                self.on_mouse(routed);
                None
            }
            Source::Synthetic(events) => {
                self.write(DeviceRole::Keyboard, &events);
                None
            }
            Source::Error(error) => {
                warn!("Fatal input error: {}", error);
                self.cancel.cancel();
                Some(SessionEnd::Failed(error))
            }
            Source::Cancelled => Some(SessionEnd::Shutdown),
        }
    }

    fn on_keyboard(&mut self, event: InputEvent) -> Option<SessionEnd> {
        self.keys.update(&event);

        match self.remapper.keyboard(&self.keys, &event) {
            KeyboardVerdict::Abort => {
                info!("Abort combination pressed, aborting");
                self.cancel.cancel();
                Some(SessionEnd::Aborted)
            }
            KeyboardVerdict::Consume => None,
            KeyboardVerdict::Forward => {
                self.write(DeviceRole::Keyboard, &[event]);
                None
            }
        }
    }

    fn on_mouse(&mut self, routed: RoutedEvent) {
        for effect in self.remapper.mouse(&self.keys, routed) {
            match effect {
                Effect::Keyboard(events) => self.write(DeviceRole::Keyboard, &events),
                Effect::Mouse(events) => self.write(DeviceRole::Mouse, &events),
                Effect::MouseFrame(frame) => self.write_frame(DeviceRole::Mouse, &frame),
                Effect::Schedule { delay, action } => {
                    self.scheduler.schedule(delay, action);
                }
            }
        }
    }

    fn write(&mut self, role: DeviceRole, events: &[InputEvent]) {
        let result = match role {
            DeviceRole::Keyboard => self.keyboard_out.emit(events),
            DeviceRole::Mouse => self.mouse_out.emit(events),
        };
        self.report_write(role, result);
    }

    fn write_frame(&mut self, role: DeviceRole, frame: &[InputEvent]) {
        let result = match role {
            DeviceRole::Keyboard => self.keyboard_out.emit_frame(frame),
            DeviceRole::Mouse => self.mouse_out.emit_frame(frame),
        };
        self.report_write(role, result);
    }

    fn report_write(&self, role: DeviceRole, result: io::Result<()>) {
        // Write failures drop the events; the session goes on
        if let Err(e) = result {
            if self.cancel.is_cancelled() {
                debug!("Write to virtual {} during shutdown ignored: {}", role, e);
            } else {
                warn!("Failed to write to virtual {}: {}", role, e);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> &KeyState {
        &self.keys
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::{key_event, key_triplet};
    use crate::key_state::tests::key_events;
    use crate::key_state::ABORT_COMBO;
    use crate::listener::DEFAULT_CHANNEL_BUFFER;
    use crate::remapper::DEFAULT_MODIFIER_DELAY;
    use crate::scheduler::Targets;
    use evdev::{EventType, Key};
    use proptest::prelude::*;
    use proptest::test_runner::Config as ProptestConfig;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    /// One write observed on a recording sink
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct Written {
        pub(crate) device: &'static str,
        pub(crate) at: Instant,
        pub(crate) events: Vec<(EventType, u16, i32)>,
    }

    /// Sink that records every write into a log shared by both outputs
    #[derive(Clone)]
    pub(crate) struct RecordingSink {
        device: &'static str,
        log: Arc<Mutex<Vec<Written>>>,
        pub(crate) fail: bool,
    }

    impl RecordingSink {
        pub(crate) fn pair() -> (Self, Self, Arc<Mutex<Vec<Written>>>) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let keyboard = Self {
                device: "keyboard",
                log: log.clone(),
                fail: false,
            };
            let mouse = Self {
                device: "mouse",
                log: log.clone(),
                fail: false,
            };
            (keyboard, mouse, log)
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&mut self, events: &[InputEvent]) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
            }
            self.log.lock().unwrap().push(Written {
                device: self.device,
                at: Instant::now(),
                events: events
                    .iter()
                    .map(|e| (e.event_type(), e.code(), e.value()))
                    .collect(),
            });
            Ok(())
        }
    }

    pub(crate) fn flat(events: &[InputEvent]) -> Vec<(EventType, u16, i32)> {
        events
            .iter()
            .map(|e| (e.event_type(), e.code(), e.value()))
            .collect()
    }

    struct Harness {
        keyboard: mpsc::Sender<RoutedEvent>,
        mouse: mpsc::Sender<RoutedEvent>,
        errors: mpsc::Sender<ListenerError>,
        cancel: CancelToken,
        log: Arc<Mutex<Vec<Written>>>,
        dispatcher: Dispatcher<RecordingSink, RecordingSink>,
    }

    fn harness() -> Harness {
        let (keyboard, keyboard_rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
        let (mouse, mouse_rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
        let (synthetic, synthetic_rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
        let (errors, errors_rx) = mpsc::channel(1);
        let cancel = CancelToken::new();

        let (scheduler, _timer) = Scheduler::spawn(
            Targets {
                mouse: mouse.clone(),
                synthetic,
            },
            cancel.clone(),
        );

        let (keyboard_out, mouse_out, log) = RecordingSink::pair();
        let dispatcher = Dispatcher::new(
            Inputs {
                keyboard: keyboard_rx,
                mouse: mouse_rx,
                synthetic: synthetic_rx,
                errors: errors_rx,
            },
            keyboard_out,
            mouse_out,
            Remapper::default(),
            scheduler,
            cancel.clone(),
        );

        Harness {
            keyboard,
            mouse,
            errors,
            cancel,
            log,
            dispatcher,
        }
    }

    fn key(code: Key, value: i32) -> RoutedEvent {
        RoutedEvent::live(key_event(code, value))
    }

    #[tokio::test]
    async fn test_keyboard_forwarded_in_order_capslock_consumed() {
        let mut h = harness();

        for routed in [
            key(Key::KEY_A, 1),
            key(Key::KEY_CAPSLOCK, 1),
            key(Key::KEY_A, 0),
            key(Key::KEY_CAPSLOCK, 0),
            key(Key::KEY_B, 1),
        ] {
            assert!(h.dispatcher.handle(Source::Keyboard(routed)).is_none());
        }

        let log = h.log.lock().unwrap();
        let written: Vec<_> = log.iter().map(|w| (w.device, w.events[0].1)).collect();
        assert_eq!(
            written,
            vec![
                ("keyboard", Key::KEY_A.code()),
                ("keyboard", Key::KEY_A.code()),
                ("keyboard", Key::KEY_B.code()),
            ]
        );
        assert!(!h.dispatcher.keys().is_pressed(&[Key::KEY_CAPSLOCK]));
    }

    #[tokio::test]
    async fn test_abort_combo_ends_session() {
        let mut h = harness();

        let mut end = None;
        for code in ABORT_COMBO {
            end = h.dispatcher.handle(Source::Keyboard(key(code, 1)));
        }

        assert!(matches!(end, Some(SessionEnd::Aborted)));
        assert!(h.cancel.is_cancelled());

        // F12 completing the combo is not forwarded
        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|w| w.events[0].1 != Key::KEY_F12.code()));
    }

    #[tokio::test]
    async fn test_combo_pressed_one_at_a_time_does_not_abort() {
        let mut h = harness();

        for code in ABORT_COMBO {
            assert!(h.dispatcher.handle(Source::Keyboard(key(code, 1))).is_none());
            assert!(h.dispatcher.handle(Source::Keyboard(key(code, 0))).is_none());
        }
        assert!(!h.cancel.is_cancelled());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn keyboard_without_full_combo_never_ends_session(events in key_events()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let _runtime = rt.enter();
            let mut h = harness();
            let mut model = KeyState::new();

            for (code, value) in events {
                let event = key_event(Key::new(code), value);
                model.update(&event);
                if model.abort_requested() {
                    // Undo and skip the event that would complete the combo
                    model.update(&key_event(Key::new(code), 0));
                    continue;
                }
                prop_assert!(h.dispatcher.handle(Source::Keyboard(RoutedEvent::live(event))).is_none());
            }
            prop_assert!(!h.cancel.is_cancelled());
        }
    }

    #[tokio::test]
    async fn test_error_is_fatal() {
        let mut h = harness();

        let error = ListenerError {
            role: DeviceRole::Mouse,
            source: io::Error::new(io::ErrorKind::Other, "unplugged"),
        };
        let end = h.dispatcher.handle(Source::Error(error));

        assert!(matches!(end, Some(SessionEnd::Failed(ref e)) if e.role == DeviceRole::Mouse));
        assert!(h.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_write_failure_does_not_stop_loop() {
        let mut h = harness();
        h.dispatcher.keyboard_out.fail = true;

        assert!(h
            .dispatcher
            .handle(Source::Keyboard(key(Key::KEY_A, 1)))
            .is_none());
        assert!(!h.cancel.is_cancelled());

        h.dispatcher.keyboard_out.fail = false;
        assert!(h
            .dispatcher
            .handle(Source::Keyboard(key(Key::KEY_B, 1)))
            .is_none());
        assert_eq!(h.log.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capslock_primary_down_end_to_end() {
        let h = harness();
        let start = Instant::now();
        let run = tokio::spawn(h.dispatcher.run());

        h.keyboard.send(key(Key::KEY_CAPSLOCK, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.mouse.send(key(Key::BTN_LEFT, 1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        h.cancel.cancel();
        let (end, _, _) = run.await.unwrap();
        assert!(matches!(end, SessionEnd::Shutdown));

        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 2, "shift triplet, then the replayed middle frame");

        assert_eq!(log[0].device, "keyboard");
        assert_eq!(log[0].events, flat(&key_triplet(Key::KEY_LEFTSHIFT, 1)));

        assert_eq!(log[1].device, "mouse");
        assert_eq!(log[1].events, flat(&key_triplet(Key::BTN_MIDDLE, 1)));
        assert!(log[1].at.duration_since(log[0].at) >= DEFAULT_MODIFIER_DELAY);
        assert!(log[1].at.duration_since(start) >= DEFAULT_MODIFIER_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capslock_primary_up_end_to_end() {
        let h = harness();
        let run = tokio::spawn(h.dispatcher.run());

        h.keyboard.send(key(Key::KEY_CAPSLOCK, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.mouse.send(key(Key::BTN_LEFT, 0)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        h.cancel.cancel();
        run.await.unwrap();

        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].device, "mouse");
        assert_eq!(
            log[0].events,
            vec![(EventType::KEY, Key::BTN_MIDDLE.code(), 0)]
        );
        assert_eq!(log[1].device, "keyboard");
        assert_eq!(log[1].events, flat(&key_triplet(Key::KEY_LEFTSHIFT, 0)));
        assert!(log[1].at.duration_since(log[0].at) >= DEFAULT_MODIFIER_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mouse_without_trigger_is_immediate() {
        let h = harness();
        let run = tokio::spawn(h.dispatcher.run());
        let start = Instant::now();

        h.mouse.send(key(Key::BTN_LEFT, 1)).await.unwrap();
        h.mouse.send(key(Key::BTN_LEFT, 0)).await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.cancel.cancel();
        run.await.unwrap();

        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 2);
        for (written, value) in log.iter().zip([1, 0]) {
            assert_eq!(written.device, "mouse");
            assert_eq!(
                written.events,
                vec![(EventType::KEY, Key::BTN_LEFT.code(), value)]
            );
            assert!(written.at.duration_since(start) < DEFAULT_MODIFIER_DELAY);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_tagged_on_mouse_channel_is_not_retransformed() {
        let h = harness();
        let run = tokio::spawn(h.dispatcher.run());

        h.keyboard.send(key(Key::KEY_CAPSLOCK, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.mouse
            .send(RoutedEvent::replayed(key_triplet(Key::BTN_LEFT, 1).to_vec()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.cancel.cancel();
        run.await.unwrap();

        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].device, "mouse");
        assert_eq!(log[0].events, flat(&key_triplet(Key::BTN_LEFT, 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_error_stops_run() {
        let h = harness();
        let run = tokio::spawn(h.dispatcher.run());

        h.errors
            .send(ListenerError {
                role: DeviceRole::Keyboard,
                source: io::Error::new(io::ErrorKind::Other, "gone"),
            })
            .await
            .unwrap();

        let (end, _, _) = run.await.unwrap();
        assert!(matches!(end, SessionEnd::Failed(_)));
        assert!(h.cancel.is_cancelled());

        // Events after the end are never forwarded
        let _ = h.keyboard.send(key(Key::KEY_A, 1)).await;
        assert!(h.log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_end_to_end_then_nothing_forwarded() {
        let h = harness();
        let run = tokio::spawn(h.dispatcher.run());

        for code in ABORT_COMBO {
            h.keyboard.send(key(code, 1)).await.unwrap();
        }
        let (end, _, _) = run.await.unwrap();
        assert!(matches!(end, SessionEnd::Aborted));

        let _ = h.keyboard.send(key(Key::KEY_A, 1)).await;
        let _ = h.mouse.send(key(Key::BTN_LEFT, 1)).await;
        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|w| w.device == "keyboard"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_delay_drops_pending_release() {
        let h = harness();
        let run = tokio::spawn(h.dispatcher.run());

        h.keyboard.send(key(Key::KEY_CAPSLOCK, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.mouse.send(key(Key::BTN_RIGHT, 0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.cancel.cancel();
        run.await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 1, "only the immediate middle-up was written");
        assert_eq!(log[0].device, "mouse");
    }

    #[test]
    fn test_listener_events_are_live() {
        assert!(matches!(key(Key::KEY_A, 1), RoutedEvent::Live(_)));
    }
}
