//! Per-device event readers
//!
//! One [`Listener`] runs per physical device. It reads events and forwards
//! them, tagged as live, to that device's channel. A read error is reported
//! once on the shared error channel and ends the listener; cancellation ends
//! it silently.
//!
//! ```text
//! +----------------+      +--------+
//! | keyboard       | ---> | mpsc   | --+
//! | Listener       |      |        |   |     +---------------+
//! +----------------+      +--------+   +---> |               |
//!                                            | Dispatch Loop |
//! +----------------+      +--------+   +---> |               |
//! | mouse          | ---> | mpsc   | --+     +---------------+
//! | Listener       |      |        |   ^
//! +----------------+      +--------+   | replayed events (scheduler)
//! ```

use std::future::Future;
use std::io;
use std::os::fd::AsRawFd;

use evdev::InputEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{DeviceRole, ListenerError};
use crate::event::RoutedEvent;

/// Default channel buffer size for device event channels
pub const DEFAULT_CHANNEL_BUFFER: usize = 64;

/// Anything that yields input events one at a time.
///
/// Implemented for [`evdev::EventStream`]; tests substitute in-memory sources.
pub trait EventSource: Send + 'static {
    fn next_event(&mut self) -> impl Future<Output = io::Result<InputEvent>> + Send;

    /// Give up exclusive access, once reading has stopped
    fn release(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// EVIOCGRAB, as the stream only lends out a shared reference to its device
nix::ioctl_write_int!(eviocgrab, b'E', 0x90);

impl EventSource for evdev::EventStream {
    fn next_event(&mut self) -> impl Future<Output = io::Result<InputEvent>> + Send {
        evdev::EventStream::next_event(self)
    }

    fn release(&mut self) -> io::Result<()> {
        let fd = self.device().as_raw_fd();
        // SAFETY: fd belongs to the device owned by this stream and stays open
        // for the duration of the call
        unsafe { eviocgrab(fd, 0) }.map_err(io::Error::from)?;
        Ok(())
    }
}

/// Reads one physical device until cancelled or a read fails
pub struct Listener<S> {
    role: DeviceRole,
    source: S,
    events: mpsc::Sender<RoutedEvent>,
    errors: mpsc::Sender<ListenerError>,
    cancel: CancelToken,
}

impl<S: EventSource> Listener<S> {
    pub fn new(
        role: DeviceRole,
        source: S,
        events: mpsc::Sender<RoutedEvent>,
        errors: mpsc::Sender<ListenerError>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            role,
            source,
            events,
            errors,
            cancel,
        }
    }

    /// Spawn the listener. The handle yields the source back once the
    /// listener has exited, so the caller can release the device.
    pub fn spawn(self) -> JoinHandle<S> {
        tokio::spawn(self.run())
    }

    /// Run the read loop on the current task
    pub async fn run(self) -> S {
        let Self {
            role,
            mut source,
            events,
            errors,
            cancel,
        } = self;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = source.next_event() => read,
            };

            // A read that completes after cancellation is discarded
            if cancel.is_cancelled() {
                break;
            }

            match read {
                Ok(event) => {
                    if events.send(RoutedEvent::live(event)).await.is_err() {
                        debug!("{} event receiver dropped, stopping listener", role);
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    warn!("Read from {} failed: {}", role, e);
                    let _ = errors.send(ListenerError { role, source: e }).await;
                    break;
                }
            }
        }

        debug!("{} listener stopped", role);
        source
    }
}
