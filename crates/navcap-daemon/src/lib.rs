//! blender-navcap remapping core
//!
//! Holding capslock turns the left and right mouse buttons into the middle
//! button plus shift or ctrl, which is what Blender expects for pan and
//! zoom. Physical devices are grabbed, cloned into virtual uinput devices and
//! every event is routed through a single dispatch loop.

pub mod cancel;
pub mod device;
pub mod dispatch;
pub mod dpi;
pub mod error;
pub mod event;
pub mod injector;
pub mod key_state;
pub mod listener;
pub mod remapper;
pub mod scheduler;
pub mod session;

pub use dispatch::SessionEnd;
pub use session::{Session, Settings};
