//! Error types for the remapping session

use std::path::PathBuf;

use thiserror::Error;

/// Which physical device a task is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Keyboard,
    Mouse,
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRole::Keyboard => write!(f, "keyboard"),
            DeviceRole::Mouse => write!(f, "mouse"),
        }
    }
}

/// A listener could not read from its device; fatal for the session
#[derive(Debug, Error)]
#[error("failed to read from {role}: {source}")]
pub struct ListenerError {
    pub role: DeviceRole,
    #[source]
    pub source: std::io::Error,
}

/// Errors from copying the mouse DPI property onto the virtual mouse
#[derive(Debug, Error)]
pub enum DpiError {
    /// `udevadm` could not be started or exited unsuccessfully
    #[error("`udevadm {args}` failed: {reason}")]
    Udevadm { args: String, reason: String },

    /// The device has no hwdb DPI entry
    #[error("MOUSE_DPI not found for {path}")]
    NotFound { path: PathBuf },

    /// Writing the udev rule failed
    #[error("Failed to write udev rule {path}: {source}")]
    WriteRule {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
