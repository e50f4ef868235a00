//! Configuration data model

use std::path::PathBuf;

use serde::Serialize;

/// Default location of the configuration file (before tilde expansion)
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/blender-navcap/config.kdl";

/// Largest accepted modifier delay; anything longer is noticeable lag
pub const MAX_MODIFIER_DELAY_MS: u64 = 100;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize)]
pub struct Config {
    pub global: GlobalConfig,
    pub devices: DeviceSelection,
    pub output: OutputConfig,
    pub remap: RemapConfig,
}

/// Global settings
#[derive(Debug, Clone, Serialize)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Copy the physical mouse's `MOUSE_DPI` udev property to the virtual mouse
    pub dpi_sync: bool,
    /// Where the generated udev rule is written
    pub dpi_rules_path: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            dpi_sync: true,
            dpi_rules_path: PathBuf::from("/etc/udev/rules.d/90-blender-navcap-dpi.rules"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Which physical devices to grab.
///
/// Each entry is either an evdev node path (`/dev/input/eventN`) or a
/// device name as reported by the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceSelection {
    pub keyboard: Option<String>,
    pub mouse: Option<String>,
}

/// Names given to the virtual devices cloned from the physical ones
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputConfig {
    pub keyboard_name: String,
    pub mouse_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            keyboard_name: "Blender NavCap Keyboard".to_string(),
            mouse_name: "Blender NavCap Mouse".to_string(),
        }
    }
}

/// Timing of the capslock + mouse button remap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemapConfig {
    /// Gap between a synthetic modifier and the rewritten middle button
    pub modifier_delay_ms: u64,
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            modifier_delay_ms: 20,
        }
    }
}
