//! Device enumeration, selection and management

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use evdev::{Device, EventType, Key, RelativeAxisType};
use serde::Serialize;

/// Directory holding the evdev nodes
pub const INPUT_DIR: &str = "/dev/input";

/// Coarse classification used for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Keyboard,
    Mouse,
    Other,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Keyboard => write!(f, "keyboard"),
            DeviceKind::Mouse => write!(f, "mouse"),
            DeviceKind::Other => write!(f, "other"),
        }
    }
}

/// Information about an input device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub kind: DeviceKind,
}

impl DeviceInfo {
    /// Get vendor:product string (e.g., "046d:c52b")
    pub fn vendor_product(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor, self.product)
    }
}

fn event_number(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix("event")?
        .parse()
        .ok()
}

/// Enumerate all input devices, ordered by event number
pub fn enumerate_devices() -> Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    let entries =
        std::fs::read_dir(INPUT_DIR).with_context(|| format!("Failed to read {}", INPUT_DIR))?;

    for entry in entries {
        let path = entry?.path();

        // Only look at event* devices
        if event_number(&path).is_none() {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                let id = device.input_id();
                devices.push(DeviceInfo {
                    name: device.name().unwrap_or("Unknown").to_string(),
                    vendor: id.vendor(),
                    product: id.product(),
                    kind: classify(&device),
                    path,
                });
            }
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    devices.sort_by_key(|info| event_number(&info.path));
    Ok(devices)
}

/// Check if a device is a keyboard
pub fn is_keyboard(device: &Device) -> bool {
    device.supported_events().contains(EventType::KEY)
        && device
            .supported_keys()
            .map(|keys| keys.contains(Key::KEY_A))
            .unwrap_or(false)
}

/// Check if a device is a pointer with buttons
pub fn is_mouse(device: &Device) -> bool {
    let has_button = device
        .supported_keys()
        .map(|keys| keys.contains(Key::BTN_LEFT))
        .unwrap_or(false);
    let has_motion = device
        .supported_relative_axes()
        .map(|axes| axes.contains(RelativeAxisType::REL_X))
        .unwrap_or(false);
    has_button && has_motion
}

pub fn classify(device: &Device) -> DeviceKind {
    if is_keyboard(device) {
        DeviceKind::Keyboard
    } else if is_mouse(device) {
        DeviceKind::Mouse
    } else {
        DeviceKind::Other
    }
}

/// Find the node of the first device whose name equals `name`
pub fn path_for_name(name: &str) -> Result<Option<PathBuf>> {
    Ok(enumerate_devices()?
        .into_iter()
        .find(|info| info.name == name)
        .map(|info| info.path))
}

/// Turn a device name or `/dev/input/...` path into a device node path
pub fn resolve_device(name_or_path: &str) -> Result<PathBuf> {
    let candidate = Path::new(name_or_path);
    if candidate.starts_with(INPUT_DIR) && candidate.exists() {
        return Ok(candidate.to_path_buf());
    }

    path_for_name(name_or_path)?.ok_or_else(|| anyhow!("device not found: {}", name_or_path))
}

/// Print `devices` under `header` and read the chosen index from `input`
pub fn prompt_selection<R, W>(
    header: &str,
    devices: &[DeviceInfo],
    input: &mut R,
    output: &mut W,
) -> Result<PathBuf>
where
    R: BufRead,
    W: Write,
{
    if devices.is_empty() {
        bail!("no input devices found");
    }

    writeln!(output, "{}", header)?;
    for (index, info) in devices.iter().enumerate() {
        writeln!(output, "{}: {}: {}", index, info.name, info.path.display())?;
    }
    write!(output, "> ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    line.trim()
        .parse::<usize>()
        .ok()
        .and_then(|index| devices.get(index))
        .map(|info| info.path.clone())
        .ok_or_else(|| anyhow!("invalid selection"))
}

/// Interactively pick a device on the terminal
pub fn select_device_interactive(header: &str) -> Result<PathBuf> {
    let devices = enumerate_devices()?;
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    prompt_selection(header, &devices, &mut stdin.lock(), &mut stdout.lock())
}

/// Open a physical device by path
pub fn open_device(path: &Path) -> Result<Device> {
    tracing::info!("Opening {}", path.display());
    Device::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Grab a device for exclusive access
pub fn grab_device(device: &mut Device, path: &Path) -> Result<()> {
    tracing::info!("Grabbing {}", path.display());
    device
        .grab()
        .with_context(|| format!("Failed to grab {}", path.display()))
}
