//! Session lifecycle: device setup, the running pipeline and teardown

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use evdev::Device;
use navcap_config::{Config, DeviceSelection, OutputConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::device::{grab_device, open_device, path_for_name, resolve_device, select_device_interactive};
use crate::dispatch::{Dispatcher, EventSink, Inputs, SessionEnd};
use crate::dpi::sync_mouse_dpi;
use crate::error::{DeviceRole, DpiError};
use crate::injector::VirtualDevice;
use crate::listener::{EventSource, Listener, DEFAULT_CHANNEL_BUFFER};
use crate::remapper::Remapper;
use crate::scheduler::{Scheduler, Targets};

/// Pause after interactive selection so the keys used to choose are released
/// before the keyboard is grabbed
pub const SELECTION_SETTLE: Duration = Duration::from_secs(2);

/// How long to wait for udev to create the node of a new virtual device
const CLONE_NODE_TIMEOUT: Duration = Duration::from_secs(1);
const CLONE_NODE_POLL: Duration = Duration::from_millis(50);

/// Effective settings after merging config file, environment and arguments
#[derive(Debug, Clone)]
pub struct Settings {
    pub devices: DeviceSelection,
    pub interactive: bool,
    pub output: OutputConfig,
    pub dpi_sync: bool,
    pub dpi_rules_path: PathBuf,
    pub modifier_delay: Duration,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            devices: config.devices.clone(),
            interactive: false,
            output: config.output.clone(),
            dpi_sync: config.global.dpi_sync,
            dpi_rules_path: config.global.dpi_rules_path.clone(),
            modifier_delay: Duration::from_millis(config.remap.modifier_delay_ms),
        }
    }

    /// Let explicitly given devices win over the configured ones
    pub fn override_devices(&mut self, keyboard: Option<String>, mouse: Option<String>) {
        if keyboard.is_some() {
            self.devices.keyboard = keyboard;
        }
        if mouse.is_some() {
            self.devices.mouse = mouse;
        }
    }
}

/// Device nodes of the physical devices to grab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePaths {
    pub keyboard: PathBuf,
    pub mouse: PathBuf,
}

/// Work out which physical devices to use
pub async fn select_paths(selection: &DeviceSelection, interactive: bool) -> Result<DevicePaths> {
    if interactive {
        let keyboard = tokio::task::spawn_blocking(|| select_device_interactive("Select keyboard:"))
            .await??;
        let mouse =
            tokio::task::spawn_blocking(|| select_device_interactive("Select mouse:")).await??;

        info!("Waiting {:?} for keys to be released", SELECTION_SETTLE);
        tokio::time::sleep(SELECTION_SETTLE).await;
        return Ok(DevicePaths { keyboard, mouse });
    }

    let keyboard = selection
        .keyboard
        .as_deref()
        .context("no keyboard device specified")?;
    let mouse = selection
        .mouse
        .as_deref()
        .context("no mouse device specified")?;

    Ok(DevicePaths {
        keyboard: resolve_device(keyboard)?,
        mouse: resolve_device(mouse)?,
    })
}

async fn find_clone_node(name: &str) -> Result<PathBuf> {
    let deadline = tokio::time::Instant::now() + CLONE_NODE_TIMEOUT;
    loop {
        if let Some(path) = path_for_name(name)? {
            return Ok(path);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!("device not found: {}", name));
        }
        tokio::time::sleep(CLONE_NODE_POLL).await;
    }
}

async fn sync_dpi(source: &Path, clone_name: &str, rules_path: &Path) -> Result<()> {
    let clone = find_clone_node(clone_name).await?;
    match sync_mouse_dpi(source, &clone, rules_path) {
        Ok(()) => Ok(()),
        Err(DpiError::NotFound { path }) => {
            warn!("No MOUSE_DPI for {}, skipping DPI sync", path.display());
            Ok(())
        }
        Err(e) => Err(e).context("Failed to sync mouse DPI"),
    }
}

/// Grabbed physical devices and their virtual clones, ready to run
pub struct Session {
    paths: DevicePaths,
    keyboard: Device,
    mouse: Device,
    keyboard_out: VirtualDevice,
    mouse_out: VirtualDevice,
    remapper: Remapper,
}

impl Session {
    /// Select, open, clone, sync DPI and grab; the first failure wins
    pub async fn setup(settings: &Settings) -> Result<Self> {
        let paths = select_paths(&settings.devices, settings.interactive).await?;

        let mut keyboard = open_device(&paths.keyboard)?;
        let mut mouse = open_device(&paths.mouse)?;

        info!(
            "Cloning {} as '{}'",
            paths.keyboard.display(),
            settings.output.keyboard_name
        );
        let keyboard_out = VirtualDevice::clone_keyboard(&settings.output.keyboard_name, &keyboard)?;
        info!(
            "Cloning {} as '{}'",
            paths.mouse.display(),
            settings.output.mouse_name
        );
        let mouse_out = VirtualDevice::clone_mouse(&settings.output.mouse_name, &mouse)?;

        if settings.dpi_sync {
            sync_dpi(
                &paths.mouse,
                &settings.output.mouse_name,
                &settings.dpi_rules_path,
            )
            .await?;
        } else {
            debug!("DPI sync disabled");
        }

        grab_device(&mut keyboard, &paths.keyboard)?;
        grab_device(&mut mouse, &paths.mouse)?;

        Ok(Self {
            paths,
            keyboard,
            mouse,
            keyboard_out,
            mouse_out,
            remapper: Remapper::new(settings.modifier_delay),
        })
    }

    /// Remap until aborted, interrupted or a device fails, then tear down
    pub async fn run(self) -> Result<SessionEnd> {
        let Self {
            paths,
            keyboard,
            mouse,
            keyboard_out,
            mouse_out,
            remapper,
        } = self;

        let keyboard = keyboard
            .into_event_stream()
            .with_context(|| format!("Failed to stream {}", paths.keyboard.display()))?;
        let mouse = mouse
            .into_event_stream()
            .with_context(|| format!("Failed to stream {}", paths.mouse.display()))?;

        let cancel = CancelToken::new();
        let interrupt = watch_interrupt(cancel.clone());

        info!("Remapping; press LeftCtrl+LeftAlt+LeftShift+F12 to abort");
        let drained = drive(keyboard, mouse, keyboard_out, mouse_out, remapper, cancel).await;
        interrupt.abort();

        release(drained.keyboard, &paths.keyboard);
        release(drained.mouse, &paths.mouse);

        for output in [drained.keyboard_out, drained.mouse_out] {
            info!("Destroying virtual device '{}'", output.name());
        }

        Ok(drained.end)
    }
}

fn watch_interrupt(cancel: CancelToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Interrupted, shutting down");
                    cancel.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    })
}

fn release<S: EventSource>(source: Option<S>, path: &Path) {
    info!("Ungrabbing {}", path.display());
    if let Some(mut source) = source {
        if let Err(e) = source.release() {
            warn!("Failed to ungrab {}: {}", path.display(), e);
        }
    }
    info!("Closing {}", path.display());
}

/// Everything handed back once the pipeline has stopped
pub struct Drained<SK, SM, K, M> {
    pub end: SessionEnd,
    /// `None` if the listener task panicked
    pub keyboard: Option<SK>,
    pub mouse: Option<SM>,
    pub keyboard_out: K,
    pub mouse_out: M,
}

/// Run listeners, scheduler and dispatch loop until the session ends, then
/// wait for every task to stop.
pub async fn drive<SK, SM, K, M>(
    keyboard: SK,
    mouse: SM,
    keyboard_out: K,
    mouse_out: M,
    remapper: Remapper,
    cancel: CancelToken,
) -> Drained<SK, SM, K, M>
where
    SK: EventSource,
    SM: EventSource,
    K: EventSink,
    M: EventSink,
{
    let (keyboard_tx, keyboard_rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
    let (mouse_tx, mouse_rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
    let (synthetic_tx, synthetic_rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
    let (errors_tx, errors_rx) = mpsc::channel(2);

    let (scheduler, timer) = Scheduler::spawn(
        Targets {
            mouse: mouse_tx.clone(),
            synthetic: synthetic_tx,
        },
        cancel.clone(),
    );

    let keyboard_listener = Listener::new(
        DeviceRole::Keyboard,
        keyboard,
        keyboard_tx,
        errors_tx.clone(),
        cancel.clone(),
    )
    .spawn();
    let mouse_listener =
        Listener::new(DeviceRole::Mouse, mouse, mouse_tx, errors_tx, cancel.clone()).spawn();

    let dispatcher = Dispatcher::new(
        Inputs {
            keyboard: keyboard_rx,
            mouse: mouse_rx,
            synthetic: synthetic_rx,
            errors: errors_rx,
        },
        keyboard_out,
        mouse_out,
        remapper,
        scheduler,
        cancel,
    );

    let (end, keyboard_out, mouse_out) = dispatcher.run().await;
    debug!("Dispatch loop ended: {:?}", end);

    let (keyboard, mouse) = futures::future::join(keyboard_listener, mouse_listener).await;
    if let Err(e) = timer.await {
        warn!("Scheduler task failed: {}", e);
    }

    Drained {
        end,
        keyboard: joined(keyboard, DeviceRole::Keyboard),
        mouse: joined(mouse, DeviceRole::Mouse),
        keyboard_out,
        mouse_out,
    }
}

fn joined<S>(result: Result<S, tokio::task::JoinError>, role: DeviceRole) -> Option<S> {
    result
        .map_err(|e| warn!("{} listener task failed: {}", role, e))
        .ok()
}
