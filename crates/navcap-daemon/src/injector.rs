//! Virtual device injection via uinput
//!
//! Each physical device is cloned into a virtual one with the same id and
//! capabilities. The dispatch loop writes to the clones one event at a time;
//! [`FramedWriter`] collects those events into frames and hands a frame to
//! the device when the `SYN_REPORT` closing it arrives, so frames reach the
//! kernel exactly as the physical device produced them.

use std::io;

use anyhow::{Context, Result};
use evdev::uinput::VirtualDeviceBuilder;
use evdev::{
    AbsInfo, AbsoluteAxisType, AttributeSet, Device, EventType, InputEvent, InputId, Key, MiscType,
    RelativeAxisType, SwitchType, Synchronization, UinputAbsSetup,
};

use crate::dispatch::EventSink;
use crate::remapper::{BUTTON_MODIFIERS, REMAP_TARGET};

/// Writes one complete frame; the implementation terminates it with `SYN_REPORT`
pub trait EmitFrame {
    fn emit_frame(&mut self, events: &[InputEvent]) -> io::Result<()>;
}

impl EmitFrame for evdev::uinput::VirtualDevice {
    fn emit_frame(&mut self, events: &[InputEvent]) -> io::Result<()> {
        // `emit` appends the SYN_REPORT itself
        self.emit(events)
    }
}

/// Buffers events until a `SYN_REPORT`, then writes them as one frame
pub struct FramedWriter<D> {
    device: D,
    pending: Vec<InputEvent>,
}

impl<D: EmitFrame> FramedWriter<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            pending: Vec::new(),
        }
    }

    /// Number of events waiting for their frame to close
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

fn is_sync_report(event: &InputEvent) -> bool {
    event.event_type() == EventType::SYNCHRONIZATION
        && event.code() == Synchronization::SYN_REPORT.0
}

impl<D: EmitFrame> EventSink for FramedWriter<D> {
    fn emit(&mut self, events: &[InputEvent]) -> io::Result<()> {
        for event in events {
            if is_sync_report(event) {
                let frame = std::mem::take(&mut self.pending);
                self.device.emit_frame(&frame)?;
            } else {
                self.pending.push(*event);
            }
        }
        Ok(())
    }

    /// Written straight through; a half-received frame stays buffered
    fn emit_frame(&mut self, frame: &[InputEvent]) -> io::Result<()> {
        let body: Vec<InputEvent> = frame
            .iter()
            .filter(|event| !is_sync_report(event))
            .copied()
            .collect();
        self.device.emit_frame(&body)
    }
}

/// Absolute axis together with the range reported by the source device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsAxis {
    pub axis: AbsoluteAxisType,
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

impl AbsAxis {
    fn setup(&self) -> UinputAbsSetup {
        let info = AbsInfo::new(
            self.value,
            self.minimum,
            self.maximum,
            self.fuzz,
            self.flat,
            self.resolution,
        );
        UinputAbsSetup::new(self.axis, info)
    }
}

/// Everything a virtual clone registers with uinput
pub struct Capabilities {
    keys: AttributeSet<Key>,
    relative_axes: AttributeSet<RelativeAxisType>,
    absolute_axes: Vec<AbsAxis>,
    switches: AttributeSet<SwitchType>,
    misc: AttributeSet<MiscType>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            keys: AttributeSet::new(),
            relative_axes: AttributeSet::new(),
            absolute_axes: Vec::new(),
            switches: AttributeSet::new(),
            misc: AttributeSet::new(),
        }
    }
}

impl Capabilities {
    /// Read the capabilities of a physical device
    pub fn of(device: &Device) -> io::Result<Self> {
        let mut caps = Self::default();

        if let Some(keys) = device.supported_keys() {
            keys.iter().for_each(|key| caps.keys.insert(key));
        }
        if let Some(axes) = device.supported_relative_axes() {
            axes.iter().for_each(|axis| caps.relative_axes.insert(axis));
        }
        if let Some(switches) = device.supported_switches() {
            switches.iter().for_each(|switch| caps.switches.insert(switch));
        }
        if let Some(misc) = device.misc_properties() {
            misc.iter().for_each(|misc| caps.misc.insert(misc));
        }

        if let Some(axes) = device.supported_absolute_axes() {
            let state = device.get_abs_state()?;
            for axis in axes.iter() {
                let info = &state[axis.0 as usize];
                caps.absolute_axes.push(AbsAxis {
                    axis,
                    value: info.value,
                    minimum: info.minimum,
                    maximum: info.maximum,
                    fuzz: info.fuzz,
                    flat: info.flat,
                    resolution: info.resolution,
                });
            }
        }

        Ok(caps)
    }

    /// Add the synthetic modifiers and the scan marker
    pub fn prepare_keyboard(&mut self) {
        for (_, modifier) in BUTTON_MODIFIERS {
            self.keys.insert(modifier);
        }
        self.misc.insert(MiscType::MSC_SCAN);
    }

    /// Add the remap target button and the scan marker
    pub fn prepare_mouse(&mut self) {
        self.keys.insert(REMAP_TARGET);
        self.misc.insert(MiscType::MSC_SCAN);
    }

    fn configure<'a>(
        &self,
        mut builder: VirtualDeviceBuilder<'a>,
    ) -> io::Result<VirtualDeviceBuilder<'a>> {
        if self.keys.iter().next().is_some() {
            builder = builder.with_keys(&self.keys)?;
        }
        if self.relative_axes.iter().next().is_some() {
            builder = builder.with_relative_axes(&self.relative_axes)?;
        }
        for axis in &self.absolute_axes {
            builder = builder.with_absolute_axis(&axis.setup())?;
        }
        if self.switches.iter().next().is_some() {
            builder = builder.with_switches(&self.switches)?;
        }
        if self.misc.iter().next().is_some() {
            builder = builder.with_msc(&self.misc)?;
        }
        Ok(builder)
    }
}

/// A virtual clone of a physical input device
pub struct VirtualDevice {
    name: String,
    writer: FramedWriter<evdev::uinput::VirtualDevice>,
}

impl VirtualDevice {
    /// Clone a keyboard, making sure the synthetic modifiers can be emitted
    pub fn clone_keyboard(name: &str, source: &Device) -> Result<Self> {
        let mut caps = read_capabilities(name, source)?;
        caps.prepare_keyboard();
        Self::build(name, source.input_id(), &caps)
    }

    /// Clone a mouse, making sure the remap target button can be emitted
    pub fn clone_mouse(name: &str, source: &Device) -> Result<Self> {
        let mut caps = read_capabilities(name, source)?;
        caps.prepare_mouse();
        Self::build(name, source.input_id(), &caps)
    }

    fn build(name: &str, input_id: InputId, caps: &Capabilities) -> Result<Self> {
        let builder = VirtualDeviceBuilder::new()
            .context("Failed to open /dev/uinput")?
            .name(name)
            .input_id(input_id);

        let device = caps
            .configure(builder)
            .with_context(|| format!("Failed to set capabilities for '{}'", name))?
            .build()
            .with_context(|| format!("Failed to create virtual device '{}'", name))?;

        Ok(Self {
            name: name.to_string(),
            writer: FramedWriter::new(device),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn read_capabilities(name: &str, source: &Device) -> Result<Capabilities> {
    Capabilities::of(source)
        .with_context(|| format!("Failed to read capabilities for '{}'", name))
}

impl EventSink for VirtualDevice {
    fn emit(&mut self, events: &[InputEvent]) -> io::Result<()> {
        self.writer.emit(events)
    }

    fn emit_frame(&mut self, frame: &[InputEvent]) -> io::Result<()> {
        self.writer.emit_frame(frame)
    }
}
