//! Device binding: grabs one physical keyboard, mirrors it through a uinput
//! virtual device, and runs the event pump that feeds the translation
//! engine (spec.md 4.E).

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, Device, EventType, InputEvent as EvdevInputEvent, Key};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::engine::{Emission, Engine, InputEvent, KeyState};
use crate::error::BindingErrorKind;
use crate::key_catalog::KeyCode;
use crate::rules::RuleSet;
use crate::window_context::WindowContextHandle;

/// How a binding locates its physical device, re-resolved on every `grab()`
/// call so a replugged device (possibly at a new `/dev/input/eventN` path)
/// is still found.
#[derive(Debug, Clone)]
pub enum DeviceSelector {
    /// Matches by name, `phys`, or filesystem path (spec.md 6); the first
    /// device satisfying the match wins (spec.md 9 open question).
    Named(String),
    /// The default `keyboards`-less group: any device exposing `EV_KEY`.
    /// Once resolved, pinned to that device's name so hotplug re-grabs
    /// don't silently jump to a different physical keyboard.
    AnyKeyboard { resolved_name: Option<String> },
}

impl DeviceSelector {
    fn matches(selector: &str, path: &std::path::Path, device: &Device) -> bool {
        device.name() == Some(selector)
            || device.physical_path() == Some(selector)
            || path.to_str() == Some(selector)
    }
}

fn is_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .is_some_and(|keys| !keys.iter().collect::<Vec<_>>().is_empty())
}

struct ActiveBinding {
    virtual_name: String,
    engine: Rc<RefCell<Engine>>,
    pump: JoinHandle<()>,
}

/// One configured keyboard: a device selector, the rules that apply to it,
/// and (while grabbed) the running pump task.
pub struct Binding {
    selector: DeviceSelector,
    rules: Rc<RuleSet>,
    window: WindowContextHandle,
    active: Option<ActiveBinding>,
}

impl Binding {
    pub fn new(selector: DeviceSelector, rules: Rc<RuleSet>, window: WindowContextHandle) -> Self {
        Binding {
            selector,
            rules,
            window,
            active: None,
        }
    }

    pub fn is_grabbed(&self) -> bool {
        self.active.is_some()
    }

    fn locate(&mut self) -> std::result::Result<Device, BindingErrorKind> {
        match &mut self.selector {
            DeviceSelector::Named(name) => evdev::enumerate()
                .find(|(path, dev)| DeviceSelector::matches(name, path, dev))
                .map(|(_, dev)| dev)
                .ok_or(BindingErrorKind::NotPresent),
            DeviceSelector::AnyKeyboard { resolved_name } => match resolved_name {
                Some(name) => evdev::enumerate()
                    .find(|(_, dev)| dev.name() == Some(name.as_str()))
                    .map(|(_, dev)| dev)
                    .ok_or(BindingErrorKind::NotPresent),
                None => {
                    let found = evdev::enumerate().find(|(_, dev)| is_keyboard(dev));
                    if let Some((_, dev)) = &found {
                        *resolved_name = dev.name().map(str::to_string);
                    }
                    found.map(|(_, dev)| dev).ok_or(BindingErrorKind::NotPresent)
                }
            },
        }
    }

    /// Locates, grabs, and starts the pump task for this binding.
    ///
    /// Tolerant of "already grabbed" (a no-op) and "not present" (logged at
    /// debug, retried on the next hotplug) per spec.md 4.F.
    pub fn grab(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }

        let mut device = match self.locate() {
            Ok(device) => device,
            Err(kind) if kind.is_retryable() => {
                debug!("binding: {kind}, will retry on next hotplug");
                return Ok(());
            }
            Err(other) => return Err(anyhow!(other)),
        };

        let physical_name = device
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| "unknown".to_string());

        if let Err(e) = device.grab() {
            if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::Other {
                let kind = BindingErrorKind::Busy;
                debug!("binding: {physical_name} {kind} ({e}), will retry on next hotplug");
                return Ok(());
            }
            return Err(anyhow::Error::new(e)).context("grabbing physical device");
        }

        let output = build_virtual_device(&device, &self.rules, &physical_name)
            .context("creating virtual device")?;

        let engine = Rc::new(RefCell::new(Engine::new(physical_name.clone())));
        let event_stream = device
            .into_event_stream()
            .context("opening tokio event stream on physical device")?;

        let pump = tokio::task::spawn_local(pump_task(
            event_stream,
            output,
            Rc::clone(&engine),
            Rc::clone(&self.rules),
            self.window.clone(),
            physical_name.clone(),
        ));

        info!("binding: grabbed {physical_name}");
        self.active = Some(ActiveBinding {
            virtual_name: format!("magickey-{physical_name}"),
            engine,
            pump,
        });
        Ok(())
    }

    /// Releases the grab, permitted only while the engine holds no chord
    /// state (spec.md 4.E). Returns `false` (without side effects) when the
    /// engine is mid-chord; the supervisor retries shortly after.
    pub fn ungrab(&mut self) -> bool {
        let Some(active) = &self.active else {
            return true;
        };
        if !active.engine.borrow().is_idle() {
            let kind = BindingErrorKind::NotIdle;
            debug!("binding: {} {kind}, retrying shortly", active.virtual_name);
            return false;
        }
        let active = self.active.take().unwrap();
        active.pump.abort();
        info!("binding: ungrabbed {}", active.virtual_name);
        true
    }
}

fn build_virtual_device(
    physical: &Device,
    rules: &RuleSet,
    physical_name: &str,
) -> Result<VirtualDevice> {
    let mut keys = AttributeSet::<Key>::new();
    if let Some(supported) = physical.supported_keys() {
        for key in supported.iter() {
            keys.insert(key);
        }
    }
    for code in rules.referenced_codes() {
        keys.insert(code.to_evdev());
    }

    VirtualDeviceBuilder::new()
        .context("opening /dev/uinput")?
        .name(&format!("magickey-{physical_name}"))
        .with_keys(&keys)
        .context("setting virtual device key capabilities")?
        .build()
        .context("building virtual device")
}

/// Reads physical events until the stream ends or the task is cancelled,
/// translating each through `engine` and writing the result to `output`.
async fn pump_task(
    mut input: evdev::EventStream,
    mut output: VirtualDevice,
    engine: Rc<RefCell<Engine>>,
    rules: Rc<RuleSet>,
    window: WindowContextHandle,
    physical_name: String,
) {
    loop {
        let event = match input.next().await {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                let kind = BindingErrorKind::ReadFailed;
                warn!("binding: {physical_name} {kind}: {e}");
                return;
            }
            None => {
                debug!("binding: {physical_name} stream ended");
                return;
            }
        };

        let translated = to_engine_event(event);
        let snapshot = window.snapshot();
        let emissions = engine.borrow_mut().handle(translated, &rules, &snapshot);
        if emissions.is_empty() {
            continue;
        }

        let out_events: Vec<EvdevInputEvent> = emissions
            .into_iter()
            .filter_map(|emission| match emission {
                Emission::Key(code, state) => Some(EvdevInputEvent::new(
                    EventType::KEY,
                    code.to_evdev().code(),
                    key_state_value(state),
                )),
                Emission::Syn => Some(EvdevInputEvent::new(EventType::SYNCHRONIZATION, 0, 0)),
                Emission::Other { type_, code, value } => {
                    Some(EvdevInputEvent::new(EventType(type_), code, value))
                }
            })
            .collect();

        if let Err(e) = output.emit(&out_events) {
            warn!("binding: {physical_name} virtual write failed: {e}");
        }
    }
}

fn key_state_value(state: KeyState) -> i32 {
    match state {
        KeyState::Up => 0,
        KeyState::Down => 1,
        KeyState::Hold => 2,
    }
}

fn to_engine_event(event: EvdevInputEvent) -> InputEvent {
    if event.event_type() == EventType::KEY {
        if let Ok(state) = KeyState::try_from(event.value()) {
            return InputEvent::Key(KeyCode(event.code()), state);
        }
    }
    InputEvent::Other {
        type_: event.event_type().0,
        code: event.code(),
        value: event.value(),
    }
}
