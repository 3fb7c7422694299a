//! The supervisor (spec.md 4.F): owns every `Binding`, reacts to hotplug
//! notifications and termination signals, and coordinates shutdown.
//!
//! Runs as a single-threaded cooperative loop (spec.md 5) -- one
//! `tokio::task::LocalSet` on a current-thread runtime -- so the window
//! context can be a plain `Rc<RefCell<_>>` rather than an `Arc<Mutex<_>>`.

use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};

use crate::binding::{Binding, DeviceSelector};
use crate::config::{KeyboardGroup, KeyboardSelector};
use crate::rules::RuleSet;
use crate::udev_monitor;
use crate::window_context::WindowContext;

/// Shutdown retries a bounded number of times when a binding is mid-chord
/// (spec.md 4.F: "up to a bounded number of attempts (~4)").
const SHUTDOWN_MAX_ATTEMPTS: u32 = 4;
const SHUTDOWN_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct Supervisor {
    bindings: Vec<Binding>,
    window: WindowContext,
}

impl Supervisor {
    /// Lowers configuration groups into concrete `Binding`s. A group with
    /// an explicit `keyboards` list gets one binding per named selector. A
    /// group with no `keyboards` key (`KeyboardSelector::All`) is expanded
    /// against the keyboards present right now -- matching the source's
    /// behavior of resolving "all keyboards" once, at config-load time,
    /// rather than re-evaluating it on every hotplug. If none are present
    /// yet, a single selector-less binding is kept so the first keyboard
    /// plugged in afterwards is still picked up (spec.md 9 open question:
    /// binding the first matching device and leaving the rest unbound).
    pub fn from_groups(groups: Vec<KeyboardGroup>) -> Self {
        let window = WindowContext::new();
        let mut bindings = Vec::new();

        for group in groups {
            let rules = Rc::new(group.rules);
            match group.selector {
                KeyboardSelector::Named(names) => {
                    for name in names {
                        bindings.push(Binding::new(
                            DeviceSelector::Named(name),
                            Rc::clone(&rules),
                            window.handle(),
                        ));
                    }
                }
                KeyboardSelector::All => {
                    let present: Vec<String> = evdev::enumerate()
                        .filter(|(_, dev)| {
                            dev.supported_keys().is_some_and(|keys| keys.iter().next().is_some())
                        })
                        .filter_map(|(_, dev)| dev.name().map(str::to_string))
                        .collect();

                    if present.is_empty() {
                        bindings.push(Binding::new(
                            DeviceSelector::AnyKeyboard { resolved_name: None },
                            Rc::clone(&rules),
                            window.handle(),
                        ));
                    } else {
                        for name in present {
                            bindings.push(Binding::new(
                                DeviceSelector::Named(name),
                                Rc::clone(&rules),
                                window.handle(),
                            ));
                        }
                    }
                }
            }
        }

        Supervisor { bindings, window }
    }

    fn grab_all(&mut self) {
        for binding in &mut self.bindings {
            if let Err(e) = binding.grab() {
                warn!("supervisor: grab failed: {e:?}");
            }
        }
    }

    /// Releases every binding, retrying the ones still mid-chord per the
    /// bounded backoff in spec.md 4.F.
    async fn ungrab_all(&mut self) {
        for attempt in 0..SHUTDOWN_MAX_ATTEMPTS {
            let all_done = self.bindings.iter_mut().fold(true, |all_done, binding| {
                binding.ungrab() && all_done
            });
            if all_done {
                return;
            }
            if attempt + 1 < SHUTDOWN_MAX_ATTEMPTS {
                tokio::time::sleep(SHUTDOWN_RETRY_DELAY).await;
            }
        }
        warn!("supervisor: shutdown proceeding with at least one binding still mid-chord");
    }

    /// Runs the event loop until a termination signal arrives, then
    /// drains every binding and returns.
    pub async fn run(mut self, uid: Option<u32>) -> Result<()> {
        let local = tokio::task::LocalSet::new();
        local.run_until(self.run_local(uid)).await
    }

    async fn run_local(&mut self, uid: Option<u32>) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;

        let (mut hotplug_rx, _udev_handle) = udev_monitor::spawn().context("starting udev monitor")?;

        tokio::task::spawn_local(crate::ipc::run(self.window.handle(), uid));

        info!("supervisor: starting, grabbing configured keyboards");
        self.grab_all();

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("supervisor: SIGTERM received, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!("supervisor: SIGINT received, shutting down");
                    break;
                }
                got = hotplug_rx.recv() => {
                    if got.is_none() {
                        warn!("supervisor: udev monitor task ended");
                        continue;
                    }
                    info!("supervisor: hotplug event, re-grabbing keyboards");
                    self.grab_all();
                }
            }
        }

        self.ungrab_all().await;
        info!("supervisor: shutdown complete");
        Ok(())
    }
}
