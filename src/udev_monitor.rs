//! udev hotplug monitor (spec.md 4.F / 6): watches for `input` subsystem
//! events and notifies the supervisor so it can re-`grab()` every binding.
//!
//! The `udev` crate's monitor socket is synchronous, so it is bridged into
//! the cooperative loop through `tokio::task::spawn_blocking` plus a
//! channel, rather than pulling in a second async runtime just for this
//! one collaborator.

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Spawns the blocking udev listener and returns a receiver that yields
/// one notification per device event on the `input` subsystem. The
/// channel is bounded at 1 and notifications are coalesced (a burst of
/// udev events collapses to a single re-grab pass, which is fine since
/// `Binding::grab` is idempotent).
pub fn spawn() -> Result<(mpsc::Receiver<()>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(1);

    let socket = udev::MonitorBuilder::new()
        .context("opening udev monitor")?
        .match_subsystem("input")
        .context("filtering udev monitor to the input subsystem")?
        .listen()
        .context("starting udev monitor")?;

    let handle = tokio::task::spawn_blocking(move || {
        for event in socket {
            debug!("udev: {:?} {:?}", event.event_type(), event.device().syspath());
            if tx.blocking_send(()).is_err() {
                // Receiver dropped: supervisor is shutting down.
                return;
            }
        }
        warn!("udev: monitor socket closed");
    });

    Ok((rx, handle))
}
