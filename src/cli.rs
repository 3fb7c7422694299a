//! CLI surface (spec.md 6) and the diagnostic subcommands that are
//! explicitly out of the core's scope: `--list-devices` and
//! `--read-events`. Both are plain blocking tools, run to completion (or
//! until the user hits ctrl-c) before `main` ever builds a `Supervisor`.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

/// A keyboard remapper daemon: grabs configured keyboards exclusively,
/// mirrors them through virtual devices, and rewrites configured chords.
#[derive(Parser, Debug)]
#[command(name = "magickey", version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// List input devices (path, phys, name) and exit.
    #[arg(short, long = "list-devices")]
    pub list_devices: bool,

    /// Print categorized key events from DEVICE (by path, phys, name, or
    /// numeric /dev/input/eventN suffix) until interrupted.
    #[arg(short = 'e', long = "read-events", value_name = "DEVICE")]
    pub read_events: Option<String>,

    /// Raise logging verbosity to debug.
    #[arg(short, long)]
    pub debug: bool,

    /// Target user id for compositor-socket discovery; defaults to the
    /// process's own uid.
    #[arg(short, long)]
    pub uid: Option<u32>,
}

/// Resolves the configuration file to load: the `-c/--config` flag if
/// given, else `./magickey.conf`, falling back to
/// `~/.config/magickey/conf.json` (spec.md 6). Returns an error naming
/// both candidates when neither exists, matching the source's behavior of
/// logging every path it tried before giving up.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        return Err(anyhow!("config file not found: {}", path.display()));
    }

    let default = PathBuf::from("./magickey.conf");
    if default.exists() {
        return Ok(default);
    }

    let fallback = dirs::config_dir()
        .map(|dir| dir.join("magickey").join("conf.json"))
        .ok_or_else(|| anyhow!("could not determine user config directory"))?;
    if fallback.exists() {
        return Ok(fallback);
    }

    Err(anyhow!(
        "config file not found, tried {} and {}",
        default.display(),
        fallback.display()
    ))
}

/// `-l/--list-devices`: enumerates every input device, printing
/// path/phys/name columns (spec.md 6).
pub fn list_devices() -> Result<()> {
    for (path, device) in evdev::enumerate() {
        println!(
            "{:<25} {:<35} {}",
            path.display(),
            device.physical_path().unwrap_or(""),
            device.name().unwrap_or("")
        );
    }
    Ok(())
}

/// `-e/--read-events DEVICE`: matches one device by path, phys, name, or
/// the numeric suffix of `/dev/input/eventN`, then blocking-reads and
/// prints its `EV_KEY` events until interrupted. Explicitly a diagnostic
/// tool, not part of the cooperative core loop (spec.md 10), so it runs
/// with a plain blocking read rather than sharing the tokio runtime.
pub fn read_events(selector: &str) -> Result<()> {
    let mut found = None;
    for (path, device) in evdev::enumerate() {
        let numeric_suffix = path
            .to_str()
            .and_then(|s| s.strip_prefix("/dev/input/event"));
        if device.name() == Some(selector)
            || device.physical_path() == Some(selector)
            || path.to_str() == Some(selector)
            || numeric_suffix == Some(selector)
        {
            found = Some(device);
            break;
        }
    }

    let mut device = match found {
        Some(device) => device,
        None => {
            println!("Device not found");
            return Ok(());
        }
    };

    println!("press ctrl-c to stop");
    loop {
        for event in device
            .fetch_events()
            .context("reading events from device")?
        {
            if event.event_type() != evdev::EventType::KEY {
                continue;
            }
            println!(
                "{:?} code={} value={}",
                event.event_type(),
                event.code(),
                event.value()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_config_path_accepts_an_existing_explicit_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let resolved = resolve_config_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(resolved, file.path());
    }

    #[test]
    fn resolve_config_path_rejects_a_missing_explicit_path() {
        let result = resolve_config_path(Some(PathBuf::from("/nonexistent/magickey.conf")));
        assert!(result.is_err());
    }
}
