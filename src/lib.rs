//! magickey: grabs a physical keyboard exclusively, mirrors it through a
//! virtual uinput device, and rewrites configured chords on the way
//! through. See `SPEC_FULL.md` for the full module breakdown.

pub mod binding;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod key_catalog;
pub mod rules;
pub mod supervisor;
pub mod udev_monitor;
pub mod window_context;
