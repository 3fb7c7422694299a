//! The small set of error *kinds* the supervisor needs to branch on
//! programmatically (spec.md 7). Everything else that can fail --
//! configuration loading, CLI dispatch, one-shot diagnostics -- just uses
//! `anyhow::Result` with `.context(..)` at the call site, matching the
//! teacher's idiom throughout.

use std::fmt;

/// Distinguishes "retry on next hotplug" from "this binding is done until
/// something external changes" without string-matching an `anyhow::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingErrorKind {
    /// The configured device isn't present right now. Logged at debug,
    /// retried on the next hotplug notification.
    NotPresent,
    /// Another process (or a previous grab of ours) holds the device.
    /// Logged, skipped this round, retried on next hotplug.
    Busy,
    /// The physical device handle hit EOF or a read error. The pump task
    /// ends; the binding releases its handles; the next hotplug re-grabs.
    ReadFailed,
    /// `ungrab()` was attempted while the engine was mid-chord (not
    /// `PRE_MATCH_INIT`). The caller should retry after a short delay.
    NotIdle,
}

impl fmt::Display for BindingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BindingErrorKind::NotPresent => "device not present",
            BindingErrorKind::Busy => "device busy",
            BindingErrorKind::ReadFailed => "physical device read failed",
            BindingErrorKind::NotIdle => "engine not idle",
        };
        f.write_str(s)
    }
}

impl std::error::Error for BindingErrorKind {}

impl BindingErrorKind {
    /// Whether the supervisor should keep this binding around and retry on
    /// the next hotplug/timer tick, as opposed to treating it as fatal.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            BindingErrorKind::NotPresent | BindingErrorKind::Busy | BindingErrorKind::NotIdle
        )
    }
}
