//! Internal error taxonomy (spec §7). Nothing here crosses `tick()` — the
//! Orchestrator catches every variant and turns it into a skip plus a
//! `TelemetryCounters` increment or validity flag, never a panic.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerError {
    #[error("sample is older than the measurement-valid timeout")]
    Stale,
    #[error("required prerequisite unavailable (no vehicle GPS fix / dist_bottom invalid)")]
    MissingPrerequisite,
    #[error("sensor disabled in AID_MASK")]
    Disabled,
}
