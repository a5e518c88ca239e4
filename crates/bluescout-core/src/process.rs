//! Process-identity based liveness classification.
//!
//! A scan event row records the (pid, start-time) pair of the process that
//! claimed it. The pid alone is not trustworthy - the OS recycles pids - so
//! every liveness answer also requires the live process's start time to agree
//! with the stored value. This module answers "is this event really running"
//! and provides the force-kill used when a launch pre-empts a prior owner.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::{Error, Result};

/// Stored start times are f64 seconds (fractional); sysinfo reports whole
/// seconds. Agreement within one second is identity.
const START_TIME_TOLERANCE_SECS: f64 = 1.0;

/// Real-world status of a scan event, re-derived on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Never started (or cleanly released): disabled with no owner.
    Waiting,

    /// Inconsistent row: marked enabled but no owner recorded.
    Error,

    /// An owner is recorded but no matching process is alive (dead, or the
    /// pid was recycled by an unrelated process).
    Killed,

    /// The owning process is alive but the row says stop; the monitor task
    /// will notice within one polling interval.
    Zombie,

    /// The owning process is alive and the row says run.
    Running,
}

impl EventStatus {
    /// True when a matching owner process is alive, whatever the flag says.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Zombie)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Waiting => "waiting",
            Self::Error => "error",
            Self::Killed => "killed",
            Self::Zombie => "zombie",
            Self::Running => "running",
        };
        f.write_str(label)
    }
}

/// This process's own identity pair, written into the event row at claim time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessIdentity {
    /// OS process id.
    pub pid: u32,

    /// Process start time, seconds since the epoch.
    pub create_time: f64,
}

/// Classifies event ownership against the live process table.
#[derive(Debug, Default)]
pub struct ProcessOracle;

impl ProcessOracle {
    /// Create a new oracle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify a stored ownership record.
    ///
    /// `stored_pid`/`stored_create_time` come from the event row; `enabled`
    /// is its run flag. See the variant docs for the decision table.
    #[must_use]
    pub fn classify(
        &self,
        stored_pid: Option<i64>,
        stored_create_time: Option<f64>,
        enabled: bool,
    ) -> EventStatus {
        let Some(pid) = stored_pid else {
            return if enabled {
                EventStatus::Error
            } else {
                EventStatus::Waiting
            };
        };

        if self.owner_matches(pid, stored_create_time) {
            if enabled {
                EventStatus::Running
            } else {
                EventStatus::Zombie
            }
        } else {
            EventStatus::Killed
        }
    }

    /// True iff a process with `pid` is alive and its start time agrees with
    /// the stored value. A recycled pid fails the start-time check.
    fn owner_matches(&self, pid: i64, stored_create_time: Option<f64>) -> bool {
        let Ok(pid) = u32::try_from(pid) else {
            return false;
        };
        let Some(actual) = probe_start_time(pid) else {
            return false;
        };
        let Some(stored) = stored_create_time else {
            return false;
        };
        #[allow(clippy::cast_precision_loss)]
        let actual = actual as f64;
        (stored - actual).abs() <= START_TIME_TOLERANCE_SECS
    }

    /// Force-terminate a previously recorded owner. Returns `true` if a kill
    /// signal was delivered.
    pub fn kill(&self, pid: i64) -> bool {
        let Ok(pid) = u32::try_from(pid) else {
            return false;
        };
        let target = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            ProcessRefreshKind::new(),
        );
        system.process(target).is_some_and(sysinfo::Process::kill)
    }

    /// The identity pair of the calling process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessIdentity`] if the process table cannot report
    /// our own entry.
    pub fn self_identity(&self) -> Result<ProcessIdentity> {
        let pid = std::process::id();
        let start_time = probe_start_time(pid).ok_or(Error::ProcessIdentity)?;
        #[allow(clippy::cast_precision_loss)]
        let create_time = start_time as f64;
        Ok(ProcessIdentity { pid, create_time })
    }
}

/// Start time of a live process, or `None` if no such process exists.
///
/// Probes a fresh process table each call so a previously seen (now dead)
/// entry can never answer for a live one.
fn probe_start_time(pid: u32) -> Option<u64> {
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        ProcessRefreshKind::new(),
    );
    system.process(target).map(sysinfo::Process::start_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn own_identity() -> ProcessIdentity {
        ProcessOracle::new().self_identity().unwrap()
    }

    #[test]
    fn test_no_pid_enabled_is_error() {
        let oracle = ProcessOracle::new();
        assert_eq!(oracle.classify(None, None, true), EventStatus::Error);
    }

    #[test]
    fn test_no_pid_disabled_is_waiting() {
        let oracle = ProcessOracle::new();
        assert_eq!(oracle.classify(None, None, false), EventStatus::Waiting);
    }

    #[test]
    fn test_live_matching_process() {
        let oracle = ProcessOracle::new();
        let me = own_identity();
        let pid = Some(i64::from(me.pid));

        assert_eq!(
            oracle.classify(pid, Some(me.create_time), true),
            EventStatus::Running
        );
        assert_eq!(
            oracle.classify(pid, Some(me.create_time), false),
            EventStatus::Zombie
        );
    }

    #[test]
    fn test_recycled_pid_is_killed() {
        let oracle = ProcessOracle::new();
        let me = own_identity();
        let pid = Some(i64::from(me.pid));

        // Live pid, but the stored start time belongs to some other life.
        let stale = Some(me.create_time - 1000.0);
        assert_eq!(oracle.classify(pid, stale, true), EventStatus::Killed);
        assert_eq!(oracle.classify(pid, stale, false), EventStatus::Killed);
    }

    #[test]
    fn test_missing_create_time_is_killed() {
        let oracle = ProcessOracle::new();
        let me = own_identity();
        // Pid alone is never enough.
        assert_eq!(
            oracle.classify(Some(i64::from(me.pid)), None, true),
            EventStatus::Killed
        );
    }

    #[test]
    fn test_dead_process_is_killed() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn true");
        let pid = i64::from(child.id());
        child.wait().expect("wait for child");

        let oracle = ProcessOracle::new();
        // Either the pid is gone, or it was recycled with a different start
        // time; both classify as killed.
        assert_eq!(
            oracle.classify(Some(pid), Some(0.0), true),
            EventStatus::Killed
        );
    }

    #[test]
    fn test_is_running() {
        assert!(EventStatus::Running.is_running());
        assert!(EventStatus::Zombie.is_running());
        assert!(!EventStatus::Waiting.is_running());
        assert!(!EventStatus::Killed.is_running());
        assert!(!EventStatus::Error.is_running());
    }

    #[test]
    fn test_self_identity() {
        let me = own_identity();
        assert_eq!(me.pid, std::process::id());
        assert!(me.create_time > 0.0);
    }
}
