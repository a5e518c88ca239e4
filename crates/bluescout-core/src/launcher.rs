//! The single entry point for running a scan event.
//!
//! Launching reconciles any previous owner (killing a live one - a launch
//! pre-empts rather than refuses), claims the event row with this process's
//! identity, runs the coordinator, and releases the claim in a step that is
//! guaranteed to run however the coordinator ends.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::coordinator::ScanCoordinator;
use crate::error::{Error, Result};
use crate::process::ProcessOracle;
use crate::radio::Radio;
use crate::store::events::{validate_event_name, validate_interval, ScanMode};
use crate::store::Store;

/// Per-launch overrides for the event row.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchOptions {
    /// Polling interval in seconds; must be >= 1.0 when set.
    pub interval: Option<f64>,

    /// Discovery strategy; kept from the row when unset.
    pub mode: Option<ScanMode>,
}

/// Refuse to proceed while any event is enabled.
///
/// The admin `run` action calls this before spawning a scan process; it
/// reports the conflict synchronously and mutates nothing.
///
/// # Errors
///
/// Returns [`Error::AlreadyRunning`] naming the enabled event.
pub async fn ensure_no_enabled_event(store: &Store) -> Result<()> {
    match store.enabled_event().await? {
        Some(event) => Err(Error::AlreadyRunning(event.name)),
        None => Ok(()),
    }
}

/// Claims, runs and releases one scan event within the current process.
#[derive(Debug)]
pub struct EventLauncher<R> {
    store: Store,
    radio: Arc<R>,
    oracle: ProcessOracle,
}

impl<R: Radio> EventLauncher<R> {
    /// Create a launcher over the given store and radio.
    pub fn new(store: Store, radio: Arc<R>) -> Self {
        Self {
            store,
            radio,
            oracle: ProcessOracle::new(),
        }
    }

    /// Run the named event for the lifetime of this process.
    ///
    /// Creates the event row if absent, kills a live previous owner, claims
    /// ownership, runs the coordinator and always releases the claim -
    /// including after a coordinator failure or panic.
    ///
    /// # Errors
    ///
    /// Returns validation errors before any state changes, and coordinator
    /// or release failures afterwards.
    pub async fn launch(&self, name: &str, options: LaunchOptions) -> Result<()> {
        validate_event_name(name)?;
        if let Some(interval) = options.interval {
            validate_interval(interval)?;
        }

        let mut event = self.store.get_or_create_event(name).await?;

        let status = self
            .oracle
            .classify(event.pid, event.create_time, event.is_enabled);
        if status.is_running() {
            if let Some(pid) = event.pid {
                warn!(name, pid, %status, "pre-empting previous owner");
                if !self.oracle.kill(pid) {
                    warn!(name, pid, "previous owner vanished before the kill");
                }
            }
        }

        let me = self.oracle.self_identity()?;
        event.is_enabled = true;
        event.pid = Some(i64::from(me.pid));
        event.create_time = Some(me.create_time);
        if let Some(interval) = options.interval {
            event.interval = interval;
        }
        if let Some(mode) = options.mode {
            event.scan_mode = mode;
        }
        self.store.save_event(&event).await?;
        info!(
            name,
            pid = me.pid,
            mode = %event.scan_mode,
            interval = event.interval,
            "claimed scan event"
        );

        let coordinator =
            ScanCoordinator::new(self.store.clone(), Arc::clone(&self.radio), name);
        // Running through a JoinHandle survives a panic inside the
        // coordinator, so the release below happens however the run ends.
        let outcome = tokio::spawn(coordinator.run()).await;
        match &outcome {
            Ok(Ok(())) => info!(name, "scan event finished"),
            Ok(Err(err)) => error!(name, "scan event failed: {err}"),
            Err(join_err) => error!(name, "scan event aborted: {join_err}"),
        }

        let released = self.release(name).await;

        match outcome {
            // A coordinator failure outranks a release failure in the report;
            // both are already logged.
            Ok(result) => result.and(released),
            Err(join_err) => Err(Error::ScanFailed(format!(
                "coordinator aborted: {join_err}"
            ))),
        }
    }

    /// Release the claim: disabled, no owner. Tolerates a row deleted while
    /// the event ran.
    async fn release(&self, name: &str) -> Result<()> {
        let Some(mut event) = self.store.get_event(name).await? else {
            warn!(name, "event row disappeared, nothing to release");
            return Ok(());
        };
        event.is_enabled = false;
        event.pid = None;
        event.create_time = None;
        self.store.save_event(&event).await?;
        info!(name, "released scan event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::observation::ScanObservation;
    use crate::radio::{MockRadio, ScanSession};

    /// A radio whose continuous session cannot be opened.
    #[derive(Debug)]
    struct DeadRadio;

    #[async_trait::async_trait]
    impl Radio for DeadRadio {
        async fn start_continuous(&self) -> Result<ScanSession> {
            Err(Error::AdapterNotFound)
        }

        async fn discover_for(&self, _window: Duration) -> Result<Vec<ScanObservation>> {
            Err(Error::AdapterNotFound)
        }
    }

    fn stop_after(store: &Store, name: &'static str, delay: Duration) {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            store.set_event_enabled(name, false).await.unwrap();
        });
    }

    #[tokio::test]
    async fn test_launch_claims_and_releases() {
        let store = Store::open_in_memory().await.unwrap();
        let launcher = EventLauncher::new(store.clone(), Arc::new(MockRadio::default()));

        stop_after(&store, "E1", Duration::from_millis(300));
        launcher
            .launch(
                "E1",
                LaunchOptions {
                    interval: Some(1.0),
                    ..LaunchOptions::default()
                },
            )
            .await
            .unwrap();

        let event = store.get_event("E1").await.unwrap().unwrap();
        assert!(!event.is_enabled);
        assert_eq!(event.pid, None);
        assert_eq!(event.create_time, None);
        assert!((event.interval - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_launch_releases_after_radio_failure() {
        let store = Store::open_in_memory().await.unwrap();
        let launcher = EventLauncher::new(store.clone(), Arc::new(DeadRadio));

        let err = launcher
            .launch("E1", LaunchOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_bluetooth_error());

        // Cleanup ran despite the failure.
        let event = store.get_event("E1").await.unwrap().unwrap();
        assert!(!event.is_enabled);
        assert_eq!(event.pid, None);
        assert_eq!(event.create_time, None);
    }

    #[tokio::test]
    async fn test_launch_rejects_bad_inputs_without_state_change() {
        let store = Store::open_in_memory().await.unwrap();
        let launcher = EventLauncher::new(store.clone(), Arc::new(MockRadio::default()));

        let err = launcher
            .launch("", LaunchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEventName(_)));

        let err = launcher
            .launch(
                "E1",
                LaunchOptions {
                    interval: Some(0.5),
                    ..LaunchOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInterval(_)));

        // Neither attempt created a row.
        assert!(store.get_event("E1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_launch_claims_directly_over_a_killed_owner() {
        let store = Store::open_in_memory().await.unwrap();

        // A stale claim: live pid, but a start time from another life, so
        // classification is Killed and no kill attempt is made.
        let mut event = store.get_or_create_event("E1").await.unwrap();
        event.is_enabled = true;
        event.pid = Some(i64::from(std::process::id()));
        event.create_time = Some(1.0);
        event.interval = 1.0;
        store.save_event(&event).await.unwrap();

        let launcher = EventLauncher::new(store.clone(), Arc::new(MockRadio::default()));
        stop_after(&store, "E1", Duration::from_millis(300));
        launcher.launch("E1", LaunchOptions::default()).await.unwrap();

        let event = store.get_event("E1").await.unwrap().unwrap();
        assert!(!event.is_enabled);
        assert_eq!(event.pid, None);
    }

    #[tokio::test]
    async fn test_launch_kills_live_previous_owner() {
        use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[Pid::from_u32(pid)]),
            ProcessRefreshKind::new(),
        );
        #[allow(clippy::cast_precision_loss)]
        let start_time = system
            .process(Pid::from_u32(pid))
            .expect("child is alive")
            .start_time() as f64;

        let store = Store::open_in_memory().await.unwrap();
        let mut event = store.get_or_create_event("E1").await.unwrap();
        event.is_enabled = true;
        event.pid = Some(i64::from(pid));
        event.create_time = Some(start_time);
        event.interval = 1.0;
        store.save_event(&event).await.unwrap();

        let launcher = EventLauncher::new(store.clone(), Arc::new(MockRadio::default()));
        stop_after(&store, "E1", Duration::from_millis(300));
        launcher.launch("E1", LaunchOptions::default()).await.unwrap();

        // The previous owner was force-terminated before the claim.
        let status = child.wait().expect("reap child");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_conflict_check_reports_enabled_event_and_mutates_nothing() {
        let store = Store::open_in_memory().await.unwrap();
        ensure_no_enabled_event(&store).await.unwrap();

        let mut event = store.get_or_create_event("E1").await.unwrap();
        event.is_enabled = true;
        event.pid = Some(4242);
        event.create_time = Some(123.0);
        store.save_event(&event).await.unwrap();

        let err = ensure_no_enabled_event(&store).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(format!("{err}").contains("E1"));

        // The original owner's claim is untouched.
        let event = store.get_event("E1").await.unwrap().unwrap();
        assert!(event.is_enabled);
        assert_eq!(event.pid, Some(4242));
        assert_eq!(event.create_time, Some(123.0));
    }
}
