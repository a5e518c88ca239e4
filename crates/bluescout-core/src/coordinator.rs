//! The scan/monitor coordination engine.
//!
//! Two cooperative tasks share one cancellation signal:
//!
//! - the **discovery task** streams observations from the radio, runs each
//!   through the current filter set and persists the matches;
//! - the **monitor task** sleeps for the configured polling interval,
//!   re-reads the event row, stops everything when `is_enabled` flips off,
//!   and otherwise publishes a freshly loaded filter set.
//!
//! Discovery never cancels on its own; the monitor (or failure propagation)
//! is the only producer of the stop signal. In interval mode discovery is
//! replaced by a bounded discover call once per monitor tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::filter::FilterSet;
use crate::radio::Radio;
use crate::store::events::{ScanEvent, ScanMode};
use crate::store::Store;

/// Runs one scan event to completion.
#[derive(Debug)]
pub struct ScanCoordinator<R> {
    store: Store,
    radio: Arc<R>,
    name: String,
}

impl<R: Radio> ScanCoordinator<R> {
    /// Create a coordinator for the named event.
    pub fn new(store: Store, radio: Arc<R>, name: impl Into<String>) -> Self {
        Self {
            store,
            radio,
            name: name.into(),
        }
    }

    /// Run until the event is stopped, its row disappears, or a task fails.
    ///
    /// # Errors
    ///
    /// Propagates radio and storage failures; the caller owns cleanup.
    pub async fn run(self) -> Result<()> {
        let event = self
            .store
            .get_event(&self.name)
            .await?
            .ok_or_else(|| Error::EventNotFound(self.name.clone()))?;

        match event.scan_mode {
            ScanMode::Continuous => self.run_continuous(&event).await,
            ScanMode::Interval => self.run_interval(event).await,
        }
    }

    async fn run_continuous(&self, event: &ScanEvent) -> Result<()> {
        let cancel = CancellationToken::new();
        let initial = FilterSet::new(self.store.load_enabled_filters().await?);
        let (filters_tx, filters_rx) = watch::channel(initial);

        tokio::try_join!(
            self.discovery_task(&cancel, filters_rx),
            self.monitor_task(&cancel, event.interval, &filters_tx),
        )?;
        Ok(())
    }

    /// Stream observations through filter and persistence until cancelled.
    async fn discovery_task(
        &self,
        cancel: &CancellationToken,
        filters: watch::Receiver<FilterSet>,
    ) -> Result<()> {
        let mut session = self.radio.start_continuous().await?;
        info!(event = %self.name, "discovery session open");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                maybe = session.next() => {
                    let Some(observation) = maybe else {
                        return Err(Error::ScanFailed(
                            "discovery stream ended unexpectedly".into(),
                        ));
                    };
                    let matched = filters.borrow().filter(std::slice::from_ref(&observation));
                    if !matched.is_empty() {
                        let rows = self.store.persist_results(&matched).await?;
                        debug!(event = %self.name, rows = rows.len(), "persisted matches");
                    }
                }
            }
        }

        session.close();
        info!(event = %self.name, "discovery session closed");
        Ok(())
    }

    /// Poll the event row; cancel discovery when the run flag flips off.
    async fn monitor_task(
        &self,
        cancel: &CancellationToken,
        interval: f64,
        filters: &watch::Sender<FilterSet>,
    ) -> Result<()> {
        if interval <= 0.0 {
            // The event is explicitly not monitored: discovery runs until the
            // process is killed externally.
            info!(event = %self.name, "polling interval is 0, event is not monitored");
            return Ok(());
        }

        let result = self.monitor_loop(interval, filters).await;
        // Whatever ended the loop - flag flip, deleted row or storage
        // failure - discovery must unblock.
        cancel.cancel();
        result
    }

    async fn monitor_loop(&self, interval: f64, filters: &watch::Sender<FilterSet>) -> Result<()> {
        loop {
            tokio::time::sleep(Duration::from_secs_f64(interval)).await;

            let Some(event) = self.store.get_event(&self.name).await? else {
                warn!(event = %self.name, "event row deleted, stopping");
                return Ok(());
            };
            if !event.is_enabled {
                info!(event = %self.name, "is_enabled switched to false");
                return Ok(());
            }

            let rules = self.store.load_enabled_filters().await?;
            let _ = filters.send(FilterSet::new(rules));
        }
    }

    /// Interval mode: one bounded discover per tick instead of a continuous
    /// session. An interval of 0 never enters the loop.
    async fn run_interval(&self, mut event: ScanEvent) -> Result<()> {
        let mut filters = FilterSet::new(self.store.load_enabled_filters().await?);

        while event.interval > 0.0 {
            if !event.is_enabled {
                info!(event = %self.name, "is_enabled switched to false");
                break;
            }

            let observations = self
                .radio
                .discover_for(Duration::from_secs_f64(event.interval))
                .await?;
            let matched = filters.filter(&observations);
            if !matched.is_empty() {
                let rows = self.store.persist_results(&matched).await?;
                debug!(event = %self.name, rows = rows.len(), "persisted matches");
            }

            let Some(next) = self.store.get_event(&self.name).await? else {
                warn!(event = %self.name, "event row deleted, stopping");
                break;
            };
            event = next;
            filters = FilterSet::new(self.store.load_enabled_filters().await?);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterRule;
    use crate::observation::ScanObservation;
    use crate::radio::MockRadio;

    async fn store_with_event(interval: f64, mode: ScanMode) -> Store {
        let store = Store::open_in_memory().await.unwrap();
        let mut event = store.get_or_create_event("E1").await.unwrap();
        event.is_enabled = true;
        event.interval = interval;
        event.scan_mode = mode;
        store.save_event(&event).await.unwrap();
        store.add_filter(&FilterRule::default()).await.unwrap();
        store
    }

    fn beacon() -> ScanObservation {
        let mut obs = ScanObservation::new("AA:BB:CC:DD:EE:FF", -50);
        obs.manufacturer_data.insert(0xFFFF, vec![0x01, 0x02]);
        obs
    }

    async fn result_count(store: &Store) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM scan_results")
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_continuous_run_persists_and_stops_on_flag_flip() {
        let store = store_with_event(1.0, ScanMode::Continuous).await;
        let radio = Arc::new(MockRadio::new(vec![beacon()]));
        let coordinator = ScanCoordinator::new(store.clone(), radio, "E1");

        let stopper = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                store.set_event_enabled("E1", false).await.unwrap();
            })
        };

        tokio::time::timeout(Duration::from_secs(10), coordinator.run())
            .await
            .expect("coordinator must stop after the flag flips")
            .unwrap();
        stopper.await.unwrap();

        assert_eq!(result_count(&store).await, 1);
    }

    #[tokio::test]
    async fn test_continuous_stops_when_event_row_deleted() {
        let store = store_with_event(1.0, ScanMode::Continuous).await;
        let radio = Arc::new(MockRadio::default());
        let coordinator = ScanCoordinator::new(store.clone(), radio, "E1");

        let deleter = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                sqlx::query("DELETE FROM scan_events WHERE name = 'E1'")
                    .execute(store.pool())
                    .await
                    .unwrap();
            })
        };

        tokio::time::timeout(Duration::from_secs(10), coordinator.run())
            .await
            .expect("coordinator must stop after the row disappears")
            .unwrap();
        deleter.await.unwrap();
    }

    #[tokio::test]
    async fn test_continuous_with_no_rules_persists_nothing() {
        let store = Store::open_in_memory().await.unwrap();
        let mut event = store.get_or_create_event("E1").await.unwrap();
        event.is_enabled = true;
        event.interval = 1.0;
        store.save_event(&event).await.unwrap();

        let radio = Arc::new(MockRadio::new(vec![beacon()]));
        let coordinator = ScanCoordinator::new(store.clone(), radio, "E1");

        let stopper = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                store.set_event_enabled("E1", false).await.unwrap();
            })
        };

        tokio::time::timeout(Duration::from_secs(10), coordinator.run())
            .await
            .unwrap()
            .unwrap();
        stopper.await.unwrap();

        assert_eq!(result_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_interval_mode_persists_then_stops() {
        let store = store_with_event(1.0, ScanMode::Interval).await;
        let radio = Arc::new(MockRadio::new(vec![beacon()]));
        let coordinator = ScanCoordinator::new(store.clone(), radio, "E1");

        let stopper = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                store.set_event_enabled("E1", false).await.unwrap();
            })
        };

        tokio::time::timeout(Duration::from_secs(10), coordinator.run())
            .await
            .expect("interval loop must notice the flag flip")
            .unwrap();
        stopper.await.unwrap();

        // At least one tick persisted the scripted beacon.
        assert!(result_count(&store).await >= 1);
    }

    #[tokio::test]
    async fn test_run_fails_for_missing_event() {
        let store = Store::open_in_memory().await.unwrap();
        let radio = Arc::new(MockRadio::default());
        let coordinator = ScanCoordinator::new(store, radio, "ghost");

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, Error::EventNotFound(_)));
    }
}
