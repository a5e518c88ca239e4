//! The BLE discovery capability.
//!
//! The engine depends on exactly two shapes: a continuous discovery session
//! that streams observations until closed, and a bounded
//! discover-for-a-while call that returns the last observation seen per
//! device. [`BluerRadio`] provides both on Linux via BlueZ; [`MockRadio`]
//! replays scripted observations for tests and for builds without the
//! `bluetooth` feature.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::observation::ScanObservation;

/// Buffered advertisements between the radio pump and the discovery task.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A source of BLE advertisements.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    /// Open a continuous discovery session. Observations arrive on the
    /// returned session until it is closed or dropped.
    async fn start_continuous(&self) -> Result<ScanSession>;

    /// Discover for a bounded window, returning the last observation seen
    /// for each device address.
    async fn discover_for(&self, window: Duration) -> Result<Vec<ScanObservation>>;
}

/// A live continuous discovery session.
///
/// Dropping the session stops the underlying pump task.
#[derive(Debug)]
pub struct ScanSession {
    events: mpsc::Receiver<ScanObservation>,
    pump: JoinHandle<()>,
}

impl ScanSession {
    /// Assemble a session from its observation channel and pump task.
    #[must_use]
    pub fn new(events: mpsc::Receiver<ScanObservation>, pump: JoinHandle<()>) -> Self {
        Self { events, pump }
    }

    /// Next observation, or `None` when the pump has stopped.
    pub async fn next(&mut self) -> Option<ScanObservation> {
        self.events.recv().await
    }

    /// Close the session.
    pub fn close(self) {
        // Drop does the work.
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(feature = "bluetooth")]
pub use bluez::BluerRadio;

#[cfg(feature = "bluetooth")]
mod bluez {
    use std::collections::HashMap;

    use bluer::{Adapter, AdapterEvent, Address};
    use futures::StreamExt;
    use tracing::warn;

    use super::{
        async_trait, mpsc, Duration, Radio, Result, ScanObservation, ScanSession,
        EVENT_CHANNEL_CAPACITY,
    };

    /// BlueZ-backed radio.
    #[derive(Debug, Clone)]
    pub struct BluerRadio {
        adapter: Adapter,
    }

    impl BluerRadio {
        /// Connect to BlueZ and power on the adapter.
        ///
        /// # Errors
        ///
        /// Returns an error if the session cannot be established or the
        /// named adapter does not exist.
        pub async fn new(adapter_name: Option<&str>) -> Result<Self> {
            let session = bluer::Session::new().await?;
            let adapter = match adapter_name {
                Some(name) => session
                    .adapter(name)
                    .map_err(|_| crate::error::Error::AdapterNotFound)?,
                None => session
                    .default_adapter()
                    .await
                    .map_err(|_| crate::error::Error::AdapterNotFound)?,
            };
            adapter.set_powered(true).await?;
            Ok(Self { adapter })
        }

        /// Read the current advertisement-level properties of a discovered
        /// device. Devices without an RSSI have not advertised yet and are
        /// skipped.
        async fn snapshot(
            adapter: &Adapter,
            address: Address,
        ) -> bluer::Result<Option<ScanObservation>> {
            let device = adapter.device(address)?;
            let Some(rssi) = device.rssi().await? else {
                return Ok(None);
            };
            Ok(Some(ScanObservation {
                address: address.to_string(),
                local_name: device.name().await?,
                rssi,
                tx_power: device.tx_power().await?,
                manufacturer_data: device.manufacturer_data().await?.unwrap_or_default(),
                service_data: device.service_data().await?.unwrap_or_default(),
            }))
        }
    }

    #[async_trait]
    impl Radio for BluerRadio {
        async fn start_continuous(&self) -> Result<ScanSession> {
            let mut events = self.adapter.discover_devices_with_changes().await?;
            let adapter = self.adapter.clone();
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

            let pump = tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let AdapterEvent::DeviceAdded(address) = event else {
                        continue;
                    };
                    match BluerRadio::snapshot(&adapter, address).await {
                        Ok(Some(observation)) => {
                            if tx.send(observation).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(%address, "failed to read advertisement: {err}");
                        }
                    }
                }
            });

            Ok(ScanSession::new(rx, pump))
        }

        async fn discover_for(&self, window: Duration) -> Result<Vec<ScanObservation>> {
            let mut events = self.adapter.discover_devices_with_changes().await?;
            let mut found: HashMap<String, ScanObservation> = HashMap::new();

            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    () = &mut deadline => break,
                    maybe = events.next() => {
                        let Some(event) = maybe else { break };
                        let AdapterEvent::DeviceAdded(address) = event else {
                            continue;
                        };
                        match Self::snapshot(&self.adapter, address).await {
                            Ok(Some(observation)) => {
                                found.insert(observation.address.clone(), observation);
                            }
                            Ok(None) => {}
                            Err(err) => {
                                warn!(%address, "failed to read advertisement: {err}");
                            }
                        }
                    }
                }
            }

            Ok(found.into_values().collect())
        }
    }
}

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use mock::MockRadio;

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod mock {
    use std::sync::Mutex;

    use super::{
        async_trait, mpsc, Duration, Radio, Result, ScanObservation, ScanSession,
        EVENT_CHANNEL_CAPACITY,
    };

    /// A radio that replays scripted observations.
    ///
    /// A continuous session emits every scripted observation once, then idles
    /// like a real radio between advertisements. A bounded discover returns
    /// the whole script.
    #[derive(Debug, Default)]
    pub struct MockRadio {
        observations: Mutex<Vec<ScanObservation>>,
    }

    impl MockRadio {
        /// Create a radio that will replay `observations`.
        #[must_use]
        pub fn new(observations: Vec<ScanObservation>) -> Self {
            Self {
                observations: Mutex::new(observations),
            }
        }

        /// Append an observation to the script.
        pub fn push(&self, observation: ScanObservation) {
            self.scripted_mut(|script| script.push(observation));
        }

        fn scripted(&self) -> Vec<ScanObservation> {
            self.observations
                .lock()
                .map_or_else(|poisoned| poisoned.into_inner().clone(), |guard| guard.clone())
        }

        fn scripted_mut(&self, apply: impl FnOnce(&mut Vec<ScanObservation>)) {
            match self.observations.lock() {
                Ok(mut guard) => apply(&mut guard),
                Err(poisoned) => apply(&mut poisoned.into_inner()),
            }
        }
    }

    #[async_trait]
    impl Radio for MockRadio {
        async fn start_continuous(&self) -> Result<ScanSession> {
            let script = self.scripted();
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let pump = tokio::spawn(async move {
                for observation in script {
                    if tx.send(observation).await.is_err() {
                        return;
                    }
                }
                std::future::pending::<()>().await;
            });
            Ok(ScanSession::new(rx, pump))
        }

        async fn discover_for(&self, _window: Duration) -> Result<Vec<ScanObservation>> {
            Ok(self.scripted())
        }
    }
}
