//! The unit of work produced by the radio: one decoded advertisement.
//!
//! A [`ScanObservation`] is ephemeral - it flows from the radio through the
//! filter set into the result writer and is never stored as-is. The payload
//! maps mirror what a BLE advertisement actually carries: manufacturer
//! payloads keyed by 16-bit company code and service payloads keyed by
//! service UUID.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single decoded BLE advertisement from one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanObservation {
    /// Device MAC address, e.g. `AA:BB:CC:DD:EE:FF`.
    pub address: String,

    /// Advertised local name, if the device broadcasts one.
    pub local_name: Option<String>,

    /// Received signal strength in dBm (typically negative).
    pub rssi: i16,

    /// Advertised transmit power in dBm, if present.
    pub tx_power: Option<i16>,

    /// Manufacturer-specific payloads keyed by company code.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,

    /// Service-specific payloads keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
}

impl ScanObservation {
    /// Create an observation carrying only an address and RSSI.
    ///
    /// Payload maps start empty; useful as a starting point when decoding
    /// radio events incrementally.
    #[must_use]
    pub fn new(address: impl Into<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            local_name: None,
            rssi,
            tx_power: None,
            manufacturer_data: HashMap::new(),
            service_data: HashMap::new(),
        }
    }
}

/// Lowercase hex encoding of a payload, the form filter regexes match against.
#[must_use]
pub fn hex_encode(data: &[u8]) -> String {
    use std::fmt::Write;

    data.iter().fold(String::with_capacity(data.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
