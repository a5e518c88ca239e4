//! # bluescout-core
//!
//! Core engine for bluescout, a BLE advertisement scanner with rule-based
//! filtering and sqlite persistence.
//!
//! This crate provides:
//! - Continuous and interval-polling BLE discovery (BlueZ via `bluer`)
//! - Filter rules matched against advertisements (MAC, name, payloads, RSSI)
//! - Batched persistence of matches with lazy device registration
//! - Process-identity based ownership of named scan events
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`radio`] - the BLE discovery capability (continuous session + bounded discover)
//! - [`observation`] - the decoded advertisement flowing through the pipeline
//! - [`filter`] - filter rules and rule-set evaluation
//! - [`store`] - sqlite persistence (events, filter rules, devices, results)
//! - [`process`] - pid + start-time liveness classification
//! - [`coordinator`] - the discovery/monitor task pair sharing one stop signal
//! - [`launcher`] - claim, run and release of one scan event per process
//! - [`config`] - application configuration
//! - [`error`] - unified error type

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod launcher;
pub mod observation;
pub mod process;
pub mod radio;
pub mod store;

// Re-export primary types for convenience
pub use config::{default_config_path, default_database_path, is_valid_mac_address, AppConfig};
pub use coordinator::ScanCoordinator;
pub use error::{Error, Result};
pub use filter::{FilterRule, FilterSet};
pub use launcher::{ensure_no_enabled_event, EventLauncher, LaunchOptions};
pub use observation::ScanObservation;
pub use process::{EventStatus, ProcessIdentity, ProcessOracle};
#[cfg(feature = "bluetooth")]
pub use radio::BluerRadio;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use radio::MockRadio;
pub use radio::{Radio, ScanSession};
pub use store::events::{ScanEvent, ScanMode, DEFAULT_INTERVAL};
pub use store::results::ScanResult;
pub use store::Store;
