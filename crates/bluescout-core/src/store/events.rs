//! Scan event rows: the durable record of who owns a named scan.
//!
//! The row is the single source of truth for "should this process keep
//! running". The launcher claims it (enabled + own identity), the monitor
//! task polls it, the stop action flips `is_enabled`, and the launcher's
//! guaranteed cleanup releases it.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{Error, Result};

use super::Store;

/// Default polling interval of the monitor loop, in seconds.
pub const DEFAULT_INTERVAL: f64 = 3.0;

/// Smallest accepted polling interval, in seconds.
pub const MIN_INTERVAL: f64 = 1.0;

/// Maximum length of an event name.
pub const MAX_EVENT_NAME_LEN: usize = 32;

/// How the coordinator drives discovery for an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// One continuous discovery session; advertisements arrive as a stream.
    #[default]
    Continuous,

    /// A bounded discover-for-interval call once per monitor tick.
    Interval,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continuous => f.write_str("continuous"),
            Self::Interval => f.write_str("interval"),
        }
    }
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "continuous" => Ok(Self::Continuous),
            "interval" => Ok(Self::Interval),
            other => Err(format!(
                "unknown scan mode '{other}', expected 'continuous' or 'interval'"
            )),
        }
    }
}

/// One named scan event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScanEvent {
    /// Event name, the primary key.
    pub name: String,

    /// Whether the event should be running.
    pub is_enabled: bool,

    /// Owning process id, if claimed.
    pub pid: Option<i64>,

    /// Owning process start time (seconds since epoch), paired with `pid`
    /// to detect pid reuse.
    pub create_time: Option<f64>,

    /// Monitor polling interval in seconds. A stored 0.0 means the event is
    /// not monitored.
    pub interval: f64,

    /// Discovery strategy for this event.
    pub scan_mode: ScanMode,
}

/// Validate an event name before touching storage.
///
/// # Errors
///
/// Returns [`Error::InvalidEventName`] when empty or longer than
/// [`MAX_EVENT_NAME_LEN`].
pub fn validate_event_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_EVENT_NAME_LEN {
        return Err(Error::InvalidEventName(name.to_string()));
    }
    Ok(())
}

/// Validate a polling interval override.
///
/// # Errors
///
/// Returns [`Error::InvalidInterval`] below [`MIN_INTERVAL`].
pub fn validate_interval(interval: f64) -> Result<()> {
    if interval < MIN_INTERVAL || !interval.is_finite() {
        return Err(Error::InvalidInterval(interval));
    }
    Ok(())
}

const EVENT_COLUMNS: &str = "name, is_enabled, pid, create_time, interval, scan_mode";

impl Store {
    /// Fetch an event by name, creating it with defaults if absent.
    pub async fn get_or_create_event(&self, name: &str) -> Result<ScanEvent> {
        sqlx::query("INSERT INTO scan_events (name) VALUES (?1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        self.get_event(name)
            .await?
            .ok_or_else(|| Error::EventNotFound(name.to_string()))
    }

    /// Fetch an event by name.
    pub async fn get_event(&self, name: &str) -> Result<Option<ScanEvent>> {
        let event = sqlx::query_as::<_, ScanEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM scan_events WHERE name = ?1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    /// Persist every field of an event row.
    pub async fn save_event(&self, event: &ScanEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_events (name, is_enabled, pid, create_time, interval, scan_mode) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (name) DO UPDATE SET \
                 is_enabled = excluded.is_enabled, \
                 pid = excluded.pid, \
                 create_time = excluded.create_time, \
                 interval = excluded.interval, \
                 scan_mode = excluded.scan_mode",
        )
        .bind(&event.name)
        .bind(event.is_enabled)
        .bind(event.pid)
        .bind(event.create_time)
        .bind(event.interval)
        .bind(event.scan_mode)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The currently enabled event, if any. Used by the admin conflict check.
    pub async fn enabled_event(&self) -> Result<Option<ScanEvent>> {
        let event = sqlx::query_as::<_, ScanEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM scan_events WHERE is_enabled = 1 ORDER BY name LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    /// All events, for the status listing.
    pub async fn list_events(&self) -> Result<Vec<ScanEvent>> {
        let events = sqlx::query_as::<_, ScanEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM scan_events ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Flip only the run flag of an event. Returns `false` when the event
    /// does not exist.
    pub async fn set_event_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let done = sqlx::query("UPDATE scan_events SET is_enabled = ?2 WHERE name = ?1")
            .bind(name)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
