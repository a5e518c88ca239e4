//! Filter rule rows and their translation into compiled [`FilterRule`]s.
//!
//! Rules are stored with their regex patterns as text; loading compiles them
//! case-insensitively. The monitor task reloads enabled rules once per tick
//! so edits take effect without restarting the scan process.

use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::filter::{compile_payload_regex, FilterRule};

use super::Store;

/// A filter rule as stored, before regex compilation.
#[derive(Debug, Clone, FromRow)]
struct FilterRow {
    id: i64,
    note: Option<String>,
    is_enabled: bool,
    mac_addr: Option<String>,
    local_name: Option<String>,
    company_code: Option<i64>,
    manufacturer_data: Option<String>,
    service_uuid: Option<String>,
    service_data: Option<String>,
    rssi_min: i64,
    rssi_max: i64,
}

impl FilterRow {
    fn compile(self) -> Result<FilterRule> {
        let manufacturer_data = self
            .manufacturer_data
            .as_deref()
            .map(|pattern| compile_payload_regex(self.id, pattern))
            .transpose()?;
        let service_data = self
            .service_data
            .as_deref()
            .map(|pattern| compile_payload_regex(self.id, pattern))
            .transpose()?;
        let service_uuid = self
            .service_uuid
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|err| Error::ConfigValidation(format!(
                "filter rule {} has an invalid service uuid: {err}",
                self.id
            )))?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let company_code = self.company_code.map(|code| code as u16);
        #[allow(clippy::cast_possible_truncation)]
        let (rssi_min, rssi_max) = (self.rssi_min as i16, self.rssi_max as i16);

        Ok(FilterRule {
            id: self.id,
            note: self.note,
            is_enabled: self.is_enabled,
            mac_addr: self.mac_addr,
            local_name: self.local_name,
            company_code,
            manufacturer_data,
            service_uuid,
            service_data,
            rssi_min,
            rssi_max,
        })
    }
}

impl Store {
    /// Load the enabled filter rules in stable id order, compiling their
    /// payload regexes.
    pub async fn load_enabled_filters(&self) -> Result<Vec<FilterRule>> {
        let rows = sqlx::query_as::<_, FilterRow>(
            "SELECT id, note, is_enabled, mac_addr, local_name, company_code, \
                    manufacturer_data, service_uuid, service_data, rssi_min, rssi_max \
             FROM scan_filters WHERE is_enabled = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FilterRow::compile).collect()
    }

    /// Insert a new filter rule, returning its row id. The rule's `id` field
    /// is ignored.
    pub async fn add_filter(&self, rule: &FilterRule) -> Result<i64> {
        let done = sqlx::query(
            "INSERT INTO scan_filters \
                 (note, is_enabled, mac_addr, local_name, company_code, \
                  manufacturer_data, service_uuid, service_data, rssi_min, rssi_max) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&rule.note)
        .bind(rule.is_enabled)
        .bind(&rule.mac_addr)
        .bind(&rule.local_name)
        .bind(rule.company_code.map(i64::from))
        .bind(rule.manufacturer_data.as_ref().map(|re| re.as_str()))
        .bind(rule.service_uuid.map(|uuid| uuid.to_string()))
        .bind(rule.service_data.as_ref().map(|re| re.as_str()))
        .bind(i64::from(rule.rssi_min))
        .bind(i64::from(rule.rssi_max))
        .execute(&self.pool)
        .await?;
        Ok(done.last_insert_rowid())
    }

    /// All filter rules, enabled or not, in id order.
    pub async fn list_filters(&self) -> Result<Vec<FilterRule>> {
        let rows = sqlx::query_as::<_, FilterRow>(
            "SELECT id, note, is_enabled, mac_addr, local_name, company_code, \
                    manufacturer_data, service_uuid, service_data, rssi_min, rssi_max \
             FROM scan_filters ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FilterRow::compile).collect()
    }
}
