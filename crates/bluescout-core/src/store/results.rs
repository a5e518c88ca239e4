//! Device get-or-create and batched persistence of matched observations.
//!
//! `persist_results` is the single write path from the scan pipeline into
//! storage. Device rows are upserted BEFORE the result transaction begins:
//! a failure while inserting result rows rolls those rows back but leaves
//! the devices in place. Device creation is at-least-once; result insertion
//! is exactly-once-or-none per call.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::error::Result;
use crate::observation::ScanObservation;

use super::Store;

/// Rows per INSERT statement. Bounds statement size, not correctness.
pub const INSERT_BATCH_SIZE: usize = 5000;

/// One stored result row: a matched observation flattened to a single
/// payload entry. Exactly one of the manufacturer pair and the service pair
/// is populated.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// When the batch containing this row was received.
    pub received_at: DateTime<Utc>,

    /// MAC address of the observed device (foreign key).
    pub device_addr: String,

    /// Advertised local name at observation time.
    pub local_name: Option<String>,

    /// Company code, present on manufacturer-data rows.
    pub company_code: Option<u16>,

    /// Raw manufacturer payload, present on manufacturer-data rows.
    pub manufacturer_data: Option<Vec<u8>>,

    /// Service UUID, present on service-data rows.
    pub service_uuid: Option<Uuid>,

    /// Raw service payload, present on service-data rows.
    pub service_data: Option<Vec<u8>>,

    /// Advertised transmit power in dBm.
    pub tx_power: Option<i16>,

    /// Signal strength in dBm.
    pub rssi: i16,
}

/// Expand one observation into result rows: one per manufacturer-data entry
/// plus one per service-data entry. No payloads means no rows.
fn expand(obs: &ScanObservation, received_at: DateTime<Utc>) -> Vec<ScanResult> {
    let base = ScanResult {
        received_at,
        device_addr: obs.address.clone(),
        local_name: obs.local_name.clone(),
        company_code: None,
        manufacturer_data: None,
        service_uuid: None,
        service_data: None,
        tx_power: obs.tx_power,
        rssi: obs.rssi,
    };

    let manufacturer = obs.manufacturer_data.iter().map(|(&code, payload)| ScanResult {
        company_code: Some(code),
        manufacturer_data: Some(payload.clone()),
        ..base.clone()
    });
    let service = obs.service_data.iter().map(|(&uuid, payload)| ScanResult {
        service_uuid: Some(uuid),
        service_data: Some(payload.clone()),
        ..base.clone()
    });
    manufacturer.chain(service).collect()
}

impl Store {
    /// Ensure a device row exists for `mac_addr`. Idempotent: concurrent
    /// callers race on the primary key, never on duplicate rows.
    pub async fn get_or_create_device(&self, mac_addr: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_devices (mac_addr) VALUES (?1) ON CONFLICT (mac_addr) DO NOTHING",
        )
        .bind(mac_addr)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist matched observations, returning the rows written.
    ///
    /// All result rows of one call become visible together or not at all.
    /// Device upserts happen first and are not part of that transaction
    /// (see module docs).
    pub async fn persist_results(
        &self,
        matched: &[ScanObservation],
    ) -> Result<Vec<ScanResult>> {
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        let received_at = Utc::now();

        let addresses: BTreeSet<&str> = matched.iter().map(|obs| obs.address.as_str()).collect();
        for address in addresses {
            self.get_or_create_device(address).await?;
        }

        let rows: Vec<ScanResult> = matched
            .iter()
            .flat_map(|obs| expand(obs, received_at))
            .collect();
        if rows.is_empty() {
            return Ok(rows);
        }

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(INSERT_BATCH_SIZE) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO scan_results \
                     (received_at, device_addr, local_name, company_code, \
                      manufacturer_data, service_uuid, service_data, tx_power, rssi) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.received_at)
                    .push_bind(&row.device_addr)
                    .push_bind(&row.local_name)
                    .push_bind(row.company_code.map(i64::from))
                    .push_bind(&row.manufacturer_data)
                    .push_bind(row.service_uuid.map(|uuid| uuid.to_string()))
                    .push_bind(&row.service_data)
                    .push_bind(row.tx_power.map(i64::from))
                    .push_bind(i64::from(row.rssi));
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    fn observation() -> ScanObservation {
        let mut obs = ScanObservation::new("AA:BB:CC:DD:EE:FF", -50);
        obs.manufacturer_data.insert(0xFFFF, vec![0x01, 0x02]);
        obs
    }

    async fn device_count(store: &Store) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM scan_devices")
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    async fn result_count(store: &Store) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM scan_results")
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_device_creation_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();

        store.persist_results(&[observation()]).await.unwrap();
        store.persist_results(&[observation()]).await.unwrap();

        assert_eq!(device_count(&store).await, 1);
        assert_eq!(result_count(&store).await, 2);
    }

    #[tokio::test]
    async fn test_expansion_row_counts() {
        let store = Store::open_in_memory().await.unwrap();

        // Two manufacturer entries and one service entry: 3 rows.
        let mut obs = observation();
        obs.manufacturer_data.insert(0x004C, vec![0xAA]);
        obs.service_data
            .insert("01234567-0123-0123-0123-0123456789ab".parse().unwrap(), vec![0xBB]);

        let rows = store.persist_results(&[obs]).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(result_count(&store).await, 3);

        // Each row carries exactly one payload kind.
        for row in &rows {
            let manufacturer = row.company_code.is_some() && row.manufacturer_data.is_some();
            let service = row.service_uuid.is_some() && row.service_data.is_some();
            assert!(manufacturer ^ service);
        }
    }

    #[tokio::test]
    async fn test_observation_without_payloads_yields_no_rows() {
        let store = Store::open_in_memory().await.unwrap();
        let obs = ScanObservation::new("AA:BB:CC:DD:EE:FF", -50);

        let rows = store.persist_results(&[obs]).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(result_count(&store).await, 0);
        // The device row is still created.
        assert_eq!(device_count(&store).await, 1);
    }

    #[tokio::test]
    async fn test_empty_input_touches_nothing() {
        let store = Store::open_in_memory().await.unwrap();
        let rows = store.persist_results(&[]).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(device_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_persisted_row_contents() {
        let store = Store::open_in_memory().await.unwrap();
        let mut obs = observation();
        obs.local_name = Some("beacon-7".into());
        obs.tx_power = Some(4);

        store.persist_results(&[obs]).await.unwrap();

        let row = sqlx::query(
            "SELECT device_addr, local_name, company_code, manufacturer_data, \
                    service_uuid, service_data, tx_power, rssi \
             FROM scan_results",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();

        assert_eq!(row.get::<String, _>("device_addr"), "AA:BB:CC:DD:EE:FF");
        assert_eq!(row.get::<Option<String>, _>("local_name").as_deref(), Some("beacon-7"));
        assert_eq!(row.get::<Option<i64>, _>("company_code"), Some(0xFFFF));
        assert_eq!(
            row.get::<Option<Vec<u8>>, _>("manufacturer_data"),
            Some(vec![0x01, 0x02])
        );
        assert_eq!(row.get::<Option<String>, _>("service_uuid"), None);
        assert_eq!(row.get::<Option<Vec<u8>>, _>("service_data"), None);
        assert_eq!(row.get::<Option<i64>, _>("tx_power"), Some(4));
        assert_eq!(row.get::<i64, _>("rssi"), -50);
    }

    #[tokio::test]
    async fn test_two_devices_in_one_call() {
        let store = Store::open_in_memory().await.unwrap();
        let mut other = observation();
        other.address = "11:22:33:44:55:66".into();

        let rows = store.persist_results(&[observation(), other]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(device_count(&store).await, 2);
    }
}
