// src/station.rs
//! Station registry data model and access trait.
//!
//! The registry itself is owned by the CMS backend; this crate only reads
//! identity/thresholds/file pointers and writes saturation, precipitation
//! and `last_updated`. Thresholds are never written from here.
//!
//! [`MemoryRegistry`] is the in-process implementation used by the service
//! binary (seeded from a TOML station file) and by tests. Its batch apply is
//! all-or-nothing: every station id is validated before the first write.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-channel saturation ceilings, device-specific. A missing or zero
/// maximum means the channel does not participate in the saturation mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StationThresholds {
    #[serde(default)]
    pub wc1_max: Option<f64>,
    #[serde(default)]
    pub wc2_max: Option<f64>,
    #[serde(default)]
    pub wc3_max: Option<f64>,
    #[serde(default)]
    pub wc4_max: Option<f64>,
}

impl StationThresholds {
    pub fn as_array(&self) -> [Option<f64>; 4] {
        [self.wc1_max, self.wc2_max, self.wc3_max, self.wc4_max]
    }
}

/// The registry's view of one monitoring station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub id: i64,
    pub name: String,
    /// Latest-snapshot file on the remote store (simple layout). Stations
    /// without one are skipped by the heartbeat, not failed.
    #[serde(default)]
    pub ftp_file_path: Option<String>,
    /// Long-horizon history file (banked layout), served by the history
    /// endpoint.
    #[serde(default)]
    pub history_file_path: Option<String>,
    #[serde(flatten)]
    pub thresholds: StationThresholds,
    #[serde(default)]
    pub soil_saturation: Option<f64>,
    #[serde(default)]
    pub precipitation: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

fn default_true() -> bool {
    true
}

/// One station's computed metrics, submitted as part of a cycle's batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdateItem {
    pub station_id: i64,
    pub soil_saturation: f64,
    pub precipitation: f64,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown station id {0}")]
    UnknownStation(i64),
    #[error("registry backend failure: {0}")]
    Backend(String),
}

/// Read/write access to the station fleet.
#[async_trait]
pub trait StationRegistry: Send + Sync {
    async fn list_stations(&self) -> Result<Vec<StationSnapshot>, RegistryError>;

    /// Current per-channel ceilings for one station. Read fresh each cycle
    /// so threshold edits in the CMS take effect without a restart.
    async fn get_station_thresholds(&self, id: i64) -> Result<StationThresholds, RegistryError>;

    /// Apply all items as one consistent batch and return the applied count.
    /// Implementations must not partially apply: any failure leaves every
    /// station untouched. Each applied item stamps the station's
    /// `last_updated` with the time of application, not the sensor time.
    async fn batch_update(&self, items: &[BatchUpdateItem]) -> Result<usize, RegistryError>;
}

/// In-process registry backed by a mutex-guarded station list.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    inner: Mutex<Vec<StationSnapshot>>,
}

impl MemoryRegistry {
    pub fn new(stations: Vec<StationSnapshot>) -> Self {
        Self {
            inner: Mutex::new(stations),
        }
    }

    /// Seed from a TOML station file (`[[stations]]` tables).
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading station file {}", path.display()))?;
        let file: StationFile = toml::from_str(&content)
            .with_context(|| format!("parsing station file {}", path.display()))?;
        Ok(Self::new(file.stations))
    }
}

#[derive(Deserialize)]
struct StationFile {
    stations: Vec<StationSnapshot>,
}

#[async_trait]
impl StationRegistry for MemoryRegistry {
    async fn list_stations(&self) -> Result<Vec<StationSnapshot>, RegistryError> {
        Ok(self.inner.lock().expect("registry mutex poisoned").clone())
    }

    async fn get_station_thresholds(&self, id: i64) -> Result<StationThresholds, RegistryError> {
        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.thresholds)
            .ok_or(RegistryError::UnknownStation(id))
    }

    async fn batch_update(&self, items: &[BatchUpdateItem]) -> Result<usize, RegistryError> {
        let mut stations = self.inner.lock().expect("registry mutex poisoned");

        // Validate every id before touching anything.
        let mut indices = Vec::with_capacity(items.len());
        for item in items {
            let idx = stations
                .iter()
                .position(|s| s.id == item.station_id)
                .ok_or(RegistryError::UnknownStation(item.station_id))?;
            indices.push(idx);
        }

        let now = Utc::now();
        for (item, idx) in items.iter().zip(indices) {
            let station = &mut stations[idx];
            station.soil_saturation = Some(item.soil_saturation);
            station.precipitation = Some(item.precipitation);
            station.last_updated = Some(now);
        }
        Ok(items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: i64) -> StationSnapshot {
        StationSnapshot {
            id,
            name: format!("station-{id}"),
            ftp_file_path: Some(format!("station{id:02}/current.dat")),
            history_file_path: None,
            thresholds: StationThresholds::default(),
            soil_saturation: None,
            precipitation: None,
            last_updated: None,
            is_available: true,
        }
    }

    #[tokio::test]
    async fn batch_update_applies_and_stamps_last_updated() {
        let reg = MemoryRegistry::new(vec![station(1), station(2)]);
        let before = Utc::now();
        let applied = reg
            .batch_update(&[BatchUpdateItem {
                station_id: 2,
                soil_saturation: 61.5,
                precipitation: 3.2,
            }])
            .await
            .unwrap();
        assert_eq!(applied, 1);

        let stations = reg.list_stations().await.unwrap();
        let s2 = stations.iter().find(|s| s.id == 2).unwrap();
        assert_eq!(s2.soil_saturation, Some(61.5));
        assert_eq!(s2.precipitation, Some(3.2));
        assert!(s2.last_updated.unwrap() >= before);
        // Untouched station stays untouched.
        assert!(stations.iter().find(|s| s.id == 1).unwrap().last_updated.is_none());
    }

    #[tokio::test]
    async fn thresholds_are_read_per_station() {
        let mut s = station(1);
        s.thresholds.wc1_max = Some(45.0);
        let reg = MemoryRegistry::new(vec![s]);

        let t = reg.get_station_thresholds(1).await.unwrap();
        assert_eq!(t.wc1_max, Some(45.0));
        assert!(matches!(
            reg.get_station_thresholds(9).await,
            Err(RegistryError::UnknownStation(9))
        ));
    }

    #[tokio::test]
    async fn unknown_id_rolls_back_the_whole_batch() {
        let reg = MemoryRegistry::new(vec![station(1)]);
        let err = reg
            .batch_update(&[
                BatchUpdateItem {
                    station_id: 1,
                    soil_saturation: 10.0,
                    precipitation: 0.0,
                },
                BatchUpdateItem {
                    station_id: 99,
                    soil_saturation: 20.0,
                    precipitation: 0.0,
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownStation(99)));

        // Nothing was partially applied.
        let stations = reg.list_stations().await.unwrap();
        assert!(stations[0].soil_saturation.is_none());
        assert!(stations[0].last_updated.is_none());
    }

    #[test]
    fn station_file_toml_roundtrip() {
        let toml_src = r#"
            [[stations]]
            id = 1
            name = "Upper slope"
            ftp_file_path = "station01/current.dat"
            history_file_path = "station01/history.dat"
            wc1_max = 45.0
            wc2_max = 44.0

            [[stations]]
            id = 2
            name = "Toe of slope"
            is_available = false
        "#;
        let file: StationFile = toml::from_str(toml_src).unwrap();
        assert_eq!(file.stations.len(), 2);
        assert_eq!(file.stations[0].thresholds.wc1_max, Some(45.0));
        assert_eq!(file.stations[0].thresholds.wc3_max, None);
        assert!(file.stations[0].is_available);
        assert!(!file.stations[1].is_available);
        assert!(file.stations[1].ftp_file_path.is_none());
    }
}
