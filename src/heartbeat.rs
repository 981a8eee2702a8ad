// src/heartbeat.rs
//! Recurring, overlap-guarded ingestion cycle.
//!
//! On activation the scheduler loads the station list (once) and runs a
//! cycle immediately, then again on a fixed interval. At most one cycle runs
//! at a time: a tick arriving while a cycle is in flight is dropped, not
//! queued. Within a cycle, stations are fetched and computed concurrently —
//! they share no mutable state until the single batch submission at the end.
//!
//! A failure for one station is logged with its identity and file path and
//! excludes only that station from the cycle's batch. There is no poison
//! state: every cycle is a clean, independent attempt against the full raw
//! file, so transient remote failures self-heal on the next tick. (The full
//! re-read also means cycle cost grows with the remote file; `duration_ms`
//! in the cycle history is the number to watch.)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::batch::BatchUpdater;
use crate::history::{now_unix, CycleHistory, CycleSummary};
use crate::saturation::compute_station_metrics;
use crate::station::{BatchUpdateItem, RegistryError, StationRegistry, StationSnapshot};
use crate::table::{parse_table, Layout, ParseError};
use crate::transport::{FileTransport, TransportError};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("heartbeat_cycles_total", "Completed heartbeat cycles.");
        describe_counter!(
            "heartbeat_overlap_skipped_total",
            "Ticks dropped because a cycle was still running."
        );
        describe_counter!(
            "station_failures_total",
            "Per-station fetch/parse/compute failures."
        );
        describe_counter!("batch_applied_total", "Station records applied in batches.");
        describe_gauge!(
            "heartbeat_last_run_ts",
            "Unix ts when a heartbeat cycle last completed."
        );
    });
}

#[derive(Debug, Clone)]
pub struct HeartbeatCfg {
    pub interval: Duration,
    pub rain_column: String,
    pub rolling_window: usize,
}

/// Everything that can fail for a single station within a cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed {
        processed: usize,
        failed: usize,
        applied: usize,
    },
    /// A cycle was already running; this invocation had no side effects.
    Skipped,
}

pub struct Heartbeat {
    registry: Arc<dyn StationRegistry>,
    transport: Arc<dyn FileTransport>,
    batch: BatchUpdater,
    cfg: HeartbeatCfg,
    /// Re-entrancy guard: true while a cycle is running.
    running: AtomicBool,
    /// In-process view of the fleet, loaded on first activation and kept in
    /// sync with what each batch writes.
    stations: RwLock<Vec<StationSnapshot>>,
    history: CycleHistory,
}

impl Heartbeat {
    pub fn new(
        registry: Arc<dyn StationRegistry>,
        transport: Arc<dyn FileTransport>,
        cfg: HeartbeatCfg,
    ) -> Self {
        ensure_metrics_described();
        Self {
            batch: BatchUpdater::new(registry.clone()),
            registry,
            transport,
            cfg,
            running: AtomicBool::new(false),
            stations: RwLock::new(Vec::new()),
            history: CycleHistory::with_capacity(200),
        }
    }

    /// Spawn the interval loop. The first tick fires immediately so metrics
    /// are fresh as soon as the pipeline starts. The loop exits when
    /// `shutdown` flips to true (or its sender is dropped); a shutdown in
    /// progress never starts a new tick.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.cfg.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = self.run_cycle().await;
                    }
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("heartbeat scheduler stopped");
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stations_view(&self) -> Vec<StationSnapshot> {
        self.stations.read().expect("station view lock poisoned").clone()
    }

    pub fn recent_cycles(&self, n: usize) -> Vec<CycleSummary> {
        self.history.snapshot_last_n(n)
    }

    /// Run one cycle now, unless one is already in flight.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self.running.swap(true, Ordering::SeqCst) {
            counter!("heartbeat_overlap_skipped_total").increment(1);
            tracing::debug!("previous cycle still running, tick dropped");
            return CycleOutcome::Skipped;
        }
        let outcome = self.cycle_inner().await;
        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    async fn cycle_inner(&self) -> CycleOutcome {
        let started = Instant::now();

        let stations = match self.load_stations().await {
            Ok(stations) => stations,
            Err(outcome) => return outcome,
        };

        let eligible: Vec<&StationSnapshot> = stations
            .iter()
            .filter(|s| {
                if !s.is_available || s.ftp_file_path.is_none() {
                    tracing::debug!(station = s.id, "station not eligible for ingestion, skipped");
                    return false;
                }
                true
            })
            .collect();

        let results = join_all(eligible.iter().map(|station| async move {
            let path = station.ftp_file_path.as_deref().expect("filtered above");
            match self.process_station(station, path).await {
                Ok(item) => (item, false),
                Err(e) => {
                    counter!("station_failures_total").increment(1);
                    tracing::warn!(
                        station = station.id,
                        path,
                        error = %e,
                        "station cycle failed, excluded from batch"
                    );
                    (None, true)
                }
            }
        }))
        .await;

        let failed = results.iter().filter(|(_, failed)| *failed).count();
        let items: Vec<BatchUpdateItem> =
            results.into_iter().filter_map(|(item, _)| item).collect();

        let applied = if items.is_empty() {
            0
        } else {
            match self.batch.apply(&items).await {
                Ok(n) => {
                    self.refresh_view(&items);
                    n
                }
                Err(e) => {
                    // Nothing was partially applied; the next tick retries
                    // with fresh data.
                    tracing::warn!(error = %e, "batch submission failed for this cycle");
                    0
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        counter!("heartbeat_cycles_total").increment(1);
        gauge!("heartbeat_last_run_ts").set(now_unix() as f64);
        self.history.push(CycleSummary {
            ts_unix: now_unix(),
            stations_seen: eligible.len(),
            stations_failed: failed,
            applied,
            duration_ms,
        });
        tracing::info!(
            stations = eligible.len(),
            failed,
            applied,
            duration_ms,
            "heartbeat cycle"
        );

        CycleOutcome::Completed {
            processed: eligible.len(),
            failed,
            applied,
        }
    }

    /// Return the in-process fleet view, loading it from the registry on
    /// first activation.
    async fn load_stations(&self) -> Result<Vec<StationSnapshot>, CycleOutcome> {
        {
            let view = self.stations.read().expect("station view lock poisoned");
            if !view.is_empty() {
                return Ok(view.clone());
            }
        }
        match self.registry.list_stations().await {
            Ok(fresh) => {
                let mut view = self.stations.write().expect("station view lock poisoned");
                *view = fresh.clone();
                Ok(fresh)
            }
            Err(e) => {
                tracing::warn!(error = %e, "station registry read failed, cycle abandoned");
                Err(CycleOutcome::Completed {
                    processed: 0,
                    failed: 0,
                    applied: 0,
                })
            }
        }
    }

    async fn process_station(
        &self,
        station: &StationSnapshot,
        path: &str,
    ) -> Result<Option<BatchUpdateItem>, CycleError> {
        let content = self.transport.fetch_raw(path).await?;
        let table = parse_table(&content, Layout::Simple)?;
        // Thresholds are re-read per cycle: the CMS may retune a channel
        // ceiling between ticks.
        let thresholds = self.registry.get_station_thresholds(station.id).await?;
        let metrics = compute_station_metrics(
            &table,
            &thresholds,
            &self.cfg.rain_column,
            self.cfg.rolling_window,
        );
        if metrics.is_none() {
            tracing::debug!(station = station.id, path, "no usable rows, station skipped");
        }
        Ok(metrics.map(|m| BatchUpdateItem {
            station_id: station.id,
            soil_saturation: m.soil_saturation,
            precipitation: m.precipitation,
        }))
    }

    /// Mirror a successfully applied batch into the in-process view so
    /// subsequent reads see fresh values without a registry round-trip.
    fn refresh_view(&self, items: &[BatchUpdateItem]) {
        let now = chrono::Utc::now();
        let mut view = self.stations.write().expect("station view lock poisoned");
        for item in items {
            if let Some(station) = view.iter_mut().find(|s| s.id == item.station_id) {
                station.soil_saturation = Some(item.soil_saturation);
                station.precipitation = Some(item.precipitation);
                station.last_updated = Some(now);
            }
        }
    }
}
