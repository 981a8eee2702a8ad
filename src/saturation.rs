// src/saturation.rs
//! Per-station saturation and precipitation from the latest parsed rows.
//!
//! Saturation is the mean of `value / channel_max` over the channels where
//! both sides are usable, scaled to a percentage. Channels with a missing or
//! zero maximum are excluded from the mean, not treated as 0%. A station
//! with no computable channel still reports 0 so it never blocks the batch.

use crate::aggregate::{parse_num, round2, rolling_total};
use crate::columns::ColumnMap;
use crate::station::StationThresholds;
use crate::table::ParsedTable;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationMetrics {
    pub soil_saturation: f64,
    pub precipitation: f64,
}

/// Compute a station's derived metrics from its latest-snapshot file.
///
/// Returns `None` when the file yielded no usable rows; the station is then
/// simply absent from the cycle's batch.
pub fn compute_station_metrics(
    table: &ParsedTable,
    thresholds: &StationThresholds,
    rain_column: &str,
    window: usize,
) -> Option<StationMetrics> {
    let latest = table.rows.last()?;
    let map = ColumnMap::resolve(&table.header);
    let maxima = thresholds.as_array();

    let mut ratios = Vec::with_capacity(4);
    for ch in 0..4 {
        let value = map.wc[ch]
            .as_deref()
            .and_then(|col| latest.get(col))
            .and_then(|raw| parse_num(raw));
        let max = maxima[ch].filter(|m| *m != 0.0);
        if let (Some(v), Some(m)) = (value, max) {
            ratios.push(v / m);
        }
    }

    let soil_saturation = if ratios.is_empty() {
        0.0
    } else {
        round2(100.0 * ratios.iter().sum::<f64>() / ratios.len() as f64)
    };

    Some(StationMetrics {
        soil_saturation,
        precipitation: round2(rolling_total(table, rain_column, window)),
    })
}
