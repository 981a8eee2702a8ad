// src/aggregate.rs
//! Daily and windowed aggregation over parsed station records.
//!
//! Two separately named functions with deliberately different failure
//! policies:
//! - [`daily_averages`] skips non-numeric channel values (the record still
//!   counts toward the day's denominator) and refuses to run when a required
//!   column cannot be resolved at all;
//! - [`rolling_total`] coerces missing/non-numeric values to 0, because a
//!   short gap in a 12-row window must not blank the whole total.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::columns::{resolve_rain_column, ColumnMap};
use crate::table::ParsedTable;

/// Number of trailing raw rows summed for the short-horizon precipitation
/// total (≈ last 12 hours at hourly cadence).
pub const ROLLING_WINDOW_ROWS: usize = 12;

#[derive(Debug, Error)]
pub enum AggregateError {
    /// One or more required logical columns are entirely absent from the
    /// header. A partial file is not silently degraded to fewer channels.
    #[error("unresolved source columns: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },
}

/// One calendar day of readings reduced to per-channel means.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    /// Number of readings contributing to this day (the mean denominator).
    pub count: usize,
    /// Per-channel mean, rounded to 2 decimals. `None` when no reading that
    /// day carried a numeric value for the channel.
    pub wc_avg: [Option<f64>; 4],
}

/// Group readings by calendar day and reduce each group to channel means.
///
/// Readings without a parseable timestamp are dropped, never defaulted to
/// "now". Results are sorted by date. Averages are only materialized at the
/// end of the pass; no partial averages escape mid-aggregation.
pub fn daily_averages(table: &ParsedTable) -> Result<Vec<DailyAggregate>, AggregateError> {
    let map = ColumnMap::resolve(&table.header);
    let missing = map.missing_history_fields();
    if !missing.is_empty() {
        return Err(AggregateError::MissingColumns {
            missing: missing.into_iter().map(String::from).collect(),
        });
    }
    let ts_col = map.timestamp.as_deref().expect("checked above");

    struct DayAcc {
        count: usize,
        sum: [f64; 4],
        seen: [bool; 4],
    }

    let mut days: BTreeMap<NaiveDate, DayAcc> = BTreeMap::new();
    for row in &table.rows {
        let Some(ts) = row.get(ts_col).and_then(|raw| parse_timestamp(raw)) else {
            continue;
        };
        let acc = days.entry(ts.date()).or_insert_with(|| DayAcc {
            count: 0,
            sum: [0.0; 4],
            seen: [false; 4],
        });
        acc.count += 1;
        for ch in 0..4 {
            let col = map.wc[ch].as_deref().expect("checked above");
            if let Some(v) = row.get(col).and_then(|raw| parse_num(raw)) {
                acc.sum[ch] += v;
                acc.seen[ch] = true;
            }
        }
    }

    Ok(days
        .into_iter()
        .map(|(date, acc)| {
            let mut wc_avg = [None; 4];
            for ch in 0..4 {
                if acc.seen[ch] {
                    wc_avg[ch] = Some(round2(acc.sum[ch] / acc.count as f64));
                }
            }
            DailyAggregate {
                date,
                count: acc.count,
                wc_avg,
            }
        })
        .collect())
}

/// Sum the configured rain column over the last `window` raw rows, in the
/// file's natural trailing order. Missing and non-numeric values count as 0.
pub fn rolling_total(table: &ParsedTable, rain_column: &str, window: usize) -> f64 {
    let Some(col) = resolve_rain_column(&table.header, rain_column) else {
        return 0.0;
    };
    table
        .rows
        .iter()
        .rev()
        .take(window)
        .map(|row| row.get(col).and_then(|raw| parse_num(raw)).unwrap_or(0.0))
        .sum()
}

/// Best-effort numeric coercion. Logger "NAN"/"INF" markers and anything
/// non-finite resolve to `None`.
pub fn parse_num(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Timestamp formats seen across the device fleet.
const TS_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    for fmt in TS_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{parse_table, Layout};

    fn history_table(content: &str) -> ParsedTable {
        parse_table(content, Layout::Simple).unwrap()
    }

    #[test]
    fn two_readings_same_day_average_to_one_row() {
        let table = history_table(
            "TS,WC1_Avg,WC2_Avg,WC3_Avg,WC4_Avg\n\
             2023-01-01 10:00,10,20,30,40\n\
             2023-01-01 11:00,12,22,32,42\n",
        );
        let days = daily_averages(&table).unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(days[0].count, 2);
        assert_eq!(
            days[0].wc_avg,
            [Some(11.0), Some(21.0), Some(31.0), Some(41.0)]
        );
    }

    #[test]
    fn readings_without_timestamp_are_dropped_not_defaulted() {
        let table = history_table(
            "TS,WC1_Avg,WC2_Avg,WC3_Avg,WC4_Avg\n\
             garbage,1,1,1,1\n\
             2023-01-02 00:30,4,4,4,4\n",
        );
        let days = daily_averages(&table).unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].count, 1);
    }

    #[test]
    fn non_numeric_channel_value_still_counts_in_denominator() {
        let table = history_table(
            "TS,WC1_Avg,WC2_Avg,WC3_Avg,WC4_Avg\n\
             2023-01-01 10:00,NAN,20,30,40\n\
             2023-01-01 11:00,12,22,32,42\n",
        );
        let days = daily_averages(&table).unwrap();
        // wc1 sum is 12 over the full day count of 2.
        assert_eq!(days[0].wc_avg[0], Some(6.0));
        assert_eq!(days[0].wc_avg[1], Some(21.0));
    }

    #[test]
    fn channel_with_no_numeric_values_stays_none() {
        let table = history_table(
            "TS,WC1_Avg,WC2_Avg,WC3_Avg,WC4_Avg\n\
             2023-01-01 10:00,NAN,20,30,40\n",
        );
        let days = daily_averages(&table).unwrap();
        assert_eq!(days[0].wc_avg[0], None);
        assert_eq!(days[0].count, 1);
    }

    #[test]
    fn missing_channel_column_is_an_error_naming_the_field() {
        let table = history_table("TS,WC1_Avg,WC2_Avg,WC3_Avg\n2023-01-01 10:00,1,2,3\n");
        let err = daily_averages(&table).unwrap_err();
        match err {
            AggregateError::MissingColumns { missing } => {
                assert_eq!(missing, vec!["wc4".to_string()]);
            }
        }
    }

    #[test]
    fn days_come_out_sorted() {
        let table = history_table(
            "TS,WC1_Avg,WC2_Avg,WC3_Avg,WC4_Avg\n\
             2023-01-03 10:00,1,1,1,1\n\
             2023-01-01 10:00,2,2,2,2\n\
             2023-01-02 10:00,3,3,3,3\n",
        );
        let days = daily_averages(&table).unwrap();
        let dates: Vec<_> = days.iter().map(|d| d.date.to_string()).collect();
        assert_eq!(dates, vec!["2023-01-01", "2023-01-02", "2023-01-03"]);
    }

    #[test]
    fn rolling_total_sums_last_rows_and_zero_fills() {
        let mut content = String::from("TS,Rain_mm_Tot\n");
        for i in 0..20 {
            content.push_str(&format!("2023-01-01 {:02}:00,1.5\n", i));
        }
        content.push_str("2023-01-01 20:00,NAN\n");
        let table = history_table(&content);
        // Last 12 rows: 11 × 1.5 + one NAN coerced to 0.
        assert!((rolling_total(&table, "Rain_mm_Tot", 12) - 16.5).abs() < 1e-9);
    }

    #[test]
    fn rolling_total_with_absent_column_is_zero() {
        let table = history_table("TS,WC1_Avg\n2023-01-01 10:00,5\n");
        assert_eq!(rolling_total(&table, "Rain_mm_Tot", 12), 0.0);
    }

    #[test]
    fn rolling_total_window_larger_than_file_uses_all_rows() {
        let table = history_table("TS,Rain_mm_Tot\n2023-01-01 10:00,0.2\n2023-01-01 11:00,0.3\n");
        assert!((rolling_total(&table, "Rain_mm_Tot", 12) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn timestamp_formats_from_the_fleet_parse() {
        assert!(parse_timestamp("2023-01-01 10:00:00").is_some());
        assert!(parse_timestamp("2023-01-01 10:00").is_some());
        assert!(parse_timestamp("01.02.2023 10:00:00").is_some());
        assert!(parse_timestamp("2023-01-01T10:00:00Z").is_some());
        assert!(parse_timestamp("not-a-time").is_none());
    }
}
